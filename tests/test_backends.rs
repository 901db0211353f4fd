mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::sleep;

use workvisor::{ControlEvent, Daemon, EventKind, KillStage, WorkerType};

use common::{base_config, init_tracing, EventLog, FlagWorker, StubbornWorker};

#[tokio::test]
async fn thread_worker_runs_and_stops_cooperatively() {
    init_tracing();
    let worker = FlagWorker::new();
    let mut config = base_config(2);
    config.worker_type = WorkerType::Thread;

    let daemon = Daemon::builder()
        .with_config(config)
        .with_worker(worker.clone())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(150)).await;
    control.send(ControlEvent::GracefulStop);

    assert_eq!(handle.await.unwrap(), 0);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(worker.runs.load(Ordering::SeqCst), 2);
    assert_eq!(worker.stops.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn disabled_graceful_timeout_never_escalates() {
    init_tracing();
    let worker = StubbornWorker::new();
    let log = EventLog::new();
    let mut config = base_config(1);
    config.worker_graceful_kill_timeout = None;

    let daemon = Daemon::builder()
        .with_config(config)
        .with_worker(worker.clone())
        .with_subscriber(log.clone())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;
    control.send(ControlEvent::GracefulStop);

    // The worker ignores the stop; with the timeout disabled the slot must
    // sit in the graceful stage without escalating.
    sleep(Duration::from_millis(400)).await;
    assert_eq!(log.stage_entries(KillStage::Graceful), 1);
    assert_eq!(log.stage_entries(KillStage::Immediate), 0);

    worker.release.store(true, Ordering::SeqCst);
    assert_eq!(handle.await.unwrap(), 0);
}

#[tokio::test]
async fn finite_graceful_timeout_escalates_in_bounded_time() {
    init_tracing();
    let worker = StubbornWorker::new();
    let log = EventLog::new();
    let mut config = base_config(1);
    config.worker_graceful_kill_timeout = Some(Duration::from_millis(100));
    config.worker_immediate_kill_timeout = None;

    let daemon = Daemon::builder()
        .with_config(config)
        .with_worker(worker.clone())
        .with_subscriber(log.clone())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;
    control.send(ControlEvent::GracefulStop);
    sleep(Duration::from_millis(300)).await;

    // In-process workers cannot be killed, but the stage machinery still
    // advances and records the escalation.
    assert_eq!(log.stage_entries(KillStage::Graceful), 1);
    assert_eq!(log.stage_entries(KillStage::Immediate), 1);

    worker.release.store(true, Ordering::SeqCst);
    assert_eq!(handle.await.unwrap(), 0);
}

#[cfg(unix)]
mod process_backend {
    use super::*;

    #[tokio::test]
    async fn stalled_process_worker_is_terminated_and_respawned() {
        init_tracing();
        let log = EventLog::new();
        let mut config = base_config(1);
        config.worker_type = WorkerType::Process;
        // `sleep` never heartbeats, so the stall path is the whole test.
        config.worker_spawn_cmdline = Some(vec!["sleep".to_string(), "30".to_string()]);
        config.worker_heartbeat_timeout = Duration::from_millis(300);
        config.worker_immediate_kill_interval = Duration::from_millis(100);
        config.worker_immediate_kill_interval_increment = Duration::ZERO;
        config.worker_immediate_kill_timeout = Some(Duration::from_secs(2));
        config.start_worker_delay = Duration::from_millis(100);
        config.start_worker_delay_rand = 0.0;

        let daemon = Daemon::builder()
            .with_config(config)
            .with_worker(FlagWorker::new())
            .with_subscriber(log.clone())
            .build();
        let control = daemon.control();

        let handle = tokio::spawn(daemon.run());
        sleep(Duration::from_millis(900)).await;

        assert!(log.count(EventKind::WorkerStalled) >= 1);
        assert!(log.stage_entries(KillStage::Immediate) >= 1);
        assert!(log.signals_sent(KillStage::Immediate) >= 1);
        // The killed incarnation was reaped and the slot respawned.
        assert!(log.count(EventKind::WorkerRestartScheduled) >= 1);
        assert!(log.count(EventKind::WorkerStarting) >= 2);

        control.send(ControlEvent::GracefulStop);
        assert_eq!(handle.await.unwrap(), 0);
    }
}
