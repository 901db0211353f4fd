mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use workvisor::{
    ControlEvent, Daemon, EventKind, LogWriter, RuntimeError, ServerHooks, WorkerError,
    WorkerState,
};

use common::{base_config, init_tracing, CrashyWorker, EventLog, FlagWorker, SelfStoppingWorker};

#[tokio::test]
async fn graceful_stop_runs_stop_hook_once_and_exits_zero() {
    init_tracing();
    let worker = FlagWorker::new();
    let log = EventLog::new();
    let daemon = Daemon::builder()
        .with_config(base_config(1))
        .with_worker(worker.clone())
        .with_subscriber(Arc::new(LogWriter))
        .with_subscriber(log.clone())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;
    control.send(ControlEvent::GracefulStop);

    let code = handle.await.unwrap();
    assert_eq!(code, 0);
    // The stop hook runs on a spawned task; give it a beat to settle.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(worker.runs.load(Ordering::SeqCst), 1);
    assert_eq!(worker.stops.load(Ordering::SeqCst), 1);
    assert_eq!(log.count(EventKind::ShutdownRequested), 1);
    assert_eq!(log.count(EventKind::WorkerStopped), 1);
}

#[tokio::test]
async fn a_worker_can_ask_its_own_server_to_stop() {
    init_tracing();
    let log = EventLog::new();
    let daemon = Daemon::builder()
        .with_config(base_config(1))
        .with_worker(Arc::new(SelfStoppingWorker))
        .with_subscriber(log.clone())
        .build();

    // No external control: the worker steers the server by itself.
    let code = daemon.run().await;
    assert_eq!(code, 0);
    assert_eq!(log.count(EventKind::ShutdownRequested), 1);
    assert_eq!(log.count(EventKind::WorkerStopped), 1);
}

#[tokio::test]
async fn repeated_graceful_stop_reaches_the_same_terminal_state() {
    init_tracing();
    let worker = FlagWorker::new();
    let daemon = Daemon::builder()
        .with_config(base_config(2))
        .with_worker(worker.clone())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;
    control.send(ControlEvent::GracefulStop);
    sleep(Duration::from_millis(20)).await;
    control.send(ControlEvent::GracefulStop);

    assert_eq!(handle.await.unwrap(), 0);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(worker.stops.load(Ordering::SeqCst), 2); // once per slot
}

struct OrderedHooks {
    order: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl ServerHooks for OrderedHooks {
    async fn before_run(&self) -> Result<(), WorkerError> {
        self.order.lock().unwrap().push("before_run");
        Ok(())
    }

    async fn after_run(&self) -> Result<(), WorkerError> {
        self.order.lock().unwrap().push("after_run");
        Ok(())
    }
}

#[tokio::test]
async fn zero_workers_terminates_cleanly_through_both_hooks() {
    init_tracing();
    let hooks = Arc::new(OrderedHooks {
        order: Mutex::new(Vec::new()),
    });
    let daemon = Daemon::builder()
        .with_config(base_config(0))
        .with_worker(FlagWorker::new())
        .with_server_hooks(hooks.clone())
        .build();

    let code = daemon.run().await;
    assert_eq!(code, 0);
    assert_eq!(*hooks.order.lock().unwrap(), vec!["before_run", "after_run"]);
}

#[tokio::test]
async fn immediate_stop_is_dropped_on_the_embedded_backend() {
    init_tracing();
    let worker = FlagWorker::new();
    let daemon = Daemon::builder()
        .with_config(base_config(1))
        .with_worker(worker.clone())
        .build();
    let control = daemon.control();
    let tracker = daemon.tracker();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;
    control.send(ControlEvent::ImmediateStop);
    sleep(Duration::from_millis(100)).await;

    // The request was dropped: the worker is still live.
    assert_eq!(tracker.state_of(0).await, Some(WorkerState::Running));

    control.send(ControlEvent::GracefulStop);
    assert_eq!(handle.await.unwrap(), 0);
}

#[tokio::test]
async fn crashed_worker_is_respawned_subject_to_pacing() {
    init_tracing();
    let worker = CrashyWorker::new();
    let log = EventLog::new();
    let mut config = base_config(1);
    config.start_worker_delay = Duration::from_millis(60);
    config.start_worker_delay_rand = 0.0;

    let daemon = Daemon::builder()
        .with_config(config)
        .with_worker(worker.clone())
        .with_subscriber(log.clone())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(300)).await;
    control.send(ControlEvent::GracefulStop);
    assert_eq!(handle.await.unwrap(), 0);

    let runs = worker.runs.load(Ordering::SeqCst);
    assert!(runs >= 2, "expected respawns, got {runs} runs");
    // 300ms with a 60ms floor between starts bounds the incarnation count.
    assert!(runs <= 7, "pacing ignored: {runs} runs in 300ms");
    assert!(log.count(EventKind::WorkerCrashed) >= 2);
    assert!(log.count(EventKind::WorkerRestartScheduled) >= 2);
}

#[tokio::test]
async fn reload_shrink_stops_the_highest_slots_only() {
    init_tracing();
    let desired = Arc::new(AtomicUsize::new(4));
    let loader_desired = desired.clone();
    let worker = FlagWorker::new();
    let daemon = Daemon::builder()
        .with_loader(move || {
            let mut config = base_config(0);
            config.workers = loader_desired.load(Ordering::SeqCst);
            Ok::<_, RuntimeError>(config)
        })
        .with_worker(worker.clone())
        .build();
    let control = daemon.control();
    let tracker = daemon.tracker();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;
    assert_eq!(worker.runs.load(Ordering::SeqCst), 4);

    desired.store(2, Ordering::SeqCst);
    control.send(ControlEvent::Reload);
    sleep(Duration::from_millis(200)).await;

    assert_eq!(tracker.state_of(0).await, Some(WorkerState::Running));
    assert_eq!(tracker.state_of(1).await, Some(WorkerState::Running));
    assert_eq!(tracker.state_of(2).await, Some(WorkerState::Finished));
    assert_eq!(tracker.state_of(3).await, Some(WorkerState::Finished));

    control.send(ControlEvent::GracefulStop);
    assert_eq!(handle.await.unwrap(), 0);
    // The surviving slots never restarted.
    assert_eq!(worker.runs.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn reloading_the_same_configuration_is_a_noop_on_the_pool() {
    init_tracing();
    let worker = FlagWorker::new();
    let log = EventLog::new();
    let daemon = Daemon::builder()
        .with_config(base_config(2))
        .with_worker(worker.clone())
        .with_subscriber(log.clone())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;
    control.send(ControlEvent::Reload);
    sleep(Duration::from_millis(150)).await;

    assert_eq!(log.count(EventKind::ReloadApplied), 1);
    assert_eq!(log.count(EventKind::WorkerStopped), 0);
    assert_eq!(worker.runs.load(Ordering::SeqCst), 2);

    control.send(ControlEvent::GracefulStop);
    assert_eq!(handle.await.unwrap(), 0);
}

#[tokio::test]
async fn invalid_reload_is_rejected_and_the_pool_keeps_running() {
    init_tracing();
    let poison = Arc::new(AtomicUsize::new(0));
    let loader_poison = poison.clone();
    let worker = FlagWorker::new();
    let log = EventLog::new();
    let daemon = Daemon::builder()
        .with_loader(move || {
            let mut config = base_config(2);
            if loader_poison.load(Ordering::SeqCst) != 0 {
                config.start_worker_delay_rand = 2.0;
            }
            Ok::<_, RuntimeError>(config)
        })
        .with_worker(worker.clone())
        .with_subscriber(log.clone())
        .build();
    let control = daemon.control();
    let tracker = daemon.tracker();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;

    poison.store(1, Ordering::SeqCst);
    control.send(ControlEvent::Reload);
    sleep(Duration::from_millis(150)).await;

    assert_eq!(log.count(EventKind::ReloadRejected), 1);
    assert_eq!(log.count(EventKind::ReloadApplied), 0);
    assert_eq!(tracker.state_of(0).await, Some(WorkerState::Running));
    assert_eq!(tracker.state_of(1).await, Some(WorkerState::Running));

    control.send(ControlEvent::GracefulStop);
    assert_eq!(handle.await.unwrap(), 0);
}
