mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use workvisor::{ControlEvent, Daemon, EventKind, ServerHooks, WorkerError};

use common::{base_config, init_tracing, EventLog, FlagWorker, SlowStopWorker};

/// Panics the first server generation to simulate a server crash.
struct CrashOnceHooks {
    crashed: AtomicBool,
}

#[async_trait]
impl ServerHooks for CrashOnceHooks {
    async fn before_run(&self) -> Result<(), WorkerError> {
        if !self.crashed.swap(true, Ordering::SeqCst) {
            panic!("induced server crash");
        }
        Ok(())
    }
}

#[tokio::test]
async fn supervisor_respawns_a_crashed_server_after_the_wait() {
    init_tracing();
    let log = EventLog::new();
    let mut config = base_config(1);
    config.supervisor = true;
    config.server_restart_wait = Duration::from_millis(100);

    let daemon = Daemon::builder()
        .with_config(config)
        .with_worker(FlagWorker::new())
        .with_server_hooks(Arc::new(CrashOnceHooks {
            crashed: AtomicBool::new(false),
        }))
        .with_subscriber(log.clone())
        .build();
    let control = daemon.control();

    let started = tokio::time::Instant::now();
    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(400)).await;
    control.send(ControlEvent::GracefulStop);

    assert_eq!(handle.await.unwrap(), 0);
    assert_eq!(log.count(EventKind::ServerStarted), 2);
    assert_eq!(log.count(EventKind::ServerRestartScheduled), 1);
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn graceful_restart_replaces_the_server_process() {
    init_tracing();
    let log = EventLog::new();
    let mut config = base_config(1);
    config.supervisor = true;
    config.restart_server_process = true;
    config.server_restart_wait = Duration::from_millis(50);

    let worker = FlagWorker::new();
    let daemon = Daemon::builder()
        .with_config(config)
        .with_worker(worker.clone())
        .with_subscriber(log.clone())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;
    control.send(ControlEvent::GracefulRestart);
    sleep(Duration::from_millis(300)).await;
    control.send(ControlEvent::GracefulStop);

    assert_eq!(handle.await.unwrap(), 0);
    assert_eq!(log.count(EventKind::ServerStarted), 2);
    assert!(worker.runs.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn detach_deadline_spawns_a_replacement_beside_the_old_server() {
    init_tracing();
    let log = EventLog::new();
    let mut config = base_config(1);
    config.supervisor = true;
    config.enable_detach = true;
    config.server_detach_wait = Duration::from_millis(150);

    let daemon = Daemon::builder()
        .with_config(config)
        .with_worker(SlowStopWorker::new(Duration::from_millis(400)))
        .with_subscriber(log.clone())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;
    control.send(ControlEvent::Detach);
    sleep(Duration::from_millis(250)).await;

    // Deadline fired with the old generation still draining; the
    // replacement runs alongside it.
    assert_eq!(log.count(EventKind::DetachRequested), 1);
    assert_eq!(log.count(EventKind::DetachTimedOut), 1);
    assert_eq!(log.count(EventKind::ServerStarted), 2);
    assert_eq!(log.count(EventKind::ServerStopped), 0);

    // The old generation eventually finishes and is reaped.
    sleep(Duration::from_millis(400)).await;
    assert_eq!(log.count(EventKind::ServerStopped), 1);

    control.send(ControlEvent::GracefulStop);
    assert_eq!(handle.await.unwrap(), 0);
    assert_eq!(log.count(EventKind::ServerStopped), 2);
}

#[tokio::test]
async fn detach_requests_while_detaching_are_ignored() {
    init_tracing();
    let log = EventLog::new();
    let mut config = base_config(1);
    config.supervisor = true;
    config.server_detach_wait = Duration::from_millis(200);

    let daemon = Daemon::builder()
        .with_config(config)
        .with_worker(SlowStopWorker::new(Duration::from_millis(400)))
        .with_subscriber(log.clone())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;
    control.send(ControlEvent::Detach);
    sleep(Duration::from_millis(50)).await;
    control.send(ControlEvent::Detach);
    sleep(Duration::from_millis(50)).await;
    control.send(ControlEvent::Detach);
    sleep(Duration::from_millis(300)).await;

    // Only one replacement was started for the whole detach episode.
    assert_eq!(log.count(EventKind::DetachRequested), 1);
    assert_eq!(log.count(EventKind::ServerStarted), 2);

    control.send(ControlEvent::GracefulStop);
    assert_eq!(handle.await.unwrap(), 0);
}

#[tokio::test]
async fn detach_deadline_spawns_the_replacement_even_with_exit_on_detach() {
    init_tracing();
    let log = EventLog::new();
    let mut config = base_config(1);
    config.supervisor = true;
    config.exit_on_detach = true;
    config.server_detach_wait = Duration::from_millis(150);

    let daemon = Daemon::builder()
        .with_config(config)
        .with_worker(SlowStopWorker::new(Duration::from_millis(400)))
        .with_subscriber(log.clone())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;
    control.send(ControlEvent::Detach);
    sleep(Duration::from_millis(250)).await;

    // The old generation outlived the deadline, so the replacement starts
    // regardless; exit_on_detach only covers a drain that beats the
    // deadline.
    assert_eq!(log.count(EventKind::DetachTimedOut), 1);
    assert_eq!(log.count(EventKind::ServerStarted), 2);

    control.send(ControlEvent::GracefulStop);
    assert_eq!(handle.await.unwrap(), 0);
}

#[tokio::test]
async fn exit_on_detach_ends_the_supervisor_instead_of_respawning() {
    init_tracing();
    let log = EventLog::new();
    let mut config = base_config(1);
    config.supervisor = true;
    config.exit_on_detach = true;
    config.server_detach_wait = Duration::from_millis(500);

    let daemon = Daemon::builder()
        .with_config(config)
        .with_worker(FlagWorker::new())
        .with_subscriber(log.clone())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;
    control.send(ControlEvent::Detach);

    // The old server drains quickly, before the deadline; the supervisor
    // exits rather than spawning a replacement.
    assert_eq!(handle.await.unwrap(), 0);
    assert_eq!(log.count(EventKind::ServerStarted), 1);
    assert_eq!(log.count(EventKind::DetachRequested), 1);
}
