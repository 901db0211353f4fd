mod common;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;

use workvisor::{ControlEvent, Daemon, DumpSink, EventKind};

use common::{base_config, init_tracing, EventLog, FlagWorker};

#[tokio::test]
async fn pid_file_is_written_while_running_and_removed_on_clean_exit() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("daemon.pid");

    let mut config = base_config(1);
    config.pid_path = Some(pid_path.clone());

    let daemon = Daemon::builder()
        .with_config(config)
        .with_worker(FlagWorker::new())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;

    let contents = std::fs::read_to_string(&pid_path).unwrap();
    assert_eq!(contents.trim().parse::<u32>().unwrap(), std::process::id());

    control.send(ControlEvent::GracefulStop);
    assert_eq!(handle.await.unwrap(), 0);
    assert!(!pid_path.exists(), "pid file must go away on clean exit");
}

#[tokio::test]
async fn pid_file_collision_exits_with_the_configured_code() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("daemon.pid");
    std::fs::write(&pid_path, "4242\n").unwrap();

    let mut config = base_config(1);
    config.pid_path = Some(pid_path.clone());
    config.daemonize_error_exit_code = 3;

    let daemon = Daemon::builder()
        .with_config(config)
        .with_worker(FlagWorker::new())
        .build();

    assert_eq!(daemon.run().await, 3);
    // The foreign pid file is left alone.
    assert_eq!(std::fs::read_to_string(&pid_path).unwrap(), "4242\n");
}

/// Captures dump reports in memory instead of `/tmp`.
struct MemorySink {
    reports: Mutex<Vec<String>>,
}

impl DumpSink for MemorySink {
    fn write_dump(&self, report: &str) -> std::io::Result<PathBuf> {
        self.reports.lock().unwrap().push(report.to_string());
        Ok(PathBuf::from("memory"))
    }
}

#[tokio::test]
async fn dump_reports_the_pool_status() {
    init_tracing();
    let sink = Arc::new(MemorySink {
        reports: Mutex::new(Vec::new()),
    });
    let log = EventLog::new();
    let daemon = Daemon::builder()
        .with_config(base_config(2))
        .with_worker(FlagWorker::new())
        .with_subscriber(log.clone())
        .with_dump_sink(sink.clone())
        .build();
    let control = daemon.control();

    let handle = tokio::spawn(daemon.run());
    sleep(Duration::from_millis(100)).await;
    control.send(ControlEvent::Dump);
    sleep(Duration::from_millis(100)).await;

    {
        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("worker 0: state=running"));
        assert!(reports[0].contains("worker 1: state=running"));
    }
    assert_eq!(log.count(EventKind::DumpWritten), 1);

    control.send(ControlEvent::GracefulStop);
    assert_eq!(handle.await.unwrap(), 0);
}
