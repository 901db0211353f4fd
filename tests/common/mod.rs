#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use workvisor::{
    Config, Event, EventKind, KillStage, Subscribe, Worker, WorkerContext, WorkerError,
};

/// Baseline configuration for tests: tight pacing, no jitter.
pub fn base_config(workers: usize) -> Config {
    let mut config = Config::default();
    config.workers = workers;
    config.start_worker_delay = Duration::ZERO;
    config.start_worker_delay_rand = 0.0;
    config
}

/// Worker that runs until stopped, counting runs and stop-hook calls.
pub struct FlagWorker {
    pub runs: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FlagWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Worker for FlagWorker {
    async fn run(&self, ctx: WorkerContext) -> Result<(), WorkerError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        while !ctx.stop_requested() {
            ctx.heartbeat();
            ctx.wait_for_stop(Some(Duration::from_millis(10))).await;
        }
        Ok(())
    }

    async fn stop(&self, _ctx: &WorkerContext) -> Result<(), WorkerError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Worker that fails on every run.
pub struct CrashyWorker {
    pub runs: AtomicUsize,
}

impl CrashyWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Worker for CrashyWorker {
    async fn run(&self, _ctx: WorkerContext) -> Result<(), WorkerError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Err(WorkerError::failed("induced failure"))
    }
}

/// Worker that ignores the stop flag until a test-owned release is flipped.
pub struct StubbornWorker {
    pub release: AtomicBool,
}

impl StubbornWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            release: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Worker for StubbornWorker {
    async fn run(&self, ctx: WorkerContext) -> Result<(), WorkerError> {
        while !self.release.load(Ordering::SeqCst) {
            ctx.heartbeat();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }
}

/// Worker that asks its own server to stop after the first work cycle.
pub struct SelfStoppingWorker;

#[async_trait]
impl Worker for SelfStoppingWorker {
    async fn run(&self, ctx: WorkerContext) -> Result<(), WorkerError> {
        ctx.heartbeat();
        if !ctx.wait_for_stop(Some(Duration::from_millis(50))).await {
            ctx.server().request_stop();
        }
        ctx.wait_for_stop(None).await;
        Ok(())
    }
}

/// Worker that acknowledges a stop but takes a while to wind down.
pub struct SlowStopWorker {
    pub linger: Duration,
}

impl SlowStopWorker {
    pub fn new(linger: Duration) -> Arc<Self> {
        Arc::new(Self { linger })
    }
}

#[async_trait]
impl Worker for SlowStopWorker {
    async fn run(&self, ctx: WorkerContext) -> Result<(), WorkerError> {
        loop {
            ctx.heartbeat();
            if ctx.wait_for_stop(Some(Duration::from_millis(10))).await {
                tokio::time::sleep(self.linger).await;
                return Ok(());
            }
        }
    }
}

/// Records every event for post-run assertions.
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub fn stage_entries(&self, stage: KillStage) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == EventKind::StopStageEntered && e.stage == Some(stage))
            .count()
    }

    pub fn signals_sent(&self, stage: KillStage) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == EventKind::StopSignalSent && e.stage == Some(stage))
            .count()
    }
}

#[async_trait]
impl Subscribe for EventLog {
    async fn on_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn name(&self) -> &'static str {
        "event-log"
    }
}

/// Installs a quiet tracing subscriber once per test binary.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
