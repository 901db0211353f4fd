//! # Logging subscriber.
//!
//! [`LogWriter`] bridges lifecycle events onto the `tracing` facade in a
//! human-readable form. The embedding application decides where the records
//! go by installing its own `tracing` subscriber; log sinks and rotation are
//! outside this crate.

use async_trait::async_trait;

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Built-in subscriber emitting every lifecycle event through `tracing`.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let worker = e.worker;
        let attempt = e.attempt;
        match e.kind {
            EventKind::WorkerStarting => {
                tracing::info!(worker, attempt, "worker starting");
            }
            EventKind::WorkerRunning => {
                tracing::info!(worker, attempt, "worker running");
            }
            EventKind::WorkerStopped => {
                tracing::info!(worker, attempt, "worker stopped");
            }
            EventKind::WorkerCrashed => {
                tracing::warn!(worker, attempt, error = e.error.as_deref(), "worker crashed");
            }
            EventKind::WorkerStalled => {
                tracing::warn!(worker, attempt, "worker heartbeat stalled");
            }
            EventKind::WorkerRestartScheduled => {
                tracing::info!(worker, delay = ?e.delay, "worker restart scheduled");
            }
            EventKind::StopStageEntered => {
                tracing::info!(worker, stage = e.stage.map(|s| s.as_label()), "stop stage entered");
            }
            EventKind::StopSignalSent => {
                tracing::debug!(worker, stage = e.stage.map(|s| s.as_label()), "stop signal sent");
            }
            EventKind::ShutdownRequested => {
                tracing::info!("shutdown requested");
            }
            EventKind::ReloadApplied => {
                tracing::info!("configuration reloaded");
            }
            EventKind::ReloadRejected => {
                tracing::warn!(error = e.error.as_deref(), "reload rejected");
            }
            EventKind::DumpWritten => {
                tracing::info!(error = e.error.as_deref(), "status dump written");
            }
            EventKind::ServerStarted => {
                tracing::info!(generation = attempt, "server started");
            }
            EventKind::ServerStopped => {
                tracing::info!(generation = attempt, error = e.error.as_deref(), "server stopped");
            }
            EventKind::ServerRestartScheduled => {
                tracing::info!(delay = ?e.delay, "server restart scheduled");
            }
            EventKind::DetachRequested => {
                tracing::info!("live restart requested");
            }
            EventKind::DetachTimedOut => {
                tracing::info!("detach deadline expired, starting replacement server");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
