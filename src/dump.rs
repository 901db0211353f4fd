//! # Status dumps.
//!
//! A CONT signal asks whichever process received it to write a status
//! report. The report body is rendered from the [`PoolTracker`] mirror; the
//! destination is a pluggable [`DumpSink`] whose default appends to
//! `/tmp/sigdump-<pid>.log`, next to where external stacktrace dumpers for
//! this process family write theirs.

use std::io::{self, Write};
use std::path::PathBuf;

use crate::worker::WorkerState;

/// Destination for status dumps.
pub trait DumpSink: Send + Sync + 'static {
    /// Writes one report, returning where it landed.
    fn write_dump(&self, report: &str) -> io::Result<PathBuf>;
}

/// Default sink: appends to `/tmp/sigdump-<pid>.log`.
pub struct SigdumpFile;

impl DumpSink for SigdumpFile {
    fn write_dump(&self, report: &str) -> io::Result<PathBuf> {
        let path = PathBuf::from(format!("/tmp/sigdump-{}.log", std::process::id()));
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(report.as_bytes())?;
        Ok(path)
    }
}

/// Renders the worker-pool report.
pub(crate) fn render_report(snapshot: &[(usize, WorkerState, u64)]) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "-- workvisor status (pid {}, {} slots) --",
        std::process::id(),
        snapshot.len()
    );
    for (worker_id, state, attempt) in snapshot {
        let _ = writeln!(
            out,
            "worker {worker_id}: state={} attempt={attempt}",
            state.as_label()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_every_slot() {
        let report = render_report(&[
            (0, WorkerState::Running, 1),
            (1, WorkerState::StoppingGraceful, 3),
        ]);
        assert!(report.contains("2 slots"));
        assert!(report.contains("worker 0: state=running attempt=1"));
        assert!(report.contains("worker 1: state=stopping_graceful attempt=3"));
    }
}
