//! # Heartbeat channel: one-way liveness signal from worker to monitor.
//!
//! For `process` workers the channel is a unidirectional byte pipe created
//! before the child is spawned: the child periodically writes one byte, a
//! blocking reader task drains the pipe and notifies the monitor, which
//! refreshes the worker's `last_heartbeat_at` whenever anything arrived.
//! Silence longer than `worker_heartbeat_timeout` marks the worker stalled.
//!
//! For `thread`/`embedded` workers the pipe is skipped and the timestamp is
//! refreshed in place, because an in-process worker cannot usefully detect
//! its own stall.
//!
//! ## Ownership
//! The monitor owns the read side (the reader task holds the fd); the
//! worker owns the write end. The write end's file descriptor is inherited
//! across exec and announced to the child through [`HEARTBEAT_FD_ENV`].

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Environment variable carrying the heartbeat write fd to a worker child.
pub(crate) const HEARTBEAT_FD_ENV: &str = "WORKVISOR_HEARTBEAT_FD";
/// Environment variable carrying the slot id to a worker child.
pub(crate) const WORKER_ID_ENV: &str = "WORKVISOR_WORKER_ID";

/// Shared liveness timestamp for in-process workers.
#[derive(Clone)]
pub(crate) struct BeatStamp {
    last: Arc<Mutex<Instant>>,
}

impl BeatStamp {
    pub(crate) fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Refreshes the timestamp to now.
    pub(crate) fn touch(&self) {
        *self.last.lock().expect("beat stamp poisoned") = Instant::now();
    }

    /// Time since the last refresh.
    pub(crate) fn elapsed(&self) -> Duration {
        self.last.lock().expect("beat stamp poisoned").elapsed()
    }
}

/// Worker-side handle: one `beat()` per work cycle.
#[derive(Clone)]
pub(crate) enum HeartbeatHandle {
    /// In-process worker: refresh the shared timestamp.
    Local(BeatStamp),
    /// Process worker child: write one byte into the pipe.
    #[cfg(unix)]
    Pipe(Arc<unix::HeartbeatWriter>),
}

impl HeartbeatHandle {
    pub(crate) fn beat(&self) {
        match self {
            HeartbeatHandle::Local(stamp) => stamp.touch(),
            #[cfg(unix)]
            HeartbeatHandle::Pipe(writer) => {
                if let Err(e) = writer.beat() {
                    tracing::debug!(error = %e, "heartbeat write failed");
                }
            }
        }
    }
}

#[cfg(unix)]
pub(crate) use unix::{heartbeat_pair, HeartbeatWriter, PipeReader};

#[cfg(unix)]
mod unix {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

    use nix::errno::Errno;
    use tokio::sync::mpsc;

    use super::HEARTBEAT_FD_ENV;

    /// Creates the pipe for one worker child.
    ///
    /// Returns the monitor-side reader and the raw write end. The read end
    /// is serviced by a blocking reader task that drains the pipe until the
    /// child closes it; the write end carries no close-on-exec flag so the
    /// child inherits it, and the parent drops its copy right after the
    /// spawn.
    pub(crate) fn heartbeat_pair() -> io::Result<(PipeReader, OwnedFd)> {
        let (read_end, write_end) = nix::unistd::pipe()?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || drain_loop(read_end, tx));
        Ok((PipeReader { rx }, write_end))
    }

    /// Reads until EOF, reporting each batch of liveness bytes.
    fn drain_loop(fd: OwnedFd, tx: mpsc::UnboundedSender<()>) {
        let mut buf = [0u8; 64];
        loop {
            match nix::unistd::read(fd.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(()).is_err() {
                        break;
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
    }

    /// Monitor-side view of the heartbeat pipe.
    pub(crate) struct PipeReader {
        rx: mpsc::UnboundedReceiver<()>,
    }

    impl PipeReader {
        /// Waits for the next batch of heartbeat bytes.
        ///
        /// Returns `Ok(true)` when at least one byte arrived. Returns an
        /// `UnexpectedEof` error once the worker closed its write end; the
        /// caller should stop polling the pipe and rely on reaping.
        pub(crate) async fn recv_beats(&mut self) -> io::Result<bool> {
            match self.rx.recv().await {
                Some(()) => Ok(true),
                None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "pipe closed")),
            }
        }
    }

    /// Worker-child-side write end of the heartbeat pipe.
    pub(crate) struct HeartbeatWriter {
        fd: OwnedFd,
    }

    impl HeartbeatWriter {
        /// Recovers the write end announced by the parent, if any.
        pub(crate) fn from_env() -> Option<Self> {
            let raw: RawFd = std::env::var(HEARTBEAT_FD_ENV).ok()?.parse().ok()?;
            // The fd number was placed in the environment by the parent and
            // is not used by anything else in this process.
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };
            Some(Self { fd })
        }

        /// Writes one liveness byte.
        pub(crate) fn beat(&self) -> io::Result<()> {
            nix::unistd::write(&self.fd, &[0u8])?;
            Ok(())
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_tracks_elapsed_time() {
        let stamp = BeatStamp::new();
        stamp.touch();
        assert!(stamp.elapsed() < Duration::from_secs(1));
    }
}
