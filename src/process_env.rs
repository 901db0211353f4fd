//! # Process-wide environment resource.
//!
//! Pid file, signal streams and process titles are process-global state.
//! This module models the part the core owns — the pid file — as a single
//! resource acquired once at daemon start and released on clean exit only:
//! a crashed daemon leaves its pid file behind for the operator to inspect.

use std::io::Write;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::RuntimeError;

/// Owned pid-file handle for the daemon process.
#[derive(Debug)]
pub(crate) struct ProcessEnv {
    pid_path: Option<PathBuf>,
}

impl ProcessEnv {
    /// Writes the pid file when one is configured.
    ///
    /// An existing file is a collision with another daemon and fails
    /// startup.
    pub(crate) fn acquire(config: &Config) -> Result<Self, RuntimeError> {
        if let Some(path) = &config.pid_path {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(|source| {
                    if source.kind() == std::io::ErrorKind::AlreadyExists {
                        RuntimeError::PidFileTaken { path: path.clone() }
                    } else {
                        RuntimeError::PidFile {
                            path: path.clone(),
                            source,
                        }
                    }
                })?;
            writeln!(file, "{}", std::process::id()).map_err(|source| RuntimeError::PidFile {
                path: path.clone(),
                source,
            })?;
        }
        Ok(Self {
            pid_path: config.pid_path.clone(),
        })
    }

    /// Removes the pid file. Call on clean exit only.
    pub(crate) fn release(mut self) {
        if let Some(path) = self.pid_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "removing pid file failed");
            }
        }
    }

    /// Leaves the pid file behind (crash exit path).
    pub(crate) fn abandon(mut self) {
        self.pid_path = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_pid(path: PathBuf) -> Config {
        let mut config = Config::default();
        config.pid_path = Some(path);
        config
    }

    #[test]
    fn writes_and_removes_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        let env = ProcessEnv::acquire(&config_with_pid(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim().parse::<u32>().unwrap(), std::process::id());

        env.release();
        assert!(!path.exists());
    }

    #[test]
    fn collision_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        std::fs::write(&path, "12345\n").unwrap();

        let err = ProcessEnv::acquire(&config_with_pid(path)).unwrap_err();
        assert_eq!(err.as_label(), "runtime_pid_file_taken");
    }

    #[test]
    fn abandon_keeps_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        let env = ProcessEnv::acquire(&config_with_pid(path.clone())).unwrap();
        env.abandon();
        assert!(path.exists());
    }

    #[test]
    fn no_pid_path_is_a_no_op() {
        let env = ProcessEnv::acquire(&Config::default()).unwrap();
        env.release();
    }
}
