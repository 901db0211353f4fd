//! # Daemon configuration snapshots.
//!
//! [`Config`] is one immutable snapshot of every recognized option. A fresh
//! snapshot is produced by the user-supplied [`ConfigLoader`] at startup and
//! on every reload; the core never parses configuration sources itself.
//!
//! ## Reload semantics
//! A subset of options is **dynamically reloadable**: on reload the fresh
//! value takes effect in place. All other options keep the value the daemon
//! started with and only change across a server restart. The merge is
//! performed by [`Config::apply_reload`]; a snapshot that fails
//! [`Config::validate`] is rejected and the previous snapshot retained.
//!
//! ## Sentinel values
//! - `worker_graceful_kill_timeout = None` → never escalate graceful → immediate
//!   automatically (an explicit immediate stop still applies).
//! - `worker_immediate_kill_timeout = None` → never escalate immediate → forced.
//! - `start_worker_delay = 0` → respawn as soon as a slot is reaped.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::RuntimeError;
use crate::pacing::StartPacing;

/// Which runtime handle carries one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerType {
    /// Worker future runs on the server's own scheduler.
    #[default]
    Embedded,
    /// Worker runs on a dedicated OS thread.
    Thread,
    /// Worker runs in a child OS process (Unix only).
    Process,
}

impl WorkerType {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerType::Embedded => "embedded",
            WorkerType::Thread => "thread",
            WorkerType::Process => "process",
        }
    }

    /// True when the worker is a separate OS process.
    pub fn is_process(&self) -> bool {
        matches!(self, WorkerType::Process)
    }
}

impl FromStr for WorkerType {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embedded" => Ok(WorkerType::Embedded),
            "thread" => Ok(WorkerType::Thread),
            "process" => Ok(WorkerType::Process),
            other => Err(RuntimeError::InvalidConfig {
                key: "worker_type",
                reason: format!("unknown backend {other:?}"),
            }),
        }
    }
}

/// Severity threshold for the daemon's log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }

    /// Maps to the closest `tracing` level (`fatal` collapses into error).
    pub fn to_tracing(&self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error | LogLevel::Fatal => tracing::Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(RuntimeError::InvalidConfig {
                key: "log_level",
                reason: format!("unknown level {other:?}"),
            }),
        }
    }
}

/// One immutable configuration snapshot.
///
/// Fields marked *dynamic* below take effect on reload; all others require a
/// server restart.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Daemon ---
    /// Detach into the background at startup. The detaching itself is
    /// performed by the embedding environment (init system or an external
    /// wrapper); the core only records the intent.
    pub daemonize: bool,
    /// Pid file path; `None` disables pid-file management.
    pub pid_path: Option<PathBuf>,
    /// Run the supervisor level (server restart and live restart).
    pub supervisor: bool,
    /// Cosmetic daemon process title, applied by the embedding environment.
    pub daemon_process_name: Option<String>,
    /// Drop privileges to this user at startup (applied externally).
    pub chuser: Option<String>,
    /// Drop privileges to this group at startup (applied externally).
    pub chgroup: Option<String>,
    /// Umask applied at startup (applied externally).
    pub chumask: Option<u32>,
    /// Process exit code when startup-environment setup fails.
    pub daemonize_error_exit_code: i32,

    // --- Supervisor ---
    /// Cosmetic server process title.
    pub server_process_name: Option<String>,
    /// On graceful/immediate restart, exit the whole server so the
    /// supervisor respawns it, instead of restarting workers in place.
    pub restart_server_process: bool,
    /// Map INT to live restart (detach) instead of graceful stop.
    pub enable_detach: bool,
    /// After a successful detach, exit the supervisor instead of spawning a
    /// replacement server.
    pub exit_on_detach: bool,
    /// Ignore reload requests entirely.
    pub disable_reload: bool,
    /// Minimum delay between server generations. *Dynamic.*
    pub server_restart_wait: Duration,
    /// How long a detaching server may linger before the replacement is
    /// started alongside it. *Dynamic.*
    pub server_detach_wait: Duration,

    // --- Pool ---
    /// Worker runtime backend.
    pub worker_type: WorkerType,
    /// Desired number of worker slots. *Dynamic.*
    pub workers: usize,
    /// Base delay between a slot finishing and its next start. *Dynamic.*
    pub start_worker_delay: Duration,
    /// Relative jitter spread applied to `start_worker_delay`. *Dynamic.*
    pub start_worker_delay_rand: f64,

    // --- Process backend ---
    /// Cosmetic worker process title. *Dynamic.*
    pub worker_process_name: Option<String>,
    /// Command line to launch instead of re-executing the current binary.
    /// *Dynamic.*
    pub worker_spawn_cmdline: Option<Vec<String>>,
    /// How often workers are expected to beat. *Dynamic.*
    pub worker_heartbeat_interval: Duration,
    /// Silence longer than this marks the worker stalled. *Dynamic.*
    pub worker_heartbeat_timeout: Duration,
    /// First resend interval in the graceful stage. *Dynamic.*
    pub worker_graceful_kill_interval: Duration,
    /// Per-resend increment in the graceful stage. *Dynamic.*
    pub worker_graceful_kill_interval_increment: Duration,
    /// Time in the graceful stage before escalating to immediate;
    /// `None` disables automatic escalation. *Dynamic.*
    pub worker_graceful_kill_timeout: Option<Duration>,
    /// First resend interval in the immediate stage. *Dynamic.*
    pub worker_immediate_kill_interval: Duration,
    /// Per-resend increment in the immediate stage. *Dynamic.*
    pub worker_immediate_kill_interval_increment: Duration,
    /// Time in the immediate stage before escalating to forced;
    /// `None` disables automatic escalation. *Dynamic.*
    pub worker_immediate_kill_timeout: Option<Duration>,

    // --- Logger ---
    /// Log destination path; `None` leaves output on the inherited streams.
    pub log: Option<PathBuf>,
    /// Severity threshold. *Dynamic.*
    pub log_level: LogLevel,
    /// Rotated generations to keep.
    pub log_rotate_age: u32,
    /// Rotation size threshold in bytes.
    pub log_rotate_size: u64,
    /// Mirror log output to stdout.
    pub log_stdout: bool,
    /// Mirror log output to stderr.
    pub log_stderr: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemonize: false,
            pid_path: None,
            supervisor: false,
            daemon_process_name: None,
            chuser: None,
            chgroup: None,
            chumask: None,
            daemonize_error_exit_code: 1,

            server_process_name: None,
            restart_server_process: false,
            enable_detach: true,
            exit_on_detach: false,
            disable_reload: false,
            server_restart_wait: Duration::from_secs(1),
            server_detach_wait: Duration::from_secs(10),

            worker_type: WorkerType::Embedded,
            workers: 1,
            start_worker_delay: Duration::ZERO,
            start_worker_delay_rand: 0.2,

            worker_process_name: None,
            worker_spawn_cmdline: None,
            worker_heartbeat_interval: Duration::from_secs(1),
            worker_heartbeat_timeout: Duration::from_secs(180),
            worker_graceful_kill_interval: Duration::from_secs(15),
            worker_graceful_kill_interval_increment: Duration::from_secs(10),
            worker_graceful_kill_timeout: Some(Duration::from_secs(600)),
            worker_immediate_kill_interval: Duration::from_secs(10),
            worker_immediate_kill_interval_increment: Duration::from_secs(10),
            worker_immediate_kill_timeout: Some(Duration::from_secs(600)),

            log: None,
            log_level: LogLevel::default(),
            log_rotate_age: 5,
            log_rotate_size: 1_048_576,
            log_stdout: true,
            log_stderr: true,
        }
    }
}

impl Config {
    /// Checks the snapshot for values the runtime cannot operate with.
    ///
    /// Called at startup (fatal) and on every reload (rejecting the fresh
    /// snapshot while the previous one stays in effect).
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if !(0.0..=1.0).contains(&self.start_worker_delay_rand) {
            return Err(RuntimeError::InvalidConfig {
                key: "start_worker_delay_rand",
                reason: format!("{} is outside [0.0, 1.0]", self.start_worker_delay_rand),
            });
        }
        if self.worker_heartbeat_interval.is_zero() {
            return Err(RuntimeError::InvalidConfig {
                key: "worker_heartbeat_interval",
                reason: "must be positive".to_string(),
            });
        }
        if self.worker_heartbeat_timeout.is_zero() {
            return Err(RuntimeError::InvalidConfig {
                key: "worker_heartbeat_timeout",
                reason: "must be positive".to_string(),
            });
        }
        if let Some(cmdline) = &self.worker_spawn_cmdline {
            if cmdline.is_empty() {
                return Err(RuntimeError::InvalidConfig {
                    key: "worker_spawn_cmdline",
                    reason: "must contain at least the program name".to_string(),
                });
            }
        }
        #[cfg(not(unix))]
        if self.worker_type.is_process() {
            return Err(RuntimeError::InvalidConfig {
                key: "worker_type",
                reason: "the process backend requires a Unix platform".to_string(),
            });
        }
        Ok(())
    }

    /// Merges a fresh snapshot into the running one.
    ///
    /// Dynamically reloadable options take the fresh value; everything else
    /// keeps the running value. The caller validates `fresh` first.
    pub fn apply_reload(&self, fresh: &Config) -> Config {
        Config {
            server_restart_wait: fresh.server_restart_wait,
            server_detach_wait: fresh.server_detach_wait,
            workers: fresh.workers,
            start_worker_delay: fresh.start_worker_delay,
            start_worker_delay_rand: fresh.start_worker_delay_rand,
            worker_process_name: fresh.worker_process_name.clone(),
            worker_spawn_cmdline: fresh.worker_spawn_cmdline.clone(),
            worker_heartbeat_interval: fresh.worker_heartbeat_interval,
            worker_heartbeat_timeout: fresh.worker_heartbeat_timeout,
            worker_graceful_kill_interval: fresh.worker_graceful_kill_interval,
            worker_graceful_kill_interval_increment: fresh.worker_graceful_kill_interval_increment,
            worker_graceful_kill_timeout: fresh.worker_graceful_kill_timeout,
            worker_immediate_kill_interval: fresh.worker_immediate_kill_interval,
            worker_immediate_kill_interval_increment: fresh
                .worker_immediate_kill_interval_increment,
            worker_immediate_kill_timeout: fresh.worker_immediate_kill_timeout,
            log_level: fresh.log_level,
            ..self.clone()
        }
    }

    /// Respawn pacing derived from this snapshot.
    pub fn pacing(&self) -> StartPacing {
        StartPacing {
            delay: self.start_worker_delay,
            rand: self.start_worker_delay_rand,
        }
    }
}

/// Produces configuration snapshots.
///
/// Invoked once at startup and again on every reload and server restart. The
/// core treats each returned snapshot as immutable.
pub trait ConfigLoader: Send + Sync + 'static {
    /// Builds a fresh snapshot from the configuration source.
    fn load(&self) -> Result<Config, RuntimeError>;
}

impl<F> ConfigLoader for F
where
    F: Fn() -> Result<Config, RuntimeError> + Send + Sync + 'static,
{
    fn load(&self) -> Result<Config, RuntimeError> {
        self()
    }
}

/// Loader wrapping a fixed snapshot: reload re-installs the same values.
pub(crate) struct FixedConfig(pub(crate) Config);

impl ConfigLoader for FixedConfig {
    fn load(&self) -> Result<Config, RuntimeError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().expect("defaults must validate");
    }

    #[test]
    fn rejects_out_of_range_jitter() {
        let mut config = Config::default();
        config.start_worker_delay_rand = 1.5;
        let err = config.validate().unwrap_err();
        assert_eq!(err.as_label(), "runtime_invalid_config");
    }

    #[test]
    fn rejects_empty_spawn_cmdline() {
        let mut config = Config::default();
        config.worker_spawn_cmdline = Some(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn reload_merges_only_dynamic_options() {
        let running = Config::default();
        let mut fresh = Config::default();
        fresh.workers = 8;
        fresh.worker_type = WorkerType::Thread;
        fresh.server_restart_wait = Duration::from_secs(7);
        fresh.enable_detach = false;

        let merged = running.apply_reload(&fresh);
        assert_eq!(merged.workers, 8);
        assert_eq!(merged.server_restart_wait, Duration::from_secs(7));
        // Static options keep the running values.
        assert_eq!(merged.worker_type, WorkerType::Embedded);
        assert!(merged.enable_detach);
    }

    #[test]
    fn parses_enum_options() {
        assert_eq!("process".parse::<WorkerType>().unwrap(), WorkerType::Process);
        assert!("forked".parse::<WorkerType>().is_err());
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::Fatal.to_tracing(), tracing::Level::ERROR);
    }
}
