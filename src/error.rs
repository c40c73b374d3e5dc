//! Error handling for svcwrap.
use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Defines all possible errors raised while configuring, registering, or
/// supervising a service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No service name was supplied.
    #[error("missing service name")]
    MissingName,

    /// The persisted configuration for a service does not exist.
    #[error("configuration is not available/readable: {}", path.display())]
    ConfigNotFound {
        /// Path where the configuration was expected.
        path: PathBuf,
    },

    /// Error reading a configuration file.
    #[error("Failed to read config file {}: {source}", path.display())]
    ConfigReadError {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error parsing JSON configuration.
    #[error("Invalid JSON in config file {}: {source}", path.display())]
    ConfigParseError {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: serde_json::Error,
    },

    /// Error persisting or deleting a configuration file.
    #[error("Failed to write config file {}: {source}", path.display())]
    ConfigWriteError {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// A command-line override could not be applied.
    #[error("Invalid override: {0}")]
    InvalidOverride(String),

    /// The worker or stop command could not be spawned.
    #[error("Failed to launch '{}': {source}", program.display())]
    LaunchError {
        /// Executable that failed to start.
        program: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The worker did not exit cooperatively before the stop timeout.
    #[error("Process {pid} did not stop within {}s", timeout.as_secs())]
    TimeoutExceeded {
        /// Worker process id.
        pid: u32,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// A forced kill failed.
    #[error("Failed to kill process {pid}: {source}")]
    KillFailed {
        /// Process id that survived.
        pid: u32,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error reading, writing, or removing the pid file.
    #[error("PID file error for {}: {source}", path.display())]
    PidFileError {
        /// Pid file path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error opening the service log file.
    #[error("Failed to open log file {}: {source}", path.display())]
    LogFileError {
        /// Log file path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The service manager rejected a registration request.
    #[error("Failed to {action} service '{service}': {message}")]
    RegistrationError {
        /// Operation that failed (install, uninstall, start, stop, run).
        action: &'static str,
        /// The service name.
        service: String,
        /// Human-readable failure detail.
        message: String,
    },

    /// A lifecycle callback arrived in a state that cannot accept it.
    #[error("Cannot {action} service '{service}' while {state}")]
    InvalidTransition {
        /// The service name.
        service: String,
        /// Requested lifecycle action.
        action: &'static str,
        /// Current supervisor state.
        state: String,
    },

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `ServiceError`.
impl<T> From<std::sync::PoisonError<T>> for ServiceError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ServiceError::MutexPoisonError(err.to_string())
    }
}

/// Converts a `nix` errno into an `io::Error` so it can be carried as an error source.
pub(crate) fn errno_to_io(err: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}
