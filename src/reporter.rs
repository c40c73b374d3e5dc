//! Service diagnostics: one owned reporter per invocation.
//!
//! The reporter writes level-tagged, timestamped lines into the service log
//! file and mirrors them into `tracing`. Lines produced before the log file is
//! attached are held in memory and flushed into the file when it opens.
//! Consecutive identical errors are reported once.
use std::{
    collections::VecDeque,
    fmt::Display,
    io::Write,
    path::Path,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::Local;
use tracing::{Level, debug, error, info, level_filters::LevelFilter, warn};

use crate::{
    cli::LogLevelArg,
    config::ServiceConfiguration,
    constants::REPORTER_BUFFER_LINES,
    error::ServiceError,
    logs::{RotatingLogFile, SharedSink},
};

#[derive(Debug)]
struct ReporterState {
    prefix: String,
    level: LevelFilter,
    last_error: Option<String>,
    buffer: VecDeque<String>,
    file: Option<SharedSink>,
}

/// Cloneable handle to the diagnostics of one service invocation.
#[derive(Debug, Clone)]
pub struct Reporter {
    state: Arc<Mutex<ReporterState>>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new("", LevelFilter::INFO)
    }
}

impl Reporter {
    pub fn new(prefix: impl Into<String>, level: LevelFilter) -> Self {
        Self {
            state: Arc::new(Mutex::new(ReporterState {
                prefix: prefix.into(),
                level,
                last_error: None,
                buffer: VecDeque::new(),
                file: None,
            })),
        }
    }

    /// Reporter using the configured line prefix and log level.
    pub fn for_config(config: &ServiceConfiguration) -> Self {
        let reporter = Self::new(config.log_prefix.clone(), LevelFilter::INFO);
        reporter.configure(config);
        reporter
    }

    /// Adopts the prefix and level of `config`. Unknown levels keep `info`.
    pub fn configure(&self, config: &ServiceConfiguration) {
        let level = if config.log_level.trim().is_empty() {
            LevelFilter::INFO
        } else {
            match LogLevelArg::from_str(&config.log_level) {
                Ok(level) => level.filter(),
                Err(err) => {
                    warn!("{err}; logging at info");
                    LevelFilter::INFO
                }
            }
        };

        let mut state = self.lock();
        state.prefix = config.log_prefix.clone();
        state.level = level;
    }

    /// Opens the service log file, flushes buffered lines into it, and returns
    /// the shared sink so worker output can be written to the same file.
    pub fn attach_log_file(&self, path: &Path) -> Result<SharedSink, ServiceError> {
        let file = RotatingLogFile::open(path).map_err(|source| ServiceError::LogFileError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut sink = SharedSink::new(file);

        let mut state = self.lock();
        for line in state.buffer.drain(..) {
            if let Err(err) = sink.write_all(line.as_bytes()) {
                warn!("Failed to flush buffered log line: {err}");
                break;
            }
        }
        state.file = Some(sink.clone());
        Ok(sink)
    }

    /// Sink of the attached log file, if any.
    pub fn log_sink(&self) -> Option<SharedSink> {
        self.lock().file.clone()
    }

    /// Lines waiting for a log file.
    pub fn buffered_lines(&self) -> Vec<String> {
        self.lock().buffer.iter().cloned().collect()
    }

    pub fn debug(&self, message: impl Display) {
        self.emit(Level::DEBUG, &message.to_string());
    }

    pub fn info(&self, message: impl Display) {
        self.emit(Level::INFO, &message.to_string());
    }

    pub fn warn(&self, message: impl Display) {
        self.emit(Level::WARN, &message.to_string());
    }

    /// Reports an error unless it repeats the previous one.
    ///
    /// Returns `true` when the error was written, `false` when it was suppressed.
    pub fn error(&self, err: impl Display) -> bool {
        let message = err.to_string();
        {
            let mut state = self.lock();
            if state.last_error.as_deref() == Some(message.as_str()) {
                return false;
            }
            state.last_error = Some(message.clone());
        }

        self.emit(Level::ERROR, &message);
        true
    }

    fn emit(&self, level: Level, message: &str) {
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            if level > state.level {
                return;
            }

            let timestamp = Local::now().format("%Y/%m/%d %H:%M:%S%.6f");
            let line = if state.prefix.is_empty() {
                format!("{timestamp} {} {message}\n", level.as_str())
            } else {
                format!("{} {timestamp} {} {message}\n", state.prefix, level.as_str())
            };

            match state.file.as_mut() {
                Some(file) => {
                    if let Err(err) = file.write_all(line.as_bytes()) {
                        warn!("Failed to write service log: {err}");
                    }
                }
                None => {
                    if state.buffer.len() >= REPORTER_BUFFER_LINES {
                        state.buffer.pop_front();
                    }
                    state.buffer.push_back(line);
                }
            }
        }

        match level {
            Level::ERROR => error!("{message}"),
            Level::WARN => warn!("{message}"),
            Level::INFO => info!("{message}"),
            _ => debug!("{message}"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReporterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
