//! svcwrap registers a Java program with the host service manager and
//! supervises its worker process: it launches the worker, runs the configured
//! stop command on shutdown, waits a bounded time for the worker to exit, and
//! forcibly terminates anything left behind. Worker output goes to the console
//! and a size-bounded log file.

/// CLI interface.
pub mod cli;

/// Worker command construction.
pub mod command;

/// Configuration management.
pub mod config;

/// Shared constants.
pub mod constants;

/// Verb dispatch.
pub mod controller;

/// Error handling.
pub mod error;

/// Log files and output fan-out.
pub mod logs;

/// Termination monitor.
pub mod monitor;

/// Pid file bookkeeping.
pub mod pid_file;

/// Process launching and probing.
pub mod process;

/// Per-invocation diagnostics.
pub mod reporter;

/// Executable and directory lookup.
pub mod runtime;

/// Host service-manager integration.
pub mod service;

/// Worker start/stop state machine.
pub mod supervisor;
