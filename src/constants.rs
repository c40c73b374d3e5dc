//! Constants and configuration values for svcwrap.
//!
//! This module centralizes the timing, size, and naming values shared by the
//! supervisor, the configuration store, and the log writers.

use std::time::Duration;

// ============================================================================
// File System Constants
// ============================================================================

/// Fallback program title when the executable name yields no letters.
pub const DEFAULT_TITLE: &str = "svcwrap";

/// Parent of the per-program configuration directory.
pub const SYSTEM_CONFIG_ROOT: &str = "/etc";

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "SVCWRAP_CONFIG_DIR";

/// Extension of persisted service configuration files.
pub const CONFIG_EXTENSION: &str = "json";

/// Extension of per-service log files.
pub const LOG_EXTENSION: &str = "log";

/// Size above which a log file is truncated when it is opened.
pub const LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;

/// Buffer size for worker output streams (stdout/stderr).
pub const LOG_BUFFER_SIZE: usize = 8192;

/// Lines kept in memory by the reporter until a log file is attached.
pub const REPORTER_BUFFER_LINES: usize = 1024;

/// Default directory for systemd unit files.
pub const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

// ============================================================================
// Runtime Launcher
// ============================================================================

/// Name of the java launcher inside `<runtimeHome>/bin`.
pub const JAVA_LAUNCHER: &str = "java";

/// Heap-max flag prefix.
pub const HEAP_MAX_FLAG: &str = "-Xmx";

/// Heap-min flag prefix.
pub const HEAP_MIN_FLAG: &str = "-Xms";

/// Thread stack size flag prefix.
pub const STACK_SIZE_FLAG: &str = "-Xss";

/// Selects class-path mode when a start class is configured.
pub const CLASSPATH_FLAG: &str = "-cp";

/// Selects executable-jar mode when no start class is configured.
pub const JAR_FLAG: &str = "-jar";

// ============================================================================
// Process Management Timing
// ============================================================================

/// Interval between liveness probes while waiting for a worker to exit.
pub const TERMINATION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound for the configured stop timeout, also used when the configured
/// value cannot be parsed.
pub const MAX_STOP_TIMEOUT_SECS: u64 = 3600;

/// Interval between checks while waiting for output pumps to drain.
pub const OUTPUT_DRAIN_POLL: Duration = Duration::from_millis(20);

/// Upper bound on waiting for a stopped worker's output to drain.
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Slack allowed between a process start time and the pid file timestamp.
pub const PID_IDENTITY_SLACK_SECS: u64 = 1;

// ============================================================================
// Install Defaults
// ============================================================================

/// Startup mode written by `install` when none is given.
pub const DEFAULT_STARTUP: &str = "manual";

/// Jvm selection written by `install` when none is given.
pub const DEFAULT_JVM: &str = "auto";

/// Entry class written by `install` for both start and stop.
pub const DEFAULT_ENTRY_CLASS: &str = "Main";

/// Entry method written by `install` for both start and stop.
pub const DEFAULT_ENTRY_METHOD: &str = "main";

/// Stop timeout written by `install`.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 20;

/// Log level written by `install`.
pub const DEFAULT_LOG_LEVEL: &str = "Info";
