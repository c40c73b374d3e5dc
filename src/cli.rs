//! Command-line interface for svcwrap.
use std::{ffi::OsString, str::FromStr};

use clap::{Parser, Subcommand};
use strum_macros::{AsRefStr, EnumString};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }

    /// The parsed filter.
    pub fn filter(&self) -> LevelFilter {
        self.0
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for svcwrap.
#[derive(Parser)]
#[command(name = "svcwrap", version, author)]
#[command(about = "Runs a Java program as a native system service", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for svcwrap.
///
/// Every command takes the service name followed by optional `--Key=Value`
/// configuration overrides (`++JvmOptions=...` appends runtime options).
#[derive(Subcommand)]
pub enum Commands {
    /// Persist the configuration and register the service.
    Install {
        /// Service name.
        name: String,
        /// Configuration overrides.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        overrides: Vec<String>,
    },

    /// Update the persisted configuration and re-register the service.
    Update {
        /// Service name.
        name: String,
        /// Configuration overrides.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        overrides: Vec<String>,
    },

    /// Stop and deregister the service, then delete its configuration.
    Uninstall {
        /// Service name.
        name: String,
    },

    /// Launch the worker and return, leaving it running.
    Start {
        /// Service name.
        name: String,
        /// In-memory configuration overrides.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        overrides: Vec<String>,
    },

    /// Run the stop command and wait for the worker to exit.
    Stop {
        /// Service name.
        name: String,
        /// In-memory configuration overrides.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        overrides: Vec<String>,
    },

    /// Execute as the registered service (invoked by the service manager).
    Run {
        /// Service name.
        name: String,
    },

    /// Start the worker, wait for a line on stdin, then stop it.
    Test {
        /// Service name.
        name: String,
        /// In-memory configuration overrides.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        overrides: Vec<String>,
    },

    /// Print the configuration as an equivalent command line.
    Print {
        /// Service name.
        name: String,
    },
}

impl Commands {
    /// The service name targeted by the command.
    pub fn name(&self) -> &str {
        match self {
            Commands::Install { name, .. }
            | Commands::Update { name, .. }
            | Commands::Uninstall { name }
            | Commands::Start { name, .. }
            | Commands::Stop { name, .. }
            | Commands::Run { name }
            | Commands::Test { name, .. }
            | Commands::Print { name } => name,
        }
    }
}

/// Two-letter verb codes accepted as `//XX//name` or `//XX name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
pub enum LegacyVerb {
    #[strum(serialize = "IS")]
    Install,
    #[strum(serialize = "US")]
    Update,
    #[strum(serialize = "DS")]
    Uninstall,
    #[strum(serialize = "ES")]
    Start,
    #[strum(serialize = "SS")]
    Stop,
    #[strum(serialize = "RS")]
    Run,
    #[strum(serialize = "TS")]
    Test,
    #[strum(serialize = "PS")]
    Print,
}

impl LegacyVerb {
    /// The subcommand name the code maps to.
    pub fn subcommand(&self) -> &'static str {
        match self {
            LegacyVerb::Install => "install",
            LegacyVerb::Update => "update",
            LegacyVerb::Uninstall => "uninstall",
            LegacyVerb::Start => "start",
            LegacyVerb::Stop => "stop",
            LegacyVerb::Run => "run",
            LegacyVerb::Test => "test",
            LegacyVerb::Print => "print",
        }
    }
}

/// Rewrites a leading `//XX//name` (or `//XX name`) argument into
/// `<subcommand> name`. Other argument lists are returned unchanged.
pub fn translate_legacy_args(args: Vec<OsString>) -> Vec<OsString> {
    let Some(position) = args.iter().skip(1).position(|arg| {
        arg.to_str()
            .is_some_and(|text| text.trim_start().starts_with("//"))
    }) else {
        return args;
    };
    let index = position + 1;

    let Some(raw) = args[index].to_str().map(|text| text.trim().to_string()) else {
        return args;
    };
    let body = &raw[2..];
    let (code, inline_name) = match body.split_once("//") {
        Some((code, name)) => (code, Some(name.trim().to_string())),
        None => (body, None),
    };
    let Ok(verb) = LegacyVerb::from_str(code) else {
        return args;
    };

    let mut translated: Vec<OsString> = args[..index].to_vec();
    translated.push(verb.subcommand().into());
    if let Some(name) = inline_name.filter(|name| !name.is_empty()) {
        translated.push(name.into());
    }
    translated.extend(args[index + 1..].iter().cloned());
    translated
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse_from(translate_legacy_args(std::env::args_os().collect()))
}
