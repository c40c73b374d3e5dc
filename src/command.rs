//! Builds the runtime invocation for the start and stop entry points.
use std::path::{Path, PathBuf};

use crate::{
    config::{EntryPoint, ServiceConfiguration},
    constants::{
        CLASSPATH_FLAG, HEAP_MAX_FLAG, HEAP_MIN_FLAG, JAR_FLAG, JAVA_LAUNCHER,
        STACK_SIZE_FLAG,
    },
};

/// Which entry point an invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Invocation {
    Start,
    Stop,
}

/// Everything needed to spawn one runtime process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// `None` inherits the supervisor's working directory.
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Renders the command line with every element double-quoted.
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .map(|part| format!("\"{part}\""))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Builds the command for `invocation`. Pure function of `config`.
///
/// Arguments are emitted in a fixed order: heap max, heap min, stack size, the
/// runtime options, the class-path (`-cp`) or jar (`-jar`) selection, then the
/// entry class and method.
pub fn build(config: &ServiceConfiguration, invocation: Invocation) -> CommandSpec {
    let mut args = Vec::new();

    if !config.heap_max.is_empty() {
        args.push(format!("{HEAP_MAX_FLAG}{}", config.heap_max));
    }
    if !config.heap_min.is_empty() {
        args.push(format!("{HEAP_MIN_FLAG}{}", config.heap_min));
    }
    if !config.stack_size.is_empty() {
        args.push(format!("{STACK_SIZE_FLAG}{}", config.stack_size));
    }

    args.extend(config.runtime_options.iter().cloned());

    if !config.classpath.is_empty() {
        // The mode follows the start class even for the stop invocation.
        let flag = if config.start_entry.class.is_empty() {
            JAR_FLAG
        } else {
            CLASSPATH_FLAG
        };
        args.push(flag.to_string());
        args.push(config.classpath.clone());
    }

    let entry: &EntryPoint = match invocation {
        Invocation::Start => &config.start_entry,
        Invocation::Stop => &config.stop_entry,
    };
    args.push(entry.class.clone());
    args.push(entry.method.clone());

    let working_dir = if config.working_directory.is_empty() {
        None
    } else {
        Some(PathBuf::from(&config.working_directory))
    };

    CommandSpec {
        program: launcher_path(&config.runtime_home),
        args,
        working_dir,
    }
}

/// `<runtime_home>/bin/<launcher>`.
pub fn launcher_path(runtime_home: &str) -> PathBuf {
    Path::new(runtime_home).join("bin").join(JAVA_LAUNCHER)
}
