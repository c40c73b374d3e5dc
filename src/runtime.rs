//! Runtime paths derived from the executable and the environment.
use std::{
    env,
    path::{Path, PathBuf},
};

use crate::constants::{CONFIG_DIR_ENV, DEFAULT_TITLE, SYSTEM_CONFIG_ROOT};

/// Returns the path of the running executable, falling back to `argv[0]`.
pub fn current_executable() -> PathBuf {
    env::current_exe()
        .ok()
        .or_else(|| env::args_os().next().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TITLE))
}

/// Program title used for the configuration directory and the default log prefix.
pub fn program_title() -> String {
    title_from_path(&current_executable())
}

/// Derives a title from an executable path: the letters of the file stem up to
/// the first `-`.
pub fn title_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let title: String = stem
        .chars()
        .take_while(|c| *c != '-')
        .filter(|c| c.is_alphabetic())
        .collect();

    if title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        title
    }
}

/// Directory holding one `<name>.json` per registered service.
pub fn config_dir() -> PathBuf {
    match env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => Path::new(SYSTEM_CONFIG_ROOT).join(program_title()),
    }
}
