//! Configuration management for svcwrap.
//!
//! A service is described by one JSON document, `<name>.json`, inside the
//! configuration directory. The on-disk shape is the lenient [`RawServiceConfig`];
//! it is normalized into a [`ServiceConfiguration`] in a single step at load time.
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    sync::LazyLock,
    time::Duration,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, EnumIter, EnumString};
use tracing::{debug, warn};

use crate::{
    constants::{
        CONFIG_EXTENSION, DEFAULT_ENTRY_CLASS, DEFAULT_ENTRY_METHOD, DEFAULT_JVM,
        DEFAULT_LOG_LEVEL, DEFAULT_STARTUP, DEFAULT_STOP_TIMEOUT_SECS, LOG_EXTENSION,
        MAX_STOP_TIMEOUT_SECS,
    },
    error::ServiceError,
    runtime,
};

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference pattern is valid")
});

/// A class/method pair the runtime is asked to invoke.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPoint {
    /// Fully qualified class name. Empty selects executable-jar mode.
    pub class: String,
    /// Method name passed after the class.
    pub method: String,
}

/// Account the service runs under. Passed through to the service manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Account name; empty means the manager's default account.
    pub user: String,
    /// Account password; empty when not required.
    pub password: String,
}

/// Declarative description of one managed service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfiguration {
    pub name: String,
    pub display_name: String,
    pub description: String,
    /// Startup type handed to the service manager (`manual`, `auto`).
    pub startup: String,
    pub working_directory: String,
    /// Installation root of the runtime; the launcher is `<runtime_home>/bin/java`.
    pub runtime_home: String,
    pub runtime_options: Vec<String>,
    pub classpath: String,
    /// Jvm selection, kept for the service manager and `print`.
    pub jvm: String,
    pub heap_max: String,
    pub heap_min: String,
    pub stack_size: String,
    pub start_mode: String,
    pub stop_mode: String,
    pub start_entry: EntryPoint,
    pub stop_entry: EntryPoint,
    /// Seconds to wait for a cooperative stop, at most [`MAX_STOP_TIMEOUT_SECS`].
    pub stop_timeout_seconds: u64,
    /// Directory receiving `<name>.log`. Empty disables the log file.
    pub log_path: String,
    pub log_level: String,
    pub log_prefix: String,
    pub credentials: Credentials,
    pub pid_file: Option<PathBuf>,
}

impl ServiceConfiguration {
    /// Configuration seeded with the defaults `install` applies before overrides.
    pub fn with_install_defaults(name: &str) -> Self {
        let entry = EntryPoint {
            class: DEFAULT_ENTRY_CLASS.to_string(),
            method: DEFAULT_ENTRY_METHOD.to_string(),
        };

        Self {
            name: name.to_string(),
            startup: DEFAULT_STARTUP.to_string(),
            jvm: DEFAULT_JVM.to_string(),
            start_entry: entry.clone(),
            stop_entry: entry,
            stop_timeout_seconds: DEFAULT_STOP_TIMEOUT_SECS,
            log_prefix: runtime::program_title(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            ..Self::default()
        }
    }

    /// The stop timeout as a duration, clamped to the supported maximum.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds.min(MAX_STOP_TIMEOUT_SECS))
    }

    /// Path of the service log file, if a log directory is configured.
    pub fn log_file(&self) -> Option<PathBuf> {
        if self.log_path.trim().is_empty() {
            return None;
        }
        Some(
            Path::new(&self.log_path)
                .join(format!("{}.{}", self.name, LOG_EXTENSION)),
        )
    }

    /// Name shown by the service manager; falls back to the service name.
    pub fn registration_display_name(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }

    /// Returns a copy with `${VAR}` references expanded in every path-like field.
    ///
    /// The persisted configuration keeps the references so that an `update`
    /// does not bake the current environment into the file.
    pub fn resolved(&self) -> Self {
        let mut resolved = self.clone();
        resolved.working_directory = expand_env_vars(&self.working_directory);
        resolved.runtime_home = expand_env_vars(&self.runtime_home);
        resolved.runtime_options =
            self.runtime_options.iter().map(|o| expand_env_vars(o)).collect();
        resolved.classpath = expand_env_vars(&self.classpath);
        resolved.log_path = expand_env_vars(&self.log_path);
        resolved.pid_file = self
            .pid_file
            .as_ref()
            .map(|p| PathBuf::from(expand_env_vars(&p.to_string_lossy())));
        resolved
    }

    /// Applies `--Key=Value`, `--Key Value` and `++JvmOptions=...` overrides.
    pub fn apply_overrides<S: AsRef<str>>(
        &mut self,
        args: &[S],
    ) -> Result<(), ServiceError> {
        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_ref().trim();

            let (append, body) = if let Some(rest) = arg.strip_prefix("++") {
                (true, rest)
            } else if let Some(rest) = arg.strip_prefix("--") {
                (false, rest)
            } else {
                return Err(ServiceError::InvalidOverride(format!(
                    "unexpected argument '{arg}'"
                )));
            };

            let (key, value) = match body.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim().to_string()),
                None => {
                    i += 1;
                    let value = args.get(i).ok_or_else(|| {
                        ServiceError::InvalidOverride(format!("missing value for '{arg}'"))
                    })?;
                    (body.trim(), value.as_ref().trim().to_string())
                }
            };

            let key = ConfigKey::from_str(key).map_err(|_| {
                ServiceError::InvalidOverride(format!("unknown option '{key}'"))
            })?;
            self.set(key, &value, append)?;
            i += 1;
        }

        Ok(())
    }

    /// Renders every field as a `--Key=Value` override, in a fixed order.
    pub fn to_overrides(&self) -> Vec<String> {
        ConfigKey::iter()
            .map(|key| format!("--{}={}", key.as_ref(), self.get(key)))
            .collect()
    }

    fn get(&self, key: ConfigKey) -> String {
        match key {
            ConfigKey::Description => self.description.clone(),
            ConfigKey::DisplayName => self.display_name.clone(),
            ConfigKey::StartPath => self.working_directory.clone(),
            ConfigKey::Startup => self.startup.clone(),
            ConfigKey::JavaHome => self.runtime_home.clone(),
            ConfigKey::JvmOptions => self.runtime_options.join(";"),
            ConfigKey::Classpath => self.classpath.clone(),
            ConfigKey::Jvm => self.jvm.clone(),
            ConfigKey::JvmMx => self.heap_max.clone(),
            ConfigKey::JvmMs => self.heap_min.clone(),
            ConfigKey::JvmSs => self.stack_size.clone(),
            ConfigKey::StartMode => self.start_mode.clone(),
            ConfigKey::StopMode => self.stop_mode.clone(),
            ConfigKey::StartClass => self.start_entry.class.clone(),
            ConfigKey::StopClass => self.stop_entry.class.clone(),
            ConfigKey::StartMethod => self.start_entry.method.clone(),
            ConfigKey::StopMethod => self.stop_entry.method.clone(),
            ConfigKey::StopTimeout => self.stop_timeout_seconds.to_string(),
            ConfigKey::LogPath => self.log_path.clone(),
            ConfigKey::LogLevel => self.log_level.clone(),
            ConfigKey::LogPrefix => self.log_prefix.clone(),
            ConfigKey::ServiceUser => self.credentials.user.clone(),
            ConfigKey::ServicePassword => self.credentials.password.clone(),
            ConfigKey::PidFile => self
                .pid_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    fn set(&mut self, key: ConfigKey, value: &str, append: bool) -> Result<(), ServiceError> {
        let value = value.to_string();
        match key {
            ConfigKey::Description => self.description = value,
            ConfigKey::DisplayName => self.display_name = value,
            ConfigKey::StartPath => self.working_directory = value,
            ConfigKey::Startup => self.startup = value,
            ConfigKey::JavaHome => self.runtime_home = value,
            ConfigKey::JvmOptions => {
                let options = split_options(&value);
                if append {
                    self.runtime_options.extend(options);
                } else {
                    self.runtime_options = options;
                }
            }
            ConfigKey::Classpath => self.classpath = value,
            ConfigKey::Jvm => self.jvm = value,
            ConfigKey::JvmMx => self.heap_max = value,
            ConfigKey::JvmMs => self.heap_min = value,
            ConfigKey::JvmSs => self.stack_size = value,
            ConfigKey::StartMode => self.start_mode = value,
            ConfigKey::StopMode => self.stop_mode = value,
            ConfigKey::StartClass => self.start_entry.class = value,
            ConfigKey::StopClass => self.stop_entry.class = value,
            ConfigKey::StartMethod => self.start_entry.method = value,
            ConfigKey::StopMethod => self.stop_entry.method = value,
            ConfigKey::StopTimeout => {
                let seconds = value.parse::<u64>().map_err(|err| {
                    ServiceError::InvalidOverride(format!(
                        "StopTimeout '{value}' is not a number of seconds: {err}"
                    ))
                })?;
                self.stop_timeout_seconds = seconds.min(MAX_STOP_TIMEOUT_SECS);
            }
            ConfigKey::LogPath => self.log_path = value,
            ConfigKey::LogLevel => self.log_level = value,
            ConfigKey::LogPrefix => self.log_prefix = value,
            ConfigKey::ServiceUser => self.credentials.user = value,
            ConfigKey::ServicePassword => self.credentials.password = value,
            ConfigKey::PidFile => {
                self.pid_file = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                }
            }
        }
        Ok(())
    }
}

/// Override keys, in the order `print` renders them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, EnumIter)]
pub enum ConfigKey {
    Description,
    DisplayName,
    StartPath,
    Startup,
    JavaHome,
    JvmOptions,
    Classpath,
    Jvm,
    JvmMx,
    JvmMs,
    JvmSs,
    StartMode,
    StopMode,
    StartClass,
    StopClass,
    StartMethod,
    StopMethod,
    StopTimeout,
    LogPath,
    LogLevel,
    LogPrefix,
    ServiceUser,
    ServicePassword,
    PidFile,
}

fn split_options(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|option| !option.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expands `${VAR}` references from the environment, leaving unset ones verbatim.
fn expand_env_vars(input: &str) -> String {
    ENV_REFERENCE
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Nested entry-point form accepted from hand-written configurations.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawEntryPoint {
    #[serde(alias = "Class")]
    class: Option<String>,
    #[serde(alias = "Method")]
    method: Option<String>,
}

/// On-disk schema. Every field is optional so older or partial files still load.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawServiceConfig {
    #[serde(rename = "Name", alias = "name")]
    name: Option<String>,
    #[serde(rename = "Description", alias = "description")]
    description: Option<String>,
    #[serde(rename = "DisplayName", alias = "displayName")]
    display_name: Option<String>,
    #[serde(rename = "StartPath", alias = "workingDirectory")]
    start_path: Option<String>,
    #[serde(rename = "Startup", alias = "startup")]
    startup: Option<String>,
    #[serde(rename = "JavaHome", alias = "runtimeHome")]
    java_home: Option<String>,
    #[serde(rename = "JvmOptions", alias = "runtimeOptions")]
    jvm_options: Option<Vec<String>>,
    #[serde(rename = "Classpath", alias = "classpath")]
    classpath: Option<String>,
    #[serde(rename = "Jvm", alias = "jvm")]
    jvm: Option<String>,
    #[serde(rename = "JvmMx", alias = "heapMax")]
    jvm_mx: Option<String>,
    #[serde(rename = "JvmMs", alias = "heapMin")]
    jvm_ms: Option<String>,
    #[serde(rename = "JvmSs", alias = "stackSize")]
    jvm_ss: Option<String>,
    #[serde(rename = "StartMode", alias = "startMode")]
    start_mode: Option<String>,
    #[serde(rename = "StopMode", alias = "stopMode")]
    stop_mode: Option<String>,
    #[serde(rename = "StartClass")]
    start_class: Option<String>,
    #[serde(rename = "StopClass")]
    stop_class: Option<String>,
    #[serde(rename = "StartMethod")]
    start_method: Option<String>,
    #[serde(rename = "StopMethod")]
    stop_method: Option<String>,
    #[serde(rename = "startEntry", skip_serializing)]
    start_entry: Option<RawEntryPoint>,
    #[serde(rename = "stopEntry", skip_serializing)]
    stop_entry: Option<RawEntryPoint>,
    #[serde(rename = "StopTimeout", alias = "stopTimeoutSeconds")]
    stop_timeout: Option<Value>,
    #[serde(rename = "LogPath", alias = "logPath")]
    log_path: Option<String>,
    #[serde(rename = "LogLevel", alias = "logLevel")]
    log_level: Option<String>,
    #[serde(rename = "LogPrefix", alias = "logLinePrefix")]
    log_prefix: Option<String>,
    #[serde(rename = "ServiceUser", alias = "serviceUser")]
    service_user: Option<String>,
    #[serde(rename = "ServicePassword", alias = "servicePassword")]
    service_password: Option<String>,
    #[serde(rename = "PidFile", alias = "pidFilePath")]
    pid_file: Option<String>,
}

impl RawServiceConfig {
    fn normalize(self, name: &str) -> ServiceConfiguration {
        let mut start_entry = EntryPoint {
            class: self.start_class.unwrap_or_default(),
            method: self.start_method.unwrap_or_default(),
        };
        let mut stop_entry = EntryPoint {
            class: self.stop_class.unwrap_or_default(),
            method: self.stop_method.unwrap_or_default(),
        };
        if let Some(nested) = self.start_entry {
            merge_entry(&mut start_entry, nested);
        }
        if let Some(nested) = self.stop_entry {
            merge_entry(&mut stop_entry, nested);
        }

        let stop_timeout_seconds = parse_stop_timeout(name, self.stop_timeout.as_ref());
        let pid_file = self
            .pid_file
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        ServiceConfiguration {
            name: name.to_string(),
            display_name: self.display_name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            startup: self.startup.unwrap_or_default(),
            working_directory: self.start_path.unwrap_or_default(),
            runtime_home: self.java_home.unwrap_or_default(),
            runtime_options: self.jvm_options.unwrap_or_default(),
            classpath: self.classpath.unwrap_or_default(),
            jvm: self.jvm.unwrap_or_default(),
            heap_max: self.jvm_mx.unwrap_or_default(),
            heap_min: self.jvm_ms.unwrap_or_default(),
            stack_size: self.jvm_ss.unwrap_or_default(),
            start_mode: self.start_mode.unwrap_or_default(),
            stop_mode: self.stop_mode.unwrap_or_default(),
            start_entry,
            stop_entry,
            stop_timeout_seconds,
            log_path: self.log_path.unwrap_or_default(),
            log_level: self.log_level.unwrap_or_default(),
            log_prefix: self.log_prefix.unwrap_or_default(),
            credentials: Credentials {
                user: self.service_user.unwrap_or_default(),
                password: self.service_password.unwrap_or_default(),
            },
            pid_file,
        }
    }
}

impl From<&ServiceConfiguration> for RawServiceConfig {
    fn from(config: &ServiceConfiguration) -> Self {
        Self {
            name: Some(config.name.clone()),
            description: Some(config.description.clone()),
            display_name: Some(config.display_name.clone()),
            start_path: Some(config.working_directory.clone()),
            startup: Some(config.startup.clone()),
            java_home: Some(config.runtime_home.clone()),
            jvm_options: Some(config.runtime_options.clone()),
            classpath: Some(config.classpath.clone()),
            jvm: Some(config.jvm.clone()),
            jvm_mx: Some(config.heap_max.clone()),
            jvm_ms: Some(config.heap_min.clone()),
            jvm_ss: Some(config.stack_size.clone()),
            start_mode: Some(config.start_mode.clone()),
            stop_mode: Some(config.stop_mode.clone()),
            start_class: Some(config.start_entry.class.clone()),
            stop_class: Some(config.stop_entry.class.clone()),
            start_method: Some(config.start_entry.method.clone()),
            stop_method: Some(config.stop_entry.method.clone()),
            start_entry: None,
            stop_entry: None,
            stop_timeout: Some(Value::from(config.stop_timeout_seconds)),
            log_path: Some(config.log_path.clone()),
            log_level: Some(config.log_level.clone()),
            log_prefix: Some(config.log_prefix.clone()),
            service_user: Some(config.credentials.user.clone()),
            service_password: Some(config.credentials.password.clone()),
            pid_file: Some(
                config
                    .pid_file
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
        }
    }
}

fn merge_entry(entry: &mut EntryPoint, nested: RawEntryPoint) {
    if let Some(class) = nested.class {
        entry.class = class;
    }
    if let Some(method) = nested.method {
        entry.method = method;
    }
}

/// Reads the persisted stop timeout. A missing value is zero; anything that is
/// not a non-negative whole number of seconds falls back to the maximum.
fn parse_stop_timeout(name: &str, value: Option<&Value>) -> u64 {
    let parsed = match value {
        None | Some(Value::Null) => return 0,
        Some(Value::Number(number)) => number.as_u64(),
        Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
        Some(_) => None,
    };

    match parsed {
        Some(seconds) => seconds.min(MAX_STOP_TIMEOUT_SECS),
        None => {
            warn!(
                "Invalid StopTimeout {:?} for '{name}'; using {MAX_STOP_TIMEOUT_SECS}s",
                value
            );
            MAX_STOP_TIMEOUT_SECS
        }
    }
}

/// Reads and writes `<name>.json` files inside one configuration directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// Store rooted at an explicit directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the system configuration directory.
    pub fn from_env() -> Self {
        Self::new(runtime::config_dir())
    }

    /// Directory holding the configuration files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the configuration file for `name`.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{CONFIG_EXTENSION}"))
    }

    /// Returns whether a configuration exists for `name`.
    pub fn exists(&self, name: &str) -> bool {
        !name.is_empty() && self.path(name).is_file()
    }

    /// Loads and normalizes the configuration for `name`.
    pub fn load(&self, name: &str) -> Result<ServiceConfiguration, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::MissingName);
        }

        let path = self.path(name);
        debug!("Loading configuration from {}", path.display());

        let content = fs::read_to_string(&path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                ServiceError::ConfigNotFound { path: path.clone() }
            } else {
                ServiceError::ConfigReadError {
                    path: path.clone(),
                    source,
                }
            }
        })?;

        let raw: RawServiceConfig = serde_json::from_str(&content)
            .map_err(|source| ServiceError::ConfigParseError { path, source })?;

        Ok(raw.normalize(name))
    }

    /// Persists `config`, replacing any existing file.
    pub fn save(&self, config: &ServiceConfiguration) -> Result<PathBuf, ServiceError> {
        if config.name.trim().is_empty() {
            return Err(ServiceError::MissingName);
        }

        let path = self.path(&config.name);
        let write_error = |source| ServiceError::ConfigWriteError {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(write_error)?;
        let json = serde_json::to_string_pretty(&RawServiceConfig::from(config))
            .map_err(|err| write_error(std::io::Error::other(err)))?;
        fs::write(&path, json).map_err(write_error)?;

        debug!("Saved configuration to {}", path.display());
        Ok(path)
    }

    /// Deletes the configuration file for `name`.
    pub fn delete(&self, name: &str) -> Result<(), ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::MissingName);
        }

        let path = self.path(name);
        fs::remove_file(&path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                ServiceError::ConfigNotFound { path: path.clone() }
            } else {
                ServiceError::ConfigWriteError {
                    path: path.clone(),
                    source,
                }
            }
        })
    }
}
