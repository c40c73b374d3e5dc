//! Integration with the host service manager.
//!
//! The host drives a registered service through two callbacks, modelled by
//! [`ServiceHandler`]. Registration itself goes through a [`ServiceManager`];
//! [`SystemdServiceManager`] writes a unit file and talks to `systemctl`.
use std::{
    fmt::Write as _,
    fs,
    path::PathBuf,
    process::Command,
    sync::mpsc,
};

use tracing::{debug, info, warn};

use crate::{
    config::ServiceConfiguration, constants::SYSTEMD_UNIT_DIR, error::ServiceError, runtime,
};

/// Callbacks the host invokes on a running service. Calls may arrive on
/// different threads but are never concurrent for one service.
pub trait ServiceHandler: Send + Sync {
    /// Launches the worker and returns without waiting for it.
    fn on_start(&self) -> Result<(), ServiceError>;

    /// Stops the worker, escalating to a forced kill after the stop timeout.
    fn on_stop(&self) -> Result<(), ServiceError>;
}

/// Registration backend of the host service manager.
pub trait ServiceManager {
    /// Registers the service described by `config`.
    fn install(&self, config: &ServiceConfiguration) -> Result<(), ServiceError>;

    /// Removes the registration of `name`.
    fn uninstall(&self, name: &str) -> Result<(), ServiceError>;

    /// Asks the host to start the registered service.
    fn start(&self, name: &str) -> Result<(), ServiceError>;

    /// Asks the host to stop the registered service.
    fn stop(&self, name: &str) -> Result<(), ServiceError>;

    /// Executes as the registered service: calls `on_start`, blocks until the
    /// host asks the service to stop, then calls `on_stop`.
    fn run(&self, name: &str, handler: &dyn ServiceHandler) -> Result<(), ServiceError>;
}

/// Startup values that enable the unit at boot.
fn starts_automatically(startup: &str) -> bool {
    matches!(
        startup.trim().to_ascii_lowercase().as_str(),
        "auto" | "automatic"
    )
}

/// Whether `install` should also start the service right away.
pub fn starts_on_install(config: &ServiceConfiguration) -> bool {
    starts_automatically(&config.startup)
}

/// systemd backend: one `<name>.service` unit per service.
#[derive(Debug, Clone)]
pub struct SystemdServiceManager {
    unit_dir: PathBuf,
    exe: PathBuf,
    systemctl: PathBuf,
}

impl Default for SystemdServiceManager {
    fn default() -> Self {
        Self::new(SYSTEMD_UNIT_DIR, runtime::current_executable())
    }
}

impl SystemdServiceManager {
    pub fn new(unit_dir: impl Into<PathBuf>, exe: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            exe: exe.into(),
            systemctl: PathBuf::from("systemctl"),
        }
    }

    /// Uses a different `systemctl` executable.
    pub fn with_systemctl(mut self, systemctl: impl Into<PathBuf>) -> Self {
        self.systemctl = systemctl.into();
        self
    }

    pub fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{name}.service"))
    }

    /// Renders the unit file for `config`.
    pub fn render_unit(&self, config: &ServiceConfiguration) -> String {
        let mut unit = String::new();
        let _ = writeln!(unit, "[Unit]");
        let _ = writeln!(unit, "Description={}", config.registration_display_name());
        let _ = writeln!(unit, "After=network.target");
        let _ = writeln!(unit);
        let _ = writeln!(unit, "[Service]");
        let _ = writeln!(unit, "Type=simple");
        let _ = writeln!(
            unit,
            "ExecStart=\"{}\" run \"{}\"",
            self.exe.display(),
            config.name
        );
        if !config.credentials.user.trim().is_empty() {
            let _ = writeln!(unit, "User={}", config.credentials.user.trim());
        }
        if !config.working_directory.trim().is_empty() {
            let _ = writeln!(unit, "WorkingDirectory={}", config.working_directory.trim());
        }
        // Must exceed the supervisor's own stop timeout.
        let _ = writeln!(
            unit,
            "TimeoutStopSec={}",
            config.stop_timeout().as_secs() + 5
        );
        let _ = writeln!(unit, "KillMode=mixed");
        let _ = writeln!(unit);
        let _ = writeln!(unit, "[Install]");
        let _ = writeln!(unit, "WantedBy=multi-user.target");
        unit
    }

    fn systemctl(&self, action: &'static str, args: &[&str], name: &str) -> Result<(), ServiceError> {
        debug!("Running {} {}", self.systemctl.display(), args.join(" "));
        let output = Command::new(&self.systemctl).args(args).output().map_err(|err| {
            ServiceError::RegistrationError {
                action,
                service: name.to_string(),
                message: format!("failed to run {}: {err}", self.systemctl.display()),
            }
        })?;

        if output.status.success() {
            return Ok(());
        }
        Err(ServiceError::RegistrationError {
            action,
            service: name.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn unit_name(name: &str) -> String {
        format!("{name}.service")
    }
}

impl ServiceManager for SystemdServiceManager {
    fn install(&self, config: &ServiceConfiguration) -> Result<(), ServiceError> {
        let name = config.name.as_str();
        if !config.credentials.password.is_empty() {
            warn!("Service '{name}': systemd units cannot carry a password; ignoring it");
        }

        let path = self.unit_path(name);
        let registration_error = |err: std::io::Error| ServiceError::RegistrationError {
            action: "install",
            service: name.to_string(),
            message: format!("{}: {err}", path.display()),
        };
        fs::create_dir_all(&self.unit_dir).map_err(registration_error)?;
        fs::write(&path, self.render_unit(config)).map_err(registration_error)?;
        info!("Wrote unit file {}", path.display());

        self.systemctl("install", &["daemon-reload"], name)?;
        if starts_automatically(&config.startup) {
            self.systemctl("install", &["enable", &Self::unit_name(name)], name)?;
        }
        Ok(())
    }

    fn uninstall(&self, name: &str) -> Result<(), ServiceError> {
        let path = self.unit_path(name);
        if !path.exists() {
            return Err(ServiceError::RegistrationError {
                action: "uninstall",
                service: name.to_string(),
                message: "service is not installed".into(),
            });
        }

        if let Err(err) = self.systemctl("uninstall", &["disable", &Self::unit_name(name)], name) {
            debug!("{err}");
        }
        fs::remove_file(&path).map_err(|err| ServiceError::RegistrationError {
            action: "uninstall",
            service: name.to_string(),
            message: format!("{}: {err}", path.display()),
        })?;
        self.systemctl("uninstall", &["daemon-reload"], name)
    }

    fn start(&self, name: &str) -> Result<(), ServiceError> {
        self.systemctl("start", &["start", &Self::unit_name(name)], name)
    }

    fn stop(&self, name: &str) -> Result<(), ServiceError> {
        self.systemctl("stop", &["stop", &Self::unit_name(name)], name)
    }

    fn run(&self, name: &str, handler: &dyn ServiceHandler) -> Result<(), ServiceError> {
        wait_for_termination_signal(name, handler)
    }
}

/// Runs `handler` until SIGINT, SIGTERM or SIGHUP arrives.
pub fn wait_for_termination_signal(
    name: &str,
    handler: &dyn ServiceHandler,
) -> Result<(), ServiceError> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| ServiceError::RegistrationError {
        action: "run",
        service: name.to_string(),
        message: err.to_string(),
    })?;

    handler.on_start()?;
    info!("Service '{name}' running");

    if rx.recv().is_err() {
        warn!("Signal channel closed; stopping service '{name}'");
    }
    info!("Service '{name}' received a stop request");
    handler.on_stop()
}
