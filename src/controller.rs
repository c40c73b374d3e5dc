//! Verb dispatch: install, update, uninstall, start, stop, run, test, print.
use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::mpsc,
    thread,
};

use tracing::{debug, warn};

use crate::{
    config::{ConfigStore, ServiceConfiguration},
    error::ServiceError,
    reporter::Reporter,
    runtime,
    service::{ServiceHandler, ServiceManager, starts_on_install},
    supervisor::Supervisor,
};

/// Executes command-line verbs against persisted configurations.
pub struct ServiceController<M: ServiceManager> {
    store: ConfigStore,
    manager: M,
    reporter: Reporter,
}

impl<M: ServiceManager> ServiceController<M> {
    pub fn new(store: ConfigStore, manager: M, reporter: Reporter) -> Self {
        Self {
            store,
            manager,
            reporter,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Writes a fresh configuration from the install defaults plus `overrides`
    /// and registers the service. Startup `auto` also starts it.
    pub fn install(&self, name: &str, overrides: &[String]) -> Result<PathBuf, ServiceError> {
        require_name(name)?;
        let mut config = ServiceConfiguration::with_install_defaults(name);
        config.apply_overrides(overrides)?;

        let path = self.store.save(&config)?;
        let config = self.store.load(name)?;
        self.open_log(&config);
        self.register(&config)?;

        if starts_on_install(&config) {
            self.manager.start(name)?;
        }
        self.reporter
            .info(format!("Service '{name}' installed ({})", path.display()));
        Ok(path)
    }

    /// Applies `overrides` to the persisted configuration and re-registers.
    pub fn update(&self, name: &str, overrides: &[String]) -> Result<PathBuf, ServiceError> {
        let mut config = self.store.load(name)?;
        config.apply_overrides(overrides)?;

        let path = self.store.save(&config)?;
        let config = self.store.load(name)?;
        self.open_log(&config);
        self.register(&config)?;
        self.reporter
            .info(format!("Service '{name}' updated ({})", path.display()));
        Ok(path)
    }

    /// Stops and deregisters the service, then deletes its configuration.
    ///
    /// A service that is not registered only has its configuration removed.
    pub fn uninstall(&self, name: &str) -> Result<(), ServiceError> {
        require_name(name)?;
        if let Ok(config) = self.store.load(name) {
            self.open_log(&config);
        }

        if let Err(err) = self.manager.stop(name) {
            debug!("{err}");
        }
        if let Err(err) = self.manager.uninstall(name) {
            self.reporter.warn(&err);
        }

        self.store.delete(name)?;
        self.reporter.info(format!("Service '{name}' uninstalled"));
        Ok(())
    }

    /// Launches the worker in the background and returns.
    pub fn start(&self, name: &str, overrides: &[String]) -> Result<(), ServiceError> {
        let config = self.prepare(name, overrides)?;
        Supervisor::new(&config, self.reporter.clone())
            .detached()
            .on_start()
    }

    /// Runs the stop command and waits for the recorded worker to exit.
    pub fn stop(&self, name: &str, overrides: &[String]) -> Result<(), ServiceError> {
        let config = self.prepare(name, overrides)?;
        Supervisor::new(&config, self.reporter.clone()).on_stop()
    }

    /// Executes as the registered service until the host stops it.
    pub fn run(&self, name: &str) -> Result<(), ServiceError> {
        let config = self.prepare(name, &[])?;
        let supervisor = Supervisor::new(&config, self.reporter.clone());
        self.manager.run(name, &supervisor)
    }

    /// Starts the worker, waits for one line on `input` or an interrupt, then
    /// stops it.
    pub fn test<R>(&self, name: &str, overrides: &[String], input: R) -> Result<(), ServiceError>
    where
        R: BufRead + Send + 'static,
    {
        let config = self.prepare(name, overrides)?;
        let supervisor = Supervisor::new(&config, self.reporter.clone());

        // The worker runs in its own process group, so an interrupt only
        // reaches this process and has to be turned into a stop.
        let (tx, rx) = mpsc::channel();
        let on_signal = tx.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            let _ = on_signal.send(StopRequest::Signal);
        }) {
            warn!("Cannot watch for interrupts: {err}");
        }

        supervisor.on_start()?;

        print!("Press ENTER to stop '{name}'... ");
        let _ = io::stdout().flush();
        thread::spawn(move || {
            let mut input = input;
            let mut line = String::new();
            if let Err(err) = input.read_line(&mut line) {
                warn!("Failed to read from stdin: {err}");
            }
            let _ = tx.send(StopRequest::Input);
        });

        if let Ok(StopRequest::Signal) = rx.recv() {
            self.reporter
                .info(format!("Interrupted; stopping service '{name}'"));
        }
        supervisor.on_stop()
    }

    /// Renders the persisted configuration as a `test` command line.
    pub fn print(&self, name: &str) -> Result<String, ServiceError> {
        let config = self.store.load(name)?;
        Ok(render_command_line(&runtime::program_title(), &config))
    }

    /// Loads `name`, applies in-memory overrides and opens its log file.
    fn prepare(&self, name: &str, overrides: &[String]) -> Result<ServiceConfiguration, ServiceError> {
        let mut config = self.store.load(name)?;
        config.apply_overrides(overrides)?;
        self.open_log(&config);
        Ok(config)
    }

    fn register(&self, config: &ServiceConfiguration) -> Result<(), ServiceError> {
        if let Err(err) = self.manager.uninstall(&config.name) {
            debug!("Ignoring deregistration failure before install: {err}");
        }
        self.manager.install(&config.resolved())
    }

    fn open_log(&self, config: &ServiceConfiguration) {
        self.reporter.configure(config);
        let Some(path) = config.resolved().log_file() else {
            return;
        };
        if self.reporter.log_sink().is_some() {
            return;
        }
        if let Err(err) = self.reporter.attach_log_file(&path) {
            warn!("{err}");
        }
    }
}

/// What ended the wait of the `test` verb.
enum StopRequest {
    Input,
    Signal,
}

fn require_name(name: &str) -> Result<(), ServiceError> {
    if name.trim().is_empty() {
        Err(ServiceError::MissingName)
    } else {
        Ok(())
    }
}

/// `"<title>" "test" "<name>" "--Key=Value" ...`, every element double-quoted.
pub fn render_command_line(title: &str, config: &ServiceConfiguration) -> String {
    [title.to_string(), "test".to_string(), config.name.clone()]
        .into_iter()
        .chain(config.to_overrides())
        .map(|arg| format!("\"{arg}\""))
        .collect::<Vec<_>>()
        .join(" ")
}
