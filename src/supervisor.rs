//! Start/stop state machine for one worker process.
use std::sync::{Arc, Mutex};

use strum_macros::Display;

use crate::{
    command::{self, Invocation},
    config::ServiceConfiguration,
    constants::OUTPUT_DRAIN_TIMEOUT,
    error::ServiceError,
    logs::{MultiWriter, SharedSink},
    monitor::await_termination,
    pid_file::PidFile,
    process::{self, OutputMode, ProcessProbe, SignalProbe, WorkerProcessHandle},
    reporter::Reporter,
    service::ServiceHandler,
};

/// Lifecycle state of a [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug)]
struct Inner {
    state: SupervisorState,
    worker: Option<WorkerProcessHandle>,
}

/// Owns the worker of one service and drives it through start and stop.
pub struct Supervisor {
    config: Arc<ServiceConfiguration>,
    probe: Arc<dyn ProcessProbe>,
    reporter: Reporter,
    /// Launch processes detached from this one (direct `start` verb).
    detached: bool,
    inner: Mutex<Inner>,
}

impl Supervisor {
    /// Supervisor for `config`, with `${VAR}` references resolved.
    pub fn new(config: &ServiceConfiguration, reporter: Reporter) -> Self {
        Self {
            config: Arc::new(config.resolved()),
            probe: Arc::new(SignalProbe),
            reporter,
            detached: false,
            inner: Mutex::new(Inner {
                state: SupervisorState::Idle,
                worker: None,
            }),
        }
    }

    /// Launches processes in their own session with output written straight to
    /// the log file, so they outlive the invoking command.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn config(&self) -> &ServiceConfiguration {
        &self.config
    }

    pub fn state(&self) -> Result<SupervisorState, ServiceError> {
        Ok(self.inner.lock()?.state)
    }

    /// Pid of the worker started by this supervisor, while it is tracked.
    pub fn worker_pid(&self) -> Result<Option<u32>, ServiceError> {
        Ok(self.inner.lock()?.worker.as_ref().map(WorkerProcessHandle::pid))
    }

    fn pid_file(&self) -> Option<PidFile> {
        self.config.pid_file.as_deref().map(PidFile::new)
    }

    fn output_mode(&self) -> OutputMode {
        if self.detached {
            return OutputMode::Detached {
                log_file: self.config.log_file(),
            };
        }

        let mut sink = MultiWriter::new().with(SharedSink::stdout());
        if let Some(file) = self.reporter.log_sink() {
            sink = sink.with(file);
        }
        OutputMode::Multiplexed(sink)
    }

    /// Worker recorded in the pid file by an earlier invocation.
    fn adopt_recorded_worker(&self) -> Option<WorkerProcessHandle> {
        let pid_file = self.pid_file()?;
        match pid_file.read() {
            Ok(Some(record)) => {
                self.reporter
                    .debug(format!("Adopting PID {} from {}", record.pid, pid_file.path().display()));
                Some(WorkerProcessHandle::adopt(record.pid, record.written_at))
            }
            Ok(None) => None,
            Err(err) => {
                self.reporter.error(&err);
                None
            }
        }
    }

    /// Moves from one of `from` to `to`, holding the lock only for the check.
    fn transition(
        &self,
        action: &'static str,
        from: &[SupervisorState],
        to: SupervisorState,
    ) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock()?;
        if !from.contains(&inner.state) {
            return Err(self.invalid_transition(action, inner.state));
        }
        inner.state = to;
        Ok(())
    }

    fn invalid_transition(&self, action: &'static str, state: SupervisorState) -> ServiceError {
        ServiceError::InvalidTransition {
            service: self.config.name.clone(),
            action,
            state: state.to_string(),
        }
    }

    fn force_kill(&self, label: &str, handle: &mut WorkerProcessHandle) {
        let pid = handle.pid();
        match handle.kill(self.probe.as_ref()) {
            Ok(true) => self.reporter.warn(format!("Killed {label} PID {pid}")),
            Ok(false) => self.reporter.debug(format!("{label} PID {pid} already exited")),
            Err(err) => {
                self.reporter.error(&err);
            }
        }
        handle.drain_output(OUTPUT_DRAIN_TIMEOUT);
    }
}

impl ServiceHandler for Supervisor {
    /// Launches the worker and records its pid. Fails with
    /// [`ServiceError::LaunchError`] when the runtime cannot be started.
    fn on_start(&self) -> Result<(), ServiceError> {
        self.transition("start", &[SupervisorState::Idle], SupervisorState::Starting)?;

        let spec = command::build(&self.config, Invocation::Start);
        self.reporter
            .debug(format!("Starting '{}': {}", self.config.name, spec.display_line()));

        let worker = match process::launch(&spec, self.output_mode()) {
            Ok(worker) => worker,
            Err(err) => {
                self.inner.lock()?.state = SupervisorState::Idle;
                self.reporter.error(&err);
                return Err(err);
            }
        };

        if let Some(pid_file) = self.pid_file()
            && let Err(err) = pid_file.write(worker.pid())
        {
            self.reporter.error(&err);
        }

        self.reporter
            .info(format!("Service '{}' started with PID {}", self.config.name, worker.pid()));
        let mut inner = self.inner.lock()?;
        inner.worker = Some(worker);
        inner.state = SupervisorState::Running;
        Ok(())
    }

    /// Runs the stop command, waits for the worker, then kills whatever is
    /// left. Always ends in [`SupervisorState::Idle`]; only a failure to
    /// launch the stop command is returned.
    fn on_stop(&self) -> Result<(), ServiceError> {
        let mut worker = {
            let mut inner = self.inner.lock()?;
            if matches!(
                inner.state,
                SupervisorState::Starting | SupervisorState::Stopping
            ) {
                return Err(self.invalid_transition("stop", inner.state));
            }
            inner.state = SupervisorState::Stopping;
            inner.worker.take()
        };
        if worker.is_none() {
            worker = self.adopt_recorded_worker();
        }

        let spec = command::build(&self.config, Invocation::Stop);
        self.reporter
            .debug(format!("Stopping '{}': {}", self.config.name, spec.display_line()));

        let mut launch_error = None;
        let mut helper = match process::launch(&spec, self.output_mode()) {
            Ok(helper) => Some(helper),
            Err(err) => {
                self.reporter.error(&err);
                launch_error = Some(err);
                None
            }
        };

        let timeout = self.config.stop_timeout();
        let monitored = worker.as_mut().or(helper.as_mut());
        let clean = match monitored {
            Some(handle) => {
                await_termination(handle, self.probe.as_ref(), timeout, &self.reporter)
            }
            None => true,
        };
        if !clean {
            self.reporter.warn(format!(
                "Service '{}' did not stop cooperatively; killing it",
                self.config.name
            ));
        }

        if let Some(worker) = worker.as_mut() {
            self.force_kill("worker", worker);
        }
        if let Some(helper) = helper.as_mut() {
            self.force_kill("stop helper", helper);
        }

        if let Some(pid_file) = self.pid_file()
            && let Err(err) = pid_file.remove()
        {
            self.reporter.error(&err);
        }

        self.inner.lock()?.state = SupervisorState::Idle;
        self.reporter
            .info(format!("Service '{}' stopped", self.config.name));

        match launch_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
