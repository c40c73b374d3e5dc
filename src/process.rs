//! Process launching, liveness probing, and forced termination.
use std::{
    fs::File,
    io,
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::{Pid, getpgid, getpgrp},
};
use sysinfo::{Pid as SysPid, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::{
    command::CommandSpec,
    constants::{OUTPUT_DRAIN_POLL, PID_IDENTITY_SLACK_SECS},
    error::{ServiceError, errno_to_io},
    logs::{MultiWriter, RotatingLogFile, spawn_log_writer},
};

/// Platform strategy for checking and terminating processes by id.
pub trait ProcessProbe: Send + Sync {
    /// Returns `true` while `pid` refers to a running (non-zombie) process.
    /// Must never disturb the process.
    fn is_alive(&self, pid: u32) -> bool;

    /// Forcibly terminates `pid`. Killing a process that no longer exists succeeds.
    fn kill(&self, pid: u32) -> io::Result<()>;

    /// Start time of `pid` in seconds since the Unix epoch, if it exists.
    fn start_time(&self, pid: u32) -> Option<u64>;
}

/// Probes with signal 0 and terminates with SIGKILL, covering the process group
/// when the target leads its own group.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalProbe;

fn to_nix_pid(pid: u32) -> Option<Pid> {
    // Zero and negative values address process groups rather than a process.
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

fn sysinfo_process<T>(pid: u32, read: impl FnOnce(&sysinfo::Process) -> T) -> Option<T> {
    let target = SysPid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system.process(target).map(read)
}

impl ProcessProbe for SignalProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let Some(target) = to_nix_pid(pid) else {
            return false;
        };

        match signal::kill(target, None) {
            Ok(()) => !sysinfo_process(pid, |p| p.status() == ProcessStatus::Zombie)
                .unwrap_or(false),
            Err(Errno::ESRCH) => false,
            // The process exists but belongs to someone else.
            Err(Errno::EPERM) => true,
            Err(err) => {
                warn!("Liveness probe for PID {pid} failed: {err}");
                true
            }
        }
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        let Some(target) = to_nix_pid(pid) else {
            return Ok(());
        };

        if let Ok(pgid) = getpgid(Some(target))
            && pgid == target
            && pgid != getpgrp()
        {
            match signal::killpg(pgid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(Errno::EPERM) => {
                    warn!(
                        "Insufficient permissions to signal process group {pgid}; falling back to direct signal"
                    );
                }
                Err(err) => return Err(errno_to_io(err)),
            }
        }

        match signal::kill(target, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(errno_to_io(err)),
        }
    }

    fn start_time(&self, pid: u32) -> Option<u64> {
        sysinfo_process(pid, |p| p.start_time())
    }
}

/// Where a launched process sends its stdout and stderr.
#[derive(Debug, Clone)]
pub enum OutputMode {
    /// Pipe both streams through the multiplexer. The process gets its own
    /// process group.
    Multiplexed(MultiWriter),
    /// Write both streams straight into the log file (or inherit them when no
    /// file is given) and detach into a new session, so the process outlives
    /// the launcher.
    Detached { log_file: Option<PathBuf> },
}

/// How far the identity of a process id can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Identity {
    /// Spawned by this supervisor; the pid stays reserved until reaped.
    Child,
    /// Adopted from a pid file written at the given time.
    StartedNoLaterThan(u64),
    Unknown,
}

/// Live handle to a worker or stop-helper process.
#[derive(Debug)]
pub struct WorkerProcessHandle {
    pid: u32,
    identity: Identity,
    child: Option<Child>,
    output: Vec<JoinHandle<()>>,
}

impl WorkerProcessHandle {
    /// Handle for a process this supervisor did not spawn, e.g. one recorded in
    /// a pid file. `written_at` is when that record was made (seconds since the
    /// epoch), used to reject a recycled pid before killing.
    pub fn adopt(pid: u32, written_at: Option<u64>) -> Self {
        let identity = match written_at {
            Some(at) => Identity::StartedNoLaterThan(at + PID_IDENTITY_SLACK_SECS),
            None => Identity::Unknown,
        };
        Self {
            pid,
            identity,
            child: None,
            output: Vec::new(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status, once a spawned child has been observed to exit.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child
            .as_mut()
            .and_then(|child| child.try_wait().ok().flatten())
    }

    /// Non-blocking liveness check. Reaps a spawned child that has exited.
    pub fn is_alive(&mut self, probe: &dyn ProcessProbe) -> bool {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(_)) => return false,
                Ok(None) => return true,
                Err(err) => debug!("try_wait on PID {} failed: {err}", self.pid),
            }
        }
        probe.is_alive(self.pid)
    }

    /// Checks that `pid` still names the process this handle was created for.
    fn identity_matches(&self, probe: &dyn ProcessProbe) -> bool {
        let Some(current) = probe.start_time(self.pid) else {
            return true;
        };
        match self.identity {
            Identity::StartedNoLaterThan(limit) => current <= limit,
            Identity::Child | Identity::Unknown => true,
        }
    }

    /// Forcibly terminates the process if it is still running.
    ///
    /// Returns `Ok(true)` when a kill was sent, `Ok(false)` when the process had
    /// already exited or the pid now belongs to a different process.
    pub fn kill(&mut self, probe: &dyn ProcessProbe) -> Result<bool, ServiceError> {
        let pid = self.pid;

        if let Some(child) = self.child.as_mut() {
            // An unreaped child keeps its pid reserved, so the id is still ours.
            if let Ok(Some(_)) = child.try_wait() {
                return Ok(false);
            }
            let signalled = probe.kill(pid);
            let fallback = child.kill();
            let _ = child.wait();
            return match (signalled, fallback) {
                (Ok(()), _) => Ok(true),
                (Err(err), Ok(())) => {
                    warn!("Signalling PID {pid} failed ({err}); killed it directly");
                    Ok(true)
                }
                (Err(source), Err(_)) => Err(ServiceError::KillFailed { pid, source }),
            };
        }

        if !probe.is_alive(pid) {
            return Ok(false);
        }
        if !self.identity_matches(probe) {
            warn!("PID {pid} now belongs to a different process; not killing it");
            return Ok(false);
        }

        probe
            .kill(pid)
            .map_err(|source| ServiceError::KillFailed { pid, source })?;
        Ok(true)
    }

    /// Waits up to `timeout` for the output pumps to drain, then detaches from
    /// any that are still running. Returns the number of pumps that finished.
    pub fn drain_output(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        while self.output.iter().any(|pump| !pump.is_finished()) && Instant::now() < deadline {
            thread::sleep(OUTPUT_DRAIN_POLL);
        }

        let mut finished = 0;
        for pump in self.output.drain(..) {
            if pump.is_finished() {
                let _ = pump.join();
                finished += 1;
            }
        }
        finished
    }
}

/// Spawns `spec` and wires its output according to `output`.
///
/// Fails with [`ServiceError::LaunchError`] when the program cannot be started;
/// the failure is returned immediately without retrying.
pub fn launch(
    spec: &CommandSpec,
    output: OutputMode,
) -> Result<WorkerProcessHandle, ServiceError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).stdin(Stdio::null());
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let detached = matches!(output, OutputMode::Detached { .. });
    match &output {
        OutputMode::Multiplexed(_) => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        OutputMode::Detached { log_file } => {
            let (stdout, stderr) = detached_streams(log_file.as_ref());
            cmd.stdout(stdout).stderr(stderr);
        }
    }

    unsafe {
        cmd.pre_exec(move || {
            if detached {
                if libc::setsid() < 0 {
                    return Err(io::Error::last_os_error());
                }
            } else if libc::setpgid(0, 0) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    debug!("Executing command: {}", spec.display_line());

    let mut child = cmd.spawn().map_err(|source| ServiceError::LaunchError {
        program: spec.program.clone(),
        source,
    })?;
    let pid = child.id();

    let mut pumps = Vec::new();
    if let OutputMode::Multiplexed(sink) = output {
        if let Some(stdout) = child.stdout.take() {
            match spawn_log_writer("stdout", stdout, sink.clone()) {
                Ok(handle) => pumps.push(handle),
                Err(err) => warn!("Failed to forward stdout of PID {pid}: {err}"),
            }
        }
        if let Some(stderr) = child.stderr.take() {
            match spawn_log_writer("stderr", stderr, sink) {
                Ok(handle) => pumps.push(handle),
                Err(err) => warn!("Failed to forward stderr of PID {pid}: {err}"),
            }
        }
    }

    debug!("Launched PID {pid} ({})", spec.program.display());

    Ok(WorkerProcessHandle {
        pid,
        identity: Identity::Child,
        child: Some(child),
        output: pumps,
    })
}

fn detached_streams(log_file: Option<&PathBuf>) -> (Stdio, Stdio) {
    let Some(path) = log_file else {
        return (Stdio::inherit(), Stdio::inherit());
    };

    let opened: io::Result<(File, File)> = RotatingLogFile::open(path).and_then(|log| {
        let file = log.into_file();
        let clone = file.try_clone()?;
        Ok((file, clone))
    });

    match opened {
        Ok((out, err)) => (Stdio::from(out), Stdio::from(err)),
        Err(err) => {
            warn!(
                "Failed to open log file {} for worker output: {err}",
                path.display()
            );
            (Stdio::inherit(), Stdio::inherit())
        }
    }
}
