//! Bounded wait for a process to exit.
use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    constants::TERMINATION_POLL_INTERVAL,
    error::ServiceError,
    process::{ProcessProbe, WorkerProcessHandle},
    reporter::Reporter,
};

/// Polls `handle` every [`TERMINATION_POLL_INTERVAL`] until it exits or
/// `timeout` elapses.
///
/// Returns `true` as soon as the process is observed dead and `false` when it
/// outlives the timeout. A timeout is reported as a warning; escalation is left
/// to the caller.
pub fn await_termination(
    handle: &mut WorkerProcessHandle,
    probe: &dyn ProcessProbe,
    timeout: Duration,
    reporter: &Reporter,
) -> bool {
    let deadline = Instant::now() + timeout;

    loop {
        if !handle.is_alive(probe) {
            reporter.debug(format!("PID {} exited", handle.pid()));
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            reporter.warn(ServiceError::TimeoutExceeded {
                pid: handle.pid(),
                timeout,
            });
            return false;
        }

        thread::sleep(TERMINATION_POLL_INTERVAL.min(deadline - now));
    }
}
