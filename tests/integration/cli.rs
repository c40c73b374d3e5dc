#[path = "common/mod.rs"]
mod common;

use std::{
    path::Path,
    process::{Command as StdCommand, Stdio},
    thread,
    time::{Duration, Instant},
};

use assert_cmd::Command;
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use common::{FakeRuntime, is_process_alive, wait_for_pid_in, wait_for_process_exit};
use predicates::prelude::*;
use svcwrap::{config::ConfigStore, constants::CONFIG_DIR_ENV};
use tempfile::tempdir;

fn svcwrap(config_dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("svcwrap"));
    cmd.env(CONFIG_DIR_ENV, config_dir).env_remove("RUST_LOG");
    cmd
}

#[test]
fn print_renders_the_persisted_configuration() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let runtime = FakeRuntime::new(temp.path(), "exit 0", "exit 0");
    store.save(&runtime.config("billing", 15)).unwrap();

    svcwrap(store.dir())
        .args(["print", "billing"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("\"svcwrap\" \"test\" \"billing\" "))
        .stdout(predicate::str::contains("\"--StopTimeout=15\""))
        .stdout(predicate::str::contains("\"--StopMethod=stop\""));
}

#[test]
fn legacy_verb_codes_are_accepted() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let runtime = FakeRuntime::new(temp.path(), "exit 0", "exit 0");
    store.save(&runtime.config("billing", 15)).unwrap();

    svcwrap(store.dir())
        .arg("//PS//billing")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"test\" \"billing\""));
}

#[test]
fn missing_configuration_is_reported_on_stderr() {
    let temp = tempdir().expect("failed to create tempdir");

    svcwrap(temp.path())
        .args(["print", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration is not available"));
}

#[test]
fn bad_override_fails_without_launching() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let runtime = FakeRuntime::new(temp.path(), "exec sleep 30", "exit 0");
    store.save(&runtime.config("billing", 1)).unwrap();

    svcwrap(store.dir())
        .args(["start", "billing", "--NoSuchKey=1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown option 'NoSuchKey'"));
    assert!(!runtime.pid_file().exists());
}

#[test]
fn start_leaves_the_worker_running_and_stop_ends_it() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let runtime = FakeRuntime::new(temp.path(), "echo worker up\nexec sleep 30", "exit 0");
    store.save(&runtime.config("billing", 1)).unwrap();

    svcwrap(store.dir())
        .args(["start", "billing"])
        .assert()
        .success();
    let worker = wait_for_pid_in(&runtime.pid_file());
    assert!(is_process_alive(worker));

    svcwrap(store.dir())
        .args(["stop", "billing"])
        .assert()
        .success();
    wait_for_process_exit(worker);
    assert!(!runtime.pid_file().exists());

    let log = std::fs::read_to_string(runtime.log_dir().join("billing.log")).unwrap();
    assert!(log.contains("worker up"));
}

#[test]
fn start_with_missing_runtime_fails() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let runtime = FakeRuntime {
        root: temp.path().to_path_buf(),
    };
    store.save(&runtime.config("billing", 1)).unwrap();

    svcwrap(store.dir())
        .args(["start", "billing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to launch"));
}

#[test]
fn interrupted_test_run_still_stops_the_worker() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let runtime = FakeRuntime::new(temp.path(), "exec sleep 30", "exit 0");
    store.save(&runtime.config("billing", 1)).unwrap();

    let mut svcwrap = StdCommand::new(assert_cmd::cargo::cargo_bin!("svcwrap"))
        .env(CONFIG_DIR_ENV, store.dir())
        .env_remove("RUST_LOG")
        .args(["test", "billing"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn svcwrap");

    let worker = wait_for_pid_in(&runtime.pid_file());
    assert!(is_process_alive(worker));

    kill(Pid::from_raw(svcwrap.id() as i32), Signal::SIGINT).expect("failed to send SIGINT");

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = svcwrap.try_wait().unwrap() {
            break status;
        }
        assert!(Instant::now() < deadline, "svcwrap did not exit after SIGINT");
        thread::sleep(Duration::from_millis(50));
    };

    assert!(status.success(), "svcwrap exited with {status}");
    wait_for_process_exit(worker);
    assert!(!runtime.pid_file().exists());
}

#[test]
fn run_failures_stay_off_stderr() {
    let temp = tempdir().expect("failed to create tempdir");

    svcwrap(temp.path())
        .args(["run", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::is_empty());
}
