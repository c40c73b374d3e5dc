#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use svcwrap::config::ServiceConfiguration;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// Scratch layout for one service: a fake runtime home, a log directory and
/// a pid file path.
pub struct FakeRuntime {
    pub root: PathBuf,
}

impl FakeRuntime {
    /// Creates `<root>/jdk/bin/java` as a shell script. The script runs `stop`
    /// when its last argument is `stop` (the stop method) and `start` otherwise.
    pub fn new(root: &Path, start: &str, stop: &str) -> Self {
        let bin = root.join("jdk/bin");
        fs::create_dir_all(&bin).expect("failed to create runtime bin dir");
        let script = format!(
            "#!/bin/sh\nfor last; do :; done\nif [ \"$last\" = stop ]; then\n{stop}\nelse\n{start}\nfi\n"
        );
        let java = bin.join("java");
        fs::write(&java, script).expect("failed to write fake java");
        fs::set_permissions(&java, fs::Permissions::from_mode(0o755))
            .expect("failed to make fake java executable");
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn home(&self) -> PathBuf {
        self.root.join("jdk")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("run/worker.pid")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Configuration wired to this runtime with the given stop timeout.
    pub fn config(&self, name: &str, stop_timeout: u64) -> ServiceConfiguration {
        let mut config = ServiceConfiguration::with_install_defaults(name);
        config.runtime_home = self.home().display().to_string();
        config.stop_entry.method = "stop".into();
        config.stop_timeout_seconds = stop_timeout;
        config.pid_file = Some(self.pid_file());
        config.log_path = self.log_dir().display().to_string();
        config.log_prefix = name.to_string();
        config.log_level = "Debug".into();
        config
    }

    /// `--Key=Value` overrides matching [`FakeRuntime::config`].
    pub fn overrides(&self, stop_timeout: u64) -> Vec<String> {
        vec![
            format!("--JavaHome={}", self.home().display()),
            "--StopMethod=stop".into(),
            format!("--StopTimeout={stop_timeout}"),
            format!("--PidFile={}", self.pid_file().display()),
            format!("--LogPath={}", self.log_dir().display()),
            "--LogLevel=Debug".into(),
        ]
    }
}

/// Shell snippet that records its own pid in `path`.
pub fn record_pid(path: &Path) -> String {
    format!("echo $$ > '{}'", path.display())
}

/// Returns `true` while `pid` names a running, non-zombie process.
pub fn is_process_alive(pid: u32) -> bool {
    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system
        .process(target)
        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

pub fn wait_for_pid_in(path: &Path) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = fs::read_to_string(path)
            && let Ok(pid) = content.trim().parse::<u32>()
        {
            return pid;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for a pid in {:?}", path);
        }

        thread::sleep(Duration::from_millis(50));
    }
}

pub fn wait_for_process_exit(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for PID {} to exit", pid);
}

pub fn wait_for_log_line(path: &Path, needle: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = fs::read_to_string(path)
            && content.contains(needle)
        {
            return content;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for '{needle}' in {:?}", path);
        }

        thread::sleep(Duration::from_millis(100));
    }
}
