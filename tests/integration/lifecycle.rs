#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    io::Cursor,
    sync::{Arc, Mutex},
};

use common::{FakeRuntime, is_process_alive, wait_for_pid_in};
use svcwrap::{
    config::{ConfigStore, ServiceConfiguration},
    controller::ServiceController,
    error::ServiceError,
    reporter::Reporter,
    service::{ServiceHandler, ServiceManager},
};
use tempfile::tempdir;

/// Records every registration call instead of talking to a real host.
#[derive(Clone, Default)]
struct RecordingManager {
    calls: Arc<Mutex<Vec<String>>>,
    installed: Arc<Mutex<Option<ServiceConfiguration>>>,
}

impl RecordingManager {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ServiceManager for RecordingManager {
    fn install(&self, config: &ServiceConfiguration) -> Result<(), ServiceError> {
        self.record(format!("install {}", config.name));
        *self.installed.lock().unwrap() = Some(config.clone());
        Ok(())
    }

    fn uninstall(&self, name: &str) -> Result<(), ServiceError> {
        self.record(format!("uninstall {name}"));
        if self.installed.lock().unwrap().take().is_none() {
            return Err(ServiceError::RegistrationError {
                action: "uninstall",
                service: name.to_string(),
                message: "service is not installed".into(),
            });
        }
        Ok(())
    }

    fn start(&self, name: &str) -> Result<(), ServiceError> {
        self.record(format!("start {name}"));
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<(), ServiceError> {
        self.record(format!("stop {name}"));
        Ok(())
    }

    fn run(&self, name: &str, handler: &dyn ServiceHandler) -> Result<(), ServiceError> {
        self.record(format!("run {name}"));
        handler.on_start()?;
        handler.on_stop()
    }
}

fn controller(store: &ConfigStore, manager: &RecordingManager) -> ServiceController<RecordingManager> {
    ServiceController::new(store.clone(), manager.clone(), Reporter::default())
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[test]
fn install_persists_defaults_and_registers() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let manager = RecordingManager::default();
    let controller = controller(&store, &manager);

    let path = controller
        .install(
            "billing",
            &args(&["--Classpath=/srv/billing/app.jar", "--StartClass="]),
        )
        .expect("install failed");

    assert_eq!(path, store.path("billing"));
    let config = store.load("billing").unwrap();
    assert_eq!(config.startup, "manual");
    assert_eq!(config.jvm, "auto");
    assert_eq!(config.stop_entry.class, "Main");
    assert_eq!(config.stop_entry.method, "main");
    assert_eq!(config.stop_timeout_seconds, 20);
    assert_eq!(config.classpath, "/srv/billing/app.jar");
    assert!(config.start_entry.class.is_empty());

    assert_eq!(manager.calls(), vec!["uninstall billing", "install billing"]);
}

#[test]
fn repeated_install_is_idempotent() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let manager = RecordingManager::default();
    let controller = controller(&store, &manager);

    controller.install("billing", &[]).unwrap();
    let first = fs::read_to_string(store.path("billing")).unwrap();
    controller.install("billing", &[]).unwrap();
    let second = fs::read_to_string(store.path("billing")).unwrap();

    assert_eq!(first, second);
    assert_eq!(
        manager.calls(),
        vec![
            "uninstall billing",
            "install billing",
            "uninstall billing",
            "install billing"
        ]
    );
}

#[test]
fn automatic_startup_starts_after_install() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let manager = RecordingManager::default();
    let controller = controller(&store, &manager);

    controller
        .install("billing", &args(&["--Startup", "auto"]))
        .unwrap();
    assert_eq!(manager.calls().last().map(String::as_str), Some("start billing"));
}

#[test]
fn update_keeps_unrelated_fields() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let manager = RecordingManager::default();
    let controller = controller(&store, &manager);

    controller
        .install("billing", &args(&["--JvmMx=512m", "--JvmOptions=-Da=1"]))
        .unwrap();
    controller
        .update("billing", &args(&["++JvmOptions=-Db=2", "--StopTimeout=7200"]))
        .unwrap();

    let config = store.load("billing").unwrap();
    assert_eq!(config.heap_max, "512m");
    assert_eq!(config.runtime_options, vec!["-Da=1", "-Db=2"]);
    assert_eq!(config.stop_timeout_seconds, 3600);
}

#[test]
fn update_of_unknown_service_fails() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let manager = RecordingManager::default();
    let controller = controller(&store, &manager);

    let err = controller.update("ghost", &[]).unwrap_err();
    assert!(matches!(err, ServiceError::ConfigNotFound { .. }));
    assert!(manager.calls().is_empty());
}

#[test]
fn uninstall_stops_deregisters_and_deletes() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let manager = RecordingManager::default();
    let controller = controller(&store, &manager);

    controller.install("billing", &[]).unwrap();
    controller.uninstall("billing").unwrap();

    assert!(!store.exists("billing"));
    assert_eq!(
        manager.calls()[2..],
        ["stop billing".to_string(), "uninstall billing".to_string()]
    );
    assert!(matches!(
        controller.uninstall("billing").unwrap_err(),
        ServiceError::ConfigNotFound { .. }
    ));
}

#[test]
fn invalid_override_aborts_install() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let manager = RecordingManager::default();
    let controller = controller(&store, &manager);

    let err = controller
        .install("billing", &args(&["--StopTimeout=soon"]))
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOverride(_)));
    assert!(!store.exists("billing"));
    assert!(manager.calls().is_empty());
}

#[test]
fn print_renders_a_reparseable_command_line() {
    let temp = tempdir().expect("failed to create tempdir");
    let store = ConfigStore::new(temp.path().join("conf"));
    let manager = RecordingManager::default();
    let controller = controller(&store, &manager);

    controller
        .install(
            "billing",
            &args(&[
                "--Description=Billing backend",
                "--JvmOptions=-Da=1;-Db=2",
                "--PidFile=/run/billing.pid",
                "--StopTimeout=45",
            ]),
        )
        .unwrap();

    let line = controller.print("billing").unwrap();
    let parts: Vec<String> = line
        .split("\" \"")
        .map(|part| part.trim_matches('"').to_string())
        .collect();
    assert_eq!(parts[1], "test");
    assert_eq!(parts[2], "billing");

    let mut reparsed = ServiceConfiguration {
        name: "billing".into(),
        ..ServiceConfiguration::default()
    };
    reparsed.apply_overrides(&parts[3..]).unwrap();
    assert_eq!(reparsed, store.load("billing").unwrap());
}

#[test]
fn start_and_stop_verbs_drive_the_worker() {
    let temp = tempdir().expect("failed to create tempdir");
    let runtime = FakeRuntime::new(temp.path(), "exec sleep 30", "exit 0");
    let store = ConfigStore::new(temp.path().join("conf"));
    let manager = RecordingManager::default();
    let controller = controller(&store, &manager);
    controller.install("billing", &runtime.overrides(1)).unwrap();

    controller.start("billing", &[]).expect("start failed");
    let worker = wait_for_pid_in(&runtime.pid_file());
    assert!(is_process_alive(worker));

    controller.stop("billing", &[]).expect("stop failed");
    assert!(!is_process_alive(worker));
    assert!(!runtime.pid_file().exists());

    let log = fs::read_to_string(runtime.log_dir().join("billing.log")).unwrap();
    assert!(log.contains("DEBUG Starting 'billing'"));
    assert!(log.contains("INFO Service 'billing' stopped"));
}

#[test]
fn test_verb_waits_for_input_between_start_and_stop() {
    let temp = tempdir().expect("failed to create tempdir");
    let runtime = FakeRuntime::new(temp.path(), "exec sleep 30", "exit 0");
    let store = ConfigStore::new(temp.path().join("conf"));
    let manager = RecordingManager::default();
    let controller = controller(&store, &manager);
    controller.install("billing", &runtime.overrides(1)).unwrap();

    controller
        .test("billing", &[], Cursor::new(b"\n".to_vec()))
        .expect("test failed");

    assert!(!runtime.pid_file().exists());
}

#[test]
fn run_hands_the_supervisor_to_the_manager() {
    let temp = tempdir().expect("failed to create tempdir");
    let runtime = FakeRuntime::new(temp.path(), "exec sleep 30", "exit 0");
    let store = ConfigStore::new(temp.path().join("conf"));
    let manager = RecordingManager::default();
    let controller = controller(&store, &manager);
    controller.install("billing", &runtime.overrides(1)).unwrap();

    controller.run("billing").expect("run failed");

    assert_eq!(manager.calls().last().map(String::as_str), Some("run billing"));
    assert!(!runtime.pid_file().exists());
}
