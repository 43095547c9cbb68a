//! Integration tests for the hub: loading task files from disk, launching
//! selected tasks through a stub executor, and persisting preferences to a
//! scratch config file.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskhub_lib::gc::FnProbe;
use taskhub_lib::{
    CancelToken, CommandExecutor, ExecutionOutcome, HubConfig, LaunchError, LaunchRequest,
    ManualClock, MemorySample, RunStatus, TaskHub,
};

const TASKFILE_V1: &str = r#"
version: '3'
tasks:
  build:
    desc: Build everything
    tags: [ci]
    cmds: [make]
  test:
    desc: Run the test suite
    cmds: [make test]
  legacy:
    cmds: [echo old]
"#;

const TASKFILE_V2: &str = r#"
version: '3'
tasks:
  build:
    desc: Build everything, faster
    cmds: [make -j8]
  test:
    desc: Run the test suite
    cmds: [make test]
"#;

/// Records every request and fails tasks whose name starts with `fail`.
#[derive(Default)]
struct RecordingExecutor {
    seen: Mutex<Vec<LaunchRequest>>,
}

impl CommandExecutor for RecordingExecutor {
    fn execute(
        &self,
        request: &LaunchRequest,
        _cancel: &CancelToken,
    ) -> Result<ExecutionOutcome, LaunchError> {
        self.seen.lock().unwrap().push(request.clone());
        if request.task_names.iter().any(|name| name.starts_with("fail")) {
            Ok(ExecutionOutcome::failed("boom"))
        } else {
            Ok(ExecutionOutcome::succeeded("ok"))
        }
    }
}

fn hub_in(dir: &std::path::Path, executor: Arc<RecordingExecutor>) -> TaskHub {
    let config = HubConfig {
        config_path: Some(dir.join("config.yaml")),
        ..HubConfig::ephemeral()
    };
    let probe = FnProbe::new(|| MemorySample::new(100, 1000));
    let executor: Arc<dyn CommandExecutor> = executor;
    TaskHub::with_parts(
        config,
        Arc::new(ManualClock::default()),
        Box::new(probe),
        Some(executor),
    )
    .unwrap()
}

#[test]
fn test_reload_keeps_selection_and_drops_removed_tasks() {
    let tmp = tempfile::tempdir().unwrap();
    let taskfile = tmp.path().join("Taskfile.yml");
    fs::write(&taskfile, TASKFILE_V1).unwrap();

    let hub = hub_in(tmp.path(), Arc::new(RecordingExecutor::default()));

    let summary = hub.load_taskfile(&taskfile).unwrap();
    assert_eq!(summary.registered, 3);
    hub.interact(|store| {
        store.update_selection("build", true);
        store.update_selection("legacy", true);
        store.record_run("build", RunStatus::Success);
    });

    fs::write(&taskfile, TASKFILE_V2).unwrap();
    let summary = hub.load_taskfile(&taskfile).unwrap();

    assert_eq!(summary.removed, vec!["legacy"]);
    hub.interact(|store| {
        assert_eq!(store.get_selected_task_names(), vec!["build"]);
        assert_eq!(store.get_task_runtime("build").run_count, 1);

        let state = store.get_state();
        assert_eq!(
            state.tasks["build"].data["description"],
            serde_json::json!("Build everything, faster")
        );
        assert!(!state.tasks.contains_key("legacy"));
    });
}

#[test]
fn test_missing_taskfile_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let hub = hub_in(tmp.path(), Arc::new(RecordingExecutor::default()));

    assert!(hub.load_taskfile(&tmp.path().join("nope.yml")).is_err());
    assert!(hub.interact(|store| store.get_state().task_files.is_empty()));
}

#[test]
fn test_launch_selected_uses_active_taskfile() {
    let tmp = tempfile::tempdir().unwrap();
    let taskfile = tmp.path().join("Taskfile.yml");
    fs::write(&taskfile, TASKFILE_V1).unwrap();

    let executor = Arc::new(RecordingExecutor::default());
    let hub = hub_in(tmp.path(), Arc::clone(&executor));
    hub.load_taskfile(&taskfile).unwrap();
    hub.interact(|store| {
        store.set_active_taskfile(taskfile.to_str());
        store.update_selection("build", true);
        store.update_selection("test", true);
    });

    let handles = hub.launch_selected(None, false).unwrap();
    assert_eq!(handles.len(), 1);
    let report = handles[0].wait_timeout(Duration::from_secs(5)).unwrap();
    assert!(report.is_success());

    let seen = executor.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].task_names, vec!["build", "test"]);
    assert_eq!(seen[0].taskfile, Some(PathBuf::from(&taskfile)));

    hub.interact(|store| {
        for name in ["build", "test"] {
            let runtime = store.get_task_runtime(name);
            assert_eq!(runtime.run_count, 1);
            assert_eq!(runtime.last_status, Some(RunStatus::Success));
        }
    });
    hub.shutdown(Duration::from_secs(5)).unwrap();
}

#[test]
fn test_failed_launch_is_recorded() {
    let tmp = tempfile::tempdir().unwrap();
    let hub = hub_in(tmp.path(), Arc::new(RecordingExecutor::default()));
    hub.interact(|store| {
        store.register_task_file("inline.yml", None);
        store.register_task("fail-fast", Default::default(), "inline.yml", None);
    });

    let report = hub
        .launch(vec!["fail-fast".to_string()], None)
        .unwrap()
        .wait_timeout(Duration::from_secs(5))
        .unwrap();

    assert_eq!(report.status, Some(RunStatus::Failed));
    let runtime = hub.interact(|store| store.get_task_runtime("fail-fast"));
    assert_eq!(runtime.last_status, Some(RunStatus::Failed));
}

#[test]
fn test_preferences_survive_restart_but_selection_does_not() {
    let tmp = tempfile::tempdir().unwrap();
    let taskfile = tmp.path().join("Taskfile.yml");
    fs::write(&taskfile, TASKFILE_V1).unwrap();

    {
        let hub = hub_in(tmp.path(), Arc::new(RecordingExecutor::default()));
        hub.load_taskfile(&taskfile).unwrap();
        hub.interact(|store| {
            store.add_favorite_tag("ci");
            store.set_merge_mode(true);
            store.update_selection("build", true);
        });
        hub.shutdown(Duration::from_secs(5)).unwrap();
    }

    let hub = hub_in(tmp.path(), Arc::new(RecordingExecutor::default()));
    hub.interact(|store| {
        assert_eq!(store.favorite_tags(), vec!["ci"]);
        assert!(store.merge_mode());
        assert_eq!(
            store.known_taskfiles(),
            vec![taskfile.to_string_lossy().to_string()]
        );
        assert!(store.get_selected_task_names().is_empty());
    });
}
