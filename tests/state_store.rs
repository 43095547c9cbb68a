//! Integration tests for the task-state store.
//!
//! Covers the reload flow, run history, lenient handling of unknown tasks,
//! cache bounds and expiry under a simulated clock, and the export/import
//! round trip, always checking that the `select` mirror agrees with the
//! owning task file records.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use taskhub_lib::state::structure::ensure_structure;
use taskhub_lib::state::sync::mirror_is_consistent;
use taskhub_lib::state::types::{TaskFileRecord, TaskRecord};
use taskhub_lib::{
    CacheLimits, Clock, GlobalState, ManualClock, MemoryCache, RunStatus, StateStore,
    ValidationError,
};

const TASKFILE: &str = "/work/Taskfile.yml";

fn store_with(limits: CacheLimits) -> (StateStore, Arc<MemoryCache>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let cache = Arc::new(MemoryCache::new(limits, clock.clone()));
    (StateStore::new(Arc::clone(&cache), None), cache, clock)
}

fn register(store: &StateStore, file: &str, names: &[&str]) {
    store.register_task_file(file, None);
    for name in names {
        let mut data = IndexMap::new();
        data.insert("name".to_string(), Value::String(name.to_string()));
        data.insert(
            "description".to_string(),
            Value::String(format!("Runs {}", name)),
        );
        store.register_task(name, data, file, None);
    }
}

// =============================================================================
// Reload flow
// =============================================================================

#[test]
fn test_selection_survives_reload() {
    let store = StateStore::in_memory();
    register(&store, TASKFILE, &["build", "test"]);

    store.update_selection("build", true);
    assert_eq!(store.get_selected_task_names(), vec!["build"]);

    // Reload: the same file and tasks are registered again
    register(&store, TASKFILE, &["build", "test"]);

    assert!(store.get_task_selection_state("build"));
    assert!(!store.get_task_selection_state("test"));
    assert!(mirror_is_consistent(&store.get_state()));
}

#[test]
fn test_reregistering_file_alone_keeps_selection() {
    let store = StateStore::in_memory();
    register(&store, TASKFILE, &["build", "test"]);
    store.update_selection("test", true);

    store.register_task_file(TASKFILE, None);

    assert!(store.get_task_selection_state("test"));
    assert_eq!(store.get_selected_task_names(), vec!["test"]);
}

// =============================================================================
// Run history
// =============================================================================

#[test]
fn test_record_run_three_times() {
    let store = StateStore::in_memory();
    register(&store, TASKFILE, &["build"]);

    for _ in 0..3 {
        assert!(store.record_run("build", RunStatus::Success));
    }

    let runtime = store.get_task_runtime("build");
    assert_eq!(runtime.run_count, 3);
    assert_eq!(runtime.last_status, Some(RunStatus::Success));
    assert!(runtime.last_run.is_some());
}

#[test]
fn test_last_status_follows_latest_run() {
    let store = StateStore::in_memory();
    register(&store, TASKFILE, &["deploy"]);

    store.record_run("deploy", RunStatus::Success);
    store.record_run("deploy", RunStatus::Failed);

    let runtime = store.get_task_runtime("deploy");
    assert_eq!(runtime.run_count, 2);
    assert_eq!(runtime.last_status, Some(RunStatus::Failed));
}

// =============================================================================
// Unknown tasks
// =============================================================================

#[test]
fn test_unknown_task_is_a_no_op() {
    let store = StateStore::in_memory();
    register(&store, TASKFILE, &["build"]);
    store.update_selection("build", true);
    let before = store.get_state();

    assert!(!store.update_selection("does_not_exist", true));
    assert!(!store.record_run("does_not_exist", RunStatus::Success));

    assert_eq!(store.get_selected_task_names(), vec!["build"]);
    assert!(!store.get_task_selection_state("does_not_exist"));
    assert_eq!(store.get_task_runtime("does_not_exist").run_count, 0);
    assert_eq!(store.get_state(), before);
}

// =============================================================================
// Cache
// =============================================================================

#[test]
fn test_cache_expires_with_simulated_clock() {
    let (store, cache, clock) = store_with(CacheLimits::default());
    register(&store, TASKFILE, &["build"]);
    assert!(cache.get().is_some());

    clock.advance(cache.limits().max_age + Duration::from_secs(1));

    assert!(cache.get().is_none());
    // The store itself is unaffected by an expired snapshot
    register(&store, TASKFILE, &["build"]);
    assert!(store.get_state().tasks.contains_key("build"));
}

#[test]
fn test_cache_stays_within_bound() {
    let limits = CacheLimits {
        max_bytes: 4 * 1024,
        max_age: Duration::from_secs(3600),
    };
    let (store, cache, _clock) = store_with(limits);

    for batch in 0..20 {
        let names: Vec<String> = (0..10).map(|i| format!("task-{}-{}", batch, i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        register(&store, &format!("/work/batch-{}.yml", batch), &refs);
        store.update_selection(refs[0], true);

        assert!(
            cache.size_bytes() <= limits.max_bytes,
            "cache grew to {} bytes",
            cache.size_bytes()
        );
    }

    // The canonical state never shrinks to fit the cache
    assert_eq!(store.get_state().tasks.len(), 200);
    assert_eq!(store.get_selected_task_names().len(), 20);
}

// =============================================================================
// Export / import
// =============================================================================

#[test]
fn test_export_import_round_trip() {
    let store = StateStore::in_memory();
    register(&store, TASKFILE, &["build", "test", "lint"]);
    store.update_selection("build", true);
    store.update_selection("lint", true);
    store.record_run("test", RunStatus::Failed);
    store.add_favorite_tag("ci");
    store.set_card_view_setting("show_tags", Value::Bool(false));

    let before = store.get_state();
    let document = store.export_state();

    let restored = StateStore::in_memory();
    restored.import_state(&document).unwrap();
    let after = restored.get_state();

    assert_eq!(after.select, before.select);
    assert_eq!(after.task_files, before.task_files);
    assert_eq!(after.tasks, before.tasks);
    assert_eq!(after.user_preferences, before.user_preferences);
    assert_eq!(after.local, before.local);
    assert!(mirror_is_consistent(&after));
}

#[test]
fn test_invalid_import_leaves_store_untouched() {
    let store = StateStore::in_memory();
    register(&store, TASKFILE, &["build"]);
    store.update_selection("build", true);
    let before = store.get_state();

    let result = store.import_state(r#"{"version": "1.0", "tasks": {}}"#);
    assert_eq!(
        result,
        Err(ValidationError::UnsupportedVersion("1.0".to_string()))
    );
    assert!(store.import_state("{ not json").is_err());

    assert_eq!(store.get_state(), before);
}

// =============================================================================
// Structure and mirror invariants
// =============================================================================

#[test]
fn test_structure_repair_is_idempotent() {
    let mut document: GlobalState = serde_json::from_str(
        r#"{
            "version": "",
            "tasks": {"build": {"source_file": "Taskfile.yml", "data": {}}},
            "user_preferences": {"ui_settings": {"card_view": true}}
        }"#,
    )
    .unwrap();
    let now = chrono::Utc::now();

    ensure_structure(&mut document, now);
    let once = document.clone();
    ensure_structure(&mut document, now);

    assert_eq!(document, once);
    assert!(document.task_files.contains_key("Taskfile.yml"));
}

#[test]
fn test_mirror_holds_across_operations() {
    let store = StateStore::in_memory();
    register(&store, "/work/a.yml", &["build", "test"]);
    register(&store, "/work/b.yml", &["docs", "publish"]);

    let steps: Vec<Box<dyn Fn(&StateStore)>> = vec![
        Box::new(|s| {
            s.update_selection("build", true);
        }),
        Box::new(|s| {
            s.update_selection("docs", true);
        }),
        Box::new(|s| s.apply_legacy_list(&["test".to_string(), "publish".to_string()])),
        Box::new(|s| {
            s.set_legacy_selected("build", true);
        }),
        Box::new(|s| {
            s.register_task("docs", IndexMap::new(), "/work/a.yml", None);
        }),
        Box::new(|s| {
            s.prune_task_file("/work/b.yml", &[]);
        }),
        Box::new(|s| {
            s.remove_task_file("/work/a.yml");
        }),
        Box::new(|s| s.clear_selections()),
    ];

    for step in &steps {
        step(&store);
        let state = store.get_state();
        assert!(mirror_is_consistent(&state));

        let legacy = store.legacy_selection();
        assert_eq!(legacy.selected_list, store.get_selected_task_names());
    }
}

#[test]
fn test_update_state_repairs_inconsistent_input() {
    let (store, cache, clock) = store_with(CacheLimits::default());
    register(&store, TASKFILE, &["build"]);
    clock.advance(Duration::from_secs(60));

    let stale = clock.now() - chrono::Duration::days(3);
    let mut state = GlobalState::new(stale);
    let mut file = TaskFileRecord::new(stale);
    file.task_state.insert("build".to_string(), Default::default());
    state.task_files.insert("a.yml".to_string(), file);
    for (name, source) in [("build", "a.yml"), ("lint", "ci.yml")] {
        state.tasks.insert(
            name.to_string(),
            TaskRecord {
                source_file: source.to_string(),
                data: IndexMap::new(),
            },
        );
    }
    // The mirror disagrees with the owning entry and names a task that does not exist
    state.select.insert("build".to_string(), true);
    state.select.insert("ghost".to_string(), true);

    store.update_state(state);
    let repaired = store.get_state();

    assert!(mirror_is_consistent(&repaired));
    assert_eq!(repaired.select.get("build"), Some(&false));
    assert!(!repaired.select.contains_key("ghost"));
    assert!(repaired.task_files["ci.yml"].task_state.contains_key("lint"));
    assert_eq!(repaired.last_updated, clock.now());

    let legacy = store.legacy_selection();
    assert!(legacy.selected_list.is_empty());
    assert_eq!(legacy.selected_map.get("build"), Some(&false));
    assert!(!legacy.is_selected("ghost"));

    let cached = cache.get().and_then(|snapshot| snapshot.restore()).unwrap();
    assert_eq!(cached, repaired);
}

#[test]
fn test_move_and_return_leaves_one_entry() {
    let store = StateStore::in_memory();
    register(&store, "/work/a.yml", &["deploy"]);
    store.update_selection("deploy", true);

    register(&store, "/work/b.yml", &["deploy"]);
    store.update_selection("deploy", false);
    store.record_run("deploy", RunStatus::Failed);
    register(&store, "/work/a.yml", &["deploy"]);

    let state = store.get_state();
    let holders: Vec<&str> = state
        .task_files
        .iter()
        .filter(|(_, file)| file.task_state.contains_key("deploy"))
        .map(|(path, _)| path.as_str())
        .collect();
    assert_eq!(holders, vec!["/work/a.yml"]);
    assert!(!store.get_task_selection_state("deploy"));
    assert_eq!(store.get_task_runtime("deploy").last_status, Some(RunStatus::Failed));
    assert!(mirror_is_consistent(&state));
    assert!(store.legacy_selection().selected_list.is_empty());
}
