pub mod structure;
pub mod sync;
pub mod transfer;
pub mod types;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::cache::{Clock, MemoryCache};
use crate::persistence::{ConfigDocument, ConfigFile};
use crate::shared::errors::ValidationError;
use structure::ensure_structure;
use sync::{reconcile, repair_select, LegacySelection};
use types::{
    GlobalState, RunStatus, RuntimePatch, RuntimeRecord, TaskFileRecord, TaskRecord,
    CARD_VIEW_KEY,
};

struct StoreInner {
    state: Option<GlobalState>,
    legacy: LegacySelection,
    /// In-memory mirror of the durable config document.
    document: ConfigDocument,
}

/// Single source of truth for selection, run history and preferences.
///
/// Every mutation runs under one write lock that also covers the cache
/// refresh, so readers never see a state whose `select` mirror or cached
/// snapshot lags behind. Lock order is store, then cache.
pub struct StateStore {
    inner: RwLock<StoreInner>,
    cache: Arc<MemoryCache>,
    clock: Arc<dyn Clock>,
    config: Option<ConfigFile>,
}

impl StateStore {
    pub fn new(cache: Arc<MemoryCache>, config: Option<ConfigFile>) -> Self {
        let document = config.as_ref().map(ConfigFile::load).unwrap_or_default();
        Self {
            inner: RwLock::new(StoreInner {
                state: None,
                legacy: LegacySelection::default(),
                document,
            }),
            clock: cache.clock(),
            cache,
            config,
        }
    }

    /// Store with default cache limits and no durable config.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::with_defaults()), None)
    }

    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Build the initial state from a fresh cache snapshot or from scratch,
    /// then overlay the durable preferences.
    fn bootstrap(&self, document: &ConfigDocument) -> GlobalState {
        let now = self.clock.now();

        let mut state = match self.cache.get().and_then(|snapshot| snapshot.restore()) {
            Some(state) => {
                tracing::debug!(target: "state", "State restored from cache snapshot");
                state
            }
            None => {
                tracing::debug!(target: "state", "Initializing fresh state");
                GlobalState::new(now)
            }
        };

        apply_document(&mut state, document);
        ensure_structure(&mut state, now);
        repair_select(&mut state);
        state
    }

    /// The live state and its legacy views, bootstrapping on first use.
    fn initialized<'a>(
        &self,
        inner: &'a mut StoreInner,
    ) -> (&'a mut GlobalState, &'a mut LegacySelection) {
        let StoreInner {
            state,
            legacy,
            document,
        } = inner;

        let current = match state.take() {
            Some(current) => current,
            None => {
                let fresh = self.bootstrap(document);
                *legacy = reconcile(&fresh);
                self.cache.put(&fresh);
                fresh
            }
        };
        (state.insert(current), legacy)
    }

    fn view<R>(&self, f: impl FnOnce(&GlobalState, &LegacySelection) -> R) -> R {
        {
            let inner = self.read();
            if let Some(state) = inner.state.as_ref() {
                return f(state, &inner.legacy);
            }
        }

        let mut guard = self.write();
        let (state, legacy) = self.initialized(&mut guard);
        f(state, legacy)
    }

    /// Run `op` against the live state. When it reports a change, the state
    /// is repaired, stamped, re-derived and re-cached before the lock drops.
    fn mutate(&self, op: impl FnOnce(&mut GlobalState, DateTime<Utc>) -> bool) -> bool {
        let now = self.clock.now();
        let mut guard = self.write();
        let (state, legacy) = self.initialized(&mut guard);

        if !op(state, now) {
            return false;
        }

        ensure_structure(state, now);
        repair_select(state);
        state.last_updated = now;
        *legacy = reconcile(state);
        self.cache.put(state);
        true
    }

    /// Apply `edit` to the config document and persist it. Failures are logged only.
    fn edit_document(&self, edit: impl FnOnce(&mut ConfigDocument) -> bool) {
        let snapshot = {
            let mut inner = self.write();
            if !edit(&mut inner.document) {
                return;
            }
            inner.document.clone()
        };

        if let Some(config) = &self.config {
            if let Err(e) = config.save(&snapshot) {
                tracing::warn!(target: "config", "Failed to persist config: {}", e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Whole-state access
    // ------------------------------------------------------------------

    pub fn get_state(&self) -> GlobalState {
        self.view(|state, _| state.clone())
    }

    /// Replace the state wholesale.
    pub fn update_state(&self, new: GlobalState) {
        self.mutate(|state, _| {
            *state = new;
            true
        });
        self.sync_document_from_state();
    }

    /// Drop the state and its cached snapshot. The next access starts over.
    pub fn reset(&self) {
        let mut inner = self.write();
        inner.state = None;
        inner.legacy = LegacySelection::default();
        self.cache.invalidate();
        tracing::info!(target: "state", "State reset");
    }

    pub fn export_state(&self) -> String {
        self.view(|state, _| transfer::export_document(state))
    }

    /// Replace the state with a previously exported document.
    ///
    /// On a validation failure the store is left untouched.
    pub fn import_state(&self, document: &str) -> Result<(), ValidationError> {
        let imported = transfer::parse_document(document).map_err(|e| {
            tracing::warn!(target: "state", "Rejected state import: {}", e);
            e
        })?;
        self.update_state(imported);
        tracing::info!(target: "state", "State imported");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Create or refresh a task file record. Existing selection state is kept.
    pub fn register_task_file(&self, path: &str, meta: Option<IndexMap<String, String>>) {
        self.mutate(|state, now| {
            let file = state
                .task_files
                .entry(path.to_string())
                .or_insert_with(|| TaskFileRecord::new(now));
            file.last_loaded = now;
            if let Some(meta) = meta {
                file.meta.extend(meta);
            }
            true
        });

        self.edit_document(|doc| doc.remember_taskfile(path));
        tracing::debug!(target: "state", path, "Task file registered");
    }

    /// Upsert a task and its selection entry under `source_file`.
    ///
    /// Prior selection and runtime survive unless `runtime` is given.
    pub fn register_task(
        &self,
        name: &str,
        data: IndexMap<String, Value>,
        source_file: &str,
        runtime: Option<RuntimeRecord>,
    ) {
        self.mutate(|state, now| {
            // Moving to another file takes the entry along, leaving no copy behind
            let carried = state
                .tasks
                .get(name)
                .filter(|task| task.source_file != source_file)
                .map(|task| task.source_file.clone())
                .and_then(|previous| state.task_files.get_mut(&previous))
                .and_then(|previous| previous.task_state.shift_remove(name));

            let file = state
                .task_files
                .entry(source_file.to_string())
                .or_insert_with(|| TaskFileRecord::new(now));
            if let Some(carried) = carried {
                file.task_state.insert(name.to_string(), carried);
            }
            let entry = file.task_state.entry(name.to_string()).or_default();
            if let Some(runtime) = runtime {
                entry.runtime = runtime;
            }
            let selected = entry.selected;

            state.tasks.insert(
                name.to_string(),
                TaskRecord {
                    source_file: source_file.to_string(),
                    data,
                },
            );
            state.select.insert(name.to_string(), selected);
            true
        });
    }

    /// Remove a task file, the tasks it owns and their selection.
    pub fn remove_task_file(&self, path: &str) -> bool {
        let removed = self.mutate(|state, _| {
            if state.task_files.shift_remove(path).is_none() {
                return false;
            }
            state.tasks.retain(|_, task| task.source_file != path);
            true
        });

        if removed {
            self.edit_document(|doc| doc.forget_taskfile(path));
            tracing::info!(target: "state", path, "Task file removed");
        }
        removed
    }

    /// After a reload, drop the tasks of `path` that are not in `keep`.
    ///
    /// Returns the names that were dropped.
    pub fn prune_task_file(&self, path: &str, keep: &[String]) -> Vec<String> {
        let mut dropped = Vec::new();
        self.mutate(|state, _| {
            let Some(file) = state.task_files.get_mut(path) else {
                return false;
            };
            file.task_state.retain(|name, _| {
                let kept = keep.contains(name);
                if !kept {
                    dropped.push(name.clone());
                }
                kept
            });
            state
                .tasks
                .retain(|name, task| task.source_file != path || keep.contains(name));
            !dropped.is_empty()
        });

        if !dropped.is_empty() {
            tracing::debug!(target: "state", path, dropped = dropped.len(), "Pruned stale tasks");
        }
        dropped
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Set the selection flag of a task.
    ///
    /// Unknown names are ignored: late UI events can reference tasks that a
    /// reload already removed. Returns whether the task was known.
    pub fn update_selection(&self, name: &str, selected: bool) -> bool {
        let applied = self.mutate(|state, now| {
            let Some(entry) = state.owning_entry_mut(name) else {
                return false;
            };
            if selected && !entry.selected {
                entry.last_selected = Some(now);
            }
            entry.selected = selected;
            state.select.insert(name.to_string(), selected);
            true
        });

        if !applied {
            tracing::debug!(target: "state", task = name, "Ignoring selection for unknown task");
        }
        applied
    }

    pub fn clear_selections(&self) {
        self.mutate(|state, _| {
            for file in state.task_files.values_mut() {
                for entry in file.task_state.values_mut() {
                    entry.selected = false;
                }
            }
            state.select.clear();
            true
        });
    }

    pub fn get_selected_task_names(&self) -> Vec<String> {
        self.view(|state, _| {
            state
                .select
                .iter()
                .filter(|(_, selected)| **selected)
                .map(|(name, _)| name.clone())
                .collect()
        })
    }

    pub fn get_task_selection_state(&self, name: &str) -> bool {
        self.view(|state, _| state.select.get(name).copied().unwrap_or(false))
    }

    /// The flat legacy selection views.
    pub fn legacy_selection(&self) -> LegacySelection {
        self.view(|_, legacy| legacy.clone())
    }

    /// Write path for consumers of the flat name → bool map.
    pub fn set_legacy_selected(&self, name: &str, selected: bool) -> bool {
        self.update_selection(name, selected)
    }

    /// Write path for consumers of the flat name list: exactly the known
    /// names in `names` end up selected.
    pub fn apply_legacy_list(&self, names: &[String]) {
        self.mutate(|state, now| {
            let known: Vec<String> = state.tasks.keys().cloned().collect();
            for name in known {
                let wanted = names.contains(&name);
                if let Some(entry) = state.owning_entry_mut(&name) {
                    if wanted && !entry.selected {
                        entry.last_selected = Some(now);
                    }
                    entry.selected = wanted;
                }
                if wanted {
                    state.select.insert(name, true);
                } else if let Some(flag) = state.select.get_mut(&name) {
                    *flag = false;
                }
            }
            true
        });
    }

    // ------------------------------------------------------------------
    // Runtime
    // ------------------------------------------------------------------

    pub fn update_runtime(&self, name: &str, patch: RuntimePatch) -> bool {
        self.mutate(|state, _| match state.owning_entry_mut(name) {
            Some(entry) => {
                entry.runtime.merge(patch);
                true
            }
            None => false,
        })
    }

    /// Count a finished (or simulated) run.
    pub fn record_run(&self, name: &str, status: RunStatus) -> bool {
        let recorded = self.mutate(|state, now| match state.owning_entry_mut(name) {
            Some(entry) => {
                let runtime = &mut entry.runtime;
                runtime.run_count += 1;
                runtime.last_run = Some(now);
                runtime.last_status = Some(status);
                true
            }
            None => false,
        });

        if recorded {
            tracing::debug!(target: "state", task = name, %status, "Run recorded");
        } else {
            tracing::debug!(target: "state", task = name, "Ignoring run for unknown task");
        }
        recorded
    }

    pub fn get_task_runtime(&self, name: &str) -> RuntimeRecord {
        self.view(|state, _| {
            state
                .owning_entry(name)
                .map(|entry| entry.runtime.clone())
                .unwrap_or_default()
        })
    }

    // ------------------------------------------------------------------
    // Preferences and favorites
    // ------------------------------------------------------------------

    pub fn get_card_view_settings(&self) -> IndexMap<String, Value> {
        self.view(|state, _| card_view_of(state))
    }

    pub fn set_card_view_setting(&self, key: &str, value: Value) {
        self.mutate(|state, _| {
            let settings = &mut state.user_preferences.ui_settings;
            let card_view = settings
                .entry(CARD_VIEW_KEY.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            match card_view {
                Value::Object(toggles) => {
                    toggles.insert(key.to_string(), value.clone());
                }
                other => {
                    let mut toggles = serde_json::Map::new();
                    toggles.insert(key.to_string(), value.clone());
                    *other = Value::Object(toggles);
                }
            }
            true
        });

        self.edit_document(|doc| {
            doc.user_preferences
                .ui_settings
                .card_view
                .insert(key.to_string(), value);
            true
        });
    }

    pub fn set_default_view(&self, view: &str) {
        self.mutate(|state, _| {
            state.user_preferences.default_view = view.to_string();
            true
        });
        self.edit_document(|doc| {
            doc.user_preferences.default_view = Some(view.to_string());
            true
        });
    }

    pub fn set_last_filter(&self, filter: Option<&str>) {
        let filter = filter.map(str::to_string);
        self.mutate(|state, _| {
            state.user_preferences.last_filter = filter.clone();
            true
        });
        self.edit_document(|doc| {
            doc.user_preferences.last_filter = filter;
            true
        });
    }

    pub fn favorite_tags(&self) -> Vec<String> {
        self.view(|state, _| state.local.favorite_tags.iter().cloned().collect())
    }

    pub fn is_favorite_tag(&self, tag: &str) -> bool {
        self.view(|state, _| state.local.favorite_tags.contains(tag))
    }

    pub fn add_favorite_tag(&self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() {
            return false;
        }
        let added = self.mutate(|state, _| state.local.favorite_tags.insert(tag.to_string()));
        if added {
            self.edit_document(|doc| doc.favorite_tags.insert(tag.to_string()));
        }
        added
    }

    pub fn remove_favorite_tag(&self, tag: &str) -> bool {
        let removed = self.mutate(|state, _| state.local.favorite_tags.shift_remove(tag));
        if removed {
            self.edit_document(|doc| doc.favorite_tags.shift_remove(tag));
        }
        removed
    }

    pub fn background_settings(&self) -> IndexMap<String, Value> {
        self.read().document.background_settings.clone()
    }

    pub fn set_background_setting(&self, key: &str, value: Value) {
        self.edit_document(|doc| {
            doc.background_settings.insert(key.to_string(), value);
            true
        });
    }

    pub fn active_taskfile(&self) -> Option<String> {
        self.read().document.active_taskfile.clone()
    }

    pub fn set_active_taskfile(&self, path: Option<&str>) {
        self.edit_document(|doc| {
            doc.active_taskfile = path.map(str::to_string);
            true
        });
    }

    pub fn merge_mode(&self) -> bool {
        self.read().document.merge_mode
    }

    pub fn set_merge_mode(&self, enabled: bool) {
        self.edit_document(|doc| {
            let changed = doc.merge_mode != enabled;
            doc.merge_mode = enabled;
            changed
        });
    }

    /// Registered task file paths as remembered by the config document.
    pub fn known_taskfiles(&self) -> Vec<String> {
        self.read().document.taskfiles.clone()
    }

    /// Copy the durable parts of the state into the config document.
    fn sync_document_from_state(&self) {
        let (favorites, card_view, default_view, last_filter) = self.view(|state, _| {
            (
                state.local.favorite_tags.clone(),
                card_view_of(state),
                state.user_preferences.default_view.clone(),
                state.user_preferences.last_filter.clone(),
            )
        });

        self.edit_document(|doc| {
            let prefs = &mut doc.user_preferences;
            let changed = doc.favorite_tags != favorites
                || prefs.ui_settings.card_view != card_view
                || prefs.default_view.as_deref() != Some(default_view.as_str())
                || prefs.last_filter != last_filter;

            doc.favorite_tags = favorites;
            prefs.ui_settings.card_view = card_view;
            prefs.default_view = Some(default_view);
            prefs.last_filter = last_filter;
            changed
        });
    }
}

fn card_view_of(state: &GlobalState) -> IndexMap<String, Value> {
    match state.user_preferences.ui_settings.get(CARD_VIEW_KEY) {
        Some(Value::Object(toggles)) => toggles
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => IndexMap::new(),
    }
}

/// Overlay the durable preferences onto a freshly built state.
fn apply_document(state: &mut GlobalState, document: &ConfigDocument) {
    state.local.favorite_tags = document.favorite_tags.clone();

    let prefs = &document.user_preferences;
    if let Some(view) = &prefs.default_view {
        state.user_preferences.default_view = view.clone();
    }
    if prefs.last_filter.is_some() {
        state.user_preferences.last_filter = prefs.last_filter.clone();
    }

    if !prefs.ui_settings.card_view.is_empty() {
        let card_view = state
            .user_preferences
            .ui_settings
            .entry(CARD_VIEW_KEY.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !card_view.is_object() {
            *card_view = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(toggles) = card_view {
            for (key, value) in &prefs.ui_settings.card_view {
                toggles.insert(key.clone(), value.clone());
            }
        }
    }
}
