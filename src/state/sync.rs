//! Selection synchronization.
//!
//! The nested `task_files[..].task_state[..].selected` flag is authoritative.
//! `GlobalState::select` mirrors it by task name, and two flat legacy shapes
//! are derived from `select` for older table and batch consumers. Nothing
//! flows back from the legacy shapes: writers go through
//! `StateStore::update_selection`.

use indexmap::IndexMap;
use serde::Serialize;

use super::types::GlobalState;

/// Flat selection views kept for older consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegacySelection {
    /// Every name in `select`, with its flag.
    pub selected_map: IndexMap<String, bool>,
    /// Names whose flag is true, in `select` order.
    pub selected_list: Vec<String>,
}

impl LegacySelection {
    pub fn is_selected(&self, name: &str) -> bool {
        self.selected_map.get(name).copied().unwrap_or(false)
    }
}

/// Bring `select` in line with the owning selection entries.
///
/// Selected tasks get a `true` entry, stale `true` entries flip to `false`,
/// and entries for tasks without an owning record are dropped. Unselected
/// tasks are not added, so a cleared mirror stays empty.
///
/// Returns the number of entries touched.
pub fn repair_select(state: &mut GlobalState) -> usize {
    let mut repaired = 0;

    let stale: Vec<String> = state
        .select
        .keys()
        .filter(|name| state.owning_entry(name).is_none())
        .cloned()
        .collect();
    for name in stale {
        state.select.shift_remove(&name);
        repaired += 1;
    }

    let owned: Vec<(String, bool)> = state
        .tasks
        .keys()
        .filter_map(|name| {
            state
                .owning_entry(name)
                .map(|entry| (name.clone(), entry.selected))
        })
        .collect();

    for (name, selected) in owned {
        match state.select.get_mut(&name) {
            Some(flag) if *flag != selected => {
                *flag = selected;
                repaired += 1;
            }
            Some(_) => {}
            None if selected => {
                state.select.insert(name, true);
                repaired += 1;
            }
            None => {}
        }
    }

    if repaired > 0 {
        tracing::debug!(target: "state::sync", repaired, "Repaired selection mirror");
    }

    repaired
}

/// Derive the legacy shapes from `select`. Pure and idempotent.
pub fn reconcile(state: &GlobalState) -> LegacySelection {
    let selected_map = state.select.clone();
    let selected_list = state
        .select
        .iter()
        .filter(|(_, selected)| **selected)
        .map(|(name, _)| name.clone())
        .collect();

    LegacySelection {
        selected_map,
        selected_list,
    }
}

/// True when `select` agrees with every owning entry.
pub fn mirror_is_consistent(state: &GlobalState) -> bool {
    let mirror_ok = state
        .select
        .iter()
        .all(|(name, flag)| match state.owning_entry(name) {
            Some(entry) => entry.selected == *flag,
            None => false,
        });

    let owners_ok = state.tasks.keys().all(|name| match state.owning_entry(name) {
        Some(entry) if entry.selected => state.select.get(name) == Some(&true),
        _ => true,
    });

    mirror_ok && owners_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::{TaskFileRecord, TaskRecord, TaskSelectionState};
    use chrono::Utc;

    fn state_with(tasks: &[(&str, bool)]) -> GlobalState {
        let now = Utc::now();
        let mut state = GlobalState::new(now);
        let mut file = TaskFileRecord::new(now);
        for (name, selected) in tasks {
            file.task_state.insert(
                name.to_string(),
                TaskSelectionState {
                    selected: *selected,
                    ..TaskSelectionState::default()
                },
            );
            state.tasks.insert(
                name.to_string(),
                TaskRecord {
                    source_file: "Taskfile.yml".to_string(),
                    data: IndexMap::new(),
                },
            );
        }
        state.task_files.insert("Taskfile.yml".to_string(), file);
        state
    }

    #[test]
    fn test_repair_adds_missing_true_entries() {
        let mut state = state_with(&[("build", true), ("test", false)]);

        assert_eq!(repair_select(&mut state), 1);
        assert_eq!(state.select.get("build"), Some(&true));
        assert!(!state.select.contains_key("test"));
        assert!(mirror_is_consistent(&state));
    }

    #[test]
    fn test_repair_flips_stale_and_drops_orphans() {
        let mut state = state_with(&[("build", false)]);
        state.select.insert("build".to_string(), true);
        state.select.insert("ghost".to_string(), true);

        assert_eq!(repair_select(&mut state), 2);
        assert_eq!(state.select.get("build"), Some(&false));
        assert!(!state.select.contains_key("ghost"));
        assert!(mirror_is_consistent(&state));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut state = state_with(&[("build", true), ("test", false), ("lint", true)]);
        state.select.insert("test".to_string(), false);
        repair_select(&mut state);

        let first = reconcile(&state);
        let second = reconcile(&state);
        assert_eq!(first, second);
        assert_eq!(first.selected_list.len(), 2);
        assert!(first.is_selected("lint"));
        assert!(!first.is_selected("test"));
    }
}
