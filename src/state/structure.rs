//! Structural repair of a `GlobalState`.
//!
//! Serde defaults already fill absent top-level maps. What remains is
//! cross-referential: every task must point at a registered file that holds
//! a selection entry for it, and the card view settings must be an object
//! carrying every known toggle.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::types::{
    default_card_view_settings, GlobalState, TaskFileRecord, CARD_VIEW_KEY, STATE_VERSION,
};

/// Fill in every required key. Returns true if anything had to change.
///
/// Calling it again on its own output is a no-op.
pub fn ensure_structure(state: &mut GlobalState, now: DateTime<Utc>) -> bool {
    let mut changed = false;

    if state.version.trim().is_empty() {
        state.version = STATE_VERSION.to_string();
        changed = true;
    }

    for (name, task) in &state.tasks {
        let file = state
            .task_files
            .entry(task.source_file.clone())
            .or_insert_with(|| {
                changed = true;
                TaskFileRecord::new(now)
            });
        if !file.task_state.contains_key(name) {
            file.task_state.insert(name.clone(), Default::default());
            changed = true;
        }
    }

    changed |= ensure_card_view(state);

    changed
}

fn ensure_card_view(state: &mut GlobalState) -> bool {
    let ui_settings = &mut state.user_preferences.ui_settings;
    let mut changed = false;

    let card_view = ui_settings
        .entry(CARD_VIEW_KEY.to_string())
        .or_insert_with(|| {
            changed = true;
            Value::Object(serde_json::Map::new())
        });

    if !card_view.is_object() {
        *card_view = Value::Object(serde_json::Map::new());
        changed = true;
    }

    if let Value::Object(toggles) = card_view {
        for (key, value) in default_card_view_settings() {
            if !toggles.contains_key(&key) {
                toggles.insert(key, value);
                changed = true;
            }
        }
    }

    changed
}
