use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::state::types::{GlobalState, UserPreferences};

/// Reduced projection of `GlobalState` kept when the full snapshot is too large.
///
/// Full task `data` and file `meta` are dropped; files keep their timestamp
/// and counts, tasks keep only their source path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactState {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub select: IndexMap<String, bool>,
    pub user_preferences: UserPreferences,
    pub task_files: IndexMap<String, CompactTaskFile>,
    pub tasks: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactTaskFile {
    pub last_loaded: DateTime<Utc>,
    pub task_count: usize,
    pub selected_count: usize,
}

impl From<&GlobalState> for CompactState {
    fn from(state: &GlobalState) -> Self {
        let task_files = state
            .task_files
            .iter()
            .map(|(path, file)| {
                let compact = CompactTaskFile {
                    last_loaded: file.last_loaded,
                    task_count: file.task_state.len(),
                    selected_count: file.task_state.values().filter(|s| s.selected).count(),
                };
                (path.clone(), compact)
            })
            .collect();

        let tasks = state
            .tasks
            .iter()
            .map(|(name, task)| (name.clone(), task.source_file.clone()))
            .collect();

        Self {
            version: state.version.clone(),
            last_updated: state.last_updated,
            select: state.select.clone(),
            user_preferences: state.user_preferences.clone(),
            task_files,
            tasks,
        }
    }
}
