use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Schema version stamped on every state document.
pub const STATE_VERSION: &str = "2.0";

/// Key under `ui_settings` holding the card view toggles.
pub const CARD_VIEW_KEY: &str = "card_view";

/// Aggregate root of everything the store tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub task_files: IndexMap<String, TaskFileRecord>,
    #[serde(default)]
    pub tasks: IndexMap<String, TaskRecord>,
    /// Denormalized mirror of `task_state[..].selected`, keyed by task name.
    #[serde(default)]
    pub select: IndexMap<String, bool>,
    #[serde(default)]
    pub user_preferences: UserPreferences,
    #[serde(default)]
    pub local: LocalConfig,
}

fn default_version() -> String {
    STATE_VERSION.to_string()
}

impl GlobalState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            version: default_version(),
            last_updated: now,
            task_files: IndexMap::new(),
            tasks: IndexMap::new(),
            select: IndexMap::new(),
            user_preferences: UserPreferences::default(),
            local: LocalConfig::default(),
        }
    }

    /// The authoritative selection entry for `name`, found through the task's source file.
    pub fn owning_entry(&self, name: &str) -> Option<&TaskSelectionState> {
        let task = self.tasks.get(name)?;
        self.task_files
            .get(&task.source_file)?
            .task_state
            .get(name)
    }

    pub fn owning_entry_mut(&mut self, name: &str) -> Option<&mut TaskSelectionState> {
        let source_file = self.tasks.get(name)?.source_file.clone();
        self.task_files
            .get_mut(&source_file)?
            .task_state
            .get_mut(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFileRecord {
    pub last_loaded: DateTime<Utc>,
    #[serde(default)]
    pub meta: IndexMap<String, String>,
    #[serde(default)]
    pub task_state: IndexMap<String, TaskSelectionState>,
}

impl TaskFileRecord {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_loaded: now,
            meta: IndexMap::new(),
            task_state: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSelectionState {
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub last_selected: Option<DateTime<Utc>>,
    #[serde(default)]
    pub runtime: RuntimeRecord,
}

/// Accumulated execution history of one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeRecord {
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u64,
    /// `None` means the task never ran.
    #[serde(default)]
    pub last_status: Option<RunStatus>,
    #[serde(default)]
    pub custom_flags: IndexMap<String, String>,
}

/// Partial update merged into a `RuntimeRecord`. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimePatch {
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: Option<u64>,
    pub last_status: Option<RunStatus>,
    pub custom_flags: IndexMap<String, String>,
}

impl RuntimePatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            last_status: Some(status),
            ..Self::default()
        }
    }

    pub fn flag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_flags.insert(key.into(), value.into());
        self
    }
}

impl RuntimeRecord {
    pub fn merge(&mut self, patch: RuntimePatch) {
        if let Some(last_run) = patch.last_run {
            self.last_run = Some(last_run);
        }
        if let Some(run_count) = patch.run_count {
            self.run_count = run_count;
        }
        if let Some(status) = patch.last_status {
            self.last_status = Some(status);
        }
        self.custom_flags.extend(patch.custom_flags);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Started,
    Success,
    Failed,
    Simulated,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Simulated => "simulated",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "started" => Ok(RunStatus::Started),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "simulated" => Ok(RunStatus::Simulated),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub source_file: String,
    /// Descriptive fields captured at registration (name, description, tags, directory, commands).
    #[serde(default)]
    pub data: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default = "default_view")]
    pub default_view: String,
    #[serde(default)]
    pub last_filter: Option<String>,
    #[serde(default = "default_ui_settings")]
    pub ui_settings: IndexMap<String, Value>,
}

fn default_view() -> String {
    "table".to_string()
}

/// Card view toggles shown when nothing was persisted yet.
pub fn default_card_view_settings() -> IndexMap<String, Value> {
    let mut card_view = IndexMap::new();
    card_view.insert("show_description".to_string(), Value::Bool(true));
    card_view.insert("show_tags".to_string(), Value::Bool(true));
    card_view.insert("show_directory".to_string(), Value::Bool(false));
    card_view.insert("show_commands".to_string(), Value::Bool(false));
    card_view
}

fn default_ui_settings() -> IndexMap<String, Value> {
    let card_view: serde_json::Map<String, Value> = default_card_view_settings().into_iter().collect();
    let mut settings = IndexMap::new();
    settings.insert(CARD_VIEW_KEY.to_string(), Value::Object(card_view));
    settings
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            default_view: default_view(),
            last_filter: None,
            ui_settings: default_ui_settings(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default)]
    pub favorite_tags: IndexSet<String>,
}
