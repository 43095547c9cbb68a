//! Durable config document: favorites, preferences and the task-file registry.
//!
//! Selection and run history never reach this file; they live in memory only.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_yaml::Value as YamlValue;
use std::path::{Path, PathBuf};

use crate::shared::errors::ConfigIoError;
use crate::shared::paths::{ensure_dir, get_config_path};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub background_settings: IndexMap<String, Value>,
    #[serde(default)]
    pub user_preferences: PersistedPreferences,
    #[serde(default)]
    pub basic_settings: IndexMap<String, Value>,
    #[serde(default)]
    pub favorite_tags: IndexSet<String>,
    #[serde(default)]
    pub taskfiles: Vec<String>,
    #[serde(default)]
    pub active_taskfile: Option<String>,
    #[serde(default)]
    pub merge_mode: bool,
    /// Keys this crate does not model, written back untouched.
    #[serde(flatten)]
    pub extra: IndexMap<String, YamlValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_view: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_filter: Option<String>,
    #[serde(default)]
    pub ui_settings: PersistedUiSettings,
    #[serde(flatten)]
    pub extra: IndexMap<String, YamlValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedUiSettings {
    #[serde(default)]
    pub card_view: IndexMap<String, Value>,
    /// Other views' settings, e.g. `table_view`.
    #[serde(flatten)]
    pub extra: IndexMap<String, YamlValue>,
}

impl ConfigDocument {
    /// Remember a task file path, keeping first-seen order.
    pub fn remember_taskfile(&mut self, path: &str) -> bool {
        if self.taskfiles.iter().any(|p| p == path) {
            return false;
        }
        self.taskfiles.push(path.to_string());
        true
    }

    pub fn forget_taskfile(&mut self, path: &str) -> bool {
        let before = self.taskfiles.len();
        self.taskfiles.retain(|p| p != path);
        if self.active_taskfile.as_deref() == Some(path) {
            self.active_taskfile = None;
        }
        before != self.taskfiles.len()
    }
}

/// Loads and saves a `ConfigDocument` at a fixed path.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_location() -> Self {
        Self::new(get_config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document. A missing file is an empty document, not an error.
    pub fn try_load(&self) -> Result<ConfigDocument, ConfigIoError> {
        if !self.path.exists() {
            return Ok(ConfigDocument::default());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigIoError::Read {
            path: self.path.clone(),
            source,
        })?;

        if content.trim().is_empty() {
            return Ok(ConfigDocument::default());
        }

        let document = serde_yaml::from_str(&content)?;
        Ok(document)
    }

    /// Read the document, falling back to defaults on any failure.
    pub fn load(&self) -> ConfigDocument {
        match self.try_load() {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(
                    target: "config",
                    path = %self.path.display(),
                    "Failed to load config, using defaults: {}",
                    e
                );
                ConfigDocument::default()
            }
        }
    }

    pub fn save(&self, document: &ConfigDocument) -> Result<(), ConfigIoError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            ensure_dir(dir).map_err(|e| ConfigIoError::directory(e.to_string()))?;
        }

        let content = serde_yaml::to_string(document)?;
        std::fs::write(&self.path, content).map_err(|source| ConfigIoError::Write {
            path: self.path.clone(),
            source,
        })?;

        tracing::debug!(target: "config", path = %self.path.display(), "Config saved");
        Ok(())
    }

    /// Load, apply `edit`, save. Keys the edit does not touch are preserved.
    pub fn update(
        &self,
        edit: impl FnOnce(&mut ConfigDocument),
    ) -> Result<ConfigDocument, ConfigIoError> {
        let mut document = self.try_load()?;
        edit(&mut document);
        self.save(&document)?;
        Ok(document)
    }
}
