//! Task definition files.
//!
//! Parsing lives behind `TaskDefinitionReader`; `load_task_file` is the
//! reload flow that registers a file and its tasks with the store while
//! keeping the selection and run history of tasks that survive.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use serde_yaml::Value as YamlValue;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::state::StateStore;

#[derive(Error, Debug)]
pub enum TaskfileError {
    #[error("Failed to read task file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse task file {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// One runnable entry of a task definition file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskDescriptor {
    pub name: String,
    pub description: String,
    pub directory: Option<String>,
    pub tags: Vec<String>,
    pub commands: Vec<String>,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Snapshot stored as `TaskRecord::data`.
    pub fn to_data(&self) -> IndexMap<String, Value> {
        let mut data = IndexMap::new();
        data.insert("name".to_string(), Value::String(self.name.clone()));
        data.insert(
            "description".to_string(),
            Value::String(self.description.clone()),
        );
        data.insert(
            "directory".to_string(),
            self.directory.clone().map(Value::String).unwrap_or(Value::Null),
        );
        data.insert(
            "tags".to_string(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        data.insert(
            "commands".to_string(),
            Value::Array(self.commands.iter().cloned().map(Value::String).collect()),
        );
        data
    }
}

/// Turns a task definition file into an ordered list of descriptors.
pub trait TaskDefinitionReader {
    fn read(&self, path: &Path) -> Result<Vec<TaskDescriptor>, TaskfileError>;
}

/// Reader for the `tasks:` mapping layout used by Taskfile-style YAML files.
///
/// Each task may carry `desc`/`summary`, `dir`, `tags`/`labels` and `cmds`;
/// a command is either a string or a mapping with `cmd` or `task`.
/// Tasks marked `internal: true` are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlTaskfileReader;

impl YamlTaskfileReader {
    pub fn parse_str(&self, content: &str, path: &Path) -> Result<Vec<TaskDescriptor>, TaskfileError> {
        let parse_err = |message: String| TaskfileError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let root: YamlValue = serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string()))?;
        let tasks = match root.get("tasks") {
            Some(YamlValue::Mapping(tasks)) => tasks,
            Some(YamlValue::Null) | None => return Ok(Vec::new()),
            Some(_) => return Err(parse_err("`tasks` must be a mapping".to_string())),
        };

        let mut descriptors = Vec::with_capacity(tasks.len());
        for (key, body) in tasks {
            let Some(name) = key.as_str() else {
                return Err(parse_err(format!("task name must be a string, got {:?}", key)));
            };
            if body.get("internal").and_then(YamlValue::as_bool) == Some(true) {
                continue;
            }
            descriptors.push(descriptor_from_yaml(name, body));
        }

        Ok(descriptors)
    }
}

impl TaskDefinitionReader for YamlTaskfileReader {
    fn read(&self, path: &Path) -> Result<Vec<TaskDescriptor>, TaskfileError> {
        let content = std::fs::read_to_string(path).map_err(|source| TaskfileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_str(&content, path)
    }
}

fn descriptor_from_yaml(name: &str, body: &YamlValue) -> TaskDescriptor {
    let mut descriptor = TaskDescriptor::new(name);

    // Shorthand: `build: go build ./...` or a bare command list
    match body {
        YamlValue::String(cmd) => {
            descriptor.commands.push(cmd.clone());
            return descriptor;
        }
        YamlValue::Sequence(cmds) => {
            descriptor.commands = cmds.iter().filter_map(command_text).collect();
            return descriptor;
        }
        _ => {}
    }

    descriptor.description = body
        .get("desc")
        .or_else(|| body.get("summary"))
        .and_then(YamlValue::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    descriptor.directory = body.get("dir").and_then(YamlValue::as_str).map(str::to_string);

    descriptor.tags = body
        .get("tags")
        .or_else(|| body.get("labels"))
        .and_then(YamlValue::as_sequence)
        .map(|tags| {
            tags.iter()
                .filter_map(YamlValue::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    descriptor.commands = match body.get("cmds") {
        Some(YamlValue::Sequence(cmds)) => cmds.iter().filter_map(command_text).collect(),
        Some(single) => command_text(single).into_iter().collect(),
        None => body
            .get("cmd")
            .and_then(command_text)
            .into_iter()
            .collect(),
    };

    descriptor
}

fn command_text(cmd: &YamlValue) -> Option<String> {
    match cmd {
        YamlValue::String(text) => Some(text.clone()),
        YamlValue::Mapping(_) => {
            if let Some(text) = cmd.get("cmd").and_then(YamlValue::as_str) {
                Some(text.to_string())
            } else {
                cmd.get("task")
                    .and_then(YamlValue::as_str)
                    .map(|task| format!("task: {}", task))
            }
        }
        _ => None,
    }
}

/// Summary of one reload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub path: String,
    pub registered: usize,
    pub removed: Vec<String>,
}

/// Read `path` and (re-)register it with the store.
///
/// Tasks that are still defined keep their selection and run history; tasks
/// that disappeared from the file are pruned.
pub fn load_task_file(
    store: &StateStore,
    reader: &dyn TaskDefinitionReader,
    path: &Path,
) -> Result<LoadSummary, TaskfileError> {
    let descriptors = reader.read(path)?;
    let key = path.to_string_lossy().to_string();

    let mut meta = IndexMap::new();
    meta.insert("task_count".to_string(), descriptors.len().to_string());
    if let Some(file_name) = path.file_name() {
        meta.insert("file_name".to_string(), file_name.to_string_lossy().to_string());
    }
    store.register_task_file(&key, Some(meta));

    let names: Vec<String> = descriptors.iter().map(|d| d.name.clone()).collect();
    for descriptor in &descriptors {
        store.register_task(&descriptor.name, descriptor.to_data(), &key, None);
    }
    let removed = store.prune_task_file(&key, &names);

    tracing::info!(
        target: "state",
        path = %key,
        tasks = names.len(),
        removed = removed.len(),
        "Task file loaded"
    );

    Ok(LoadSummary {
        path: key,
        registered: names.len(),
        removed,
    })
}
