use serde_json::Value;

use super::types::{GlobalState, STATE_VERSION};
use crate::shared::errors::ValidationError;

/// Serialize the state as a pretty JSON document.
pub fn export_document(state: &GlobalState) -> String {
    // GlobalState only has string-keyed maps, so serialization cannot fail.
    serde_json::to_string_pretty(state).unwrap_or_else(|e| {
        tracing::error!(target: "state::transfer", "Failed to export state: {}", e);
        String::from("{}")
    })
}

/// Parse and validate a document produced by `export_document`.
pub fn parse_document(document: &str) -> Result<GlobalState, ValidationError> {
    let raw: Value = serde_json::from_str(document)?;

    let Some(object) = raw.as_object() else {
        return Err(ValidationError::Malformed(
            "top-level value must be an object".to_string(),
        ));
    };

    match object.get("version") {
        Some(Value::String(version)) if !version.trim().is_empty() => {
            if major(version) != major(STATE_VERSION) {
                return Err(ValidationError::UnsupportedVersion(version.clone()));
            }
        }
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return Err(ValidationError::MissingVersion)
        }
        Some(other) => {
            return Err(ValidationError::Malformed(format!(
                "version must be a string, got {}",
                other
            )))
        }
    }

    let state: GlobalState = serde_json::from_value(raw)?;

    for (name, task) in &state.tasks {
        if !state.task_files.contains_key(&task.source_file) {
            return Err(ValidationError::DanglingTask {
                task: name.clone(),
                file: task.source_file.clone(),
            });
        }
    }

    Ok(state)
}

fn major(version: &str) -> &str {
    version.trim().split('.').next().unwrap_or_default()
}
