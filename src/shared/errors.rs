use std::path::PathBuf;
use thiserror::Error;

/// Failure reading or writing the durable config document.
///
/// Store operations never surface this to callers: they log it and fall
/// back to defaults.
#[derive(Error, Debug)]
pub enum ConfigIoError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Failed to create directory: {0}")]
    Directory(String),
}

impl ConfigIoError {
    pub fn directory(msg: impl Into<String>) -> Self {
        ConfigIoError::Directory(msg.into())
    }
}

/// Rejection of a document handed to `import_state`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Document is not valid state JSON: {0}")]
    Malformed(String),

    #[error("Missing state version")]
    MissingVersion,

    #[error("Unsupported state version: {0}")]
    UnsupportedVersion(String),

    #[error("Task '{task}' references unregistered task file '{file}'")]
    DanglingTask { task: String, file: String },
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::Malformed(err.to_string())
    }
}
