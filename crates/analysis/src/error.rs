use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while invoking a plugin module.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("no {0} plugin configured")]
    NotConfigured(&'static str),

    #[error("plugin module not found: {0}")]
    Missing(PathBuf),

    #[error("failed to launch plugin {path}: {reason}")]
    Launch { path: PathBuf, reason: String },

    /// The plugin spoke the wire protocol incorrectly: bad manifest,
    /// missing entry point, malformed reply, or an ill-shaped result.
    #[error("plugin contract violation: {0}")]
    Contract(String),

    /// The entry point ran and reported a failure of its own.
    #[error("plugin failed: {0}")]
    Runtime(String),

    #[error("plugin invocation timed out after {0:?}")]
    Timeout(Duration),

    #[error("plugin I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors while loading a dataset into the workspace inputs.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("input label '{0}' is already loaded")]
    DuplicateLabel(String),

    #[error("no input labelled '{0}'")]
    UnknownLabel(String),

    #[error("I/O error reading input: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Errors while writing a session file.
#[derive(Error, Debug)]
pub enum SessionPersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors while reading a session file back.
#[derive(Error, Debug)]
pub enum SessionLoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt or incompatible session file: {0}")]
    Deserialize(#[from] serde_json::Error),
}
