//! Error types for the acquisition crate.

use biosig_device::ConnectError;
use thiserror::Error;

use crate::recorder::RecorderState;

/// Illegal lifecycle transition. Rejected synchronously, no side effects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordingStateError {
    #[error("cannot {action} while {state}")]
    Illegal {
        action: &'static str,
        state: RecorderState,
    },
    #[error("no recording is pending save")]
    NothingToSave,
}

/// I/O or serialization failure while persisting a bundle. In-memory state is
/// unaffected.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure loading a bundle file from disk.
#[derive(Error, Debug)]
pub enum BundleLoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt or incompatible bundle: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// Top-level error surfaced by the recorder command API.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    State(#[from] RecordingStateError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("recorder task is not running")]
    ControllerStopped,
}
