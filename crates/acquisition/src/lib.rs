//! Streaming acquisition core: stream accumulation, the recording lifecycle
//! state machine, and recording-bundle persistence.
//!
//! The GUI layer is an external collaborator: it calls the command API on
//! [`recorder::RecorderHandle`] and subscribes to [`recorder::RecorderEvent`]
//! notifications. Nothing in here is fatal to the process; every failure is
//! surfaced as a typed error with state left unchanged.

pub mod bundle;
pub mod error;
pub mod recorder;
pub mod stream;

pub use bundle::{
    default_recording_name, load_bundle, save_bundle, DataKind, RecordingBundle,
    RecordingMetadata, SavedRecording,
};
pub use error::{BundleLoadError, PersistError, RecorderError, RecordingStateError};
pub use recorder::{
    spawn, RecorderConfig, RecorderEvent, RecorderHandle, RecorderState, SaveRequest,
};
pub use stream::{StreamAccumulator, StreamRecord, StreamRow};
