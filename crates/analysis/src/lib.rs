//! Offline analysis of recorded biosignal data: labelled input
//! datasets fed through user-supplied processing and visualization
//! plugins, with the whole working state persistable as a session.
//!
//! Plugins are standalone executables spoken to over a line-JSON
//! stdin/stdout protocol; see [`protocol`] for the wire format and the
//! `serve` helper plugin binaries build on.

pub mod error;
pub mod host;
pub mod protocol;
pub mod session;
pub mod state;
pub mod workspace;

pub use error::{InputError, PluginError, SessionLoadError, SessionPersistError};
pub use host::{PluginHost, DEFAULT_PLUGIN_TIMEOUT};
pub use session::{load_session, save_session, Session};
pub use state::{PipelineState, VisualizationOutput};
pub use workspace::AnalysisWorkspace;
