//! Session persistence: the full pipeline state plus the configured
//! plugin paths, serialized as one JSON document.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SessionLoadError, SessionPersistError};
use crate::state::PipelineState;

pub const SESSION_EXTENSION: &str = "session";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub state: PipelineState,
    pub processing_plugin: Option<PathBuf>,
    pub visualization_plugin: Option<PathBuf>,
}

/// Writes the session to `path` via a temp file in the same directory,
/// renamed into place, so a crash mid-write never leaves a truncated
/// session behind.
pub fn save_session(path: &Path, session: &Session) -> Result<(), SessionPersistError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_vec_pretty(session)?;
    let tmp = path.with_extension(format!("{SESSION_EXTENSION}.tmp"));
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), inputs = session.state.inputs.len(), "session saved");
    Ok(())
}

pub fn load_session(path: &Path) -> Result<Session, SessionLoadError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    use crate::state::VisualizationOutput;

    fn populated_session() -> Session {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "rest_eeg".to_string(),
            json!({ "TP9": [1.0, 2.0], "AF7": [3.0, 4.0] }),
        );
        let mut viz = VisualizationOutput::default();
        viz.plots.insert("psd".into(), json!({ "kind": "line", "x": [0, 1] }));
        viz.tables.insert("band_power".into(), json!({ "alpha": { "TP9": 2.5 } }));
        Session {
            state: PipelineState {
                inputs,
                processing: json!({ "band_power": { "alpha": { "TP9": 2.5 } } }),
                visualization: viz,
            },
            processing_plugin: Some(PathBuf::from("/plugins/band_power")),
            visualization_plugin: Some(PathBuf::from("/plugins/raw_plots")),
        }
    }

    #[test]
    fn save_then_load_round_trips_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("morning.session");
        let session = populated_session();
        save_session(&path, &session).unwrap();
        let loaded = load_session(&path).unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn no_temp_file_is_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("morning.session");
        save_session(&path, &populated_session()).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["morning.session"]);
    }

    #[test]
    fn corrupt_session_reports_deserialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.session");
        fs::write(&path, b"{ truncated").unwrap();
        assert!(matches!(
            load_session(&path),
            Err(SessionLoadError::Deserialize(_))
        ));
    }
}
