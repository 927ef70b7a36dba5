//! The analysis workspace: labelled inputs, plugin selection, and the
//! two pipeline stages.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{InputError, PluginError, SessionLoadError, SessionPersistError};
use crate::host::PluginHost;
use crate::session::{self, Session};
use crate::state::{PipelineState, VisualizationOutput};

pub struct AnalysisWorkspace {
    state: PipelineState,
    processing_plugin: Option<PathBuf>,
    visualization_plugin: Option<PathBuf>,
    host: PluginHost,
}

impl AnalysisWorkspace {
    pub fn new(host: PluginHost) -> Self {
        Self {
            state: PipelineState::default(),
            processing_plugin: None,
            visualization_plugin: None,
            host,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn processing_plugin(&self) -> Option<&Path> {
        self.processing_plugin.as_deref()
    }

    pub fn visualization_plugin(&self) -> Option<&Path> {
        self.visualization_plugin.as_deref()
    }

    /// Loads a dataset file under a label. Labels are unique; loading
    /// the same label twice is rejected rather than silently replaced.
    /// `.csv` files load as a column-oriented mapping, everything else
    /// is treated as JSON (including `.data` recording bundles).
    pub fn load_input(&mut self, label: &str, path: &Path) -> Result<(), InputError> {
        if self.state.inputs.contains_key(label) {
            return Err(InputError::DuplicateLabel(label.to_string()));
        }
        let value = match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => load_csv_columns(path)?,
            _ => {
                let bytes = fs::read(path)?;
                serde_json::from_slice(&bytes).map_err(|e| InputError::Parse {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?
            }
        };
        info!(label, path = %path.display(), "input loaded");
        self.state.inputs.insert(label.to_string(), value);
        Ok(())
    }

    /// Inserts an already-materialized dataset, same uniqueness rule
    /// as [`load_input`](Self::load_input).
    pub fn insert_input(&mut self, label: &str, value: Value) -> Result<(), InputError> {
        if self.state.inputs.contains_key(label) {
            return Err(InputError::DuplicateLabel(label.to_string()));
        }
        self.state.inputs.insert(label.to_string(), value);
        Ok(())
    }

    pub fn remove_input(&mut self, label: &str) -> Result<(), InputError> {
        self.state
            .inputs
            .remove(label)
            .map(|_| ())
            .ok_or_else(|| InputError::UnknownLabel(label.to_string()))
    }

    pub fn set_processing_plugin(&mut self, path: impl Into<PathBuf>) {
        self.processing_plugin = Some(path.into());
    }

    pub fn set_visualization_plugin(&mut self, path: impl Into<PathBuf>) {
        self.visualization_plugin = Some(path.into());
    }

    /// Runs the configured processing plugin over all loaded inputs.
    /// On success the processing slot is overwritten; on failure it
    /// keeps its previous value.
    pub async fn run_processing(&mut self) -> Result<&Value, PluginError> {
        let plugin = self
            .processing_plugin
            .clone()
            .ok_or(PluginError::NotConfigured("processing"))?;
        match self.host.run_processing(&plugin, &self.state.inputs).await {
            Ok(result) => {
                self.state.processing = result;
                Ok(&self.state.processing)
            }
            Err(e) => {
                warn!(plugin = %plugin.display(), error = %e, "processing run failed, keeping previous result");
                Err(e)
            }
        }
    }

    /// Runs the configured visualization plugin over the inputs and
    /// the current processing result. Same overwrite-on-success,
    /// keep-on-failure rule as [`run_processing`](Self::run_processing).
    pub async fn run_visualization(&mut self) -> Result<&VisualizationOutput, PluginError> {
        let plugin = self
            .visualization_plugin
            .clone()
            .ok_or(PluginError::NotConfigured("visualization"))?;
        match self
            .host
            .run_visualization(&plugin, &self.state.inputs, &self.state.processing)
            .await
        {
            Ok(result) => {
                self.state.visualization = result;
                Ok(&self.state.visualization)
            }
            Err(e) => {
                warn!(plugin = %plugin.display(), error = %e, "visualization run failed, keeping previous result");
                Err(e)
            }
        }
    }

    pub fn save_session(&self, path: &Path) -> Result<(), SessionPersistError> {
        let session = Session {
            state: self.state.clone(),
            processing_plugin: self.processing_plugin.clone(),
            visualization_plugin: self.visualization_plugin.clone(),
        };
        session::save_session(path, &session)
    }

    /// Replaces the entire workspace contents with the loaded session:
    /// inputs, both result slots, and both plugin selections.
    pub fn load_session(&mut self, path: &Path) -> Result<(), SessionLoadError> {
        let session = session::load_session(path)?;
        self.state = session.state;
        self.processing_plugin = session.processing_plugin;
        self.visualization_plugin = session.visualization_plugin;
        Ok(())
    }
}

/// Reads a CSV file into `{ column: [values...] }`, parsing numeric
/// cells as numbers and keeping the rest as strings.
fn load_csv_columns(path: &Path) -> Result<Value, InputError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| InputError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| InputError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .iter()
        .map(|h| h.to_string())
        .collect();
    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record.map_err(|e| InputError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        for (i, cell) in record.iter().enumerate().take(headers.len()) {
            let value = match cell.parse::<f64>() {
                Ok(n) => serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(cell.to_string())),
                Err(_) => Value::String(cell.to_string()),
            };
            columns[i].push(value);
        }
    }
    let mut map = Map::new();
    for (header, column) in headers.into_iter().zip(columns) {
        map.insert(header, Value::Array(column));
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_labels_are_rejected() {
        let mut ws = AnalysisWorkspace::new(PluginHost::default());
        ws.insert_input("rest", json!({"a": [1]})).unwrap();
        assert!(matches!(
            ws.insert_input("rest", json!({"b": [2]})),
            Err(InputError::DuplicateLabel(_))
        ));
        // The first load is still intact.
        assert_eq!(ws.state().inputs["rest"], json!({"a": [1]}));
    }

    #[test]
    fn remove_unknown_label_errors() {
        let mut ws = AnalysisWorkspace::new(PluginHost::default());
        assert!(matches!(
            ws.remove_input("ghost"),
            Err(InputError::UnknownLabel(_))
        ));
    }

    #[test]
    fn csv_inputs_load_column_oriented() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rest_eeg.csv");
        fs::write(&path, "TP9,AF7,label\n1.5,2.5,eyes_open\n3.0,4.0,eyes_closed\n").unwrap();
        let mut ws = AnalysisWorkspace::new(PluginHost::default());
        ws.load_input("rest", &path).unwrap();
        assert_eq!(
            ws.state().inputs["rest"],
            json!({
                "TP9": [1.5, 3.0],
                "AF7": [2.5, 4.0],
                "label": ["eyes_open", "eyes_closed"],
            })
        );
    }
}
