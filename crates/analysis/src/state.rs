//! In-memory state threaded through the analysis pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured output of a visualization plugin.
///
/// `plots` and `tables` are required by the plugin contract even when
/// empty; anything else the plugin returns alongside them is preserved
/// in `extra` so a round trip through a session file loses nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualizationOutput {
    pub plots: Map<String, Value>,
    pub tables: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VisualizationOutput {
    pub fn is_empty(&self) -> bool {
        self.plots.is_empty() && self.tables.is_empty() && self.extra.is_empty()
    }
}

/// Everything the analysis side holds in memory: labelled input
/// datasets plus the most recent result of each pipeline stage.
///
/// Each result slot holds one value; a successful rerun overwrites it,
/// a failed rerun leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub inputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub processing: Value,
    #[serde(default)]
    pub visualization: VisualizationOutput,
}

impl PipelineState {
    pub fn has_processing_result(&self) -> bool {
        !self.processing.is_null()
    }
}
