//! Line-delimited JSON protocol spoken between the host and a plugin
//! process over stdin/stdout.
//!
//! On startup the plugin writes one [`PluginManifest`] line. The host
//! then sends one [`PluginCall`] line and the plugin answers with one
//! [`PluginReply`] line and exits. One invocation per process; the host
//! spawns a fresh process every time so edited plugins take effect on
//! the next run.

use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;

/// Entry point computing derived results from the input datasets.
pub const PROCESSING_ENTRY_POINT: &str = "processing_function";
/// Entry point turning inputs plus processing results into plot and
/// table descriptions.
pub const VISUALIZATION_ENTRY_POINT: &str = "visualization_function";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub protocol: u32,
    pub entry_points: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginCall {
    pub entry_point: String,
    /// Labelled input datasets, as a JSON mapping.
    pub inputs: Value,
    /// Current processing result, present for visualization calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginReply {
    Ok { result: Value },
    Err { message: String },
}

type EntryFn = fn(&PluginCall) -> Result<Value, String>;

/// Implements the plugin side of the protocol for a plugin binary:
/// advertises the given entry points, reads the single call from
/// stdin, dispatches it, and writes the reply.
pub fn serve(entry_points: &[(&str, EntryFn)]) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let manifest = PluginManifest {
        protocol: PROTOCOL_VERSION,
        entry_points: entry_points.iter().map(|(name, _)| name.to_string()).collect(),
    };
    writeln!(out, "{}", serde_json::to_string(&manifest)?)?;
    out.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let reply = match serde_json::from_str::<PluginCall>(&line) {
        Ok(call) => {
            match entry_points.iter().find(|(name, _)| *name == call.entry_point) {
                Some((_, f)) => match f(&call) {
                    Ok(result) => PluginReply::Ok { result },
                    Err(message) => PluginReply::Err { message },
                },
                None => PluginReply::Err {
                    message: format!("unknown entry point '{}'", call.entry_point),
                },
            }
        }
        Err(e) => PluginReply::Err {
            message: format!("malformed call: {e}"),
        },
    };
    writeln!(out, "{}", serde_json::to_string(&reply)?)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_wire_shape_is_tagged_lowercase() {
        let ok = PluginReply::Ok { result: json!({"x": 1}) };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"ok": {"result": {"x": 1}}})
        );
        let err = PluginReply::Err { message: "boom".into() };
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"err": {"message": "boom"}})
        );
    }

    #[test]
    fn call_omits_processing_when_absent() {
        let call = PluginCall {
            entry_point: PROCESSING_ENTRY_POINT.into(),
            inputs: json!({}),
            processing: None,
        };
        let wire = serde_json::to_value(&call).unwrap();
        assert!(wire.get("processing").is_none());
    }
}
