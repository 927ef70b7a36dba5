//! Runs plugin modules as short-lived child processes.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::PluginError;
use crate::protocol::{
    PluginCall, PluginManifest, PluginReply, PROCESSING_ENTRY_POINT, PROTOCOL_VERSION,
    VISUALIZATION_ENTRY_POINT,
};
use crate::state::VisualizationOutput;

pub const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Spawns one fresh process per invocation, so a plugin edited on disk
/// is picked up the next time it runs, and a crashing plugin cannot
/// take the host down with it.
#[derive(Debug, Clone)]
pub struct PluginHost {
    timeout: Duration,
}

impl Default for PluginHost {
    fn default() -> Self {
        Self { timeout: DEFAULT_PLUGIN_TIMEOUT }
    }
}

impl PluginHost {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Invokes the processing entry point with the labelled inputs and
    /// returns its result value.
    pub async fn run_processing(
        &self,
        plugin: &Path,
        inputs: &BTreeMap<String, Value>,
    ) -> Result<Value, PluginError> {
        let call = PluginCall {
            entry_point: PROCESSING_ENTRY_POINT.to_string(),
            inputs: serde_json::to_value(inputs)
                .map_err(|e| PluginError::Contract(e.to_string()))?,
            processing: None,
        };
        self.invoke(plugin, PROCESSING_ENTRY_POINT, &call).await
    }

    /// Invokes the visualization entry point and validates the shape
    /// of its result against the plugin contract.
    pub async fn run_visualization(
        &self,
        plugin: &Path,
        inputs: &BTreeMap<String, Value>,
        processing: &Value,
    ) -> Result<VisualizationOutput, PluginError> {
        let call = PluginCall {
            entry_point: VISUALIZATION_ENTRY_POINT.to_string(),
            inputs: serde_json::to_value(inputs)
                .map_err(|e| PluginError::Contract(e.to_string()))?,
            processing: Some(processing.clone()),
        };
        let result = self.invoke(plugin, VISUALIZATION_ENTRY_POINT, &call).await?;
        serde_json::from_value(result).map_err(|e| {
            PluginError::Contract(format!(
                "visualization result must carry 'plots' and 'tables' mappings: {e}"
            ))
        })
    }

    async fn invoke(
        &self,
        plugin: &Path,
        entry_point: &str,
        call: &PluginCall,
    ) -> Result<Value, PluginError> {
        if !plugin.is_file() {
            return Err(PluginError::Missing(plugin.to_path_buf()));
        }
        debug!(plugin = %plugin.display(), entry_point, "invoking plugin");

        let mut child = Command::new(plugin)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PluginError::Launch {
                path: plugin.to_path_buf(),
                reason: e.to_string(),
            })?;

        let outcome =
            tokio::time::timeout(self.timeout, exchange(&mut child, entry_point, call)).await;
        match outcome {
            Err(_) => {
                warn!(plugin = %plugin.display(), timeout = ?self.timeout, "plugin timed out, killing it");
                let _ = child.kill().await;
                Err(PluginError::Timeout(self.timeout))
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                Err(e)
            }
            Ok(Ok(result)) => {
                let _ = child.wait().await;
                Ok(result)
            }
        }
    }
}

/// One request/reply exchange with an already-spawned plugin process.
async fn exchange(
    child: &mut Child,
    entry_point: &str,
    call: &PluginCall,
) -> Result<Value, PluginError> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PluginError::Contract("plugin stdin unavailable".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PluginError::Contract("plugin stdout unavailable".into()))?;
    let mut lines = BufReader::new(stdout).lines();

    let manifest_line = lines
        .next_line()
        .await?
        .ok_or_else(|| PluginError::Contract("plugin exited before sending a manifest".into()))?;
    let manifest: PluginManifest = serde_json::from_str(&manifest_line)
        .map_err(|e| PluginError::Contract(format!("malformed manifest: {e}")))?;
    if manifest.protocol != PROTOCOL_VERSION {
        return Err(PluginError::Contract(format!(
            "unsupported protocol version {} (host speaks {})",
            manifest.protocol, PROTOCOL_VERSION
        )));
    }
    if !manifest.entry_points.iter().any(|e| e == entry_point) {
        return Err(PluginError::Contract(format!(
            "plugin does not provide entry point '{entry_point}'"
        )));
    }

    let mut payload = serde_json::to_vec(call).map_err(|e| PluginError::Contract(e.to_string()))?;
    payload.push(b'\n');
    stdin.write_all(&payload).await?;
    stdin.flush().await?;
    drop(stdin);

    let reply_line = lines
        .next_line()
        .await?
        .ok_or_else(|| PluginError::Contract("plugin exited without replying".into()))?;
    let reply: PluginReply = serde_json::from_str(&reply_line)
        .map_err(|e| PluginError::Contract(format!("malformed reply: {e}")))?;
    match reply {
        PluginReply::Ok { result } => Ok(result),
        PluginReply::Err { message } => Err(PluginError::Runtime(message)),
    }
}
