use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use biosig_acquisition::RecorderConfig;

/// Configuration for the daemon, read from `biosigd.json` when
/// present, defaults otherwise.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Streaming tick interval in milliseconds.
    pub tick_interval_ms: u64,
    /// How long a connection attempt may take before it is abandoned.
    pub connect_timeout_secs: u64,
    /// Sliding display window over the live stream, in seconds.
    pub window_seconds: f64,
    /// How long a plugin invocation may run before it is killed.
    pub plugin_timeout_secs: u64,
    /// Where saved recordings land.
    pub output_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            connect_timeout_secs: 15,
            window_seconds: 10.0,
            plugin_timeout_secs: 30,
            output_dir: PathBuf::from("recordings"),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("could not read configuration file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("could not parse configuration file {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            window_seconds: self.window_seconds,
        }
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_timeout_secs)
    }
}
