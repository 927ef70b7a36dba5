//! Common types and traits for biosignal device adapters

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported headset models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Muse2,
    MuseS,
}

impl DeviceKind {
    /// Presets this device exposes, primary first.
    pub fn presets(&self) -> &'static [Preset] {
        // Both supported headsets stream the same three preset groups.
        &[Preset::Primary, Preset::Auxiliary, Preset::Ancillary]
    }

    /// Highest-resolution preset, captured tick-by-tick while recording.
    pub fn primary_preset(&self) -> Preset {
        Preset::Primary
    }

    /// Lower-rate presets, fetched in one bulk read when a recording stops.
    pub fn secondary_presets(&self) -> &'static [Preset] {
        &[Preset::Auxiliary, Preset::Ancillary]
    }

    /// Fixed channel layout for a preset of this device.
    pub fn layout(&self, preset: Preset) -> &'static PresetLayout {
        match preset {
            Preset::Primary => &MUSE_PRIMARY,
            Preset::Auxiliary => &MUSE_AUXILIARY,
            Preset::Ancillary => &MUSE_ANCILLARY,
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Muse2 => write!(f, "Muse 2"),
            DeviceKind::MuseS => write!(f, "Muse S"),
        }
    }
}

/// A named group of channels sampled together by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Preset {
    /// EEG channels, highest sample rate.
    Primary,
    /// Motion (accelerometer + gyroscope) channels.
    Auxiliary,
    /// Optical (PPG) channels.
    Ancillary,
}

/// Fixed column layout of one preset: channel names and nominal sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetLayout {
    pub preset: Preset,
    pub channel_names: &'static [&'static str],
    pub sample_rate_hz: f64,
}

impl PresetLayout {
    pub fn channel_count(&self) -> usize {
        self.channel_names.len()
    }
}

pub static MUSE_PRIMARY: PresetLayout = PresetLayout {
    preset: Preset::Primary,
    channel_names: &["TP9", "AF7", "AF8", "TP10", "Right AUX"],
    sample_rate_hz: 256.0,
};

pub static MUSE_AUXILIARY: PresetLayout = PresetLayout {
    preset: Preset::Auxiliary,
    channel_names: &["AccX", "AccY", "AccZ", "GyroX", "GyroY", "GyroZ"],
    sample_rate_hz: 52.0,
};

pub static MUSE_ANCILLARY: PresetLayout = PresetLayout {
    preset: Preset::Ancillary,
    channel_names: &["PPG_1", "PPG_2", "Unknown"],
    sample_rate_hz: 64.0,
};

/// Rectangular block of raw samples for one preset.
///
/// Channel-major: `channels[c][i]` is the value of channel `c` at acquisition
/// tick `i`. The package-sequence, timestamp and marker rows share the same
/// column count. Timestamps are seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    pub preset: Preset,
    pub package_num: Vec<f64>,
    pub channels: Vec<Vec<f64>>,
    pub timestamps: Vec<f64>,
    pub markers: Vec<f64>,
}

impl SampleBlock {
    /// An empty block: what `poll` returns when no new samples arrived.
    pub fn empty(preset: Preset, channel_count: usize) -> Self {
        Self {
            preset,
            package_num: Vec::new(),
            channels: vec![Vec::new(); channel_count],
            timestamps: Vec::new(),
            markers: Vec::new(),
        }
    }

    /// Number of columns (acquisition ticks) in the block.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Device handshake failure. Recoverable: the caller may retry.
#[derive(Error, Debug, Clone)]
pub enum ConnectError {
    #[error("handshake with {kind} failed: {reason}")]
    Handshake { kind: DeviceKind, reason: String },
    #[error("connect attempt timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("another connect attempt is already in flight")]
    Pending,
    #[error("connect attempt cancelled")]
    Cancelled,
    #[error("a device is already connected")]
    AlreadyConnected,
    #[error("no hardware backend available in this build; use the simulated adapter")]
    BackendUnavailable,
}

/// Transient poll failure. Treated as "no new data this tick", never fatal.
#[derive(Error, Debug, Clone)]
pub enum PollError {
    #[error("device read failed: {0}")]
    Read(String),
    #[error("device is disconnected")]
    Disconnected,
}

/// Uniform interface over a connected physical or simulated sensor.
///
/// `poll` must be non-blocking and return an empty block when no new samples
/// are available. `disconnect` must be idempotent and safe to call on a
/// handle that never fully initialized.
pub trait Device: Send + std::fmt::Debug {
    fn kind(&self) -> DeviceKind;

    /// Drain all samples the device has buffered for `preset` since the
    /// previous poll.
    fn poll(&mut self, preset: Preset) -> Result<SampleBlock, PollError>;

    fn disconnect(&mut self);
}

/// Opens a connection to a device. `connect` may block for seconds while the
/// hardware handshake runs; callers are expected to drive it from a worker.
pub trait Connector: Send + Sync {
    fn connect(&self, kind: DeviceKind) -> Result<Box<dyn Device>, ConnectError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_match_expected_channel_counts() {
        let kind = DeviceKind::Muse2;
        assert_eq!(kind.layout(Preset::Primary).channel_count(), 5);
        assert_eq!(kind.layout(Preset::Auxiliary).channel_count(), 6);
        assert_eq!(kind.layout(Preset::Ancillary).channel_count(), 3);
        assert_eq!(kind.primary_preset(), Preset::Primary);
        assert_eq!(kind.secondary_presets().len(), 2);
    }

    #[test]
    fn empty_block_has_layout_rows() {
        let block = SampleBlock::empty(Preset::Primary, 5);
        assert!(block.is_empty());
        assert_eq!(block.channels.len(), 5);
        assert_eq!(block.len(), 0);
    }
}
