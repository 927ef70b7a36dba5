//! Simulated device adapter.
//!
//! Produces synthetic Gaussian samples at each preset's nominal cadence so the
//! acquisition stack can run headless, without hardware. The handshake delay
//! and a forced-failure switch make connect-path behavior testable.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::types::{
    ConnectError, Connector, Device, DeviceKind, PollError, Preset, SampleBlock,
};

/// Connector for the simulated adapter.
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    /// How long the fake handshake blocks.
    pub handshake_delay: Duration,
    /// Force the handshake to fail, for exercising the connect error path.
    pub fail_handshake: bool,
}

impl Default for SimulatedConnector {
    fn default() -> Self {
        Self {
            handshake_delay: Duration::from_millis(50),
            fail_handshake: false,
        }
    }
}

impl Connector for SimulatedConnector {
    fn connect(&self, kind: DeviceKind) -> Result<Box<dyn Device>, ConnectError> {
        std::thread::sleep(self.handshake_delay);
        if self.fail_handshake {
            return Err(ConnectError::Handshake {
                kind,
                reason: "simulated handshake failure".to_string(),
            });
        }
        debug!(%kind, "simulated device connected");
        Ok(Box::new(SimulatedDevice::new(kind)))
    }
}

#[derive(Debug)]
struct PresetClock {
    /// Timestamp (unix seconds) of the next sample to emit.
    next_sample_at: f64,
    package: u64,
}

/// A device handle producing synthetic per-tick samples.
#[derive(Debug)]
pub struct SimulatedDevice {
    kind: DeviceKind,
    connected: bool,
    rng: StdRng,
    clocks: HashMap<Preset, PresetClock>,
}

impl SimulatedDevice {
    pub fn new(kind: DeviceKind) -> Self {
        let now = unix_now();
        let clocks = kind
            .presets()
            .iter()
            .map(|&preset| {
                (
                    preset,
                    PresetClock {
                        next_sample_at: now,
                        package: 0,
                    },
                )
            })
            .collect();
        Self {
            kind,
            connected: true,
            rng: StdRng::from_entropy(),
            clocks,
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl Device for SimulatedDevice {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn poll(&mut self, preset: Preset) -> Result<SampleBlock, PollError> {
        if !self.connected {
            return Err(PollError::Disconnected);
        }
        let layout = self.kind.layout(preset);
        let clock = self
            .clocks
            .get_mut(&preset)
            .ok_or_else(|| PollError::Read(format!("unknown preset {preset:?}")))?;

        let now = unix_now();
        let dt = 1.0 / layout.sample_rate_hz;
        let mut block = SampleBlock::empty(preset, layout.channel_count());

        // Emit every sample due since the previous poll. If polling stalled
        // for a long time, cap the backlog at ten seconds of data.
        let backlog_floor = now - 10.0;
        if clock.next_sample_at < backlog_floor {
            clock.next_sample_at = backlog_floor;
        }

        while clock.next_sample_at <= now {
            block.package_num.push(clock.package as f64);
            block.timestamps.push(clock.next_sample_at);
            block.markers.push(0.0);
            for (ch_idx, samples) in block.channels.iter_mut().enumerate() {
                // Per-channel DC offset plus Gaussian noise, amplitude scaled
                // to look like microvolt-range biosignal data.
                let offset = 100.0 + 50.0 * ch_idx as f64;
                let noise = Normal::new(0.0, 50.0)
                    .map(|n| n.sample(&mut self.rng))
                    .unwrap_or_else(|_| self.rng.gen::<f64>());
                samples.push(offset + noise);
            }
            clock.package = clock.package.wrapping_add(1);
            clock.next_sample_at += dt;
        }

        Ok(block)
    }

    fn disconnect(&mut self) {
        if self.connected {
            debug!(kind = %self.kind, "simulated device disconnected");
        }
        self.connected = false;
    }
}
