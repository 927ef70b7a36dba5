//! Device adapter layer: a uniform interface over physical or simulated
//! biosignal headsets.
//!
//! Hardware backends implement [`Connector`]/[`Device`]; the simulated
//! adapter in [`simulated`] satisfies the same contract for headless use.

pub mod simulated;
pub mod types;

use std::sync::Arc;

pub use simulated::{SimulatedConnector, SimulatedDevice};
pub use types::{
    ConnectError, Connector, Device, DeviceKind, PollError, Preset, PresetLayout, SampleBlock,
};

/// Build a connector for the configured adapter.
///
/// Only the simulated adapter ships with this build; a hardware backend plugs
/// in by implementing [`Connector`] and extending this factory.
pub fn create_connector(simulated: bool) -> Result<Arc<dyn Connector>, ConnectError> {
    if simulated {
        Ok(Arc::new(SimulatedConnector::default()))
    } else {
        Err(ConnectError::BackendUnavailable)
    }
}
