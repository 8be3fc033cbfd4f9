// src/hardware/mod.rs - Device-facing pieces of the kiln controller
pub mod fusion;
pub mod protocol;
pub mod serial;
pub mod temperature;

use async_trait::async_trait;
use thiserror::Error;

pub use fusion::{ComputedTemperature, SensorFusion};
pub use protocol::{RawRegister, RelayCommand};
pub use serial::SerialLink;
pub use temperature::{Pid, PidMode};

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Serial port error: {0}")]
    Serial(#[from] std::io::Error),
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("Not connected to hardware")]
    NotConnected,
}

/// Outbound half of the device link.
///
/// The controller only ever writes command strings; lines coming back from
/// the device are delivered separately (see [`SerialLink::lines`]).
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn write(&self, data: &[u8]) -> Result<(), HardwareError>;
}
