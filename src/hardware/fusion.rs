// src/hardware/fusion.rs - Per-sensor smoothing and fused process temperature
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw sensor codes are hundredths of a degree.
pub const RAW_SCALE: f64 = 100.0;

/// Weight kept from the previous smoothed value on each new reading.
const HISTORY_WEIGHT: f64 = 4.0 / 5.0;

/// Sensors averaged into the process temperature.
pub const FUSED_SENSORS: [&str; 3] = ["T1", "T2", "T3"];

/// Smoothed value per sensor plus the fused process temperature.
///
/// Serializes flat, e.g. `{"T1":1023.4,"T2":1019.8,"temperature":1021.6}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputedTemperature {
    #[serde(flatten)]
    pub sensors: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ComputedTemperature {
    pub fn sensor(&self, name: &str) -> Option<f64> {
        self.sensors.get(name).copied()
    }
}

/// Exponential moving average per named sensor, averaged into one value.
#[derive(Debug, Clone, Default)]
pub struct SensorFusion {
    computed: ComputedTemperature,
}

impl SensorFusion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw sensor code. Returns the new fused temperature when at
    /// least one of the fused sensors has been observed.
    pub fn observe(&mut self, name: &str, raw: i64) -> Option<f64> {
        let reading = raw as f64 / RAW_SCALE;
        let smoothed = match self.computed.sensors.get(name) {
            Some(previous) => previous * HISTORY_WEIGHT + reading * (1.0 - HISTORY_WEIGHT),
            None => reading,
        };
        self.computed.sensors.insert(name.to_string(), smoothed);

        let present: Vec<f64> = FUSED_SENSORS
            .iter()
            .filter_map(|sensor| self.computed.sensor(sensor))
            .collect();
        if present.is_empty() {
            return None;
        }
        let mean = present.iter().sum::<f64>() / present.len() as f64;
        self.computed.temperature = Some(mean);
        Some(mean)
    }

    pub fn computed(&self) -> &ComputedTemperature {
        &self.computed
    }

    pub fn temperature(&self) -> Option<f64> {
        self.computed.temperature
    }
}
