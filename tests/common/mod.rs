// Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use kiln_rs::config::{ControllerConfig, ScheduleConfig};
use kiln_rs::hardware::{CommandTransport, HardwareError};
use kiln_rs::scheduler::ManualClock;
use kiln_rs::{Scheduler, ThermalController};
use std::sync::{Arc, Mutex};

/// Transport that records every command written to it.
#[derive(Default)]
pub struct RecordingTransport {
    writes: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn commands(&self) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|w| w.trim_end().to_string())
            .filter(|w| !w.is_empty())
            .collect()
    }
}

#[async_trait]
impl CommandTransport for RecordingTransport {
    async fn write(&self, data: &[u8]) -> Result<(), HardwareError> {
        self.writes
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(data).into_owned());
        Ok(())
    }
}

pub struct Kiln {
    pub controller: ThermalController,
    pub scheduler: Scheduler,
    pub transport: Arc<RecordingTransport>,
    pub clock: ManualClock,
}

/// Controller plus scheduler on a manual clock. The schedule ticker is
/// effectively disabled so tests drive `Scheduler::update` by hand.
pub fn kiln() -> Kiln {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
    let transport = Arc::new(RecordingTransport::default());
    let config = ControllerConfig {
        device: "/dev/null".to_string(),
        min_temperature: 20.0,
        ..ControllerConfig::default()
    };
    let limits = config.limits();
    let controller = ThermalController::new(config, transport.clone(), Arc::new(clock.clone()));
    let scheduler = Scheduler::new(
        &ScheduleConfig {
            tick_interval_ms: 3_600_000,
        },
        limits,
        Arc::new(controller.clone()),
        Arc::new(clock.clone()),
    );
    Kiln {
        controller,
        scheduler,
        transport,
        clock,
    }
}

/// Feed device lines to `ThermalController::run` from a channel.
pub fn receiver_stream(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<String>,
) -> impl futures_util::Stream<Item = String> {
    async_stream::stream! {
        while let Some(line) = rx.recv().await {
            yield line;
        }
    }
}
