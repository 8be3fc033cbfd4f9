// src/controller/mod.rs - Thermal controller: sensor lines in, relay commands out
pub mod history;

use crate::config::ControllerConfig;
use crate::hardware::fusion::{ComputedTemperature, SensorFusion};
use crate::hardware::protocol::{self, RawRegister, RelayCommand, BUFFER_CLEAR, RELAY_REGISTER};
use crate::hardware::temperature::{Pid, PidMode};
use crate::hardware::{CommandTransport, HardwareError};
use crate::scheduler::time_interface::TimeInterface;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};

pub use history::{HistoryLog, HistorySample};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Temperature must be between {min} and {max} (or 0 to disable), got {value}")]
    OutOfRange { value: f64, min: f64, max: f64 },
    #[error("Transport error: {0}")]
    Transport(#[from] HardwareError),
}

/// Snapshot of everything the controller knows about the kiln.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub raw: RawRegister,
    pub computed: ComputedTemperature,
    pub setpoint: f64,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

/// PID gains as exposed over the API.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tunings {
    #[serde(rename = "Kp")]
    pub kp: f64,
    #[serde(rename = "Ki")]
    pub ki: f64,
    #[serde(rename = "Kd")]
    pub kd: f64,
}

struct ControllerState {
    raw: RawRegister,
    fusion: SensorFusion,
    setpoint: f64,
    timestamp: Option<DateTime<Utc>>,
    history: HistoryLog,
    pid: Pid,
    first_line: bool,
}

impl ControllerState {
    fn snapshot(&self) -> ControllerStatus {
        ControllerStatus {
            raw: self.raw.clone(),
            computed: self.fusion.computed().clone(),
            setpoint: self.setpoint,
            timestamp: self.timestamp,
        }
    }

    fn apply_setpoint(&mut self, setpoint: f64, min: f64, max: f64) {
        self.setpoint = setpoint;
        self.pid.set_point(setpoint);
        self.pid.set_output_limits(min, max);
    }

    fn relays_reported_on(&self) -> bool {
        self.raw.get(RELAY_REGISTER).copied().unwrap_or(0) != 0
    }
}

/// Owns the device link, the PID loop and the bounded history log.
///
/// Cheap to clone; clones share state. All mutation happens under one lock
/// that is never held across a serial write.
#[derive(Clone)]
pub struct ThermalController {
    state: Arc<Mutex<ControllerState>>,
    transport: Arc<dyn CommandTransport>,
    config: Arc<ControllerConfig>,
    clock: Arc<dyn TimeInterface>,
    updates: broadcast::Sender<ControllerStatus>,
    closed: watch::Sender<bool>,
}

impl ThermalController {
    pub fn new(
        config: ControllerConfig,
        transport: Arc<dyn CommandTransport>,
        clock: Arc<dyn TimeInterface>,
    ) -> Self {
        let tunings = config.pid;
        let mut pid = Pid::new(config.ambient_temperature, 0.0, tunings.kp, tunings.ki, tunings.kd);
        pid.set_sample_time(config.control_interval());
        pid.set_mode(PidMode::Automatic);

        let mut raw = RawRegister::new();
        raw.insert(RELAY_REGISTER.to_string(), 0);

        let mut state = ControllerState {
            raw,
            fusion: SensorFusion::new(),
            setpoint: 0.0,
            timestamp: None,
            history: HistoryLog::new(config.history_capacity),
            pid,
            first_line: true,
        };
        state.apply_setpoint(0.0, config.min_temperature, config.max_temperature);

        let (updates, _) = broadcast::channel(16);
        let (closed, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(state)),
            transport,
            config: Arc::new(config),
            clock,
            updates,
            closed,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub async fn enable_relays(&self) -> Result<(), ControllerError> {
        self.send_command(RelayCommand::On).await
    }

    pub async fn disable_relays(&self) -> Result<(), ControllerError> {
        self.send_command(RelayCommand::Off).await
    }

    async fn send_command(&self, command: RelayCommand) -> Result<(), ControllerError> {
        tracing::debug!("MCU <- {}", command.as_str());
        self.transport.write(&command.encode()).await.map_err(|e| {
            tracing::error!("Failed to send {} to kiln: {}", command.as_str(), e);
            ControllerError::Transport(e)
        })
    }

    pub async fn target_temperature(&self) -> f64 {
        self.state.lock().await.setpoint
    }

    /// Set the process setpoint. `0` disables the process and is always accepted.
    pub async fn set_target_temperature(&self, temperature: f64) -> Result<(), ControllerError> {
        let (min, max) = (self.config.min_temperature, self.config.max_temperature);
        if temperature != 0.0 && !self.config.limits().contains(temperature) {
            return Err(ControllerError::OutOfRange {
                value: temperature,
                min,
                max,
            });
        }
        self.state.lock().await.apply_setpoint(temperature, min, max);
        tracing::debug!("Setpoint now {:.2}", temperature);
        Ok(())
    }

    pub async fn status(&self) -> ControllerStatus {
        self.state.lock().await.snapshot()
    }

    pub async fn history(&self) -> Vec<HistorySample> {
        self.state.lock().await.history.to_vec()
    }

    pub async fn tunings(&self) -> Tunings {
        let (kp, ki, kd) = self.state.lock().await.pid.tunings();
        Tunings { kp, ki, kd }
    }

    /// Retune the live PID loop without resetting its integral term.
    pub async fn set_tunings(&self, tunings: Tunings) {
        self.state
            .lock()
            .await
            .pid
            .set_tunings(tunings.kp, tunings.ki, tunings.kd);
        tracing::info!("PID tunings Kp={} Ki={} Kd={}", tunings.kp, tunings.ki, tunings.kd);
    }

    /// Debounced status updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerStatus> {
        self.updates.subscribe()
    }

    /// Clear the board's command buffer after the port opens.
    ///
    /// The next received line is treated as a fragment and discarded.
    pub async fn on_port_open(&self) -> Result<(), ControllerError> {
        self.state.lock().await.first_line = true;
        self.transport.write(BUFFER_CLEAR).await?;
        tracing::info!("serial port open");
        Ok(())
    }

    /// Apply one line from the board. Returns true when the fused temperature
    /// changed and a status update should be scheduled.
    pub async fn ingest_line(&self, line: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.first_line {
            state.first_line = false;
            tracing::debug!("Discarding partial first line");
            return false;
        }

        let line = line.trim();
        tracing::debug!("rx: {}", line);

        let Some((name, value)) = protocol::parse_register(line) else {
            return false;
        };
        state.raw.insert(name.to_string(), value);
        if !protocol::is_temperature_register(name) {
            return false;
        }
        if state.fusion.observe(name, value).is_none() {
            return false;
        }
        state.timestamp = Some(self.clock.now());
        true
    }

    /// Broadcast the current status to subscribers.
    pub async fn publish_update(&self) {
        let status = self.status().await;
        // No subscribers is fine
        let _ = self.updates.send(status);
    }

    /// One fixed-period control step: PID compute, history, relay decision.
    pub async fn control_step(&self) -> Result<(), ControllerError> {
        let command = {
            let mut state = self.state.lock().await;
            let current = state
                .fusion
                .temperature()
                .unwrap_or(self.config.ambient_temperature);
            state.pid.set_input(current);
            state.pid.compute();

            if state.setpoint == 0.0 {
                if state.relays_reported_on() {
                    tracing::info!("Process disabled, turning relays off");
                    Some(RelayCommand::Off)
                } else {
                    None
                }
            } else {
                let setpoint = state.setpoint;
                let timestamp = self.clock.now();
                state.history.push(HistorySample {
                    timestamp,
                    temperature: current,
                    target: setpoint,
                });

                let output = state.pid.output();
                let enable = output > setpoint;
                tracing::info!(
                    "temp={} setpoint={} PID={} relays={}",
                    round2(current),
                    round2(setpoint),
                    round2(output),
                    if enable { "ON" } else { "OFF" }
                );
                Some(if enable { RelayCommand::On } else { RelayCommand::Off })
            }
        };

        match command {
            Some(command) => self.send_command(command).await,
            None => Ok(()),
        }
    }

    /// Drive the controller until [`close`](Self::close) is called.
    ///
    /// Runs the control step on its fixed period regardless of the previous
    /// step's outcome, ingests device lines, and fires the status update once
    /// the line stream has been quiet for the debounce delay.
    pub async fn run<S>(&self, mut lines: S)
    where
        S: Stream<Item = String> + Unpin,
    {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return;
        }
        if let Err(e) = self.on_port_open().await {
            tracing::error!("Failed to clear kiln command buffer: {}", e);
        }

        let period = self.config.control_interval();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let debounce = tokio::time::sleep(self.config.update_debounce());
        tokio::pin!(debounce);
        let mut update_pending = false;
        let mut lines_open = true;

        loop {
            tokio::select! {
                _ = closed.changed() => {
                    tracing::info!("Control loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.control_step().await {
                        tracing::warn!("Control step failed: {}", e);
                    }
                }
                line = lines.next(), if lines_open => match line {
                    Some(line) => {
                        if self.ingest_line(&line).await {
                            debounce.as_mut().reset(Instant::now() + self.config.update_debounce());
                            update_pending = true;
                        }
                    }
                    None => {
                        lines_open = false;
                        tracing::error!("Kiln line stream ended; control loop keeps running");
                    }
                },
                _ = &mut debounce, if update_pending => {
                    update_pending = false;
                    self.publish_update().await;
                }
            }
        }
    }

    /// Stop the control loop started by [`run`](Self::run).
    pub fn close(&self) {
        self.closed.send_replace(true);
    }
}

fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}
