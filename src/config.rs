//! # Kiln Configuration
//!
//! One TOML file configures the controller, the schedule ticker, the optional
//! data relay and the web API. Every section is optional and falls back to
//! defaults, except that a real deployment needs `controller.device`.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [controller]
//! device = "/dev/ttyACM0"
//! min_temperature = 20.0
//! max_temperature = 1250.0
//!
//! [controller.pid]
//! kp = 4.0
//! ki = 0.2
//! kd = 1.0
//!
//! [relay]
//! hostname = "intake.example.org"
//! user = "kiln"
//! identity_file = "/home/kiln/.ssh/id_ed25519"
//! intake_path = "/srv/intake/intake.js"
//! ```
//!
//! ## Example: Rust Usage
//!
//! ```rust
//! use kiln_rs::config::Config;
//! let config: Config = toml::from_str("[controller]\ndevice = '/dev/ttyUSB0'").unwrap();
//! assert_eq!(config.controller.baud, 115200);
//! assert!(config.relay.is_none());
//! assert!(config.validate().is_ok());
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the controller, schedule engine, relay and web API.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub relay: Option<RelayConfig>,
    #[serde(default)]
    pub web: WebConfig,
}

/// Serial device, temperature bounds and control loop timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_min_temperature")]
    pub min_temperature: f64,
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f64,
    /// Process value reported before any sensor line has arrived.
    #[serde(default = "default_ambient_temperature")]
    pub ambient_temperature: f64,
    #[serde(default = "default_control_interval_ms")]
    pub control_interval_ms: u64,
    #[serde(default = "default_update_debounce_ms")]
    pub update_debounce_ms: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub pid: PidTunings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device: "".to_string(),
            baud: default_baud(),
            min_temperature: default_min_temperature(),
            max_temperature: default_max_temperature(),
            ambient_temperature: default_ambient_temperature(),
            control_interval_ms: default_control_interval_ms(),
            update_debounce_ms: default_update_debounce_ms(),
            history_capacity: default_history_capacity(),
            pid: PidTunings::default(),
        }
    }
}

impl ControllerConfig {
    pub fn control_interval(&self) -> Duration {
        Duration::from_millis(self.control_interval_ms)
    }

    pub fn update_debounce(&self) -> Duration {
        Duration::from_millis(self.update_debounce_ms)
    }

    pub fn limits(&self) -> TemperatureLimits {
        TemperatureLimits {
            min: self.min_temperature,
            max: self.max_temperature,
        }
    }
}

/// Initial PID gains.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct PidTunings {
    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default = "default_ki")]
    pub ki: f64,
    #[serde(default = "default_kd")]
    pub kd: f64,
}

impl Default for PidTunings {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            ki: default_ki(),
            kd: default_kd(),
        }
    }
}

/// Inclusive bounds every non-zero setpoint and schedule temperature must respect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureLimits {
    pub min: f64,
    pub max: f64,
}

impl TemperatureLimits {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl ScheduleConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Remote intake reached over SSH. The section being present enables the relay.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    pub hostname: String,
    pub user: String,
    pub identity_file: String,
    pub intake_path: String,
    #[serde(default = "default_node_path")]
    pub node_path: String,
    #[serde(default = "default_relay_program")]
    pub program: String,
    #[serde(default)]
    pub reconnect_delay_ms: u64,
}

impl RelayConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl Config {
    /// Reject configurations the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.controller;
        if !(c.min_temperature < c.max_temperature) {
            return Err(ConfigError::Invalid(format!(
                "min_temperature ({}) must be below max_temperature ({})",
                c.min_temperature, c.max_temperature
            )));
        }
        if c.control_interval_ms == 0 || c.update_debounce_ms == 0 {
            return Err(ConfigError::Invalid(
                "control_interval_ms and update_debounce_ms must be > 0".to_string(),
            ));
        }
        if c.history_capacity == 0 {
            return Err(ConfigError::Invalid("history_capacity must be > 0".to_string()));
        }
        if self.schedule.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("schedule.tick_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

// Default value functions
fn default_baud() -> u32 { 115200 }
fn default_min_temperature() -> f64 { 0.0 }
fn default_max_temperature() -> f64 { 1300.0 }
fn default_ambient_temperature() -> f64 { 22.0 }
fn default_control_interval_ms() -> u64 { 2000 }
fn default_update_debounce_ms() -> u64 { 250 }
fn default_history_capacity() -> usize { 4000 }
fn default_kp() -> f64 { 1.0 }
fn default_ki() -> f64 { 0.0 }
fn default_kd() -> f64 { 0.0 }
fn default_tick_interval_ms() -> u64 { 1000 }
fn default_node_path() -> String { "node".to_string() }
fn default_relay_program() -> String { "ssh".to_string() }
fn default_bind() -> String { "0.0.0.0:3000".to_string() }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}
