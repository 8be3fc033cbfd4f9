// src/lib.rs - Kiln host: sensor fusion, PID relay control, ramp/soak schedules
pub mod communication;
pub mod config;
pub mod controller;
pub mod hardware;
pub mod scheduler;
pub mod shutdown;
pub mod web;

pub use communication::{KilnSources, RelayLink, SshLauncher, StatusSources, WorkerLauncher};
pub use config::{Config, ConfigError};
pub use controller::{ControllerError, ControllerStatus, HistorySample, ThermalController, Tunings};
pub use scheduler::{ScheduleError, ScheduleStatus, ScheduleStep, Scheduler};
