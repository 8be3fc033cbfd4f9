//! Ramp/soak steps and their validation.

use crate::config::TemperatureLimits;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("Schedule must have at least one step")]
    Empty,
    #[error("Step {index}: {reason}")]
    InvalidStep { index: usize, reason: String },
}

/// A validated step: ramp from `ramp_start_temperature` to `temperature`
/// over `ramp_minutes`, then hold for `soak_minutes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStep {
    pub temperature: f64,
    pub ramp_minutes: u32,
    pub soak_minutes: u32,
    /// Only present when `ramp_minutes > 0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_start_temperature: Option<f64>,
}

/// A step as submitted by a client, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRequest {
    pub temperature: Option<f64>,
    pub ramp_minutes: Option<f64>,
    pub soak_minutes: Option<f64>,
    pub ramp_start_temperature: Option<f64>,
}

/// Where a step is at a given elapsed time, with the setpoint it wants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepPhase {
    Ramping(f64),
    Soaking(f64),
    Finished,
}

impl ScheduleStep {
    pub fn total_minutes(&self) -> u32 {
        self.ramp_minutes.saturating_add(self.soak_minutes)
    }

    pub fn phase_at(&self, elapsed_minutes: f64) -> StepPhase {
        let ramp = self.ramp_minutes as f64;
        if elapsed_minutes < ramp {
            let start = self.ramp_start_temperature.unwrap_or(self.temperature);
            let fraction = elapsed_minutes / ramp;
            StepPhase::Ramping(start + (self.temperature - start) * fraction)
        } else if elapsed_minutes < self.total_minutes() as f64 {
            StepPhase::Soaking(self.temperature)
        } else {
            StepPhase::Finished
        }
    }
}

/// Validate a whole schedule. Either every step is accepted or none is.
pub fn validate_schedule(
    steps: &[StepRequest],
    limits: TemperatureLimits,
) -> Result<Vec<ScheduleStep>, ScheduleError> {
    if steps.is_empty() {
        return Err(ScheduleError::Empty);
    }
    steps
        .iter()
        .enumerate()
        .map(|(index, step)| validate_step(index, step, limits))
        .collect()
}

fn validate_step(
    index: usize,
    step: &StepRequest,
    limits: TemperatureLimits,
) -> Result<ScheduleStep, ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidStep { index, reason };

    let temperature = step
        .temperature
        .filter(|t| limits.contains(*t))
        .ok_or_else(|| {
            invalid(format!(
                "temperature must be a number between {} and {}",
                limits.min, limits.max
            ))
        })?;
    let ramp_minutes = whole_minutes(step.ramp_minutes)
        .ok_or_else(|| invalid("ramp time must be a non-negative number".to_string()))?;
    let soak_minutes = whole_minutes(step.soak_minutes)
        .ok_or_else(|| invalid("soak time must be a non-negative number".to_string()))?;
    if ramp_minutes == 0 && soak_minutes == 0 {
        return Err(invalid("ramp and soak times cannot both be zero".to_string()));
    }

    let ramp_start_temperature = if ramp_minutes > 0 {
        let start = step.ramp_start_temperature.unwrap_or(limits.min);
        if !limits.contains(start) {
            return Err(invalid(format!(
                "ramp start temperature must be between {} and {}",
                limits.min, limits.max
            )));
        }
        Some(start)
    } else {
        None
    };

    Ok(ScheduleStep {
        temperature,
        ramp_minutes,
        soak_minutes,
        ramp_start_temperature,
    })
}

/// Missing means zero; negative or non-finite is rejected; the rest rounds
/// to the nearest whole minute.
fn whole_minutes(value: Option<f64>) -> Option<u32> {
    let value = value.unwrap_or(0.0);
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value.round().min(u32::MAX as f64) as u32)
}
