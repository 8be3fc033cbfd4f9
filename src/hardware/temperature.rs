// src/hardware/temperature.rs - PID loop driven by the controller's fixed sample period
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidMode {
    Manual,
    Automatic,
}

/// Direct-acting PID with clamped integral term.
///
/// `compute` is expected to be called once per sample period; the integral
/// and derivative gains are pre-scaled by that period, so callers never pass
/// a `dt`. The integral term is clamped to the output limits, which keeps it
/// from winding up while the output saturates.
#[derive(Debug, Clone)]
pub struct Pid {
    /// Gains as given by the caller
    kp: f64,
    ki: f64,
    kd: f64,

    /// Gains scaled by the sample period
    scaled_ki: f64,
    scaled_kd: f64,

    sample_time: Duration,
    mode: PidMode,

    setpoint: f64,
    input: f64,
    output: f64,
    last_input: f64,
    integral: f64,

    out_min: f64,
    out_max: f64,
}

impl Pid {
    pub fn new(input: f64, setpoint: f64, kp: f64, ki: f64, kd: f64) -> Self {
        let mut pid = Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            scaled_ki: 0.0,
            scaled_kd: 0.0,
            sample_time: Duration::from_millis(100),
            mode: PidMode::Manual,
            setpoint,
            input,
            output: 0.0,
            last_input: input,
            integral: 0.0,
            out_min: 0.0,
            out_max: 255.0,
        };
        pid.set_tunings(kp, ki, kd);
        pid
    }

    pub fn set_point(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    pub fn set_input(&mut self, input: f64) {
        self.input = input;
    }

    /// Update gains in place. The integral term is kept, so a live retune
    /// does not bump the output.
    pub fn set_tunings(&mut self, kp: f64, ki: f64, kd: f64) {
        if kp < 0.0 || ki < 0.0 || kd < 0.0 {
            tracing::warn!("Ignoring negative PID tunings Kp={} Ki={} Kd={}", kp, ki, kd);
            return;
        }
        let secs = self.sample_time.as_secs_f64();
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
        self.scaled_ki = ki * secs;
        self.scaled_kd = kd / secs;
    }

    pub fn tunings(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }

    pub fn set_sample_time(&mut self, sample_time: Duration) {
        if sample_time.is_zero() {
            return;
        }
        let ratio = sample_time.as_secs_f64() / self.sample_time.as_secs_f64();
        self.scaled_ki *= ratio;
        self.scaled_kd /= ratio;
        self.sample_time = sample_time;
    }

    pub fn set_output_limits(&mut self, min: f64, max: f64) {
        if min >= max {
            return;
        }
        self.out_min = min;
        self.out_max = max;
        if self.mode == PidMode::Automatic {
            self.output = self.clamp(self.output);
            self.integral = self.clamp(self.integral);
        }
    }

    pub fn set_mode(&mut self, mode: PidMode) {
        if mode == PidMode::Automatic && self.mode == PidMode::Manual {
            // Bumpless transfer: start integrating from the current output.
            self.last_input = self.input;
            self.integral = self.clamp(self.output);
        }
        self.mode = mode;
    }

    pub fn mode(&self) -> PidMode {
        self.mode
    }

    /// Run one sample. Returns false (and leaves the output alone) in manual mode.
    pub fn compute(&mut self) -> bool {
        if self.mode == PidMode::Manual {
            return false;
        }
        let error = self.setpoint - self.input;
        self.integral = self.clamp(self.integral + self.scaled_ki * error);
        let d_input = self.input - self.last_input;

        self.output = self.clamp(self.kp * error + self.integral - self.scaled_kd * d_input);
        self.last_input = self.input;
        true
    }

    pub fn output(&self) -> f64 {
        self.output
    }

    fn clamp(&self, value: f64) -> f64 {
        value.max(self.out_min).min(self.out_max)
    }
}
