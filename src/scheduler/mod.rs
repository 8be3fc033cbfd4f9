// src/scheduler/mod.rs - Ramp/soak firing schedule driving the controller setpoint
pub mod step;
pub mod time_interface;

use crate::config::{ScheduleConfig, TemperatureLimits};
use crate::controller::{ControllerError, ThermalController};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub use step::{ScheduleError, ScheduleStep, StepPhase, StepRequest, validate_schedule};
pub use time_interface::{ManualClock, SystemClock, TimeInterface};

/// The part of the controller the schedule engine is allowed to touch.
#[async_trait]
pub trait SetpointTarget: Send + Sync {
    async fn target_temperature(&self) -> f64;
    async fn set_target_temperature(&self, temperature: f64) -> Result<(), ControllerError>;
}

#[async_trait]
impl SetpointTarget for ThermalController {
    async fn target_temperature(&self) -> f64 {
        ThermalController::target_temperature(self).await
    }

    async fn set_target_temperature(&self, temperature: f64) -> Result<(), ControllerError> {
        ThermalController::set_target_temperature(self, temperature).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePhase {
    Idle,
    Ramping,
    Soaking,
    /// The current step has run its course; the next tick moves on.
    Advancing,
}

/// Progress snapshot: the step list split around the current step.
///
/// When no schedule is active every list is empty and both start times are
/// the Unix epoch, so consumers can serialize it without checking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStatus {
    pub previous_steps: Vec<ScheduleStep>,
    pub current_step: Option<ScheduleStep>,
    pub future_steps: Vec<ScheduleStep>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub step_started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub now: DateTime<Utc>,
}

impl ScheduleStatus {
    pub fn idle(now: DateTime<Utc>) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.previous_steps.is_empty() && self.current_step.is_none() && self.future_steps.is_empty()
    }
}

struct ActiveSchedule {
    steps: Vec<ScheduleStep>,
    step_index: usize,
    started_at: DateTime<Utc>,
    step_started_at: DateTime<Utc>,
    generation: u64,
    ticker: JoinHandle<()>,
}

impl ActiveSchedule {
    fn status(&self, now: DateTime<Utc>) -> ScheduleStatus {
        let split = self.step_index.min(self.steps.len());
        let next = (self.step_index + 1).min(self.steps.len());
        ScheduleStatus {
            previous_steps: self.steps[..split].to_vec(),
            current_step: self.steps.get(self.step_index).cloned(),
            future_steps: self.steps[next..].to_vec(),
            started_at: self.started_at,
            step_started_at: self.step_started_at,
            now,
        }
    }

    fn elapsed_minutes(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.step_started_at).num_milliseconds().max(0);
        millis as f64 / 60_000.0
    }

    fn stop(self) {
        self.ticker.abort();
    }
}

/// Runs one ramp/soak schedule at a time and pushes the setpoint it wants
/// into the controller once per tick.
#[derive(Clone)]
pub struct Scheduler {
    state: Arc<Mutex<Option<ActiveSchedule>>>,
    target: Arc<dyn SetpointTarget>,
    limits: TemperatureLimits,
    tick_interval: Duration,
    clock: Arc<dyn TimeInterface>,
    generation: Arc<AtomicU64>,
    updates: broadcast::Sender<ScheduleStatus>,
}

impl Scheduler {
    pub fn new(
        config: &ScheduleConfig,
        limits: TemperatureLimits,
        target: Arc<dyn SetpointTarget>,
        clock: Arc<dyn TimeInterface>,
    ) -> Self {
        let (updates, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(None)),
            target,
            limits,
            tick_interval: config.tick_interval(),
            clock,
            generation: Arc::new(AtomicU64::new(0)),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScheduleStatus> {
        self.updates.subscribe()
    }

    /// Validate and start a schedule, replacing any active one.
    ///
    /// On a validation error nothing changes, including a running schedule.
    pub async fn set_schedule(&self, steps: &[StepRequest]) -> Result<(), ScheduleError> {
        let steps = validate_schedule(steps, self.limits)?;

        let mut state = self.state.lock().await;
        if let Some(previous) = state.take() {
            tracing::info!("Replacing active schedule");
            previous.stop();
        }

        let now = self.clock.now();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!("Starting schedule with {} step(s)", steps.len());
        *state = Some(ActiveSchedule {
            steps,
            step_index: 0,
            started_at: now,
            step_started_at: now,
            generation,
            ticker: self.spawn_ticker(generation),
        });
        self.update_locked(&mut state).await;
        Ok(())
    }

    /// Stop the active schedule (if any), disable the process and announce
    /// the idle state.
    pub async fn clear_schedule(&self) {
        let mut state = self.state.lock().await;
        self.teardown_locked(&mut state).await;
        drop(state);
        self.emit(ScheduleStatus::idle(self.clock.now()));
    }

    pub async fn status(&self) -> ScheduleStatus {
        let now = self.clock.now();
        match self.state.lock().await.as_ref() {
            Some(active) => active.status(now),
            None => ScheduleStatus::idle(now),
        }
    }

    /// Re-broadcast the current status out of band.
    pub async fn announce(&self) {
        let status = self.status().await;
        self.emit(status);
    }

    pub async fn phase(&self) -> SchedulePhase {
        let now = self.clock.now();
        let state = self.state.lock().await;
        let Some(active) = state.as_ref() else {
            return SchedulePhase::Idle;
        };
        match active.steps.get(active.step_index) {
            Some(step) => match step.phase_at(active.elapsed_minutes(now)) {
                StepPhase::Ramping(_) => SchedulePhase::Ramping,
                StepPhase::Soaking(_) => SchedulePhase::Soaking,
                StepPhase::Finished => SchedulePhase::Advancing,
            },
            None => SchedulePhase::Advancing,
        }
    }

    /// One schedule tick: recompute the desired setpoint, advancing steps or
    /// finishing the schedule as needed.
    pub async fn update(&self) {
        let mut state = self.state.lock().await;
        self.update_locked(&mut state).await;
    }

    fn spawn_ticker(&self, generation: u64) -> JoinHandle<()> {
        let scheduler = self.clone();
        let period = self.tick_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let mut state = scheduler.state.lock().await;
                match state.as_ref() {
                    Some(active) if active.generation == generation => {}
                    _ => break,
                }
                scheduler.update_locked(&mut state).await;
                if state.is_none() {
                    break;
                }
            }
        })
    }

    async fn update_locked(&self, state: &mut Option<ActiveSchedule>) {
        loop {
            let Some(active) = state.as_mut() else {
                return;
            };
            let now = self.clock.now();
            let elapsed = active.elapsed_minutes(now);
            let desired = match active.steps[active.step_index].phase_at(elapsed) {
                StepPhase::Ramping(t) | StepPhase::Soaking(t) => t,
                StepPhase::Finished if active.step_index + 1 >= active.steps.len() => {
                    tracing::info!("Schedule complete, disabling process");
                    self.disable_process().await;
                    // Every step lands in `previous_steps` for the final update
                    active.step_index += 1;
                    let status = active.status(now);
                    self.emit(status);
                    self.teardown_locked(state).await;
                    return;
                }
                StepPhase::Finished => {
                    active.step_index += 1;
                    active.step_started_at = now;
                    tracing::info!(
                        "Advancing to schedule step {} of {}",
                        active.step_index + 1,
                        active.steps.len()
                    );
                    continue;
                }
            };

            let status = active.status(now);
            if self.target.target_temperature().await != desired {
                if let Err(e) = self.target.set_target_temperature(desired).await {
                    tracing::warn!("Schedule could not set target {:.2}: {}", desired, e);
                }
            }
            self.emit(status);
            return;
        }
    }

    /// Disable the process, then drop the schedule and stop its ticker.
    ///
    /// Nothing is awaited after the ticker is aborted, so this is safe to
    /// call from the ticker task itself.
    async fn teardown_locked(&self, state: &mut Option<ActiveSchedule>) {
        if state.is_none() {
            return;
        }
        self.disable_process().await;
        if let Some(active) = state.take() {
            active.stop();
        }
    }

    async fn disable_process(&self) {
        if let Err(e) = self.target.set_target_temperature(0.0).await {
            tracing::error!("Failed to disable process: {}", e);
        }
    }

    fn emit(&self, status: ScheduleStatus) {
        // No subscribers is fine
        let _ = self.updates.send(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeTarget {
        setpoint: StdMutex<f64>,
        writes: StdMutex<Vec<f64>>,
    }

    #[async_trait]
    impl SetpointTarget for FakeTarget {
        async fn target_temperature(&self) -> f64 {
            *self.setpoint.lock().unwrap()
        }

        async fn set_target_temperature(&self, temperature: f64) -> Result<(), ControllerError> {
            *self.setpoint.lock().unwrap() = temperature;
            self.writes.lock().unwrap().push(temperature);
            Ok(())
        }
    }

    fn scheduler() -> (Scheduler, Arc<FakeTarget>, ManualClock) {
        let target = Arc::new(FakeTarget::default());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        // Ticks are driven by hand
        let config = ScheduleConfig {
            tick_interval_ms: 3_600_000,
        };
        let limits = TemperatureLimits { min: 20.0, max: 1300.0 };
        let scheduler = Scheduler::new(&config, limits, target.clone(), Arc::new(clock.clone()));
        (scheduler, target, clock)
    }

    fn step(temperature: f64, ramp: f64, soak: f64, start: f64) -> StepRequest {
        StepRequest {
            temperature: Some(temperature),
            ramp_minutes: Some(ramp),
            soak_minutes: Some(soak),
            ramp_start_temperature: Some(start),
        }
    }

    #[tokio::test]
    async fn test_idle_status_is_a_value() {
        let (scheduler, _, _) = scheduler();
        let status = scheduler.status().await;
        assert!(status.is_idle());
        assert_eq!(status.started_at.timestamp_millis(), 0);
        assert_eq!(scheduler.phase().await, SchedulePhase::Idle);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["previousSteps"], serde_json::json!([]));
        assert!(json["currentStep"].is_null());
        assert_eq!(json["startedAt"], 0);
    }

    #[tokio::test]
    async fn test_redundant_setpoints_not_rewritten() {
        let (scheduler, target, clock) = scheduler();
        scheduler.set_schedule(&[step(100.0, 0.0, 20.0, 20.0)]).await.unwrap();
        assert_eq!(*target.writes.lock().unwrap(), vec![100.0]);
        clock.advance(chrono::Duration::minutes(5));
        scheduler.update().await;
        scheduler.update().await;
        assert_eq!(*target.writes.lock().unwrap(), vec![100.0]);
        assert_eq!(scheduler.phase().await, SchedulePhase::Soaking);
    }

    #[tokio::test]
    async fn test_multi_step_advances_without_skipping_a_tick() {
        let (scheduler, target, clock) = scheduler();
        let mut updates = scheduler.subscribe();
        scheduler
            .set_schedule(&[step(100.0, 10.0, 0.0, 20.0), step(200.0, 10.0, 5.0, 100.0)])
            .await
            .unwrap();
        assert_eq!(target.target_temperature().await, 20.0);
        assert_eq!(updates.try_recv().unwrap().future_steps.len(), 1);

        clock.advance(chrono::Duration::minutes(10));
        scheduler.update().await;
        // Step boundary: second step starts now, at its ramp start
        assert_eq!(target.target_temperature().await, 100.0);
        let status = updates.try_recv().unwrap();
        assert_eq!(status.previous_steps.len(), 1);
        assert_eq!(status.current_step.unwrap().temperature, 200.0);
        assert_eq!(status.step_started_at, clock.now());

        clock.advance(chrono::Duration::minutes(5));
        scheduler.update().await;
        assert_eq!(target.target_temperature().await, 150.0);
        assert_eq!(scheduler.phase().await, SchedulePhase::Ramping);
    }

    #[tokio::test]
    async fn test_invalid_schedule_leaves_active_one_untouched() {
        let (scheduler, _, _) = scheduler();
        scheduler.set_schedule(&[step(100.0, 10.0, 20.0, 20.0)]).await.unwrap();
        let before = scheduler.status().await;

        let err = scheduler
            .set_schedule(&[step(300.0, 5.0, 5.0, 20.0), step(5000.0, 5.0, 5.0, 20.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidStep { index: 1, .. }));
        assert_eq!(scheduler.status().await, before);
    }

    #[tokio::test]
    async fn test_replacing_schedule_discards_old_state() {
        let (scheduler, target, clock) = scheduler();
        scheduler.set_schedule(&[step(100.0, 10.0, 20.0, 20.0)]).await.unwrap();
        clock.advance(chrono::Duration::minutes(15));
        scheduler.set_schedule(&[step(400.0, 0.0, 30.0, 20.0)]).await.unwrap();
        let status = scheduler.status().await;
        assert!(status.previous_steps.is_empty());
        assert_eq!(status.current_step.unwrap().temperature, 400.0);
        assert_eq!(status.started_at, clock.now());
        assert_eq!(target.target_temperature().await, 400.0);
    }

    #[tokio::test]
    async fn test_clear_schedule_disables_and_announces_idle() {
        let (scheduler, target, _) = scheduler();
        scheduler.set_schedule(&[step(100.0, 10.0, 20.0, 20.0)]).await.unwrap();
        let mut updates = scheduler.subscribe();
        scheduler.clear_schedule().await;
        assert_eq!(target.target_temperature().await, 0.0);
        assert!(updates.try_recv().unwrap().is_idle());
        assert!(updates.try_recv().is_err());
        assert_eq!(scheduler.phase().await, SchedulePhase::Idle);
    }

    #[tokio::test]
    async fn test_clear_when_idle_keeps_manual_setpoint() {
        let (scheduler, target, _) = scheduler();
        target.set_target_temperature(250.0).await.unwrap();
        scheduler.clear_schedule().await;
        assert_eq!(target.target_temperature().await, 250.0);
    }

    #[tokio::test]
    async fn test_announce_rebroadcasts_current_status() {
        let (scheduler, _, _) = scheduler();
        scheduler.set_schedule(&[step(100.0, 10.0, 20.0, 20.0)]).await.unwrap();
        let mut updates = scheduler.subscribe();
        scheduler.announce().await;
        let status = updates.try_recv().unwrap();
        assert_eq!(status.current_step.unwrap().temperature, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_drives_updates() {
        let target = Arc::new(FakeTarget::default());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        let scheduler = Scheduler::new(
            &ScheduleConfig::default(),
            TemperatureLimits { min: 20.0, max: 1300.0 },
            target.clone(),
            Arc::new(clock.clone()),
        );
        scheduler.set_schedule(&[step(100.0, 10.0, 0.0, 20.0)]).await.unwrap();
        let mut updates = scheduler.subscribe();

        clock.advance(chrono::Duration::minutes(5));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(target.target_temperature().await, 60.0);
        assert!(updates.try_recv().is_ok());

        clock.advance(chrono::Duration::minutes(5));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(target.target_temperature().await, 0.0);
        assert_eq!(scheduler.phase().await, SchedulePhase::Idle);
    }
}
