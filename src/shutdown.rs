// src/shutdown.rs - Orderly stop of the kiln host
use crate::communication::RelayLink;
use crate::controller::ThermalController;
use crate::scheduler::Scheduler;
use std::time::Duration;

/// Turn the heat off, then stop the relay and the control loop.
///
/// The process is disabled and `OFF` is sent before the relay is touched.
/// The relay gets `relay_timeout` to finish.
pub async fn shut_down(
    controller: &ThermalController,
    scheduler: &Scheduler,
    relay: Option<RelayLink>,
    relay_timeout: Duration,
) {
    scheduler.clear_schedule().await;
    if let Err(e) = controller.set_target_temperature(0.0).await {
        tracing::error!("Failed to disable process: {}", e);
    }
    if let Err(e) = controller.disable_relays().await {
        tracing::error!("Failed to turn relays off: {}", e);
    }

    if let Some(relay) = relay {
        relay.close();
        if tokio::time::timeout(relay_timeout, relay.join()).await.is_err() {
            tracing::warn!("Relay link did not stop within {:?}", relay_timeout);
        }
    }
    controller.close();
}
