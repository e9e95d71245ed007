//! Consolidated state publication
//!
//! One JSON document on the state topic carries everything the hub shows. It is
//! published after every handled command and on a fixed interval.

use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::BridgeError;
use crate::device::{FanLevel, SharedDevice, Snapshot};
use crate::mqtt::{publish_json, Transport};

/// Power mode as the hub's climate entity names it.
pub const POWER_AUTO: &str = "auto";
pub const POWER_OFF: &str = "off";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StatePayload {
    pub power: &'static str,
    pub current_temperature: f64,
    pub desired_temperature: i32,
    pub fan_mode: FanLevel,
    pub water_level: u8,
    pub cleaning: bool,
}

impl From<Snapshot> for StatePayload {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            power: if snapshot.state.powered_on {
                POWER_AUTO
            } else {
                POWER_OFF
            },
            current_temperature: snapshot.telemetry.actual_temperature_c,
            desired_temperature: snapshot.state.desired_temperature_c,
            fan_mode: snapshot.state.fan_level,
            water_level: snapshot.telemetry.water_level,
            cleaning: snapshot.state.cleaning,
        }
    }
}

#[derive(Clone)]
pub struct StatePublisher {
    transport: Arc<dyn Transport>,
    device: SharedDevice,
    topic: String,
}

impl StatePublisher {
    pub fn new(transport: Arc<dyn Transport>, device: SharedDevice, topic: String) -> Self {
        Self {
            transport,
            device,
            topic,
        }
    }

    /// Reads the device and publishes one non-retained state payload.
    pub async fn publish_state(&self) -> Result<(), BridgeError> {
        let payload = StatePayload::from(self.device.snapshot().await?);
        debug!("Publishing state to {}: {:?}", self.topic, payload);
        publish_json(self.transport.as_ref(), &self.topic, &payload, false).await?;
        Ok(())
    }

    /// Publishes, then sleeps for `interval`, forever. A missed publish is logged;
    /// only a lost connection or device ends the loop.
    pub async fn run_periodic(self, interval: Duration) -> Result<Infallible, BridgeError> {
        info!("Publishing state to {} every {:?}", self.topic, interval);
        loop {
            if let Err(e) = self.publish_state().await {
                if e.is_fatal() {
                    error!("Periodic state publication stopped: {}", e);
                    return Err(e);
                }
                warn!("Missed periodic state publication: {}", e);
            }
            tokio::time::sleep(interval).await;
        }
    }
}
