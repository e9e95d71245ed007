//! Control listeners
//!
//! One listener per controllable property. Each subscribes to its own command
//! topic, decodes every message into at most one [`PropertyChange`], applies it
//! and then publishes the resulting state.
//!
//! Decoding per control:
//!
//! | Control     | Payload                        | Change                   |
//! |-------------|--------------------------------|--------------------------|
//! | power       | `off` / `auto` / anything else | off / on / none          |
//! | fan         | `Silent` `Regular` `Boost`     | fan level, else error    |
//! | temperature | numeric text                   | truncated toward zero    |
//! | cleaning    | `True` / anything else         | true / false             |
//!
//! An unrecognised power payload still triggers a state publication. A payload
//! that fails to decode is logged and skipped; the subscription carries on.

use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::state_publisher::{StatePublisher, POWER_AUTO, POWER_OFF};
use super::BridgeError;
use crate::device::{FanLevel, PropertyChange, SharedDevice};
use crate::mqtt::{BusMessage, Transport};
use crate::topics::{Control, Topics};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("'{0}' is not a fan level")]
    InvalidEnumValue(String),

    #[error("'{0}' is not a number")]
    InvalidNumber(String),
}

/// Maps one command payload to the change it asks for.
pub fn decode(control: Control, payload: &str) -> Result<Option<PropertyChange>, DecodeError> {
    match control {
        Control::Power => Ok(match payload {
            POWER_OFF => Some(PropertyChange::PoweredOn(false)),
            POWER_AUTO => Some(PropertyChange::PoweredOn(true)),
            _ => None,
        }),
        Control::Fan => payload
            .parse::<FanLevel>()
            .map(|level| Some(PropertyChange::FanLevel(level)))
            .map_err(DecodeError::InvalidEnumValue),
        Control::Temperature => {
            let value = payload
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| DecodeError::InvalidNumber(payload.to_string()))?;
            Ok(Some(PropertyChange::DesiredTemperatureC(value.trunc() as i32)))
        }
        Control::Cleaning => Ok(Some(PropertyChange::Cleaning(payload == "True"))),
    }
}

pub struct ControlListener {
    control: Control,
    topic: String,
    transport: Arc<dyn Transport>,
    device: SharedDevice,
    publisher: StatePublisher,
    messages: Option<mpsc::UnboundedReceiver<BusMessage>>,
}

impl ControlListener {
    pub fn new(
        control: Control,
        topics: &Topics,
        transport: Arc<dyn Transport>,
        device: SharedDevice,
        publisher: StatePublisher,
    ) -> Self {
        Self {
            control,
            topic: topics.command(control),
            transport,
            device,
            publisher,
            messages: None,
        }
    }

    /// Opens the subscription up front. Messages arriving before [`run`] is
    /// polled are buffered, not lost.
    ///
    /// [`run`]: ControlListener::run
    pub async fn subscribe(mut self) -> Result<Self, BridgeError> {
        if self.messages.is_none() {
            self.messages = Some(self.transport.subscribe(&self.topic).await?);
            info!("{} listener subscribed to {}", self.control, self.topic);
        }
        Ok(self)
    }

    /// Handles messages in arrival order until a fatal error, subscribing
    /// first if that has not happened yet.
    pub async fn run(self) -> Result<Infallible, BridgeError> {
        let mut listener = self.subscribe().await?;
        if let Some(mut messages) = listener.messages.take() {
            while let Some(message) = messages.recv().await {
                if let Err(e) = listener.handle(&message).await {
                    error!("{} listener stopped: {}", listener.control, e);
                    return Err(e);
                }
            }
        }

        Err(BridgeError::SubscriptionEnded(listener.topic))
    }

    /// Handles one message. Only errors that threaten the shared connection or
    /// device link are returned.
    pub async fn handle(&self, message: &BusMessage) -> Result<(), BridgeError> {
        debug!("{} listener got {}", self.control, message);

        match decode(self.control, &message.payload) {
            Ok(Some(change)) => match self.device.apply(change).await {
                Ok(()) => info!("Applied {:?}", change),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => warn!("Device did not apply {:?}: {}", change, e),
            },
            Ok(None) => debug!("Ignoring {} payload '{}'", self.control, message.payload),
            Err(e) => {
                warn!("Skipping message on {}: {}", self.topic, e);
                return Ok(());
            }
        }

        match self.publisher.publish_state().await {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("State publication after {} command failed: {}", self.control, e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}
