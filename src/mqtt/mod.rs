//! # Message Bus Transport
//!
//! The bridge sees the broker only through the [`Transport`] trait: publish
//! with an optional retain flag, subscribe to a filter and get a stream of
//! matching messages back, and learn when the connection is gone for good.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings derived from the process config
//! ├── error.rs            - TransportError
//! ├── message_manager.rs  - Inbound message type and per-filter routing
//! └── mqtt_handler.rs     - rumqttc connection and event loop
//! ```

pub mod config;
pub mod error;
pub mod message_manager;
pub mod mqtt_handler;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

pub use config::MqttConfig;
pub use error::TransportError;
pub use message_manager::BusMessage;
pub use mqtt_handler::MqttHandler;

/// A publish/subscribe connection to one broker.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), TransportError>;

    /// Messages arrive on the returned receiver in broker order.
    async fn subscribe(
        &self,
        filter: &str,
    ) -> Result<mpsc::UnboundedReceiver<BusMessage>, TransportError>;

    /// Resolves once the connection is lost and will not come back.
    async fn closed(&self) -> TransportError;
}

/// Serializes `value` to JSON and publishes it.
pub async fn publish_json<T: Serialize + ?Sized>(
    transport: &dyn Transport,
    topic: &str,
    value: &T,
    retain: bool,
) -> Result<(), TransportError> {
    let payload = serde_json::to_vec(value)?;
    transport.publish(topic, payload, retain).await
}
