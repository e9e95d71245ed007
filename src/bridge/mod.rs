//! Bridge orchestration with a statum state machine
//!
//! ```text
//! Init ──register()──► Registered ──start()──► Running ──supervise()──► BridgeError
//! ```
//!
//! `Init` holds the device and the identity metadata. `register` publishes
//! discovery, then subscribes to the umbrella command filter and opens every
//! listener's subscription, so no command is handled before the hub knows the
//! entities and none arriving before `start` is lost. `start` spawns the four
//! control listeners, the command tap and the periodic state publisher into one
//! task group. `Running` has no normal exit: `supervise` returns the first error
//! that ends a task or the connection, and dropping the bridge aborts every task.

pub mod discovery;
pub mod listener;
pub mod state_publisher;

use statum::{machine, state};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::device::{DeviceError, SharedDevice};
use crate::mqtt::{BusMessage, Transport, TransportError};
use crate::topics::{Control, Topics};
use discovery::{DeviceIdentity, DiscoveryPublisher};
use listener::ControlListener;
use state_publisher::StatePublisher;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Subscription to {0} ended")]
    SubscriptionEnded(String),

    #[error("Bridge task failed: {0}")]
    TaskFailed(String),
}

impl BridgeError {
    /// Whether the error threatens the shared connection or device link.
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::Transport(e) => e.is_fatal(),
            BridgeError::Device(e) => e.is_fatal(),
            BridgeError::SubscriptionEnded(_) | BridgeError::TaskFailed(_) => true,
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum BridgeState {
    Init,
    Registered,
    Running,
}

#[machine]
pub struct Bridge<S: BridgeState> {
    topics: Topics,
    identity: DeviceIdentity,
    update_interval: Duration,
    device: SharedDevice,
    transport: Arc<dyn Transport>,
    publisher: StatePublisher,
    listeners: Vec<ControlListener>,
    commands: Option<mpsc::UnboundedReceiver<BusMessage>>,
    tasks: JoinSet<Result<Infallible, BridgeError>>,
}

impl<S: BridgeState> Bridge<S> {
    pub fn topics(&self) -> &Topics {
        &self.topics
    }
}

impl Bridge<Init> {
    pub fn create(config: &Config, device: SharedDevice, transport: Arc<dyn Transport>) -> Self {
        let topics = Topics::new(&config.homeassistant_prefix, device.identifier());
        info!("Bridging {} under {}", device.identifier(), topics.state());
        let publisher = StatePublisher::new(transport.clone(), device.clone(), topics.state());

        Self::new(
            topics,
            DeviceIdentity::from_config(config),
            config.update_interval(),
            device,
            transport,
            publisher,
            Vec::new(),     // listeners
            None,           // commands
            JoinSet::new(), // tasks
        )
    }

    /// Publishes discovery, then subscribes to every command topic at once and
    /// opens one subscription per listener.
    pub async fn register(mut self) -> Result<Bridge<Registered>, BridgeError> {
        DiscoveryPublisher::new(&self.topics, &self.identity)
            .publish_discovery(self.transport.as_ref())
            .await?;

        let umbrella = self.topics.command_umbrella();
        self.commands = Some(self.transport.subscribe(&umbrella).await?);
        info!("Subscribed to {}", umbrella);

        for control in Control::ALL {
            let listener = ControlListener::new(
                control,
                &self.topics,
                self.transport.clone(),
                self.device.clone(),
                self.publisher.clone(),
            );
            self.listeners.push(listener.subscribe().await?);
        }

        Ok(self.transition())
    }
}

impl Bridge<Registered> {
    pub fn start(mut self) -> Bridge<Running> {
        for listener in self.listeners.drain(..) {
            self.tasks.spawn(listener.run());
        }

        if let Some(commands) = self.commands.take() {
            self.tasks.spawn(tap_commands(commands, self.topics.clone()));
        }

        let publisher = self.publisher.clone();
        self.tasks.spawn(publisher.run_periodic(self.update_interval));
        info!("Bridge running with {} tasks", self.tasks.len());

        self.transition()
    }
}

impl Bridge<Running> {
    /// Waits for the first fatal event. Never returns under normal operation.
    pub async fn supervise(mut self) -> BridgeError {
        tokio::select! {
            Some(joined) = self.tasks.join_next() => match joined {
                Ok(Err(e)) => e,
                Ok(Ok(never)) => match never {},
                Err(join_error) => BridgeError::TaskFailed(join_error.to_string()),
            },
            closed = self.transport.closed() => BridgeError::Transport(closed),
        }
    }
}

/// Drains the umbrella subscription, logging commands no listener handles.
async fn tap_commands(
    mut commands: mpsc::UnboundedReceiver<BusMessage>,
    topics: Topics,
) -> Result<Infallible, BridgeError> {
    while let Some(message) = commands.recv().await {
        if Control::ALL
            .iter()
            .any(|control| topics.command(*control) == message.topic)
        {
            debug!("Command {}", message);
        } else {
            warn!("No listener for command topic {}", message.topic);
        }
    }
    Err(BridgeError::SubscriptionEnded(topics.command_umbrella()))
}
