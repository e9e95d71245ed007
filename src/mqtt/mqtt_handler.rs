//! MQTT transport backed by `rumqttc`
//!
//! The handler owns one broker connection. A background task polls the
//! `rumqttc` event loop, fans inbound publishes out to the registered routes and
//! tracks the connection state:
//!
//! ```text
//! Connecting ──► Connected ◄──► Reconnecting ──► Failed
//!     │              │                            ▲
//!     │              └──────────► Disconnected    │
//!     └───────────────────────────────────────────┘
//! ```
//!
//! A failure before the first `ConnAck` is final. After that, up to
//! `max_reconnect_attempts` consecutive poll failures are tolerated, and every
//! broker subscription is re-issued once the session comes back. The poll loop
//! never waits on a subscriber or on the request queue.

use async_trait::async_trait;
use chrono::Local;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::config::MqttConfig;
use super::error::TransportError;
use super::message_manager::{deliver, BusMessage, MsgManager};
use super::Transport;
use crate::topics::topic_matches;

const REQUESTS_CAP: usize = 100;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Reconnecting,
    /// Closed on request after DISCONNECT went out
    Disconnected,
    Failed,
}

impl ConnectionState {
    /// The event loop has stopped and the connection will not come back.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    pub last_error: Option<String>,
    pub messages_received: usize,
    pub last_activity: Option<chrono::DateTime<Local>>,
}

/// Records `filter` as a broker subscription unless an existing one already
/// covers it. Returns whether a SUBSCRIBE must be sent.
fn claim_broker_filter(broker_filters: &mut Vec<String>, filter: &str) -> bool {
    if broker_filters
        .iter()
        .any(|existing| topic_matches(existing, filter))
    {
        return false;
    }
    broker_filters.push(filter.to_string());
    true
}

#[derive(Debug, PartialEq, Eq)]
enum PollFailure {
    Retry { attempt: u32 },
    GiveUp,
}

/// Consecutive poll failures tolerated once a session has been established.
#[derive(Debug)]
struct ReconnectBudget {
    max_attempts: u32,
    failures: u32,
}

impl ReconnectBudget {
    fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            failures: 0,
        }
    }

    /// Resets the count. Returns whether subscriptions must be re-issued.
    fn connected(&mut self, previous: &ConnectionState) -> bool {
        self.failures = 0;
        *previous == ConnectionState::Reconnecting
    }

    fn failed(&mut self, current: &ConnectionState) -> PollFailure {
        if *current == ConnectionState::Connecting {
            return PollFailure::GiveUp;
        }
        self.failures += 1;
        if self.failures > self.max_attempts {
            PollFailure::GiveUp
        } else {
            PollFailure::Retry {
                attempt: self.failures,
            }
        }
    }
}

struct Shared {
    msg_manager: Mutex<MsgManager>,
    broker_filters: Mutex<Vec<String>>,
    status: watch::Sender<MqttStatus>,
}

impl Shared {
    fn msg_manager(&self) -> MutexGuard<'_, MsgManager> {
        self.msg_manager.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broker_filters(&self) -> MutexGuard<'_, Vec<String>> {
        self.broker_filters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connection_state(&self) -> ConnectionState {
        self.status.borrow().connection_state.clone()
    }

    fn set_state(&self, state: ConnectionState, error: Option<String>) {
        self.status.send_modify(|status| {
            status.connection_state = state;
            if error.is_some() {
                status.last_error = error;
            }
        });
    }
}

pub struct MqttHandler {
    client: AsyncClient,
    shared: Arc<Shared>,
    event_loop: JoinHandle<()>,
}

impl MqttHandler {
    /// Opens the broker connection and waits for the broker to accept it.
    pub async fn connect(config: &MqttConfig) -> Result<Self, TransportError> {
        info!(
            "Connecting to MQTT broker {}:{} as {}",
            config.host, config.port, config.client_id
        );
        let handler = Self::spawn(config);
        let mut status_rx = handler.shared.status.subscribe();

        let settled = tokio::time::timeout(
            CONNECT_TIMEOUT,
            status_rx.wait_for(|status| status.connection_state != ConnectionState::Connecting),
        )
        .await;

        match settled {
            Ok(Ok(status)) if status.connection_state == ConnectionState::Connected => {
                drop(status);
                info!("Connected to MQTT broker {}:{}", config.host, config.port);
                Ok(handler)
            }
            Ok(Ok(status)) => Err(TransportError::Connect(
                status.last_error.clone().unwrap_or_else(|| "refused".to_string()),
            )),
            Ok(Err(_)) => Err(TransportError::Connect("event loop stopped".to_string())),
            Err(_) => Err(TransportError::Connect(format!(
                "no answer from {}:{} within {:?}",
                config.host, config.port, CONNECT_TIMEOUT
            ))),
        }
    }

    /// Starts the event loop without waiting for the broker.
    fn spawn(config: &MqttConfig) -> Self {
        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);
        mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let Some((user, password)) = &config.credentials {
            mqtt_options.set_credentials(user, password);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUESTS_CAP);
        let (status, _) = watch::channel(MqttStatus::default());
        let shared = Arc::new(Shared {
            msg_manager: Mutex::new(MsgManager::default()),
            broker_filters: Mutex::new(Vec::new()),
            status,
        });

        let event_loop = tokio::spawn(run_event_loop(
            event_loop,
            client.clone(),
            shared.clone(),
            ReconnectBudget::new(config.max_reconnect_attempts),
        ));

        Self {
            client,
            shared,
            event_loop,
        }
    }

    pub fn status(&self) -> MqttStatus {
        self.shared.status.borrow().clone()
    }

    /// Sends an MQTT DISCONNECT and waits, briefly, for the event loop to
    /// flush it and stop.
    pub async fn disconnect(&self) {
        info!("Disconnecting from MQTT broker");
        if let Err(e) = self.client.disconnect().await {
            debug!("Disconnect not queued: {}", e);
        }

        let mut status_rx = self.shared.status.subscribe();
        let stopped = tokio::time::timeout(
            DISCONNECT_TIMEOUT,
            status_rx.wait_for(|status| status.connection_state.is_terminal()),
        )
        .await;
        match stopped {
            Ok(Ok(status)) => debug!("Event loop stopped: {:?}", status.connection_state),
            Ok(Err(_)) => debug!("Event loop already gone"),
            Err(_) => warn!("DISCONNECT not confirmed within {:?}", DISCONNECT_TIMEOUT),
        }
    }
}

impl Drop for MqttHandler {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

#[async_trait]
impl Transport for MqttHandler {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), TransportError> {
        trace!("Publishing {} bytes to {} (retain: {})", payload.len(), topic, retain);
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| {
                if self.shared.connection_state().is_terminal() {
                    TransportError::Closed(e.to_string())
                } else {
                    TransportError::Publish {
                        topic: topic.to_string(),
                        reason: e.to_string(),
                    }
                }
            })
    }

    /// Registers the route and queues any SUBSCRIBE without yielding, so a
    /// caller opening several subscriptions in a row misses no message.
    async fn subscribe(
        &self,
        filter: &str,
    ) -> Result<mpsc::UnboundedReceiver<BusMessage>, TransportError> {
        let receiver = self.shared.msg_manager().register(filter);

        if !claim_broker_filter(&mut self.shared.broker_filters(), filter) {
            debug!("{} already covered by a broker subscription", filter);
            return Ok(receiver);
        }

        info!("Subscribing to {}", filter);
        self.client
            .try_subscribe(filter, QoS::AtLeastOnce)
            .map_err(|e| TransportError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })?;
        Ok(receiver)
    }

    async fn closed(&self) -> TransportError {
        let mut status_rx = self.shared.status.subscribe();
        let reason = match status_rx
            .wait_for(|status| status.connection_state.is_terminal())
            .await
        {
            Ok(status) => status
                .last_error
                .clone()
                .unwrap_or_else(|| format!("{:?}", status.connection_state)),
            Err(_) => "status channel closed".to_string(),
        };
        TransportError::Closed(reason)
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    shared: Arc<Shared>,
    mut budget: ReconnectBudget,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("ConnAck: {:?}", ack);
                let resumed = budget.connected(&shared.connection_state());
                shared.set_state(ConnectionState::Connected, None);
                if resumed {
                    info!("Reconnected to MQTT broker");
                    resubscribe(&client, &shared);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                let message = BusMessage::from_topic(publish.topic.clone(), payload);
                debug!("Received {}", message);

                shared.status.send_modify(|status| {
                    status.messages_received += 1;
                    status.last_activity = Some(message.received_at);
                });
                let targets = shared.msg_manager().targets(&publish.topic);
                deliver(targets, message);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("DISCONNECT sent");
                shared.set_state(ConnectionState::Disconnected, None);
                return;
            }
            Ok(notification) => trace!("MQTT notification: {:?}", notification),
            Err(e) => match budget.failed(&shared.connection_state()) {
                PollFailure::GiveUp => {
                    error!("MQTT connection lost: {}", e);
                    shared.set_state(ConnectionState::Failed, Some(e.to_string()));
                    return;
                }
                PollFailure::Retry { attempt } => {
                    warn!(
                        "MQTT connection error ({}/{}): {}",
                        attempt, budget.max_attempts, e
                    );
                    shared.set_state(ConnectionState::Reconnecting, Some(e.to_string()));
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            },
        }
    }
}

/// The event loop must keep polling, so requests are queued without waiting.
fn resubscribe(client: &AsyncClient, shared: &Shared) {
    let filters = shared.broker_filters().clone();
    for filter in filters {
        debug!("Re-subscribing to {}", filter);
        if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
            warn!("Re-subscribe to {} failed: {}", filter, e);
        }
    }
}
