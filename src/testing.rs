//! In-memory transport and device fixtures for unit tests

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

use crate::device::{EmulatedLink, Ooler, OolerSettings, SharedDevice};
use crate::mqtt::message_manager::{deliver, MsgManager};
use crate::mqtt::{BusMessage, Transport, TransportError};

pub const MAC: &str = "AA:BB:CC:DD:EE:FF";

/// Upper bound on scheduler turns spent waiting for a condition.
const MAX_YIELDS: usize = 10_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Published {
        topic: String,
        payload: String,
        retain: bool,
    },
    Subscribed(String),
}

#[derive(Default)]
struct Inner {
    records: Vec<Record>,
    failing_publishes: usize,
}

pub struct MemoryTransport {
    inner: Mutex<Inner>,
    routes: Mutex<MsgManager>,
    closed: watch::Sender<Option<String>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        let (closed, _) = watch::channel(None);
        Self {
            inner: Mutex::new(Inner::default()),
            routes: Mutex::new(MsgManager::default()),
            closed,
        }
    }
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn records(&self) -> Vec<Record> {
        self.inner().records.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                Record::Subscribed(filter) => Some(filter),
                Record::Published { .. } => None,
            })
            .collect()
    }

    /// Payloads published to `topic`, oldest first.
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                Record::Published {
                    topic: t, payload, ..
                } if t == topic => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn published_json(&self, topic: &str) -> Vec<serde_json::Value> {
        self.published(topic)
            .iter()
            .map(|payload| serde_json::from_str(payload).unwrap())
            .collect()
    }

    /// The next `count` publishes fail without touching the connection.
    pub fn fail_publishes(&self, count: usize) {
        self.inner().failing_publishes = count;
    }

    pub fn close(&self, reason: &str) {
        self.closed.send_replace(Some(reason.to_string()));
    }

    /// Hands a message to every matching subscriber, as the broker would.
    pub fn inject(&self, topic: &str, payload: &str) -> usize {
        let targets = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .targets(topic);
        deliver(targets, BusMessage::from_topic(topic, payload))
    }

    pub async fn wait_for_subscriptions(&self, count: usize) {
        wait_until(|| self.subscriptions().len() >= count).await;
    }

    pub async fn wait_for_publishes(&self, topic: &str, count: usize) {
        wait_until(|| self.published(topic).len() >= count).await;
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..MAX_YIELDS {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), TransportError> {
        if let Some(reason) = self.closed.borrow().clone() {
            return Err(TransportError::Closed(reason));
        }

        let mut inner = self.inner();
        if inner.failing_publishes > 0 {
            inner.failing_publishes -= 1;
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        inner.records.push(Record::Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<mpsc::UnboundedReceiver<BusMessage>, TransportError> {
        let receiver = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(filter);
        self.inner().records.push(Record::Subscribed(filter.to_string()));
        Ok(receiver)
    }

    async fn closed(&self) -> TransportError {
        let mut closed = self.closed.subscribe();
        let reason = match closed.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => String::new(),
        };
        TransportError::Closed(reason)
    }
}

/// An Ooler on an emulated link, plus a handle on the link for assertions.
pub fn device() -> (SharedDevice, EmulatedLink) {
    let link = EmulatedLink::default();
    let device = SharedDevice::new(Ooler::new(MAC, link.clone(), OolerSettings::default()));
    (device, link)
}
