use chrono::{DateTime, Local};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::topics::topic_matches;

/// One inbound message as handed to a subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
    pub received_at: DateTime<Local>,
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.payload.chars().take(32).collect();
        write!(
            f,
            "{} {} - {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            preview
        )
    }
}

impl BusMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        BusMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }
}

struct Route {
    filter: String,
    sender: mpsc::UnboundedSender<BusMessage>,
}

/// Fans inbound messages out to every subscriber whose filter matches.
///
/// Routes are unbounded: delivery never waits on a subscriber, so the event
/// loop keeps polling while a listener is busy publishing.
#[derive(Default)]
pub struct MsgManager {
    routes: Vec<Route>,
}

impl MsgManager {
    pub fn register(&mut self, filter: &str) -> mpsc::UnboundedReceiver<BusMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        debug!("Registering route for {}", filter);
        self.routes.push(Route {
            filter: filter.to_string(),
            sender,
        });
        receiver
    }

    /// Senders for every live route matching `topic`; closed routes are pruned.
    pub fn targets(&mut self, topic: &str) -> Vec<mpsc::UnboundedSender<BusMessage>> {
        self.routes.retain(|route| !route.sender.is_closed());
        self.routes
            .iter()
            .filter(|route| topic_matches(&route.filter, topic))
            .map(|route| route.sender.clone())
            .collect()
    }
}

/// Delivers `message` to each target in turn, preserving arrival order per route.
pub fn deliver(targets: Vec<mpsc::UnboundedSender<BusMessage>>, message: BusMessage) -> usize {
    if targets.is_empty() {
        trace!("No route for {}", message.topic);
        return 0;
    }

    let mut delivered = 0;
    for target in targets {
        match target.send(message.clone()) {
            Ok(()) => delivered += 1,
            Err(_) => warn!("Subscriber for {} went away", message.topic),
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_by_filter() {
        let mut manager = MsgManager::default();
        let mut power = manager.register("ooler/x/power/set");
        let mut all = manager.register("ooler/x/+/set");

        let targets = manager.targets("ooler/x/power/set");
        assert_eq!(deliver(targets, BusMessage::from_topic("ooler/x/power/set", "auto")), 2);
        assert_eq!(power.recv().await.unwrap().payload, "auto");
        assert_eq!(all.recv().await.unwrap().payload, "auto");

        let targets = manager.targets("ooler/x/fan/set");
        assert_eq!(deliver(targets, BusMessage::from_topic("ooler/x/fan/set", "Boost")), 1);
        assert!(power.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned() {
        let mut manager = MsgManager::default();
        let receiver = manager.register("a/b");
        drop(receiver);
        assert!(manager.targets("a/b").is_empty());
    }

    #[test]
    fn delivery_does_not_wait_on_an_idle_subscriber() {
        let mut manager = MsgManager::default();
        let mut power = manager.register("ooler/x/power/set");

        for n in 0..500 {
            let targets = manager.targets("ooler/x/power/set");
            assert_eq!(deliver(targets, BusMessage::from_topic("ooler/x/power/set", n.to_string())), 1);
        }

        for n in 0..500 {
            assert_eq!(power.try_recv().unwrap().payload, n.to_string());
        }
    }

    #[test]
    fn display_truncates_long_payloads() {
        let message = BusMessage::from_topic("t", "x".repeat(100));
        assert!(message.to_string().ends_with(&"x".repeat(32)));
        assert!(!message.to_string().contains(&"x".repeat(33)));
    }
}
