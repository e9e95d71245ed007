//! Topic naming for the bridge
//!
//! Every topic the bridge publishes or subscribes to is built here from the
//! device identifier, so listener subscriptions and publisher topics can never
//! drift apart.

use std::fmt;

/// Prefix of the bridge's own command/state namespace.
pub const LOCAL_PREFIX: &str = "ooler";

/// Makes a device identifier safe to use as a single topic segment.
///
/// MAC addresses contain colons, which Home Assistant rejects in object ids,
/// so each one becomes an underscore.
pub fn sanitize(identifier: &str) -> String {
    identifier.replace(':', "_")
}

/// The four controllable properties, each with its own command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Power,
    Fan,
    Temperature,
    Cleaning,
}

impl Control {
    pub const ALL: [Control; 4] = [
        Control::Power,
        Control::Fan,
        Control::Temperature,
        Control::Cleaning,
    ];

    /// Topic segment between the device id and `/set`.
    pub fn segment(&self) -> &'static str {
        match self {
            Control::Power => "power",
            Control::Fan => "fan",
            Control::Temperature => "temperature",
            Control::Cleaning => "cleaning",
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segment())
    }
}

/// All topics derived from one device identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    hub_prefix: String,
    device_id: String,
}

impl Topics {
    pub fn new(hub_prefix: &str, identifier: &str) -> Self {
        Self {
            hub_prefix: hub_prefix.trim_end_matches('/').to_string(),
            device_id: sanitize(identifier),
        }
    }

    /// Sanitized identifier used in every topic.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn climate_config(&self) -> String {
        format!("{}/climate/{}/config", self.hub_prefix, self.device_id)
    }

    pub fn water_level_config(&self) -> String {
        format!("{}/sensor/{}_water_level/config", self.hub_prefix, self.device_id)
    }

    pub fn cleaning_config(&self) -> String {
        format!("{}/switch/{}_cleaning/config", self.hub_prefix, self.device_id)
    }

    /// Single-level wildcard covering every command topic.
    pub fn command_umbrella(&self) -> String {
        format!("{}/{}/+/set", LOCAL_PREFIX, self.device_id)
    }

    pub fn command(&self, control: Control) -> String {
        format!("{}/{}/{}/set", LOCAL_PREFIX, self.device_id, control.segment())
    }

    pub fn state(&self) -> String {
        format!("{}/{}/state", LOCAL_PREFIX, self.device_id)
    }
}

/// MQTT filter matching with `+` (one level) and `#` (remaining levels).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_colons() {
        assert_eq!(sanitize("AA:BB:CC:DD:EE:FF"), "AA_BB_CC_DD_EE_FF");
    }

    #[test]
    fn sanitize_is_idempotent_and_keeps_colon_free_input() {
        for input in ["", "plain", "a:b", "::", "AA:BB:CC", "with space:x"] {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once);
            assert!(!once.contains(':'));
        }
        assert_eq!(sanitize("already_safe-id"), "already_safe-id");
    }

    #[test]
    fn topics_follow_layout() {
        let topics = Topics::new("homeassistant", "AA:BB:CC:DD:EE:FF");
        let id = "AA_BB_CC_DD_EE_FF";

        assert_eq!(topics.climate_config(), format!("homeassistant/climate/{id}/config"));
        assert_eq!(
            topics.water_level_config(),
            format!("homeassistant/sensor/{id}_water_level/config")
        );
        assert_eq!(
            topics.cleaning_config(),
            format!("homeassistant/switch/{id}_cleaning/config")
        );
        assert_eq!(topics.command_umbrella(), format!("ooler/{id}/+/set"));
        assert_eq!(topics.command(Control::Fan), format!("ooler/{id}/fan/set"));
        assert_eq!(topics.state(), format!("ooler/{id}/state"));
    }

    #[test]
    fn trailing_slash_on_hub_prefix_is_dropped() {
        let topics = Topics::new("ha/", "x");
        assert_eq!(topics.climate_config(), "ha/climate/x/config");
    }

    #[test]
    fn umbrella_covers_every_command_topic_and_not_state() {
        let topics = Topics::new("homeassistant", "AA:BB");
        for control in Control::ALL {
            assert!(topic_matches(&topics.command_umbrella(), &topics.command(control)));
        }
        assert!(!topic_matches(&topics.command_umbrella(), &topics.state()));
    }

    #[test]
    fn wildcard_matching() {
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(!topic_matches("a/+/c", "a/b/d"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(topic_matches("a/b", "a/b"));
    }
}
