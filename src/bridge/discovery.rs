//! Home Assistant MQTT discovery
//!
//! Three retained config messages register the device with the hub: a climate
//! entity (power, fan and target temperature), a water-level sensor and a
//! cleaning switch. Each is published once, before any listener starts.

use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::device::FanLevel;
use crate::mqtt::{publish_json, Transport, TransportError};
use crate::topics::{Control, Topics};

use super::state_publisher::{POWER_AUTO, POWER_OFF};

const MODEL: &str = "Ooler";
const MANUFACTURER: &str = "Kryo";
const MIN_TEMP_C: i32 = 13;
const MAX_TEMP_C: i32 = 47;

/// Device block shared by all three entities.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    pub identifiers: Vec<String>,
    pub connections: Vec<(String, String)>,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub suggested_area: String,
}

impl DeviceIdentity {
    pub fn from_config(config: &Config) -> Self {
        Self {
            identifiers: vec![config.ooler_mac.clone()],
            connections: vec![("mac".to_string(), config.ooler_mac.clone())],
            name: config.device_name.clone(),
            model: MODEL.to_string(),
            manufacturer: MANUFACTURER.to_string(),
            suggested_area: config.suggested_area.clone(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ClimateDiscovery {
    pub name: String,
    pub unique_id: String,
    pub modes: Vec<&'static str>,
    pub mode_command_topic: String,
    pub mode_state_topic: String,
    pub mode_state_template: &'static str,
    pub fan_modes: Vec<&'static str>,
    pub fan_mode_command_topic: String,
    pub fan_mode_state_topic: String,
    pub fan_mode_state_template: &'static str,
    pub temperature_command_topic: String,
    pub temperature_state_topic: String,
    pub temperature_state_template: &'static str,
    pub current_temperature_topic: String,
    pub current_temperature_template: &'static str,
    pub min_temp: i32,
    pub max_temp: i32,
    pub temperature_unit: &'static str,
    pub precision: f64,
    pub device: DeviceIdentity,
}

#[derive(Serialize, Debug)]
pub struct SensorDiscovery {
    pub name: String,
    pub unique_id: String,
    pub state_topic: String,
    pub value_template: &'static str,
    pub unit_of_measurement: &'static str,
    pub icon: &'static str,
    pub device: DeviceIdentity,
}

#[derive(Serialize, Debug)]
pub struct SwitchDiscovery {
    pub name: String,
    pub unique_id: String,
    pub command_topic: String,
    pub state_topic: String,
    pub value_template: &'static str,
    pub payload_on: &'static str,
    pub payload_off: &'static str,
    pub state_on: &'static str,
    pub state_off: &'static str,
    pub device: DeviceIdentity,
}

pub struct DiscoveryPublisher<'a> {
    topics: &'a Topics,
    identity: &'a DeviceIdentity,
}

impl<'a> DiscoveryPublisher<'a> {
    pub fn new(topics: &'a Topics, identity: &'a DeviceIdentity) -> Self {
        Self { topics, identity }
    }

    pub fn climate(&self) -> ClimateDiscovery {
        let state = self.topics.state();
        ClimateDiscovery {
            name: self.identity.name.clone(),
            unique_id: format!("{}_climate", self.topics.device_id()),
            modes: vec![POWER_OFF, POWER_AUTO],
            mode_command_topic: self.topics.command(Control::Power),
            mode_state_topic: state.clone(),
            mode_state_template: "{{ value_json.power }}",
            fan_modes: FanLevel::ALL.iter().map(FanLevel::name).collect(),
            fan_mode_command_topic: self.topics.command(Control::Fan),
            fan_mode_state_topic: state.clone(),
            fan_mode_state_template: "{{ value_json.fan_mode }}",
            temperature_command_topic: self.topics.command(Control::Temperature),
            temperature_state_topic: state.clone(),
            temperature_state_template: "{{ value_json.desired_temperature }}",
            current_temperature_topic: state,
            current_temperature_template: "{{ value_json.current_temperature }}",
            min_temp: MIN_TEMP_C,
            max_temp: MAX_TEMP_C,
            temperature_unit: "C",
            precision: 1.0,
            device: self.identity.clone(),
        }
    }

    pub fn water_level(&self) -> SensorDiscovery {
        SensorDiscovery {
            name: format!("{} Water Level", self.identity.name),
            unique_id: format!("{}_water_level", self.topics.device_id()),
            state_topic: self.topics.state(),
            value_template: "{{ value_json.water_level }}",
            unit_of_measurement: "%",
            icon: "mdi:water-percent",
            device: self.identity.clone(),
        }
    }

    pub fn cleaning(&self) -> SwitchDiscovery {
        SwitchDiscovery {
            name: format!("{} Cleaning", self.identity.name),
            unique_id: format!("{}_cleaning", self.topics.device_id()),
            command_topic: self.topics.command(Control::Cleaning),
            state_topic: self.topics.state(),
            value_template: "{{ value_json.cleaning }}",
            payload_on: "True",
            payload_off: "False",
            state_on: "True",
            state_off: "False",
            device: self.identity.clone(),
        }
    }

    /// Publishes all three configs, retained. The first failure aborts.
    pub async fn publish_discovery(&self, transport: &dyn Transport) -> Result<(), TransportError> {
        publish_json(transport, &self.topics.climate_config(), &self.climate(), true).await?;
        publish_json(transport, &self.topics.water_level_config(), &self.water_level(), true).await?;
        publish_json(transport, &self.topics.cleaning_config(), &self.cleaning(), true).await?;
        info!("Published discovery for {}", self.topics.device_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryTransport, Record, MAC};

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            identifiers: vec![MAC.to_string()],
            connections: vec![("mac".to_string(), MAC.to_string())],
            name: "Ooler".to_string(),
            model: MODEL.to_string(),
            manufacturer: MANUFACTURER.to_string(),
            suggested_area: "Bedroom".to_string(),
        }
    }

    #[tokio::test]
    async fn publishes_three_retained_configs() {
        let transport = MemoryTransport::new();
        let topics = Topics::new("homeassistant", MAC);
        let identity = identity();

        DiscoveryPublisher::new(&topics, &identity)
            .publish_discovery(transport.as_ref())
            .await
            .unwrap();

        let published: Vec<(String, bool)> = transport
            .records()
            .into_iter()
            .filter_map(|record| match record {
                Record::Published { topic, retain, .. } => Some((topic, retain)),
                Record::Subscribed(_) => None,
            })
            .collect();
        assert_eq!(
            published,
            vec![
                (topics.climate_config(), true),
                (topics.water_level_config(), true),
                (topics.cleaning_config(), true),
            ]
        );
    }

    #[tokio::test]
    async fn climate_binds_to_bridge_topics() {
        let transport = MemoryTransport::new();
        let topics = Topics::new("homeassistant", MAC);
        let identity = identity();

        DiscoveryPublisher::new(&topics, &identity)
            .publish_discovery(transport.as_ref())
            .await
            .unwrap();

        let climate = &transport.published_json(&topics.climate_config())[0];
        assert_eq!(climate["unique_id"], "AA_BB_CC_DD_EE_FF_climate");
        assert_eq!(climate["mode_command_topic"], "ooler/AA_BB_CC_DD_EE_FF/power/set");
        assert_eq!(climate["fan_mode_command_topic"], "ooler/AA_BB_CC_DD_EE_FF/fan/set");
        assert_eq!(
            climate["temperature_command_topic"],
            "ooler/AA_BB_CC_DD_EE_FF/temperature/set"
        );
        assert_eq!(climate["current_temperature_topic"], "ooler/AA_BB_CC_DD_EE_FF/state");
        assert_eq!(climate["modes"], serde_json::json!(["off", "auto"]));
        assert_eq!(climate["fan_modes"], serde_json::json!(["Silent", "Regular", "Boost"]));
        assert_eq!(climate["device"]["identifiers"][0], MAC);
        assert_eq!(climate["device"]["connections"][0], serde_json::json!(["mac", MAC]));
        assert_eq!(climate["device"]["suggested_area"], "Bedroom");
    }

    #[tokio::test]
    async fn sensor_and_switch_payloads() {
        let transport = MemoryTransport::new();
        let topics = Topics::new("homeassistant", MAC);
        let identity = identity();

        DiscoveryPublisher::new(&topics, &identity)
            .publish_discovery(transport.as_ref())
            .await
            .unwrap();

        let sensor = &transport.published_json(&topics.water_level_config())[0];
        assert_eq!(sensor["unique_id"], "AA_BB_CC_DD_EE_FF_water_level");
        assert_eq!(sensor["value_template"], "{{ value_json.water_level }}");
        assert_eq!(sensor["unit_of_measurement"], "%");

        let switch = &transport.published_json(&topics.cleaning_config())[0];
        assert_eq!(switch["command_topic"], "ooler/AA_BB_CC_DD_EE_FF/cleaning/set");
        assert_eq!(switch["payload_on"], "True");
        assert_eq!(switch["name"], "Ooler Cleaning");
    }

    #[tokio::test]
    async fn transport_failure_aborts_discovery() {
        let transport = MemoryTransport::new();
        transport.fail_publishes(1);
        let topics = Topics::new("homeassistant", MAC);
        let identity = identity();

        let result = DiscoveryPublisher::new(&topics, &identity)
            .publish_discovery(transport.as_ref())
            .await;

        assert!(result.is_err());
        assert!(transport.records().is_empty());
    }
}
