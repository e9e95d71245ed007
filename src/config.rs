//! Process configuration, read once from a TOML file at startup
//!
//! Required keys have no defaults: a missing or malformed one stops the process
//! before any broker connection is attempted.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::device::OolerSettings;

const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    /// Bluetooth address of the Ooler, `AA:BB:CC:DD:EE:FF`
    pub ooler_mac: String,
    pub homeassistant_prefix: String,
    /// `host` or `host:port`
    pub mqtt_broker: String,
    /// Seconds between periodic state publications
    pub update_interval: u64,

    #[serde(default)]
    pub mqtt_username: Option<String>,
    #[serde(default)]
    pub mqtt_password: Option<String>,
    #[serde(default)]
    pub mqtt_client_id: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub mqtt_keep_alive: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_suggested_area")]
    pub suggested_area: String,
    #[serde(default = "default_stay_connected")]
    pub stay_connected: bool,
    #[serde(default = "default_max_connection_attempts")]
    pub max_connection_attempts: u32,
}

fn default_keep_alive() -> u64 {
    30
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_device_name() -> String {
    "Ooler".to_string()
}

fn default_suggested_area() -> String {
    "Bedroom".to_string()
}

fn default_stay_connected() -> bool {
    true
}

fn default_max_connection_attempts() -> u32 {
    5
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        debug!("Loaded configuration: {:?}", config.redacted());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ooler_mac.trim().is_empty() {
            return Err(ConfigError::Invalid("ooler_mac is empty".into()));
        }
        if self.homeassistant_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("homeassistant_prefix is empty".into()));
        }
        if self.update_interval == 0 {
            return Err(ConfigError::Invalid(
                "update_interval must be a positive number of seconds".into(),
            ));
        }
        if self.mqtt_username.is_some() != self.mqtt_password.is_some() {
            return Err(ConfigError::Invalid(
                "mqtt_username and mqtt_password must be set together".into(),
            ));
        }
        parse_broker(&self.mqtt_broker).map(|_| ())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }

    /// Broker host and port. Only valid after [`Config::validate`].
    pub fn broker_address(&self) -> (String, u16) {
        parse_broker(&self.mqtt_broker)
            .unwrap_or_else(|_| (self.mqtt_broker.clone(), DEFAULT_MQTT_PORT))
    }

    pub fn credentials(&self) -> Option<(String, String)> {
        self.mqtt_username.clone().zip(self.mqtt_password.clone())
    }

    pub fn ooler_settings(&self) -> OolerSettings {
        OolerSettings {
            stay_connected: self.stay_connected,
            max_connection_attempts: self.max_connection_attempts,
        }
    }

    fn redacted(&self) -> Self {
        Self {
            mqtt_password: self.mqtt_password.as_ref().map(|_| "***".to_string()),
            ..self.clone()
        }
    }
}

fn parse_broker(address: &str) -> Result<(String, u16), ConfigError> {
    let address = address.trim();
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid(format!("mqtt_broker port in '{address}'")))?;
            (host, port)
        }
        None => (address, DEFAULT_MQTT_PORT),
    };

    if host.is_empty() {
        return Err(ConfigError::Invalid("mqtt_broker host is empty".into()));
    }
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
ooler_mac = "AA:BB:CC:DD:EE:FF"
homeassistant_prefix = "homeassistant"
mqtt_broker = "broker.local"
update_interval = 60
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let file = write_config(MINIMAL);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.ooler_mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.update_interval(), Duration::from_secs(60));
        assert_eq!(config.broker_address(), ("broker.local".to_string(), 1883));
        assert_eq!(config.device_name, "Ooler");
        assert_eq!(config.suggested_area, "Bedroom");
        assert!(config.stay_connected);
        assert_eq!(config.credentials(), None);
    }

    #[test]
    fn broker_port_is_parsed() {
        let file = write_config(&MINIMAL.replace("broker.local", "10.0.0.2:8883"));
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.broker_address(), ("10.0.0.2".to_string(), 8883));
    }

    #[test]
    fn missing_key_is_a_parse_error() {
        let file = write_config(&MINIMAL.replace("update_interval = 60", ""));
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn malformed_value_is_a_parse_error() {
        let file = write_config(&MINIMAL.replace("60", "\"soon\""));
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let file = write_config(&MINIMAL.replace("60", "0"));
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn bad_broker_port_is_rejected() {
        let file = write_config(&MINIMAL.replace("broker.local", "broker.local:99999"));
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn half_credentials_are_rejected() {
        let file = write_config(&format!("{MINIMAL}mqtt_username = \"bridge\"\n"));
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(Config::load(&path), Err(ConfigError::Read { .. })));
    }
}
