use crate::config::Config;
use crate::topics::sanitize;

/// Broker connection settings, derived from the process configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub keep_alive_secs: u64,
    /// Consecutive failed polls tolerated before the connection counts as lost
    pub max_reconnect_attempts: u32,
}

impl From<&Config> for MqttConfig {
    fn from(config: &Config) -> Self {
        let (host, port) = config.broker_address();
        let client_id = config
            .mqtt_client_id
            .clone()
            .unwrap_or_else(|| format!("ooler-{}", sanitize(&config.ooler_mac)));

        Self {
            host,
            port,
            client_id,
            credentials: config.credentials(),
            keep_alive_secs: config.mqtt_keep_alive,
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}
