//! Ooler device handle over a GATT characteristic link
//!
//! The handle owns the connection policy: it connects lazily before each read
//! or write, retries up to `max_connection_attempts`, and optionally drops the
//! link again after every operation.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::characteristics::{
    c_to_f, decode_fan_level, decode_flag, decode_uint, encode_fan_level, encode_flag,
    encode_temperature_f, f_to_c, Characteristic,
};
use super::{DeviceError, DeviceHandle, DeviceState, DeviceTelemetry, FanLevel};

/// Raw characteristic access to one peripheral.
#[async_trait]
pub trait GattLink: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    async fn connect(&mut self, address: &str) -> Result<(), DeviceError>;

    async fn disconnect(&mut self) -> Result<(), DeviceError>;

    async fn read(&mut self, characteristic: Characteristic) -> Result<Vec<u8>, DeviceError>;

    async fn write(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<(), DeviceError>;
}

#[derive(Clone, Debug)]
pub struct OolerSettings {
    /// Keep the link open between operations
    pub stay_connected: bool,
    /// Connection attempts before the device counts as lost
    pub max_connection_attempts: u32,
}

impl Default for OolerSettings {
    fn default() -> Self {
        Self {
            stay_connected: true,
            max_connection_attempts: 5,
        }
    }
}

pub struct Ooler<L: GattLink> {
    address: String,
    link: L,
    settings: OolerSettings,
}

impl<L: GattLink> Ooler<L> {
    pub fn new(address: &str, link: L, settings: OolerSettings) -> Self {
        Self {
            address: address.to_string(),
            link,
            settings,
        }
    }

    pub async fn connect(&mut self) -> Result<(), DeviceError> {
        if self.link.is_connected() {
            return Ok(());
        }

        let attempts = self.settings.max_connection_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            info!("Connecting to {} (attempt {}/{})", self.address, attempt, attempts);
            match self.link.connect(&self.address).await {
                Ok(()) if self.link.is_connected() => {
                    info!("Connected to {}", self.address);
                    return Ok(());
                }
                Ok(()) => last_error = Some("link reported no connection".to_string()),
                Err(e) => {
                    warn!("Connection attempt {} to {} failed: {}", attempt, self.address, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(DeviceError::Disconnected(format!(
            "{} unreachable after {} attempts: {}",
            self.address,
            attempts,
            last_error.unwrap_or_default()
        )))
    }

    async fn release(&mut self) -> Result<(), DeviceError> {
        if !self.settings.stay_connected {
            debug!("Dropping link to {}", self.address);
            self.link.disconnect().await?;
        }
        Ok(())
    }

    async fn request(&mut self, characteristic: Characteristic) -> Result<Vec<u8>, DeviceError> {
        self.connect().await?;
        let value = self.link.read(characteristic).await?;
        self.release().await?;
        Ok(value)
    }

    async fn command(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        self.connect().await?;
        self.link.write(characteristic, data).await?;
        self.release().await
    }

    /// Device name as advertised over GATT.
    pub async fn name(&mut self) -> Result<String, DeviceError> {
        let raw = self.request(Characteristic::Name).await?;
        String::from_utf8(raw)
            .map(|name| name.trim_end_matches('\0').to_string())
            .map_err(|e| DeviceError::Malformed(format!("device name: {e}")))
    }

    async fn read_uint(&mut self, characteristic: Characteristic) -> Result<i32, DeviceError> {
        let raw = self.request(characteristic).await?;
        i32::try_from(decode_uint(&raw))
            .map_err(|_| DeviceError::Malformed(format!("{characteristic:?} overflows")))
    }
}

#[async_trait]
impl<L: GattLink> DeviceHandle for Ooler<L> {
    fn identifier(&self) -> &str {
        &self.address
    }

    async fn state(&mut self) -> Result<DeviceState, DeviceError> {
        let powered_on = decode_flag(&self.request(Characteristic::PowerStatus).await?);
        let desired_temperature_c = f_to_c(self.read_uint(Characteristic::TargetTemperatureF).await?);
        let fan_level = decode_fan_level(&self.request(Characteristic::FanSpeed).await?)?;
        let cleaning = decode_flag(&self.request(Characteristic::Clean).await?);

        Ok(DeviceState {
            powered_on,
            desired_temperature_c,
            fan_level,
            cleaning,
        })
    }

    async fn telemetry(&mut self) -> Result<DeviceTelemetry, DeviceError> {
        let actual_f = self.read_uint(Characteristic::ActualTemperatureF).await?;
        let water_level = self.read_uint(Characteristic::WaterLevel).await?;

        Ok(DeviceTelemetry {
            actual_temperature_c: f64::from(f_to_c(actual_f)),
            water_level: water_level.clamp(0, 100) as u8,
        })
    }

    async fn set_powered_on(&mut self, on: bool) -> Result<(), DeviceError> {
        self.command(Characteristic::PowerStatus, &encode_flag(on)).await
    }

    async fn set_desired_temperature_c(&mut self, deg_c: i32) -> Result<(), DeviceError> {
        let data = encode_temperature_f(c_to_f(deg_c))?;
        self.command(Characteristic::TargetTemperatureF, &data).await
    }

    async fn set_fan_level(&mut self, level: FanLevel) -> Result<(), DeviceError> {
        self.command(Characteristic::FanSpeed, &encode_fan_level(level)).await
    }

    async fn set_cleaning(&mut self, cleaning: bool) -> Result<(), DeviceError> {
        self.command(Characteristic::Clean, &encode_flag(cleaning)).await
    }
}
