//! Device subsystem
//!
//! The bridge talks to exactly one device through the [`DeviceHandle`] trait.
//!
//! ```text
//! ControlListener ─[PropertyChange]─► SharedDevice ─► DeviceHandle ─► GattLink
//! StatePublisher  ◄─[Snapshot]─────── SharedDevice
//! ```
//!
//! [`SharedDevice`] is the mutual-exclusion wrapper every task goes through: a
//! property change holds the lock for its whole apply step and a snapshot holds
//! it while reading state and telemetry, so no task ever observes a half-applied
//! update.

pub mod characteristics;
pub mod emulated;
pub mod ooler;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub use emulated::EmulatedLink;
pub use ooler::{Ooler, OolerSettings};

/// Fan intensity, in the device's own order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FanLevel {
    #[default]
    Silent,
    Regular,
    Boost,
}

impl FanLevel {
    pub const ALL: [FanLevel; 3] = [FanLevel::Silent, FanLevel::Regular, FanLevel::Boost];

    pub fn name(&self) -> &'static str {
        match self {
            FanLevel::Silent => "Silent",
            FanLevel::Regular => "Regular",
            FanLevel::Boost => "Boost",
        }
    }
}

impl fmt::Display for FanLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Exact, case-sensitive name lookup. Returns the rejected name on failure.
impl FromStr for FanLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FanLevel::ALL
            .into_iter()
            .find(|level| level.name() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl Serialize for FanLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Writable device properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceState {
    pub powered_on: bool,
    pub desired_temperature_c: i32,
    pub fan_level: FanLevel,
    pub cleaning: bool,
}

/// Read-only readings refreshed by the device itself.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceTelemetry {
    pub actual_temperature_c: f64,
    /// Percent, 0-100.
    pub water_level: u8,
}

/// State and telemetry read under one lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub state: DeviceState,
    pub telemetry: DeviceTelemetry,
}

/// One decoded property mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyChange {
    PoweredOn(bool),
    DesiredTemperatureC(i32),
    FanLevel(FanLevel),
    Cleaning(bool),
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device refused or failed to apply a single command
    #[error("Device rejected command: {0}")]
    Rejected(String),

    /// The link to the device is gone and could not be re-established
    #[error("Device disconnected: {0}")]
    Disconnected(String),

    /// The device returned a value that does not decode
    #[error("Malformed device value: {0}")]
    Malformed(String),
}

impl DeviceError {
    /// Only a lost link threatens the bridge; everything else is per-message.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeviceError::Disconnected(_))
    }
}

/// A single stateful device.
#[async_trait]
pub trait DeviceHandle: Send + Sync + 'static {
    /// Identifier the device was bound to (a MAC address for an Ooler).
    fn identifier(&self) -> &str;

    async fn state(&mut self) -> Result<DeviceState, DeviceError>;

    async fn telemetry(&mut self) -> Result<DeviceTelemetry, DeviceError>;

    async fn set_powered_on(&mut self, on: bool) -> Result<(), DeviceError>;

    async fn set_desired_temperature_c(&mut self, deg_c: i32) -> Result<(), DeviceError>;

    async fn set_fan_level(&mut self, level: FanLevel) -> Result<(), DeviceError>;

    async fn set_cleaning(&mut self, cleaning: bool) -> Result<(), DeviceError>;
}

/// The one device handle, shared by every bridge task.
#[derive(Clone)]
pub struct SharedDevice {
    inner: Arc<Mutex<Box<dyn DeviceHandle>>>,
    identifier: Arc<str>,
}

impl SharedDevice {
    pub fn new(device: impl DeviceHandle) -> Self {
        let identifier: Arc<str> = Arc::from(device.identifier());
        Self {
            inner: Arc::new(Mutex::new(Box::new(device))),
            identifier,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Applies one change while holding the device lock.
    pub async fn apply(&self, change: PropertyChange) -> Result<(), DeviceError> {
        let mut device = self.inner.lock().await;
        debug!("Applying {:?} to {}", change, self.identifier);
        match change {
            PropertyChange::PoweredOn(on) => device.set_powered_on(on).await,
            PropertyChange::DesiredTemperatureC(deg_c) => {
                device.set_desired_temperature_c(deg_c).await
            }
            PropertyChange::FanLevel(level) => device.set_fan_level(level).await,
            PropertyChange::Cleaning(cleaning) => device.set_cleaning(cleaning).await,
        }
    }

    /// Reads state and telemetry without letting a change slip in between.
    pub async fn snapshot(&self) -> Result<Snapshot, DeviceError> {
        let mut device = self.inner.lock().await;
        let state = device.state().await?;
        let telemetry = device.telemetry().await?;
        Ok(Snapshot { state, telemetry })
    }
}
