//! In-memory characteristic table standing in for a BLE peripheral
//!
//! Clones share one table, so a test (or the binary) can keep a handle to the
//! link after moving it into an [`Ooler`](super::Ooler).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

use super::characteristics::Characteristic;
use super::ooler::GattLink;
use super::DeviceError;

#[derive(Debug)]
struct Peripheral {
    values: HashMap<Characteristic, Vec<u8>>,
    connected: bool,
    reachable: bool,
    reject_writes: bool,
    connect_count: usize,
}

impl Default for Peripheral {
    fn default() -> Self {
        let values = HashMap::from([
            (Characteristic::PowerStatus, vec![0x00]),
            (Characteristic::TargetTemperatureF, vec![68]),
            (Characteristic::ActualTemperatureF, vec![72]),
            (Characteristic::FanSpeed, vec![0x00]),
            (Characteristic::WaterLevel, vec![100]),
            (Characteristic::Clean, vec![0x00]),
            (Characteristic::Name, b"Ooler".to_vec()),
        ]);

        Self {
            values,
            connected: false,
            reachable: true,
            reject_writes: false,
            connect_count: 0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EmulatedLink {
    peripheral: Arc<Mutex<Peripheral>>,
}

impl EmulatedLink {
    fn peripheral(&self) -> MutexGuard<'_, Peripheral> {
        self.peripheral.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn value(&self, characteristic: Characteristic) -> Option<Vec<u8>> {
        self.peripheral().values.get(&characteristic).cloned()
    }

    /// Overwrites a value the way the device itself would, e.g. telemetry.
    pub fn set_value(&self, characteristic: Characteristic, data: &[u8]) {
        self.peripheral().values.insert(characteristic, data.to_vec());
    }

    /// An unreachable peripheral refuses connections and drops an open one.
    pub fn set_reachable(&self, reachable: bool) {
        let mut peripheral = self.peripheral();
        peripheral.reachable = reachable;
        if !reachable {
            peripheral.connected = false;
        }
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.peripheral().reject_writes = reject;
    }

    pub fn connect_count(&self) -> usize {
        self.peripheral().connect_count
    }
}

#[async_trait]
impl GattLink for EmulatedLink {
    fn is_connected(&self) -> bool {
        self.peripheral().connected
    }

    async fn connect(&mut self, address: &str) -> Result<(), DeviceError> {
        let mut peripheral = self.peripheral();
        peripheral.connect_count += 1;
        if !peripheral.reachable {
            return Err(DeviceError::Disconnected(format!("{address} not in range")));
        }
        peripheral.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.peripheral().connected = false;
        Ok(())
    }

    async fn read(&mut self, characteristic: Characteristic) -> Result<Vec<u8>, DeviceError> {
        let peripheral = self.peripheral();
        if !peripheral.connected {
            return Err(DeviceError::Disconnected("read without connection".into()));
        }
        trace!("Emulated read of {:?}", characteristic);
        peripheral
            .values
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| DeviceError::Malformed(format!("{characteristic:?} not readable")))
    }

    async fn write(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let mut peripheral = self.peripheral();
        if !peripheral.connected {
            return Err(DeviceError::Disconnected("write without connection".into()));
        }
        if peripheral.reject_writes {
            return Err(DeviceError::Rejected(format!("{characteristic:?} is read-only now")));
        }
        trace!("Emulated write of {:?}: {:?}", characteristic, data);
        peripheral.values.insert(characteristic, data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVERY_CHARACTERISTIC: [Characteristic; 7] = [
        Characteristic::TargetTemperatureF,
        Characteristic::ActualTemperatureF,
        Characteristic::FanSpeed,
        Characteristic::PowerStatus,
        Characteristic::WaterLevel,
        Characteristic::Clean,
        Characteristic::Name,
    ];

    #[tokio::test]
    async fn every_characteristic_is_readable_once_connected() {
        let mut link = EmulatedLink::default();
        link.connect("AA:BB").await.unwrap();

        for characteristic in EVERY_CHARACTERISTIC {
            assert!(link.read(characteristic).await.is_ok(), "{characteristic:?}");
        }
    }

    #[tokio::test]
    async fn access_without_connection_is_a_disconnect() {
        let mut link = EmulatedLink::default();

        let err = link.read(Characteristic::PowerStatus).await.unwrap_err();
        assert!(err.is_fatal());
        let err = link.write(Characteristic::PowerStatus, &[1]).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn rejected_writes_leave_the_value() {
        let mut link = EmulatedLink::default();
        link.connect("AA:BB").await.unwrap();
        link.set_reject_writes(true);

        let err = link.write(Characteristic::FanSpeed, &[2]).await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(link.value(Characteristic::FanSpeed), Some(vec![0]));
    }
}
