//! Ooler GATT characteristics and their byte encodings
//!
//! Every value the Ooler exposes is a single big-endian byte, except the device
//! name which is ASCII. Temperatures are stored in Fahrenheit.

use super::{DeviceError, FanLevel};

/// Characteristics the bridge reads or writes. Mapping each one to its GATT
/// attribute is the link's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    TargetTemperatureF,
    ActualTemperatureF,
    FanSpeed,
    PowerStatus,
    WaterLevel,
    Clean,
    Name,
}

/// Big-endian unsigned integer of any width the device sends.
pub fn decode_uint(raw: &[u8]) -> u32 {
    raw.iter().fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte))
}

pub fn decode_flag(raw: &[u8]) -> bool {
    raw == [0x01]
}

pub fn encode_flag(value: bool) -> Vec<u8> {
    vec![u8::from(value)]
}

pub fn decode_fan_level(raw: &[u8]) -> Result<FanLevel, DeviceError> {
    match decode_uint(raw) {
        0 => Ok(FanLevel::Silent),
        1 => Ok(FanLevel::Regular),
        2 => Ok(FanLevel::Boost),
        other => Err(DeviceError::Malformed(format!("fan speed {other}"))),
    }
}

pub fn encode_fan_level(level: FanLevel) -> Vec<u8> {
    let value = match level {
        FanLevel::Silent => 0,
        FanLevel::Regular => 1,
        FanLevel::Boost => 2,
    };
    vec![value]
}

pub fn f_to_c(deg_f: i32) -> i32 {
    ((f64::from(deg_f) - 32.0) / 1.8).round() as i32
}

pub fn c_to_f(deg_c: i32) -> i32 {
    (f64::from(deg_c) * 1.8 + 32.0).round() as i32
}

/// Single-byte Fahrenheit value, rejecting anything the device cannot hold.
pub fn encode_temperature_f(deg_f: i32) -> Result<Vec<u8>, DeviceError> {
    u8::try_from(deg_f)
        .map(|byte| vec![byte])
        .map_err(|_| DeviceError::Rejected(format!("{deg_f}°F is out of range")))
}
