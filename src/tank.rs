//! Ultrasonic tank sensor advertisements
//!
//! The sensors never accept connections. Each reading is broadcast as
//! manufacturer specific data (company id 0x0059) in a single advertisement,
//! so there is no framing or checksum: one payload is one reading.
//!
//! Payload format (all supported models use 10 bytes):
//!
//! Byte | Bits | Meaning
//! 0    | 0-7  | Model number
//! 1    | 0-7  | Battery voltage in V/32
//! 2    | 7    | Button pressed
//! 2    | 0-6  | Temperature code, °C + 40
//! 3-4  | 0-13 | Raw level code, little-endian
//! 4    | 14-15| Reading quality, 0-3
//! 5-7  |      | Last three octets of the sensor MAC address
//! 8    |      | Accelerometer X
//! 9    |      | Accelerometer Y

use crate::calibration::CalibrationProfile;

/// Bluetooth SIG company identifier carried with the payload
pub const MANUFACTURER_ID: u16 = 0x0059;

const LEVEL_MASK: u16 = 0x3fff;
const BATTERY_EMPTY_V: f64 = 2.2;
const BATTERY_RANGE_V: f64 = 0.65;
const TEMPERATURE_OFFSET_C: i16 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SensorModel {
    ProCheck = 0x03,
    Pro200 = 0x04,
    ProH2O = 0x05,
    BottleCheck = 0x06,
    Td40 = 0x08,
    Td200 = 0x09,
    ProUniversal = 0x0A,
}

impl SensorModel {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x03 => Some(Self::ProCheck),
            0x04 => Some(Self::Pro200),
            0x05 => Some(Self::ProH2O),
            0x06 => Some(Self::BottleCheck),
            0x08 => Some(Self::Td40),
            0x09 => Some(Self::Td200),
            0x0A => Some(Self::ProUniversal),
            _ => None,
        }
    }

    /// Length of the manufacturer data this model advertises
    pub fn payload_len(self) -> usize {
        10
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ProCheck => "Pro Check",
            Self::Pro200 => "Pro 200",
            Self::ProH2O => "Pro H2O",
            Self::BottleCheck => "BottleCheck",
            Self::Td40 => "TD40",
            Self::Td200 => "TD200",
            Self::ProUniversal => "Pro Universal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdvertisementError {
    #[error("empty advertisement")]
    Empty,

    #[error("unsupported sensor model {0:#04x}")]
    UnsupportedModel(u8),

    #[error("{model:?} advertises {expected} bytes, got {actual}")]
    LengthMismatch {
        model: SensorModel,
        expected: usize,
        actual: usize,
    },
}

/// One decoded tank sensor broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct TankReading {
    pub model: SensorModel,
    pub battery_voltage: f64,
    /// 0-100 %
    pub battery_percentage: f64,
    pub button_pressed: bool,
    /// Raw temperature code as used by the calibration polynomial
    pub temperature_code: u8,
    /// °C
    pub temperature: f64,
    pub raw_level: u16,
    /// 0-3
    pub quality_raw: u8,
    /// `quality_raw` scaled to 0/33/67/100 %
    pub quality: u8,
    pub mac_suffix: [u8; 3],
    pub accel_x: u8,
    pub accel_y: u8,
}

impl TankReading {
    pub fn decode(payload: &[u8]) -> Result<Self, AdvertisementError> {
        let &model_byte = payload.first().ok_or(AdvertisementError::Empty)?;
        let model =
            SensorModel::from_byte(model_byte).ok_or(AdvertisementError::UnsupportedModel(model_byte))?;
        if payload.len() != model.payload_len() {
            return Err(AdvertisementError::LengthMismatch {
                model,
                expected: model.payload_len(),
                actual: payload.len(),
            });
        }

        let battery_voltage = payload[1] as f64 / 32.0;
        let battery_percentage =
            (((battery_voltage - BATTERY_EMPTY_V) / BATTERY_RANGE_V) * 100.0).clamp(0.0, 100.0);

        let temperature_code = payload[2] & 0x7f;
        let quality_raw = payload[4] >> 6;

        Ok(Self {
            model,
            battery_voltage,
            battery_percentage,
            button_pressed: payload[2] & 0x80 != 0,
            temperature_code,
            temperature: (temperature_code as i16 - TEMPERATURE_OFFSET_C) as f64,
            raw_level: u16::from_le_bytes([payload[3], payload[4]]) & LEVEL_MASK,
            quality_raw,
            quality: (quality_raw as f64 * 100.0 / 3.0).round() as u8,
            mac_suffix: [payload[5], payload[6], payload[7]],
            accel_x: payload[8],
            accel_y: payload[9],
        })
    }

    /// A reading with no quality carries no usable level
    pub fn is_reliable(&self) -> bool {
        self.quality_raw >= 1
    }

    /// Calibrated level, or `None` when the reading is unreliable
    pub fn level_mm(&self, profile: &CalibrationProfile) -> Option<f64> {
        self.is_reliable()
            .then(|| profile.level_mm(self.raw_level, self.temperature_code))
    }

    /// `AA:BB:CC`, as printed on the sensor label
    pub fn mac_suffix_string(&self) -> String {
        format_mac_suffix(&self.mac_suffix)
    }
}

pub fn format_mac_suffix(suffix: &[u8; 3]) -> String {
    format!("{:02X}:{:02X}:{:02X}", suffix[0], suffix[1], suffix[2])
}

/// Read the MAC suffix without decoding the rest, for routing
pub fn peek_mac_suffix(payload: &[u8]) -> Option<String> {
    let bytes: [u8; 3] = payload.get(5..8)?.try_into().ok()?;
    Some(format_mac_suffix(&bytes))
}
