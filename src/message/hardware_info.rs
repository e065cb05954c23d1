/// A verbatim message to send which requests the pack and hardware data
pub(crate) const REQUEST: [u8; 7] = [0xDD, 0xA5, 0x03, 0x00, 0xFF, 0xFD, 0x77];

use chrono::NaiveDate;

use super::{read_i16, read_u16, DecodeError};

/// Fixed part of the payload, before the temperature probes
const MIN_PAYLOAD_LEN: usize = 23;

/// Temperature probes beyond this are ignored
pub const MAX_TEMPERATURE_PROBES: usize = 6;

/// Temperatures are reported in 0.1 K
const KELVIN_OFFSET_DK: i32 = 2731;

/// Protection status bits, in bit order
const ERROR_NAMES: [&str; 16] = [
    "Cell overvoltage",
    "Cell undervoltage",
    "Pack overvoltage",
    "Pack undervoltage",
    "Charge overtemperature",
    "Charge undertemperature",
    "Discharge overtemperature",
    "Discharge undertemperature",
    "Charge overcurrent",
    "Discharge overcurrent",
    "Short circuit",
    "Front-end IC error",
    "MOSFET software lock",
    "Charge timeout",
    "Reserved 14",
    "Reserved 15",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MosfetStatus {
    pub charging: bool,
    pub discharging: bool,
}

impl MosfetStatus {
    fn from_byte(b: u8) -> Self {
        Self {
            charging: b & 0x01 != 0,
            discharging: b & 0x02 != 0,
        }
    }
}

/// Register 0x03: the state of the pack
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareInfo {
    /// Pack voltage in V
    pub total_voltage: f64,
    /// Pack current in A, negative while discharging
    pub current: f64,
    /// `total_voltage * current` in W
    pub power: f64,
    /// Remaining capacity in Ah
    pub remaining_capacity: f64,
    /// Nominal capacity in Ah
    pub nominal_capacity: f64,
    pub cycles: u16,
    pub manufacture_date: Option<NaiveDate>,
    /// Bit n set while cell n+1 is balancing
    pub balance_status: u32,
    /// Protection status bitmask, see [`HardwareInfo::error_names`]
    pub errors: u16,
    pub software_version: f64,
    /// State of charge in %
    pub soc: u8,
    pub mosfet: MosfetStatus,
    /// Number of cells in series
    pub cell_string_count: u8,
    /// Probe temperatures in °C, at most [`MAX_TEMPERATURE_PROBES`]
    pub temperatures: Vec<f64>,
}

impl HardwareInfo {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < MIN_PAYLOAD_LEN {
            return Err(DecodeError::TooShort {
                expected: MIN_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }

        let total_voltage = read_u16(payload, 0) as f64 / 100.0;
        let current = read_i16(payload, 2) as f64 / 100.0;

        // Cells 1-16 in the first word, 17-32 in the second
        let balance_status =
            read_u16(payload, 12) as u32 | ((read_u16(payload, 14) as u32) << 16);

        let version = payload[18];
        let software_version = (version >> 4) as f64 + (version & 0x0f) as f64 * 0.1;

        let declared_probes = (payload[22] as usize).min(MAX_TEMPERATURE_PROBES);
        let available_probes = (payload.len() - MIN_PAYLOAD_LEN) / 2;
        if available_probes < declared_probes {
            log::debug!(
                "BMS: {declared_probes} temperature probes declared, only {available_probes} present"
            );
        }
        let temperatures = (0..declared_probes.min(available_probes))
            .map(|i| {
                let raw = read_u16(payload, MIN_PAYLOAD_LEN + i * 2) as i32;
                (raw - KELVIN_OFFSET_DK) as f64 / 10.0
            })
            .collect();

        Ok(Self {
            total_voltage,
            current,
            power: total_voltage * current,
            remaining_capacity: read_u16(payload, 4) as f64 / 100.0,
            nominal_capacity: read_u16(payload, 6) as f64 / 100.0,
            cycles: read_u16(payload, 8),
            manufacture_date: decode_date(read_u16(payload, 10)),
            balance_status,
            errors: read_u16(payload, 16),
            software_version,
            soc: payload[19],
            mosfet: MosfetStatus::from_byte(payload[20]),
            cell_string_count: payload[21],
            temperatures,
        })
    }

    /// Names of the protection faults currently raised
    pub fn error_names(&self) -> Vec<&'static str> {
        ERROR_NAMES
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.errors & (1 << bit) != 0)
            .map(|(_, &name)| name)
            .collect()
    }

    /// Faults joined with `;`, or `None`
    pub fn error_summary(&self) -> String {
        if self.errors == 0 {
            "None".to_string()
        } else {
            self.error_names().join(";")
        }
    }

    /// Whether the given 1-based cell is balancing
    pub fn is_balancing(&self, cell: usize) -> bool {
        (1..=32).contains(&cell) && self.balance_status & (1 << (cell - 1)) != 0
    }
}

/// Packed as yyyyyyymmmmddddd, years since 2000
fn decode_date(raw: u16) -> Option<NaiveDate> {
    let year = 2000 + (raw >> 9) as i32;
    let month = ((raw >> 5) & 0x0f) as u32;
    let day = (raw & 0x1f) as u32;
    NaiveDate::from_ymd_opt(year, month, day)
}
