//! Decoders for BMS response payloads, one per register

pub mod cell_info;
pub mod device_name;
pub mod hardware_info;

pub use cell_info::{CellInfo, MAX_CELLS};
pub use device_name::DeviceName;
pub use hardware_info::{HardwareInfo, MosfetStatus, MAX_TEMPERATURE_PROBES};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload too short: need {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("payload length {0} is not a whole number of cells")]
    OddLength(usize),
}

fn read_u16(payload: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([payload[offset], payload[offset + 1]])
}

fn read_i16(payload: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([payload[offset], payload[offset + 1]])
}
