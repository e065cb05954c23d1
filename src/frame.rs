//! JBD-style BMS frame format
//!
//! Frame format:
//!
//! Start Byte | End Byte     | Meaning
//! 0          | 0            | Start marker 0xDD
//! 1          | 1            | Action (0xA5 read / 0x5A write) on commands, the register on responses
//! 2          | 2            | The register on commands, a status byte (0x00 = ok) on responses
//! 3          | 3            | The payload length in bytes (n)
//! 4          | 3+n          | The payload
//! 4+n        | 5+n          | Checksum over bytes 2..=3+n, big-endian
//! 6+n        | 6+n          | End marker 0x77
//!
//! This module provides:
//! - `Frame`: a validated frame, as produced by [`crate::FrameReassembler`]
//! - `Command`: outgoing read and write requests

use crate::checksum;

pub const START_MARKER: u8 = 0xDD;
pub const END_MARKER: u8 = 0x77;

/// Bytes around the payload: start, action, status, length, 2 checksum, end
pub const FRAME_OVERHEAD: usize = 7;
/// Shortest possible frame (empty payload)
pub const MIN_FRAME_LEN: usize = FRAME_OVERHEAD;
/// Longest possible frame (payload length byte = 255)
pub const MAX_FRAME_LEN: usize = FRAME_OVERHEAD + u8::MAX as usize;

const ACTION_READ: u8 = 0xA5;
const ACTION_WRITE: u8 = 0x5A;

/// Registers understood by the decoders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Register {
    /// Pack voltage, current, capacity, protection and temperature data
    HardwareInfo = 0x03,
    /// Individual cell voltages
    CellInfo = 0x04,
    /// ASCII device name
    DeviceName = 0x05,
}

impl Register {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x03 => Some(Self::HardwareInfo),
            0x04 => Some(Self::CellInfo),
            0x05 => Some(Self::DeviceName),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("missing start or end marker")]
    BadMarkers,

    #[error("declared payload length {declared} does not fit a {actual} byte frame")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("payload of {0} bytes does not fit a frame")]
    PayloadTooLong(usize),
}

/// A validated protocol unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Byte 1: the register echoed by a response, or the action of a command
    pub register: u8,
    /// Byte 2: the status byte of a response, or the register of a command
    pub status: u8,
    pub payload: Vec<u8>,
    pub checksum: u16,
}

impl Frame {
    /// Build a frame around a payload, computing its checksum. The length
    /// byte limits the payload to 255 bytes.
    pub fn new(register: u8, status: u8, payload: &[u8]) -> Result<Self, FrameError> {
        let len =
            u8::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLong(payload.len()))?;
        let mut covered = Vec::with_capacity(payload.len() + 2);
        covered.push(status);
        covered.push(len);
        covered.extend_from_slice(payload);
        Ok(Self {
            register,
            status,
            payload: payload.to_vec(),
            checksum: checksum::compute(&covered),
        })
    }

    /// Validate a complete frame, start marker through end marker inclusive.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(FrameError::TooShort(bytes.len()));
        }

        if bytes[0] != START_MARKER || bytes[bytes.len() - 1] != END_MARKER {
            return Err(FrameError::BadMarkers);
        }

        let declared = bytes[3] as usize;
        if bytes.len() != 4 + declared + 3 {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }

        let payload_end = 4 + declared;
        let actual = u16::from_be_bytes([bytes[payload_end], bytes[payload_end + 1]]);
        let expected = checksum::compute(&bytes[2..payload_end]);
        if actual != expected {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        Ok(Self {
            register: bytes[1],
            status: bytes[2],
            payload: bytes[4..payload_end].to_vec(),
            checksum: actual,
        })
    }

    /// The decoder this frame is meant for, if any
    pub fn kind(&self) -> Option<Register> {
        Register::from_byte(self.register)
    }

    /// True when the BMS reported success
    pub fn is_ok(&self) -> bool {
        self.status == 0x00
    }

    /// Encode the frame for the wire
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + FRAME_OVERHEAD);
        bytes.push(START_MARKER);
        bytes.push(self.register);
        bytes.push(self.status);
        bytes.push(self.payload.len() as u8);
        bytes.extend_from_slice(&self.payload);
        bytes.extend_from_slice(&self.checksum.to_be_bytes());
        bytes.push(END_MARKER);
        bytes
    }
}

/// Requests sent to the BMS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ReadHardwareInfo,
    ReadCellInfo,
    ReadDeviceName,
    /// Write a 16-bit value to a register
    Write { register: u8, value: u16 },
    /// Unlock the parameter registers (needed before most writes)
    EnterFactoryMode,
    ExitFactoryMode,
    /// Switch the charge and discharge MOSFETs
    SetMosfet { charge: bool, discharge: bool },
}

impl Command {
    const REG_FACTORY_ENTER: u8 = 0x00;
    const REG_FACTORY_EXIT: u8 = 0x01;
    const REG_MOSFET_CONTROL: u8 = 0xE1;
    const FACTORY_UNLOCK: u16 = 0x5678;

    /// Encode the command for the wire
    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            Self::ReadHardwareInfo => read_frame(Register::HardwareInfo as u8),
            Self::ReadCellInfo => read_frame(Register::CellInfo as u8),
            Self::ReadDeviceName => read_frame(Register::DeviceName as u8),
            Self::Write { register, value } => write_frame(register, value),
            Self::EnterFactoryMode => write_frame(Self::REG_FACTORY_ENTER, Self::FACTORY_UNLOCK),
            Self::ExitFactoryMode => write_frame(Self::REG_FACTORY_EXIT, 0x0000),
            Self::SetMosfet { charge, discharge } => {
                // Set bits switch the corresponding MOSFET off
                let value = u16::from(!charge) | (u16::from(!discharge) << 1);
                write_frame(Self::REG_MOSFET_CONTROL, value)
            }
        }
    }
}

fn read_frame(register: u8) -> Vec<u8> {
    let mut frame = vec![START_MARKER, ACTION_READ, register, 0x00];
    let chk = checksum::to_wire(&frame[2..4]);
    frame.extend_from_slice(&chk);
    frame.push(END_MARKER);
    frame
}

fn write_frame(register: u8, value: u16) -> Vec<u8> {
    let mut frame = vec![START_MARKER, ACTION_WRITE, register, 0x02];
    frame.extend_from_slice(&value.to_be_bytes());
    let chk = checksum::to_wire(&frame[2..6]);
    frame.extend_from_slice(&chk);
    frame.push(END_MARKER);
    frame
}
