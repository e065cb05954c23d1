use sensorbridge::checksum;
use sensorbridge::frame::Command;
use sensorbridge::{BmsSession, Frame, FrameReassembler, TelemetryEvent};

const HARDWARE_PAYLOAD: &str = "1388ff9c1f402710000c2c4f00030000000021500310020ba50baf";
const CELL_FRAME: &str = "dd0400020fa0ff4f77";

/// A noisy stream: garbage, a hardware frame, a truncated frame, an end
/// marker inside a payload and a frame with a bad checksum.
fn stream() -> Vec<u8> {
    let hardware = Frame::new(0x03, 0x00, &hex::decode(HARDWARE_PAYLOAD).unwrap())
        .unwrap()
        .to_bytes();
    let cells = hex::decode(CELL_FRAME).unwrap();
    let with_end_marker = Frame::new(0x04, 0x00, &[0x0f, 0x77, 0x0d, 0x77]).unwrap().to_bytes();
    let mut bad_checksum = cells.clone();
    bad_checksum[5] ^= 0x01;

    let mut bytes = vec![0x00, 0x77, 0x12];
    bytes.extend_from_slice(&hardware);
    bytes.extend_from_slice(&cells[..6]);
    bytes.extend_from_slice(&with_end_marker);
    bytes.extend_from_slice(&bad_checksum);
    bytes.extend_from_slice(&cells);
    bytes.extend_from_slice(&[0xdd, 0x03]);
    bytes
}

fn feed_in_chunks(bytes: &[u8], size: usize) -> Vec<Frame> {
    let mut reassembler = FrameReassembler::new();
    bytes
        .chunks(size)
        .flat_map(|chunk| reassembler.feed(chunk))
        .collect()
}

#[test]
fn chunk_boundaries_do_not_matter() {
    let bytes = stream();
    let all_at_once = feed_in_chunks(&bytes, bytes.len());
    assert_eq!(all_at_once.len(), 3);
    for size in 1..=bytes.len() {
        assert_eq!(feed_in_chunks(&bytes, size), all_at_once, "chunk size {size}");
    }
}

#[test]
fn frames_come_out_in_arrival_order() {
    let frames = feed_in_chunks(&stream(), 20);
    let registers: Vec<u8> = frames.iter().map(|f| f.register).collect();
    assert_eq!(registers, vec![0x03, 0x04, 0x04]);
    assert_eq!(frames[1].payload, vec![0x0f, 0x77, 0x0d, 0x77]);
}

#[test]
fn validated_frames_carry_their_checksum() {
    for frame in feed_in_chunks(&stream(), 7) {
        let bytes = frame.to_bytes();
        let payload_end = bytes.len() - 3;
        assert_eq!(
            checksum::to_wire(&bytes[2..payload_end]),
            [bytes[payload_end], bytes[payload_end + 1]]
        );
    }
}

#[test]
fn commands_validate_through_the_same_engine() {
    let commands = [
        Command::ReadHardwareInfo,
        Command::ReadCellInfo,
        Command::ReadDeviceName,
        Command::EnterFactoryMode,
        Command::ExitFactoryMode,
        Command::SetMosfet {
            charge: false,
            discharge: true,
        },
        Command::Write {
            register: 0x2f,
            value: 0xbeef,
        },
    ];
    for command in commands {
        let bytes = command.to_bytes();
        assert!(Frame::parse(&bytes).is_ok(), "{command:?}");
    }
}

#[test]
fn session_decodes_a_noisy_stream_byte_by_byte() {
    let mut session = BmsSession::new("house", Some(90));
    let events: Vec<TelemetryEvent> = stream()
        .iter()
        .flat_map(|b| session.handle_chunk(std::slice::from_ref(b)))
        .collect();

    // The payload with embedded end markers is two cells
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            TelemetryEvent::HardwareInfo { .. } => "hardware",
            TelemetryEvent::CellInfo { .. } => "cells",
            TelemetryEvent::LowBattery { .. } => "low",
            TelemetryEvent::DeviceName { .. } => "name",
            TelemetryEvent::Tank { .. } => "tank",
        })
        .collect();
    assert_eq!(kinds, vec!["hardware", "low", "cells", "cells"]);
    assert_eq!(session.telemetry().cells.len(), 1);
    assert_eq!(session.reassembler().buffered(), 2);
}
