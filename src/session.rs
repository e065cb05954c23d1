//! Per-device decoding sessions
//!
//! A session owns everything that is specific to one connected device: the
//! frame reassembler, the telemetry record and the low battery alarm. It is
//! driven by exactly one task (see [`crate::Gateway`]), so none of this state
//! needs locking. Sessions do no I/O: each call returns the events it
//! produced and the caller decides what to publish.

use std::sync::Arc;

use crate::calibration::CalibrationProfile;
use crate::frame::{Frame, Register};
use crate::message::{CellInfo, DeviceName, HardwareInfo};
use crate::reassembler::FrameReassembler;
use crate::tank::TankReading;
use crate::telemetry::DeviceTelemetry;
use crate::volume::{VolumeReading, VolumeTable};

/// Something worth telling downstream consumers about
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    HardwareInfo {
        device_id: String,
        info: HardwareInfo,
    },
    CellInfo {
        device_id: String,
        info: CellInfo,
    },
    DeviceName {
        device_id: String,
        name: String,
    },
    Tank {
        device_id: String,
        reading: TankReading,
        level_mm: Option<f64>,
        volume: Option<VolumeReading>,
    },
    /// State of charge fell to or below the configured threshold
    LowBattery {
        device_id: String,
        soc: u8,
        threshold: u8,
    },
}

impl TelemetryEvent {
    pub fn device_id(&self) -> &str {
        match self {
            Self::HardwareInfo { device_id, .. }
            | Self::CellInfo { device_id, .. }
            | Self::DeviceName { device_id, .. }
            | Self::Tank { device_id, .. }
            | Self::LowBattery { device_id, .. } => device_id,
        }
    }
}

/// One-shot low state of charge notification.
///
/// Fires the first time the state of charge drops to or below the threshold
/// and re-arms once it rises above it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocAlarm {
    threshold: Option<u8>,
    armed: bool,
}

impl SocAlarm {
    pub fn new(threshold: Option<u8>) -> Self {
        Self {
            threshold,
            armed: true,
        }
    }

    pub fn threshold(&self) -> Option<u8> {
        self.threshold
    }

    /// Returns true if a notification should be raised for this reading
    pub fn update(&mut self, soc: u8) -> bool {
        let Some(threshold) = self.threshold else {
            return false;
        };

        if soc > threshold {
            self.armed = true;
            false
        } else if self.armed {
            self.armed = false;
            true
        } else {
            false
        }
    }
}

/// Decoding session for a connected BMS
#[derive(Debug)]
pub struct BmsSession {
    device_id: String,
    reassembler: FrameReassembler,
    telemetry: DeviceTelemetry,
    alarm: SocAlarm,
}

impl BmsSession {
    pub fn new(device_id: impl Into<String>, low_soc_threshold: Option<u8>) -> Self {
        Self {
            device_id: device_id.into(),
            reassembler: FrameReassembler::new(),
            telemetry: DeviceTelemetry::new(),
            alarm: SocAlarm::new(low_soc_threshold),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn telemetry(&self) -> &DeviceTelemetry {
        &self.telemetry
    }

    pub fn reassembler(&self) -> &FrameReassembler {
        &self.reassembler
    }

    /// Feed one notification chunk
    pub fn handle_chunk(&mut self, chunk: &[u8]) -> Vec<TelemetryEvent> {
        log::debug!("BMS {}: RX 0x{}", self.device_id, hex::encode(chunk));

        let mut events = Vec::new();
        for frame in self.reassembler.feed(chunk) {
            self.handle_frame(&frame, &mut events);
        }
        events
    }

    fn handle_frame(&mut self, frame: &Frame, events: &mut Vec<TelemetryEvent>) {
        if !frame.is_ok() {
            log::warn!(
                "BMS {}: register {:#04x} answered with status {:#04x}",
                self.device_id,
                frame.register,
                frame.status
            );
            return;
        }

        match frame.kind() {
            Some(Register::HardwareInfo) => match HardwareInfo::decode(&frame.payload) {
                Ok(info) => {
                    self.telemetry.merge_hardware_info(&info);
                    let soc = info.soc;
                    events.push(TelemetryEvent::HardwareInfo {
                        device_id: self.device_id.clone(),
                        info,
                    });
                    if self.alarm.update(soc) {
                        let threshold = self.alarm.threshold().unwrap_or_default();
                        log::warn!(
                            "BMS {}: state of charge {soc}% at or below {threshold}%",
                            self.device_id
                        );
                        events.push(TelemetryEvent::LowBattery {
                            device_id: self.device_id.clone(),
                            soc,
                            threshold,
                        });
                    }
                }
                Err(e) => log::warn!("BMS {}: hardware info rejected: {e}", self.device_id),
            },
            Some(Register::CellInfo) => match CellInfo::decode(&frame.payload) {
                Ok(info) => {
                    self.telemetry.merge_cell_info(&info);
                    events.push(TelemetryEvent::CellInfo {
                        device_id: self.device_id.clone(),
                        info,
                    });
                }
                Err(e) => log::warn!("BMS {}: cell info rejected: {e}", self.device_id),
            },
            Some(Register::DeviceName) => {
                let name = DeviceName::decode(&frame.payload);
                self.telemetry.merge_device_name(&name);
                events.push(TelemetryEvent::DeviceName {
                    device_id: self.device_id.clone(),
                    name: name.0,
                });
            }
            None => log::debug!(
                "BMS {}: ignoring register {:#04x}",
                self.device_id,
                frame.register
            ),
        }
    }
}

/// Decoding session for a tank sensor
#[derive(Debug)]
pub struct TankSession {
    device_id: String,
    profile: Option<CalibrationProfile>,
    volume: Option<Arc<VolumeTable>>,
    height_offset_in: f64,
    telemetry: DeviceTelemetry,
    warned_uncalibrated: bool,
}

impl TankSession {
    pub fn new(
        device_id: impl Into<String>,
        profile: Option<CalibrationProfile>,
        volume: Option<Arc<VolumeTable>>,
        height_offset_in: f64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            profile,
            volume,
            height_offset_in,
            telemetry: DeviceTelemetry::new(),
            warned_uncalibrated: false,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn telemetry(&self) -> &DeviceTelemetry {
        &self.telemetry
    }

    /// Decode one advertisement. A rejected advertisement leaves the
    /// telemetry untouched and produces no events.
    pub fn handle_advertisement(&mut self, payload: &[u8]) -> Vec<TelemetryEvent> {
        let reading = match TankReading::decode(payload) {
            Ok(reading) => reading,
            Err(e) => {
                log::debug!(
                    "Tank {}: ignoring advertisement 0x{}: {e}",
                    self.device_id,
                    hex::encode(payload)
                );
                return Vec::new();
            }
        };

        let level_mm = match &self.profile {
            Some(profile) => reading.level_mm(profile),
            None => {
                if !self.warned_uncalibrated {
                    log::warn!(
                        "Tank {}: no medium configured, level will not be calculated",
                        self.device_id
                    );
                    self.warned_uncalibrated = true;
                }
                None
            }
        };

        let volume = match (level_mm, &self.volume) {
            (Some(mm), Some(table)) => table.convert(mm, self.height_offset_in),
            _ => None,
        };

        if !reading.is_reliable() {
            log::debug!("Tank {}: reading quality too low, level invalid", self.device_id);
        }

        self.telemetry.merge_tank(&reading, level_mm, volume.as_ref());
        vec![TelemetryEvent::Tank {
            device_id: self.device_id.clone(),
            reading,
            level_mm,
            volume,
        }]
    }
}

/// Either kind of session, so a single task type can drive both
#[derive(Debug)]
pub enum DeviceSession {
    Bms(BmsSession),
    Tank(TankSession),
}

impl DeviceSession {
    pub fn device_id(&self) -> &str {
        match self {
            Self::Bms(s) => s.device_id(),
            Self::Tank(s) => s.device_id(),
        }
    }

    /// Handle one chunk from the transport: a notification for a BMS, a
    /// whole advertisement payload for a tank sensor.
    pub fn handle(&mut self, bytes: &[u8]) -> Vec<TelemetryEvent> {
        match self {
            Self::Bms(s) => s.handle_chunk(bytes),
            Self::Tank(s) => s.handle_advertisement(bytes),
        }
    }

    pub fn telemetry(&self) -> &DeviceTelemetry {
        match self {
            Self::Bms(s) => s.telemetry(),
            Self::Tank(s) => s.telemetry(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::FieldValue;

    const HARDWARE_PAYLOAD: &str = "1388ff9c1f402710000c2c4f00030000000021500310020ba50baf";

    fn hardware_frame(soc: u8) -> Vec<u8> {
        let mut payload = hex::decode(HARDWARE_PAYLOAD).unwrap();
        payload[19] = soc;
        Frame::new(0x03, 0x00, &payload).unwrap().to_bytes()
    }

    fn low_battery_count(events: &[TelemetryEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, TelemetryEvent::LowBattery { .. }))
            .count()
    }

    #[test]
    fn alarm_fires_once_and_rearms() {
        let mut alarm = SocAlarm::new(Some(20));
        assert!(alarm.update(15));
        assert!(!alarm.update(15));
        assert!(!alarm.update(20));
        assert!(!alarm.update(25));
        assert!(alarm.update(10));
    }

    #[test]
    fn alarm_without_threshold_never_fires() {
        let mut alarm = SocAlarm::new(None);
        assert!(!alarm.update(0));
    }

    #[test]
    fn alarm_fires_at_threshold() {
        let mut alarm = SocAlarm::new(Some(20));
        assert!(alarm.update(20));
    }

    #[test]
    fn bms_low_battery_sequence() {
        let mut session = BmsSession::new("bms", Some(20));
        assert_eq!(low_battery_count(&session.handle_chunk(&hardware_frame(15))), 1);
        assert_eq!(low_battery_count(&session.handle_chunk(&hardware_frame(15))), 0);
        assert_eq!(low_battery_count(&session.handle_chunk(&hardware_frame(25))), 0);
        assert_eq!(low_battery_count(&session.handle_chunk(&hardware_frame(10))), 1);
    }

    #[test]
    fn cell_info_frame_updates_telemetry() {
        let mut session = BmsSession::new("bms", None);
        let events = session.handle_chunk(&hex::decode("dd0400020fa0ff4f77").unwrap());
        assert_eq!(events.len(), 1);
        let TelemetryEvent::CellInfo { info, .. } = &events[0] else {
            panic!("expected cell info, got {events:?}");
        };
        assert_eq!(info.total_cells(), 1);
        assert_eq!(info.voltage(1), Some(4.0));
        assert_eq!(info.delta, 0.0);

        let t = session.telemetry();
        assert_eq!(t.get("total_cells"), Some(&FieldValue::Integer(1)));
        assert_eq!(t.get("cell_voltage_min"), Some(&FieldValue::Number(4.0)));
        assert_eq!(t.get("cell_voltage_max"), Some(&FieldValue::Number(4.0)));
        assert_eq!(t.cells.get(1), Some(4.0));
    }

    #[test]
    fn hardware_and_cell_frames_merge() {
        let mut session = BmsSession::new("bms", None);
        let mut chunk = hardware_frame(80);
        chunk.extend_from_slice(&hex::decode("dd0400020fa0ff4f77").unwrap());
        let events = session.handle_chunk(&chunk);
        assert_eq!(events.len(), 2);
        let t = session.telemetry();
        assert_eq!(t.get("total_voltage"), Some(&FieldValue::Number(50.0)));
        assert_eq!(t.get("soc"), Some(&FieldValue::Integer(80)));
        assert_eq!(t.get("errors").and_then(FieldValue::as_str), Some("None"));
        assert_eq!(t.temperatures.get(2), Some(26.0));
        assert_eq!(t.cells.len(), 1);
    }

    #[test]
    fn short_hardware_payload_is_ignored() {
        let payload = hex::decode(HARDWARE_PAYLOAD).unwrap();
        let frame = Frame::new(0x03, 0x00, &payload[..22]).unwrap().to_bytes();
        let mut session = BmsSession::new("bms", None);
        assert!(session.handle_chunk(&frame).is_empty());
        assert!(session.telemetry().is_empty());
    }

    #[test]
    fn odd_cell_payload_is_ignored() {
        let frame = Frame::new(0x04, 0x00, &[0x0f, 0xa0, 0x0f]).unwrap().to_bytes();
        let mut session = BmsSession::new("bms", None);
        assert!(session.handle_chunk(&frame).is_empty());
    }

    #[test]
    fn error_status_is_not_decoded() {
        let frame = Frame::new(0x04, 0x80, &[0x0f, 0xa0]).unwrap().to_bytes();
        let mut session = BmsSession::new("bms", None);
        assert!(session.handle_chunk(&frame).is_empty());
    }

    #[test]
    fn device_name_frame() {
        let frame = Frame::new(0x05, 0x00, b"SP04S034").unwrap().to_bytes();
        let mut session = BmsSession::new("bms", None);
        let events = session.handle_chunk(&frame);
        assert_eq!(
            events,
            vec![TelemetryEvent::DeviceName {
                device_id: "bms".into(),
                name: "SP04S034".into()
            }]
        );
    }

    #[test]
    fn repeated_frame_gives_identical_events() {
        let frame = hardware_frame(50);
        let mut session = BmsSession::new("bms", Some(20));
        let first = session.handle_chunk(&frame);
        let second = session.handle_chunk(&frame);
        assert_eq!(first, second);
    }

    #[test]
    fn tank_session_calibrates_and_converts() {
        let table = Arc::new(VolumeTable::new(vec![(50.0, 0.0), (0.0, 1000.0)]));
        let mut session = TankSession::new(
            "tank",
            Some(CalibrationProfile::PROPANE),
            Some(table),
            0.0,
        );
        let events = session.handle_advertisement(&hex::decode("034028e8c30f37a51020").unwrap());
        assert_eq!(events.len(), 1);
        let TelemetryEvent::Tank { level_mm, volume, .. } = &events[0] else {
            panic!("expected tank event");
        };
        assert!(level_mm.is_some());
        assert!(volume.is_some());
        assert!(session.telemetry().get("gallons").is_some());
    }

    #[test]
    fn tank_session_without_medium_still_decodes() {
        let mut session = TankSession::new("tank", None, None, 0.0);
        let events = session.handle_advertisement(&hex::decode("034028e8c30f37a51020").unwrap());
        assert_eq!(events.len(), 1);
        let t = session.telemetry();
        assert_eq!(t.get("battery_voltage"), Some(&FieldValue::Number(2.0)));
        assert_eq!(t.get("level_mm"), None);
    }

    #[test]
    fn rejected_advertisement_keeps_previous_state() {
        let mut session = TankSession::new("tank", Some(CalibrationProfile::PROPANE), None, 0.0);
        session.handle_advertisement(&hex::decode("034028e8c30f37a51020").unwrap());
        let before = session.telemetry().clone();
        assert!(session.handle_advertisement(&[0x07, 0x40, 0x28]).is_empty());
        assert!(session.handle_advertisement(&[0x03, 0x40, 0x28]).is_empty());
        assert_eq!(session.telemetry(), &before);
    }
}
