//! Gateway configuration
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [publisher]
//! queue_capacity = 64
//! sink = { type = "tcp", address = "127.0.0.1:7000" }
//!
//! [[bms]]
//! id = "house-bank"
//! ble_name = "SP04S034"
//! low_soc_threshold = 20
//! topics = ["boat/bms/house"]
//!
//! [[tank]]
//! id = "propane"
//! mac_suffix = "0F:37:A5"
//! medium = "propane"
//! topics = ["boat/tank/propane"]
//!
//! [volume]
//! points = [[12.0, 0.0], [6.0, 10.0], [0.0, 20.0]]
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationProfile, MediumType};
use crate::error::{Error, Result};
use crate::volume::VolumeTable;

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub bms: Vec<BmsConfig>,
    #[serde(default)]
    pub tank: Vec<TankConfig>,
    pub volume: Option<VolumeConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter (trace, debug, info, warn, error), overridden by RUST_LOG
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

/// Publishing queue and destination
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublisherConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub sink: SinkConfig,
    /// Log a failing bus once rather than on every payload
    #[serde(default = "default_true")]
    pub suppress_repeats: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            sink: SinkConfig::default(),
            suppress_repeats: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    #[default]
    Log,
    /// Newline-delimited JSON to a TCP endpoint
    Tcp { address: String },
}

/// A battery management system reached over BLE
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BmsConfig {
    pub id: String,
    /// Advertised BLE name
    pub ble_name: String,
    /// State of charge (%) at or below which a low battery event is raised
    pub low_soc_threshold: Option<u8>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// A tank sensor identified by its advertised MAC suffix
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TankConfig {
    pub id: String,
    /// Last three MAC octets, `AA:BB:CC`
    pub mac_suffix: String,
    /// Without a medium the level is not calculated
    pub medium: Option<MediumType>,
    /// Sensor mounting height above the tank bottom, in inches
    #[serde(default)]
    pub height_offset_in: f64,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl TankConfig {
    pub fn profile(&self) -> Option<CalibrationProfile> {
        self.medium.map(MediumType::profile)
    }
}

/// Tank volume calibration points
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VolumeConfig {
    /// `[inches_from_top, gallons]` pairs
    pub points: Vec<(f64, f64)>,
}

/// The device a configured id refers to
#[derive(Debug, Clone, Copy)]
pub enum DeviceConfig<'a> {
    Bms(&'a BmsConfig),
    Tank(&'a TankConfig),
}

impl<'a> DeviceConfig<'a> {
    pub fn topics(&self) -> &'a [String] {
        match *self {
            Self::Bms(c) => &c.topics,
            Self::Tank(c) => &c.topics,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

impl GatewayConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: GatewayConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.publisher.queue_capacity == 0 {
            return Err(Error::Invalid("publisher.queue_capacity must be > 0".into()));
        }

        let mut ids = HashSet::new();
        let all_ids = self
            .bms
            .iter()
            .map(|b| b.id.as_str())
            .chain(self.tank.iter().map(|t| t.id.as_str()));
        for id in all_ids {
            if id.trim().is_empty() {
                return Err(Error::Invalid("device id must not be empty".into()));
            }
            if !ids.insert(id) {
                return Err(Error::Invalid(format!("duplicate device id {id:?}")));
            }
        }

        for bms in &self.bms {
            if let Some(threshold) = bms.low_soc_threshold {
                if threshold > 100 {
                    return Err(Error::Invalid(format!(
                        "{}: low_soc_threshold {threshold} is not a percentage",
                        bms.id
                    )));
                }
            }
            if bms.poll_interval_ms == 0 {
                return Err(Error::Invalid(format!("{}: poll_interval_ms must be > 0", bms.id)));
            }
        }

        let mut suffixes = HashSet::new();
        for tank in &self.tank {
            let suffix = normalize_mac_suffix(&tank.mac_suffix).ok_or_else(|| {
                Error::Invalid(format!("{}: bad mac_suffix {:?}", tank.id, tank.mac_suffix))
            })?;
            if !suffixes.insert(suffix) {
                return Err(Error::Invalid(format!(
                    "{}: mac_suffix {} is already configured",
                    tank.id, tank.mac_suffix
                )));
            }
        }

        Ok(())
    }

    pub fn device(&self, id: &str) -> Option<DeviceConfig<'_>> {
        self.bms
            .iter()
            .find(|b| b.id == id)
            .map(DeviceConfig::Bms)
            .or_else(|| self.tank.iter().find(|t| t.id == id).map(DeviceConfig::Tank))
    }

    /// The tank configured with the given MAC suffix
    pub fn tank_by_mac_suffix(&self, suffix: &str) -> Option<&TankConfig> {
        let wanted = normalize_mac_suffix(suffix)?;
        self.tank
            .iter()
            .find(|t| normalize_mac_suffix(&t.mac_suffix).as_deref() == Some(wanted.as_str()))
    }

    pub fn volume_table(&self) -> Option<Arc<VolumeTable>> {
        let table = VolumeTable::new(self.volume.as_ref()?.points.clone());
        (!table.is_empty()).then(|| Arc::new(table))
    }
}

/// Upper-case `AA:BB:CC` form, or `None` if `suffix` is not three hex octets
pub fn normalize_mac_suffix(suffix: &str) -> Option<String> {
    let octets: Vec<&str> = suffix.trim().split([':', '-']).collect();
    if octets.len() != 3 {
        return None;
    }
    let mut bytes = [0u8; 3];
    for (byte, octet) in bytes.iter_mut().zip(&octets) {
        if octet.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(octet, 16).ok()?;
    }
    Some(crate::tank::format_mac_suffix(&bytes))
}
