//! The latest known state of one device
//!
//! Every decoded frame or advertisement is merged into the record in place:
//! new fields overwrite old ones, fields not carried by the update are kept.
//! Multi-index values (cells, temperature probes) live in fixed-capacity
//! series so a malformed frame can never grow the record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::message::{CellInfo, DeviceName, HardwareInfo, MAX_CELLS, MAX_TEMPERATURE_PROBES};
use crate::tank::TankReading;
use crate::volume::VolumeReading;

/// Tank fields that are only meaningful for a reliable reading
const LEVEL_FIELDS: [&str; 6] = [
    "level_mm",
    "level_in",
    "gallons",
    "level_compensated_in",
    "level_from_top_in",
    "offset_in",
];

const MM_PER_INCH: f64 = 25.4;

/// A scalar telemetry value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Integer(i64),
    Bool(bool),
    Text(String),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

macro_rules! integer_field {
    ($($t:ty),*) => {
        $(impl From<$t> for FieldValue {
            fn from(v: $t) -> Self {
                Self::Integer(v as i64)
            }
        })*
    };
}

integer_field!(u8, u16, u32, usize);

/// Fixed-capacity, 1-based series with a populated count
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedSeries<const N: usize> {
    values: [f64; N],
    len: usize,
}

impl<const N: usize> IndexedSeries<N> {
    pub const fn new() -> Self {
        Self {
            values: [0.0; N],
            len: 0,
        }
    }

    /// Replace the contents. Values beyond the capacity are dropped.
    pub fn set_all(&mut self, values: &[f64]) {
        let len = values.len().min(N);
        self.values[..len].copy_from_slice(&values[..len]);
        self.len = len;
    }

    /// Value at a 1-based index
    pub fn get(&self, index: usize) -> Option<f64> {
        (1..=self.len)
            .contains(&index)
            .then(|| self.values[index - 1])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `(index, value)` pairs, 1-based
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.values[..self.len]
            .iter()
            .enumerate()
            .map(|(i, &v)| (i + 1, v))
    }
}

impl<const N: usize> Default for IndexedSeries<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The reported state of a device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceTelemetry {
    pub fields: BTreeMap<String, FieldValue>,
    /// Cell voltages in V
    pub cells: IndexedSeries<MAX_CELLS>,
    /// Probe temperatures in °C
    pub temperatures: IndexedSeries<MAX_TEMPERATURE_PROBES>,
    /// 1.0 while the cell is balancing
    pub balancing: IndexedSeries<MAX_CELLS>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeviceTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.cells.is_empty() && self.temperatures.is_empty()
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    pub fn merge_hardware_info(&mut self, info: &HardwareInfo) {
        self.set("total_voltage", info.total_voltage);
        self.set("current", info.current);
        self.set("power", info.power);
        self.set("remaining_capacity", info.remaining_capacity);
        self.set("nominal_capacity", info.nominal_capacity);
        self.set("cycles", info.cycles);
        match info.manufacture_date {
            Some(date) => self.set("manufacture_date", date.format("%Y-%m-%d").to_string()),
            None => {
                self.remove("manufacture_date");
            }
        }
        self.set("balance_status", info.balance_status);
        self.set("error_bits", info.errors);
        self.set("errors", info.error_summary());
        self.set("software_version", info.software_version);
        self.set("soc", info.soc);
        self.set("charging_enabled", info.mosfet.charging);
        self.set("discharging_enabled", info.mosfet.discharging);
        self.set("cell_string_count", info.cell_string_count);
        self.set("temperature_sensor_count", info.temperatures.len());
        self.temperatures.set_all(&info.temperatures);

        let strings = (info.cell_string_count as usize).min(MAX_CELLS);
        let balancing: Vec<f64> = (1..=strings)
            .map(|cell| if info.is_balancing(cell) { 1.0 } else { 0.0 })
            .collect();
        self.balancing.set_all(&balancing);
        self.touch();
    }

    pub fn merge_cell_info(&mut self, info: &CellInfo) {
        self.set("total_cells", info.total_cells());
        self.set("cell_voltage_min", info.min);
        self.set("cell_voltage_min_index", info.min_index);
        self.set("cell_voltage_max", info.max);
        self.set("cell_voltage_max_index", info.max_index);
        self.set("cell_voltage_delta", info.delta);
        self.set("cell_voltage_mean", info.mean);
        self.cells.set_all(&info.voltages);
        self.touch();
    }

    pub fn merge_device_name(&mut self, name: &DeviceName) {
        self.set("device_name", name.0.as_str());
        self.touch();
    }

    /// Merge a tank reading with its calibrated level and volume, if known.
    ///
    /// An unreliable reading removes every level-derived field so that stale
    /// values are never presented as current.
    pub fn merge_tank(
        &mut self,
        reading: &TankReading,
        level_mm: Option<f64>,
        volume: Option<&VolumeReading>,
    ) {
        self.set("model", reading.model.name());
        self.set("mac_suffix", reading.mac_suffix_string());
        self.set("battery_voltage", reading.battery_voltage);
        self.set("battery_percentage", reading.battery_percentage);
        self.set("button_pressed", reading.button_pressed);
        self.set("temperature", reading.temperature);
        self.set("raw_level", reading.raw_level);
        self.set("quality", reading.quality);
        self.set("quality_raw", reading.quality_raw);
        self.set("accel_x", reading.accel_x);
        self.set("accel_y", reading.accel_y);

        let reliable = reading.is_reliable();
        self.set("level_valid", reliable);
        for field in LEVEL_FIELDS {
            self.remove(field);
        }

        if reliable {
            if let Some(mm) = level_mm {
                self.set("level_mm", mm);
                self.set("level_in", mm / MM_PER_INCH);
            }
            if let Some(v) = volume {
                self.set("gallons", v.gallons);
                self.set("level_compensated_in", v.level_in);
                self.set("level_from_top_in", v.level_from_top_in);
                self.set("offset_in", v.offset_in);
            }
        }
        self.touch();
    }
}
