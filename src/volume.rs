//! Tank volume lookup
//!
//! A calibration table maps "inches from the top of the tank" to gallons.
//! The sensor measures liquid height from the bottom, so a reading is
//! converted mm -> inches from bottom (plus the sensor's mounting offset)
//! -> inches from top -> interpolated gallons.

use serde::Serialize;

const MM_PER_INCH: f64 = 25.4;

/// Result of a volume conversion
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeReading {
    pub gallons: f64,
    /// Liquid height from the bottom including the mounting offset
    pub level_in: f64,
    pub level_from_top_in: f64,
    pub offset_in: f64,
}

/// Calibration points sorted by inches from top, descending.
///
/// The first point is the empty tank and sets the tank height.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeTable {
    points: Vec<(f64, f64)>,
}

impl VolumeTable {
    pub fn new(mut points: Vec<(f64, f64)>) -> Self {
        points.retain(|(inches, gallons)| inches.is_finite() && gallons.is_finite());
        points.sort_by(|a, b| b.0.total_cmp(&a.0));
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Tank height in inches, the distance from the top of an empty tank
    pub fn max_height_in(&self) -> Option<f64> {
        self.points.first().map(|p| p.0)
    }

    /// Convert a level reading, or `None` without any calibration points
    pub fn convert(&self, level_mm: f64, offset_in: f64) -> Option<VolumeReading> {
        let max_height = self.max_height_in()?;
        let level_in = level_mm / MM_PER_INCH + offset_in;
        let from_top = (max_height - level_in).max(0.0);

        Some(VolumeReading {
            gallons: round_to(self.interpolate(from_top), 1),
            level_in: round_to(level_in, 2),
            level_from_top_in: round_to(from_top, 2),
            offset_in,
        })
    }

    fn interpolate(&self, from_top: f64) -> f64 {
        let (Some(&(empty_in, _)), Some(&(full_in, full_gal))) =
            (self.points.first(), self.points.last())
        else {
            return 0.0;
        };

        if from_top >= empty_in {
            return 0.0;
        }
        if from_top <= full_in {
            return full_gal;
        }

        for pair in self.points.windows(2) {
            let (top_in, top_gal) = pair[0];
            let (bot_in, bot_gal) = pair[1];
            if (bot_in..=top_in).contains(&from_top) {
                if top_in == bot_in {
                    return top_gal;
                }
                let ratio = (top_in - from_top) / (top_in - bot_in);
                return top_gal + ratio * (bot_gal - top_gal);
            }
        }
        0.0
    }
}

fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> VolumeTable {
        // Deliberately unsorted
        VolumeTable::new(vec![(20.0, 500.0), (50.0, 0.0), (5.0, 1000.0), (35.0, 200.0)])
    }

    #[test]
    fn empty_table_has_no_conversion() {
        assert_eq!(VolumeTable::default().convert(500.0, 0.0), None);
    }

    #[test]
    fn sorted_descending() {
        assert_eq!(table().max_height_in(), Some(50.0));
        assert_eq!(table().len(), 4);
    }

    #[test]
    fn empty_tank_is_zero() {
        let v = table().convert(0.0, 0.0).unwrap();
        assert_eq!(v.gallons, 0.0);
        assert_eq!(v.level_from_top_in, 50.0);
    }

    #[test]
    fn full_tank_clamps_to_last_point() {
        let v = table().convert(60.0 * MM_PER_INCH, 0.0).unwrap();
        assert_eq!(v.gallons, 1000.0);
        assert_eq!(v.level_from_top_in, 0.0);
    }

    #[test]
    fn interpolates_between_points() {
        // 25 in from bottom = 25 in from top, between 35 (200) and 20 (500)
        let v = table().convert(25.0 * MM_PER_INCH, 0.0).unwrap();
        assert_eq!(v.gallons, 400.0);
        assert_eq!(v.level_in, 25.0);
    }

    #[test]
    fn offset_is_added() {
        let v = table().convert(20.0 * MM_PER_INCH, 5.0).unwrap();
        assert_eq!(v.level_in, 25.0);
        assert_eq!(v.offset_in, 5.0);
        assert_eq!(v.gallons, 400.0);
    }
}
