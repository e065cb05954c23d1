/// A verbatim message to send which requests the cell voltages
pub(crate) const REQUEST: [u8; 7] = [0xDD, 0xA5, 0x04, 0x00, 0xFF, 0xFC, 0x77];

use super::{read_u16, DecodeError};

/// Cells beyond this are ignored
pub const MAX_CELLS: usize = 32;

/// Register 0x04: individual cell voltages and derived statistics.
///
/// Indices are 1-based, matching the cell numbering printed on the pack.
#[derive(Debug, Clone, PartialEq)]
pub struct CellInfo {
    /// Cell voltages in V, in declaration order
    pub voltages: Vec<f64>,
    pub min: f64,
    pub min_index: usize,
    pub max: f64,
    pub max_index: usize,
    pub delta: f64,
    pub mean: f64,
}

impl CellInfo {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < 2 {
            return Err(DecodeError::TooShort {
                expected: 2,
                actual: payload.len(),
            });
        }
        if payload.len() % 2 != 0 {
            return Err(DecodeError::OddLength(payload.len()));
        }

        let count = (payload.len() / 2).min(MAX_CELLS);
        let voltages: Vec<f64> = (0..count)
            .map(|i| read_u16(payload, i * 2) as f64 / 1000.0)
            .collect();

        // First occurrence wins on ties
        let (mut min_index, mut max_index) = (0, 0);
        for (i, &v) in voltages.iter().enumerate() {
            if v < voltages[min_index] {
                min_index = i;
            }
            if v > voltages[max_index] {
                max_index = i;
            }
        }
        let min = voltages[min_index];
        let max = voltages[max_index];
        let mean = voltages.iter().sum::<f64>() / count as f64;

        Ok(Self {
            voltages,
            min,
            min_index: min_index + 1,
            max,
            max_index: max_index + 1,
            delta: max - min,
            mean,
        })
    }

    pub fn total_cells(&self) -> usize {
        self.voltages.len()
    }

    /// Voltage of the given 1-based cell
    pub fn voltage(&self, cell: usize) -> Option<f64> {
        cell.checked_sub(1).and_then(|i| self.voltages.get(i)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Command;

    #[test]
    fn request_matches_command() {
        assert_eq!(REQUEST.to_vec(), Command::ReadCellInfo.to_bytes());
    }

    #[test]
    fn single_cell() {
        let info = CellInfo::decode(&[0x0f, 0xa0]).unwrap();
        assert_eq!(info.total_cells(), 1);
        assert_eq!(info.voltage(1), Some(4.0));
        assert_eq!(info.min, 4.0);
        assert_eq!(info.max, 4.0);
        assert_eq!(info.delta, 0.0);
        assert_eq!(info.mean, 4.0);
        assert_eq!((info.min_index, info.max_index), (1, 1));
    }

    #[test]
    fn four_cells() {
        // 3.301, 3.298, 3.305, 3.300
        let payload = hex::decode("0ce50ce20ce90ce4").unwrap();
        let info = CellInfo::decode(&payload).unwrap();
        assert_eq!(info.voltages, vec![3.301, 3.298, 3.305, 3.300]);
        assert_eq!((info.min, info.min_index), (3.298, 2));
        assert_eq!((info.max, info.max_index), (3.305, 3));
        assert!((info.delta - 0.007).abs() < 1e-9);
        assert!((info.mean - 3.301).abs() < 1e-9);
        assert_eq!(info.voltage(0), None);
        assert_eq!(info.voltage(5), None);
    }

    #[test]
    fn ties_report_first_cell() {
        let info = CellInfo::decode(&hex::decode("0ce40ce40ce4").unwrap()).unwrap();
        assert_eq!((info.min_index, info.max_index), (1, 1));
    }

    #[test]
    fn odd_length_rejected() {
        assert_eq!(
            CellInfo::decode(&[0x0f, 0xa0, 0x0f]),
            Err(DecodeError::OddLength(3))
        );
    }

    #[test]
    fn empty_rejected() {
        assert!(CellInfo::decode(&[]).is_err());
    }

    #[test]
    fn cell_count_clamped() {
        let payload = [0x0c, 0xe4].repeat(40);
        let info = CellInfo::decode(&payload).unwrap();
        assert_eq!(info.total_cells(), MAX_CELLS);
    }
}
