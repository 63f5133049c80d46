//! Raw-bytes / physical-value conversion for calibration maps

use crate::descriptor::{Calibration, CalibrationMapDescriptor, CellWidth};
use crate::error::CodecError;

/// A decoded map: physical values shaped rows×cols, with any cells whose
/// decoded value fell outside the descriptor bounds flagged. Flagged
/// cells keep their true value; nothing is clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct MapGrid {
    pub rows: usize,
    pub cols: usize,
    /// Row-major physical values
    pub values: Vec<f64>,
    /// (row, col) of every out-of-bounds cell
    pub out_of_range: Vec<(usize, usize)>,
}

impl MapGrid {
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            self.values.get(row * self.cols + col).copied()
        } else {
            None
        }
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) -> bool {
        if row >= self.rows || col >= self.cols {
            return false;
        }
        match self.values.get_mut(row * self.cols + col) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    pub fn is_flagged(&self, row: usize, col: usize) -> bool {
        self.out_of_range.contains(&(row, col))
    }
}

/// Stateless converter between wire bytes and `MapGrid` values
pub struct CalibrationMapCodec;

impl CalibrationMapCodec {
    /// Decode big-endian unsigned cells into physical values
    /// (`physical = raw * scale + offset`). Out-of-bounds values are
    /// flagged in the grid, never altered.
    pub fn decode(
        raw: &[u8],
        descriptor: &CalibrationMapDescriptor,
    ) -> Result<MapGrid, CodecError> {
        let expected = descriptor.byte_len();
        if raw.len() != expected {
            return Err(CodecError::ShapeMismatch {
                name: descriptor.name.clone(),
                expected,
                actual: raw.len(),
            });
        }

        let width = descriptor.cell_width.bytes();
        let mut values = Vec::with_capacity(descriptor.cell_count());
        let mut out_of_range = Vec::new();

        for (index, cell) in raw.chunks_exact(width).enumerate() {
            let raw_value = read_be(cell);
            let physical = raw_value as f64 * descriptor.scale + descriptor.offset;
            if physical < descriptor.min || physical > descriptor.max {
                out_of_range.push((index / descriptor.cols, index % descriptor.cols));
            }
            values.push(physical);
        }

        Ok(MapGrid {
            rows: descriptor.rows,
            cols: descriptor.cols,
            values,
            out_of_range,
        })
    }

    /// Encode physical values back to big-endian cells
    /// (`raw = round((physical − offset) / scale)`). A raw value that
    /// does not fit the cell width is an error, never wrapped.
    pub fn encode(
        grid: &MapGrid,
        descriptor: &CalibrationMapDescriptor,
    ) -> Result<Vec<u8>, CodecError> {
        // values.len() is checked too: the fields are public, so a
        // hand-assembled grid may disagree with its own rows×cols
        if grid.rows != descriptor.rows
            || grid.cols != descriptor.cols
            || grid.values.len() != descriptor.cell_count()
        {
            return Err(CodecError::ShapeMismatch {
                name: descriptor.name.clone(),
                expected: descriptor.cell_count(),
                actual: grid.values.len(),
            });
        }

        let width = descriptor.cell_width;
        let mut bytes = Vec::with_capacity(descriptor.byte_len());

        for (index, &physical) in grid.values.iter().enumerate() {
            let raw = ((physical - descriptor.offset) / descriptor.scale).round();
            if raw < 0.0 || raw > width.max_raw() as f64 {
                return Err(CodecError::OutOfRange {
                    name: descriptor.name.clone(),
                    row: index / descriptor.cols,
                    col: index % descriptor.cols,
                    physical,
                    width: width.bytes(),
                });
            }
            write_be(&mut bytes, raw as u64, width);
        }

        Ok(bytes)
    }

    /// Decode a named map out of a loaded calibration
    pub fn decode_map(calibration: &Calibration, name: &str) -> Result<MapGrid, CodecError> {
        let descriptor = calibration.descriptor(name)?;
        Self::decode(calibration.map_bytes(descriptor), descriptor)
    }

    /// Encode an edited grid for a named map, returning the absolute ECU
    /// address of the region and its wire bytes.
    pub fn encode_map(
        calibration: &Calibration,
        name: &str,
        grid: &MapGrid,
    ) -> Result<(u32, Vec<u8>), CodecError> {
        let descriptor = calibration.descriptor(name)?;
        let bytes = Self::encode(grid, descriptor)?;
        Ok((descriptor.address, bytes))
    }
}

fn read_be(cell: &[u8]) -> u64 {
    cell.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn write_be(out: &mut Vec<u8>, value: u64, width: CellWidth) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - width.bytes()..]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn desc(cell_width: CellWidth, scale: f64, offset: f64, min: f64, max: f64) -> CalibrationMapDescriptor {
        CalibrationMapDescriptor {
            name: "fuel_base".to_string(),
            address: 0x1000,
            rows: 2,
            cols: 2,
            x_axis: Vec::new(),
            y_axis: Vec::new(),
            cell_width,
            scale,
            offset,
            min,
            max,
            unit: String::new(),
        }
    }

    #[test]
    fn test_u8_scale_both_directions() {
        // raw 200 at scale 0.1 is physical 20.0
        let d = desc(CellWidth::U8, 0.1, 0.0, 0.0, 25.5);
        let grid = CalibrationMapCodec::decode(&[200, 0, 100, 255], &d).unwrap();
        assert_eq!(grid.get(0, 0), Some(20.0));
        assert_eq!(grid.get(1, 0), Some(10.0));
        assert!(grid.out_of_range.is_empty());

        let bytes = CalibrationMapCodec::encode(&grid, &d).unwrap();
        assert_eq!(bytes, vec![200, 0, 100, 255]);
    }

    #[test]
    fn test_decode_flags_never_clamps() {
        // max 20.0, so raw 255 (25.5) is out of bounds but kept
        let d = desc(CellWidth::U8, 0.1, 0.0, 0.0, 20.0);
        let grid = CalibrationMapCodec::decode(&[0, 0, 0, 255], &d).unwrap();
        assert_eq!(grid.out_of_range, vec![(1, 1)]);
        assert!(grid.is_flagged(1, 1));
        assert_eq!(grid.get(1, 1), Some(25.5));
    }

    #[test]
    fn test_encode_rejects_overflow() {
        let d = desc(CellWidth::U8, 0.1, 0.0, 0.0, 100.0);
        let mut grid = CalibrationMapCodec::decode(&[0; 4], &d).unwrap();
        grid.set(0, 1, 30.0); // raw 300 does not fit u8
        let err = CalibrationMapCodec::encode(&grid, &d).unwrap_err();
        assert_eq!(
            err,
            CodecError::OutOfRange {
                name: "fuel_base".to_string(),
                row: 0,
                col: 1,
                physical: 30.0,
                width: 1,
            }
        );
    }

    #[test]
    fn test_encode_rejects_negative_raw() {
        let d = desc(CellWidth::U8, 0.1, 0.0, -10.0, 10.0);
        let mut grid = CalibrationMapCodec::decode(&[0; 4], &d).unwrap();
        grid.set(0, 0, -1.0);
        assert!(matches!(
            CalibrationMapCodec::encode(&grid, &d),
            Err(CodecError::OutOfRange { .. })
        ));
    }

    #[rstest]
    #[case(CellWidth::U16, vec![0x01, 0xF4, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x64])]
    #[case(CellWidth::U32, vec![
        0x00, 0x00, 0x01, 0xF4, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x64,
    ])]
    fn test_wide_cells_round_trip(#[case] width: CellWidth, #[case] raw: Vec<u8>) {
        let d = desc(width, 0.25, -10.0, -100.0, 1.0e9);
        let grid = CalibrationMapCodec::decode(&raw, &d).unwrap();
        // raw 500 * 0.25 - 10 = 115
        assert_eq!(grid.get(0, 0), Some(115.0));
        let encoded = CalibrationMapCodec::encode(&grid, &d).unwrap();
        assert_eq!(encoded, raw);
    }

    #[test]
    fn test_round_trip_stable_within_one_scale_unit() {
        let d = desc(CellWidth::U8, 0.1, 0.0, 0.0, 25.5);
        let raw: Vec<u8> = vec![0, 1, 127, 254];
        let first = CalibrationMapCodec::decode(&raw, &d).unwrap();
        let encoded = CalibrationMapCodec::encode(&first, &d).unwrap();
        let second = CalibrationMapCodec::decode(&encoded, &d).unwrap();
        for (a, b) in first.values.iter().zip(second.values.iter()) {
            assert!((a - b).abs() <= d.scale);
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let d = desc(CellWidth::U8, 1.0, 0.0, 0.0, 255.0);
        assert!(matches!(
            CalibrationMapCodec::decode(&[0; 3], &d),
            Err(CodecError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_encode_rejects_short_values_vec() {
        let d = desc(CellWidth::U8, 1.0, 0.0, 0.0, 255.0);
        let grid = MapGrid {
            rows: 2,
            cols: 2,
            values: vec![1.0, 2.0, 3.0],
            out_of_range: Vec::new(),
        };
        assert!(matches!(
            CalibrationMapCodec::encode(&grid, &d),
            Err(CodecError::ShapeMismatch { actual: 3, .. })
        ));
    }
}
