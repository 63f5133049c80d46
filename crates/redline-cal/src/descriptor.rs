//! Calibration map descriptors and the loaded calibration image

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Byte width of one map cell, big-endian unsigned on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellWidth {
    U8,
    U16,
    U32,
}

impl CellWidth {
    pub fn bytes(&self) -> usize {
        match self {
            CellWidth::U8 => 1,
            CellWidth::U16 => 2,
            CellWidth::U32 => 4,
        }
    }

    /// Largest raw value the cell can hold
    pub fn max_raw(&self) -> u64 {
        match self {
            CellWidth::U8 => u8::MAX as u64,
            CellWidth::U16 => u16::MAX as u64,
            CellWidth::U32 => u32::MAX as u64,
        }
    }
}

/// Static description of one calibration map inside the image.
///
/// Immutable after load; `physical = raw * scale + offset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationMapDescriptor {
    pub name: String,
    /// Absolute ECU address of the first cell
    pub address: u32,
    pub rows: usize,
    pub cols: usize,
    /// Axis breakpoints in physical units (x indexes columns, y rows).
    /// Empty means the axis is implicit.
    #[serde(default)]
    pub x_axis: Vec<f64>,
    #[serde(default)]
    pub y_axis: Vec<f64>,
    pub cell_width: CellWidth,
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub unit: String,
}

impl CalibrationMapDescriptor {
    /// Total bytes this map occupies in the image
    pub fn byte_len(&self) -> usize {
        self.rows * self.cols * self.cell_width.bytes()
    }

    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    fn validate(&self) -> Result<(), CodecError> {
        let invalid = |reason: &str| CodecError::InvalidDescriptor {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.rows == 0 || self.cols == 0 {
            return Err(invalid("zero rows or columns"));
        }
        if self.scale == 0.0 || !self.scale.is_finite() {
            return Err(invalid("scale must be finite and non-zero"));
        }
        if self.min > self.max {
            return Err(invalid("min exceeds max"));
        }
        if !self.x_axis.is_empty() && self.x_axis.len() != self.cols {
            return Err(invalid("x axis length does not match columns"));
        }
        if !self.y_axis.is_empty() && self.y_axis.len() != self.rows {
            return Err(invalid("y axis length does not match rows"));
        }
        Ok(())
    }
}

/// Descriptor list as stored in a YAML definition file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationDefinition {
    pub id: String,
    /// Image base address; descriptor addresses are absolute
    pub base_address: u32,
    pub maps: Vec<CalibrationMapDescriptor>,
}

/// A loaded ECU calibration image: descriptors plus the raw blob.
///
/// Construction validates every descriptor against the blob bounds and
/// rejects overlapping address ranges, so downstream code can slice
/// without re-checking.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub id: String,
    pub base_address: u32,
    pub maps: Vec<CalibrationMapDescriptor>,
    pub data: Bytes,
}

impl Calibration {
    pub fn new(
        id: impl Into<String>,
        base_address: u32,
        maps: Vec<CalibrationMapDescriptor>,
        data: Bytes,
    ) -> Result<Self, CodecError> {
        for map in &maps {
            map.validate()?;
        }

        // Bounds: every map must fall inside the blob
        for map in &maps {
            let start = map.address.checked_sub(base_address).map(|o| o as usize);
            let end = start.and_then(|s| s.checked_add(map.byte_len()));
            match (start, end) {
                (Some(_), Some(end)) if end <= data.len() => {}
                _ => {
                    return Err(CodecError::DescriptorOutOfBounds {
                        name: map.name.clone(),
                        address: map.address,
                        len: map.byte_len(),
                        blob_len: data.len(),
                    })
                }
            }
        }

        // Overlap: compare every pair of address ranges
        for (i, a) in maps.iter().enumerate() {
            for b in &maps[i + 1..] {
                let a_end = a.address as u64 + a.byte_len() as u64;
                let b_end = b.address as u64 + b.byte_len() as u64;
                if (a.address as u64) < b_end && (b.address as u64) < a_end {
                    return Err(CodecError::OverlappingDescriptors {
                        first: a.name.clone(),
                        second: b.name.clone(),
                    });
                }
            }
        }

        Ok(Self {
            id: id.into(),
            base_address,
            maps,
            data,
        })
    }

    /// Pair a YAML definition with its binary image
    pub fn from_definition(definition: CalibrationDefinition, data: Bytes) -> Result<Self, CodecError> {
        Self::new(definition.id, definition.base_address, definition.maps, data)
    }

    pub fn descriptor(&self, name: &str) -> Result<&CalibrationMapDescriptor, CodecError> {
        self.maps
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| CodecError::UnknownMap {
                name: name.to_string(),
            })
    }

    /// Raw bytes of one map, already bounds-checked at load
    pub fn map_bytes(&self, descriptor: &CalibrationMapDescriptor) -> &[u8] {
        let start = (descriptor.address - self.base_address) as usize;
        &self.data[start..start + descriptor.byte_len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn desc(name: &str, address: u32, rows: usize, cols: usize) -> CalibrationMapDescriptor {
        CalibrationMapDescriptor {
            name: name.to_string(),
            address,
            rows,
            cols,
            x_axis: Vec::new(),
            y_axis: Vec::new(),
            cell_width: CellWidth::U8,
            scale: 0.1,
            offset: 0.0,
            min: 0.0,
            max: 25.5,
            unit: "deg".to_string(),
        }
    }

    #[test]
    fn test_load_validates_bounds() {
        let err = Calibration::new(
            "cal",
            0x1000,
            vec![desc("fuel", 0x1000, 16, 16)],
            Bytes::from(vec![0u8; 128]),
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::DescriptorOutOfBounds { .. }));
    }

    #[test]
    fn test_load_rejects_overlap() {
        let err = Calibration::new(
            "cal",
            0x1000,
            vec![desc("fuel", 0x1000, 16, 16), desc("spark", 0x10FF, 4, 4)],
            Bytes::from(vec![0u8; 0x400]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            CodecError::OverlappingDescriptors {
                first: "fuel".to_string(),
                second: "spark".to_string()
            }
        );
    }

    #[test]
    fn test_adjacent_maps_do_not_overlap() {
        let cal = Calibration::new(
            "cal",
            0x1000,
            vec![desc("fuel", 0x1000, 16, 16), desc("spark", 0x1100, 4, 4)],
            Bytes::from(vec![0u8; 0x400]),
        )
        .unwrap();
        assert_eq!(cal.maps.len(), 2);
        assert_eq!(cal.map_bytes(&cal.maps[1]).len(), 16);
    }

    #[test]
    fn test_invalid_descriptor_rejected() {
        let mut bad = desc("fuel", 0x1000, 16, 16);
        bad.scale = 0.0;
        let err =
            Calibration::new("cal", 0x1000, vec![bad], Bytes::from(vec![0u8; 0x400])).unwrap_err();
        assert!(matches!(err, CodecError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_axis_length_checked() {
        let mut bad = desc("fuel", 0x1000, 2, 2);
        bad.x_axis = vec![1.0, 2.0, 3.0];
        let err =
            Calibration::new("cal", 0x1000, vec![bad], Bytes::from(vec![0u8; 16])).unwrap_err();
        assert!(matches!(err, CodecError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_definition_yaml_round_trip() {
        let yaml = r#"
id: mk7-stage1
base_address: 0x1000
maps:
  - name: fuel_base
    address: 0x1000
    rows: 16
    cols: 16
    cell_width: u8
    scale: 0.1
    min: 0.0
    max: 25.5
    unit: ms
"#;
        let def: CalibrationDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.maps[0].cell_width, CellWidth::U8);
        assert_eq!(def.maps[0].offset, 0.0);
        let cal = Calibration::from_definition(def, Bytes::from(vec![0u8; 256])).unwrap();
        assert_eq!(cal.id, "mk7-stage1");
    }
}
