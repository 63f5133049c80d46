//! Calibration codec and checksum errors

use thiserror::Error;

/// Configuration/load-time and conversion failures.
///
/// Descriptor problems surface when the `Calibration` is loaded, never
/// later at flash time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("Map '{name}' at 0x{address:08X}+{len} exceeds the {blob_len}-byte image")]
    DescriptorOutOfBounds {
        name: String,
        address: u32,
        len: usize,
        blob_len: usize,
    },

    #[error("Maps '{first}' and '{second}' overlap in the image")]
    OverlappingDescriptors { first: String, second: String },

    #[error("Map '{name}' is invalid: {reason}")]
    InvalidDescriptor { name: String, reason: String },

    #[error("Map '{name}': expected {expected} bytes, got {actual}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error(
        "Map '{name}' cell ({row},{col}): physical {physical} encodes outside the {width}-byte cell"
    )]
    OutOfRange {
        name: String,
        row: usize,
        col: usize,
        physical: f64,
        width: usize,
    },

    #[error("No map named '{name}' in this calibration")]
    UnknownMap { name: String },
}

/// Checksum patch/verify failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("Checksum field at offset {offset}+{width} exceeds the {image_len}-byte image")]
    FieldOutOfBounds {
        offset: usize,
        width: usize,
        image_len: usize,
    },
}
