//! Calibration data layer: map descriptors, raw/physical conversion,
//! and image checksum handling.
//!
//! A `Calibration` pairs a YAML-described set of map descriptors with a
//! raw ECU image and validates both at load time. `CalibrationMapCodec`
//! converts between wire bytes and physical engineering values;
//! `ChecksumEngine` computes, patches and verifies the whole-image
//! checksum per the target ECU family's configuration.

pub mod checksum;
pub mod codec;
pub mod descriptor;
pub mod error;
pub mod precision;

pub use checksum::{ChecksumAlgorithm, ChecksumEngine};
pub use codec::{CalibrationMapCodec, MapGrid};
pub use descriptor::{Calibration, CalibrationDefinition, CalibrationMapDescriptor, CellWidth};
pub use error::{ChecksumError, CodecError};
