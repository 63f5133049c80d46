//! Seed/key security access algorithms for ECU diagnostics.
//!
//! ECUs gate protected services (memory writes, routines, reflashing) behind
//! a seed/key exchange: the tester requests a seed, derives a key from it
//! with a vendor-specific transform, and sends the key back. This crate
//! holds those transforms and a registry that maps `(ecu_type, level)`
//! pairs to them.
//!
//! The transforms here emulate vendor obfuscation schemes. They are pure
//! functions of the seed (and optionally the VIN) with no cryptographic
//! strength, which matches what most production bootloaders actually ship.

pub mod algorithm;
pub mod error;
pub mod level;
pub mod registry;

pub use algorithm::{AddReflect, EcuAccess27, MulShift16, SeedKeyAlgorithm, VinMix32};
pub use error::SecurityError;
pub use level::SecurityLevel;
pub use registry::{AlgorithmHandle, SecurityAlgorithmRegistry};
