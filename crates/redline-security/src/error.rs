//! Security access error types

use thiserror::Error;

/// Errors raised by seed/key handling, both on the algorithm side
/// (resolution, length validation) and on the session side (lockout,
/// operations attempted while locked).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("No security algorithm registered for ECU type '{ecu_type}' level {level}")]
    UnsupportedAlgorithm { ecu_type: String, level: u8 },

    #[error("Security level {level} out of range: must be 1..=0x3F")]
    InvalidLevel { level: u8 },

    #[error("Seed length mismatch: expected {expected} bytes, got {actual}")]
    SeedLengthMismatch { expected: usize, actual: usize },

    #[error("Derived key length mismatch: expected {expected} bytes, got {actual}")]
    KeyLengthMismatch { expected: usize, actual: usize },

    #[error("Algorithm requires a VIN but none was provided")]
    VinRequired,

    #[error("Invalid VIN '{0}': expected 17 ASCII characters")]
    InvalidVin(String),

    #[error("Security key rejected by ECU (attempt {attempts} of {max_attempts})")]
    KeyRejected { attempts: u32, max_attempts: u32 },

    #[error("Security access locked out for {remaining_secs}s after {attempts} failed attempts")]
    LockoutActive { attempts: u32, remaining_secs: u64 },

    #[error("'{operation}' rejected locally: security access is locked")]
    AccessLocked { operation: &'static str },

    #[error("No pending seed for level {level}; request a seed first")]
    NoPendingSeed { level: u8 },
}
