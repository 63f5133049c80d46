//! Flash orchestration errors

use thiserror::Error;

use redline_cal::ChecksumError;
use redline_security::SecurityError;
use redline_uds::DiagError;

/// Failures during a flash run. Integrity failures (verify mismatch,
/// checksum patch) are always fatal for the current flash.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlashError {
    #[error(transparent)]
    Diag(#[from] DiagError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error("Block {block} at 0x{address:08X} failed readback verification")]
    VerifyMismatch { block: usize, address: u32 },

    #[error("Flash cancelled after {blocks_written} blocks")]
    Cancelled { blocks_written: usize },

    #[error("Session went disconnected after {blocks_written} blocks")]
    SessionLost { blocks_written: usize },

    #[error("Invalid block size {size}: must be between {min} and {max} bytes")]
    InvalidBlockSize { size: usize, min: usize, max: usize },

    #[error("Backup store: {reason}")]
    Backup { reason: String },

    #[error("No backup available for ECU type '{ecu_type}'")]
    NoBackup { ecu_type: String },

    #[error("Post-flash self check failed: {reason}")]
    SelfCheckFailed { reason: String },
}
