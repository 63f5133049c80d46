//! Diagnostic protocol errors

use thiserror::Error;

use super::Nrc;
use crate::transport::TransportError;
use redline_security::SecurityError;

/// Errors surfaced by `DiagnosticSession` operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiagError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Negative response to 0x{service:02X}: {nrc}")]
    NegativeResponse { service: u8, nrc: Nrc },

    #[error("Response service id mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedService { expected: u8, actual: u8 },

    #[error("Malformed response to 0x{service:02X}: {detail}")]
    MalformedResponse { service: u8, detail: String },

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("Session is disconnected")]
    Disconnected,

    #[error("Session transition to {kind} rejected: {reason}")]
    TransitionRejected { kind: &'static str, reason: &'static str },
}

impl DiagError {
    /// The NRC carried by this error, if it is a negative response
    pub fn nrc(&self) -> Option<Nrc> {
        match self {
            DiagError::NegativeResponse { nrc, .. } => Some(*nrc),
            _ => None,
        }
    }
}
