//! Transport link trait and frame type

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::TransportError;

/// A frame received from the link
#[derive(Debug, Clone)]
pub struct Frame {
    /// Address of the sender (ECU response address)
    pub source: u32,
    /// Raw service payload
    pub payload: Vec<u8>,
    /// When the frame was received
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(source: u32, payload: Vec<u8>) -> Self {
        Self {
            source,
            payload,
            timestamp: Instant::now(),
        }
    }
}

/// Opaque bidirectional addressed-frame channel.
///
/// No framing or session semantics live here; the owning
/// `DiagnosticSession` serializes all request/response exchanges through
/// the link, and exactly one session owns a link at a time.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Send a raw payload to the target address
    async fn send(&self, target: u32, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next incoming frame, bounded by `timeout`
    async fn receive(&self, timeout: Duration) -> Result<Frame, TransportError>;

    /// Whether the underlying channel is usable
    fn is_open(&self) -> bool;
}
