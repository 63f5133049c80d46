//! Loopback `TransportLink` bound to a bench ECU

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use redline_uds::uds::service_id;
use redline_uds::{Frame, TransportError, TransportLink};

use crate::ecu::SimEcu;

/// ECU response address on the bench
pub const SIM_RESPONSE_ID: u32 = 0x7E8;

/// In-process link: requests are handed straight to the ECU model and
/// its responses queue up for `receive`.
pub struct SimTransport {
    ecu: Arc<SimEcu>,
    latency: Duration,
    open: AtomicBool,
    inbound: Mutex<VecDeque<Frame>>,
    /// Requests that get a ResponsePending frame before the real answer
    pending_injections: AtomicUsize,
}

impl SimTransport {
    pub fn new(ecu: Arc<SimEcu>) -> Self {
        Self {
            ecu,
            latency: Duration::ZERO,
            open: AtomicBool::new(true),
            inbound: Mutex::new(VecDeque::new()),
            pending_injections: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn ecu(&self) -> &Arc<SimEcu> {
        &self.ecu
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// The next `count` answered requests are preceded by a
    /// `[0x7F, sid, 0x78]` ResponsePending frame
    pub fn inject_response_pending(&self, count: usize) {
        self.pending_injections.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportLink for SimTransport {
    async fn send(&self, _target: u32, payload: &[u8]) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::LinkClosed);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let response = self.ecu.process_request(payload);
        if response.is_empty() {
            debug!(request = %hex::encode(payload), "ECU sent no response");
            return Ok(());
        }

        let mut inbound = self.inbound.lock();
        let inject = self
            .pending_injections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if inject {
            let sid = payload.first().copied().unwrap_or(0x00);
            inbound.push_back(Frame::new(
                SIM_RESPONSE_ID,
                vec![service_id::NEGATIVE_RESPONSE, sid, 0x78],
            ));
        }
        inbound.push_back(Frame::new(SIM_RESPONSE_ID, response));
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Frame, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.open.load(Ordering::SeqCst) {
                return Err(TransportError::LinkClosed);
            }
            if let Some(frame) = self.inbound.lock().pop_front() {
                return Ok(frame);
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout(timeout.as_millis() as u64));
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecu::SimEcuConfig;

    #[tokio::test]
    async fn test_loopback_round_trip() {
        let ecu = Arc::new(SimEcu::new(SimEcuConfig::default()));
        let link = SimTransport::new(ecu);

        link.send(0x7E0, &[0x3E, 0x00]).await.unwrap();
        let frame = link.receive(Duration::from_millis(50)).await.unwrap();
        assert_eq!(frame.source, SIM_RESPONSE_ID);
        assert_eq!(frame.payload, vec![0x7E, 0x00]);
    }

    #[tokio::test]
    async fn test_no_response_times_out() {
        let ecu = Arc::new(SimEcu::new(SimEcuConfig::default()));
        ecu.swallow_tester_present(1);
        let link = SimTransport::new(ecu);

        link.send(0x7E0, &[0x3E, 0x00]).await.unwrap();
        let err = link.receive(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_response_pending_injection() {
        let ecu = Arc::new(SimEcu::new(SimEcuConfig::default()));
        let link = SimTransport::new(ecu);
        link.inject_response_pending(1);

        link.send(0x7E0, &[0x3E, 0x00]).await.unwrap();
        let first = link.receive(Duration::from_millis(50)).await.unwrap();
        assert_eq!(first.payload, vec![0x7F, 0x3E, 0x78]);
        let second = link.receive(Duration::from_millis(50)).await.unwrap();
        assert_eq!(second.payload, vec![0x7E, 0x00]);
    }
}
