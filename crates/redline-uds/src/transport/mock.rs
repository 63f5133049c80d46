//! Scripted mock transport for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{Frame, TransportError, TransportLink};

/// Direction of a logged frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficDirection {
    Tx,
    Rx,
}

/// One entry in the transport traffic log
#[derive(Debug, Clone)]
pub struct LoggedFrame {
    pub direction: TrafficDirection,
    pub payload: Vec<u8>,
}

/// Scripted mock link: canned request-to-response pairs with exact-first,
/// then prefix matching, plus failure injection and a traffic log for
/// interleaving assertions.
pub struct MockTransport {
    open: AtomicBool,
    source: u32,
    latency: Duration,
    rules: RwLock<Vec<(Vec<u8>, Vec<u8>)>>,
    /// Drop the response for the next N requests matching a prefix
    drop_rules: Mutex<Vec<(Vec<u8>, usize)>>,
    inbound: Mutex<VecDeque<Frame>>,
    log: Mutex<Vec<LoggedFrame>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            source: 0x7E8,
            latency: Duration::ZERO,
            rules: RwLock::new(Vec::new()),
            drop_rules: Mutex::new(Vec::new()),
            inbound: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Script a response for a request (exact match wins over prefix match)
    pub fn on_request(&self, request: Vec<u8>, response: Vec<u8>) {
        self.rules.write().push((request, response));
    }

    /// Swallow the response for the next `count` requests starting with
    /// `prefix` (the send itself still succeeds, emulating a dead ECU)
    pub fn drop_responses(&self, prefix: Vec<u8>, count: usize) {
        self.drop_rules.lock().push((prefix, count));
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Snapshot of all frames seen on the link, in order
    pub fn traffic_log(&self) -> Vec<LoggedFrame> {
        self.log.lock().clone()
    }

    fn should_drop(&self, request: &[u8]) -> bool {
        let mut rules = self.drop_rules.lock();
        for rule in rules.iter_mut() {
            if rule.1 > 0 && request.starts_with(&rule.0) {
                rule.1 -= 1;
                return true;
            }
        }
        false
    }

    fn find_response(&self, request: &[u8]) -> Option<Vec<u8>> {
        let rules = self.rules.read();
        for (req, resp) in rules.iter() {
            if req.as_slice() == request {
                return Some(resp.clone());
            }
        }
        for (req, resp) in rules.iter() {
            if request.starts_with(req) {
                return Some(resp.clone());
            }
        }
        None
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportLink for MockTransport {
    async fn send(&self, _target: u32, payload: &[u8]) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::LinkClosed);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.log.lock().push(LoggedFrame {
            direction: TrafficDirection::Tx,
            payload: payload.to_vec(),
        });

        if self.should_drop(payload) {
            return Ok(());
        }

        if let Some(response) = self.find_response(payload) {
            self.inbound
                .lock()
                .push_back(Frame::new(self.source, response));
        }
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Frame, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.open.load(Ordering::SeqCst) {
                return Err(TransportError::LinkClosed);
            }
            if let Some(frame) = self.inbound.lock().pop_front() {
                self.log.lock().push(LoggedFrame {
                    direction: TrafficDirection::Rx,
                    payload: frame.payload.clone(),
                });
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
