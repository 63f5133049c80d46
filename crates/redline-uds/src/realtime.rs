//! Realtime parameter polling with broadcast fan-out.
//!
//! The poller reads a fixed set of DIDs on a cadence and publishes
//! samples to any number of subscribers. Polling shares the session's
//! I/O lock with everything else, and is suspended entirely while a
//! flash is in progress.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::DiagnosticSession;
use crate::SessionState;

/// One polled parameter value
#[derive(Debug, Clone, serde::Serialize)]
pub struct ParameterSample {
    pub did: u16,
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Periodic DID poller over a shared `DiagnosticSession`
pub struct RealtimePoller {
    session: DiagnosticSession,
    dids: Vec<u16>,
    interval: Duration,
    tx: broadcast::Sender<ParameterSample>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RealtimePoller {
    pub fn new(session: DiagnosticSession, dids: Vec<u16>, interval: Duration) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            session,
            dids,
            interval,
            tx,
            handle: parking_lot::Mutex::new(None),
        }
    }

    /// Subscribe to the sample stream. Slow subscribers lag and miss
    /// samples rather than applying backpressure to the poll loop.
    pub fn subscribe(&self) -> broadcast::Receiver<ParameterSample> {
        self.tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start the poll loop. Restarting while running replaces the task.
    pub fn start(&self) {
        self.stop();

        let session = self.session.clone();
        let dids = self.dids.clone();
        let interval = self.interval;
        let tx = self.tx.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if session.state() == SessionState::Disconnected {
                    warn!("Session disconnected: realtime polling stopped");
                    break;
                }
                // The flash path owns the link while a reflash runs
                if session.flash_mode_active() {
                    debug!("Flash in progress: skipping realtime poll tick");
                    continue;
                }

                for did in &dids {
                    match session.read_parameter(*did).await {
                        Ok(data) => {
                            let sample = ParameterSample {
                                did: *did,
                                data,
                                timestamp: Utc::now(),
                            };
                            // No subscribers is fine
                            let _ = tx.send(sample);
                        }
                        Err(e) => {
                            debug!(did = format!("0x{:04X}", did), error = %e, "Poll read failed");
                        }
                    }
                }
            }
        });

        *self.handle.lock() = Some(handle);
        debug!(dids = self.dids.len(), interval_ms = self.interval.as_millis() as u64, "Realtime poller started");
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            debug!("Realtime poller stopped");
        }
    }
}

impl Drop for RealtimePoller {
    fn drop(&mut self) {
        self.stop();
    }
}
