//! UDS-style diagnostic session layer.
//!
//! This crate provides the protocol half of the stack: an abstract
//! addressed-frame transport (`TransportLink`), the UDS wire codec
//! (service ids, negative response codes, request/response framing), and
//! the `DiagnosticSession` state machine that drives session control,
//! security access, memory and parameter I/O, routine control, DTC
//! handling and keepalive over a single exclusively-owned link.
//!
//! Physical transports (CAN, J2534 pass-thru, serial bridges) live
//! out-of-tree behind the `TransportLink` trait; the in-tree adapters are
//! a scripted mock for unit tests and the bench ECU loopback in
//! `redline-sim`.

pub mod config;
pub mod realtime;
pub mod session;
pub mod transport;
pub mod uds;

pub use config::{KeepaliveConfig, RetryConfig, SecuritySessionConfig, SessionConfig, TimingConfig};
pub use realtime::{ParameterSample, RealtimePoller};
pub use session::{DiagnosticSession, FlashModeGuard, SecuritySubState, SessionState};
pub use transport::{Frame, MockTransport, TransportError, TransportLink};
pub use uds::{DiagError, Nrc, SessionKind};
