//! Bench ECU simulator.
//!
//! `SimEcu` is an in-memory UDS server implementing the stack's wire
//! contract, with fault injection for the failure-path tests (swallowed
//! keepalives, corrupted readbacks, busy storms, bootloader-stuck
//! recovery drills). `SimTransport` adapts it to `TransportLink` so a
//! real `DiagnosticSession` can drive it unmodified.

pub mod ecu;
pub mod transport;

pub use ecu::{SimEcu, SimEcuConfig};
pub use transport::{SimTransport, SIM_RESPONSE_ID};
