//! Diagnostic session state machine

#[allow(clippy::module_inception)]
mod session;
mod state;

pub use session::{DiagnosticSession, FlashModeGuard};
pub use state::{SecuritySubState, SessionState};
