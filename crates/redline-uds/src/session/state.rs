//! Session and security state types

use crate::uds::SessionKind;

/// Diagnostic session state.
///
/// `Disconnected` is entered when keepalive exhausts its failure budget;
/// from there every operation is rejected locally until the caller
/// re-establishes the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Default,
    Extended,
    Programming,
}

impl SessionState {
    pub fn from_kind(kind: SessionKind) -> Self {
        match kind {
            SessionKind::Default => SessionState::Default,
            SessionKind::Extended => SessionState::Extended,
            SessionKind::Programming => SessionState::Programming,
        }
    }

    /// Non-default sessions time out without keepalive
    pub fn needs_keepalive(&self) -> bool {
        matches!(self, SessionState::Extended | SessionState::Programming)
    }

    /// Security access is only exchangeable in these states
    pub fn allows_security_access(&self) -> bool {
        matches!(self, SessionState::Extended | SessionState::Programming)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Default => "default",
            SessionState::Extended => "extended",
            SessionState::Programming => "programming",
        };
        f.write_str(s)
    }
}

/// Security sub-state, crossed with the session state.
///
/// `Unlocked` is reachable only from `Extended`/`Programming` via a
/// verified key exchange, and every session transition relocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecuritySubState {
    Locked,
    Unlocked(u8),
}

impl SecuritySubState {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, SecuritySubState::Unlocked(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keepalive_states() {
        assert!(!SessionState::Default.needs_keepalive());
        assert!(!SessionState::Disconnected.needs_keepalive());
        assert!(SessionState::Extended.needs_keepalive());
        assert!(SessionState::Programming.needs_keepalive());
    }

    #[test]
    fn test_security_access_states() {
        assert!(!SessionState::Default.allows_security_access());
        assert!(SessionState::Extended.allows_security_access());
        assert!(SessionState::Programming.allows_security_access());
    }
}
