//! Session state machine

use crate::{Error, Result};

/// Transport session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket not opened yet
    Disconnected,

    /// Socket handshake in progress
    Connecting,

    /// Socket open, no token presented
    Connected,

    /// `authenticate` sent, awaiting acknowledgement
    Authenticating,

    /// Token accepted, streams may be opened
    Authenticated,

    /// Socket lost, reconnect in progress
    Reconnecting,

    /// Closed
    Closed,
}

impl SessionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Authenticating)
                | (Authenticating, Authenticating)
                | (Authenticated, Authenticating)
                | (Authenticating, Authenticated)
                | (Authenticating, Connected)
                | (Connected, Reconnecting)
                | (Authenticating, Reconnecting)
                | (Authenticated, Reconnecting)
                | (Reconnecting, Connected)
                | (Reconnecting, Disconnected)
                | (_, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {}", self),
                actual: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }

    /// Whether the socket is usable for frames
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Authenticating | SessionState::Authenticated
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let mut state = SessionState::Disconnected;
        assert!(state.transition(SessionState::Connecting).is_ok());
        assert!(state.transition(SessionState::Connected).is_ok());
        assert!(state.transition(SessionState::Authenticating).is_ok());
        assert!(state.transition(SessionState::Authenticated).is_ok());
    }

    #[test]
    fn test_invalid_transition() {
        let mut state = SessionState::Disconnected;
        assert!(state.transition(SessionState::Authenticated).is_err());
    }

    #[test]
    fn test_close_from_any_state() {
        let mut state = SessionState::Reconnecting;
        assert!(state.transition(SessionState::Closed).is_ok());
    }

    #[test]
    fn test_reconnect_lands_unauthenticated() {
        let mut state = SessionState::Authenticated;
        assert!(state.transition(SessionState::Reconnecting).is_ok());
        assert!(state.transition(SessionState::Connected).is_ok());
        assert!(!matches!(state, SessionState::Authenticated));
        assert!(state.transition(SessionState::Authenticating).is_ok());
    }

    #[test]
    fn test_failed_connect_returns_to_disconnected() {
        let mut state = SessionState::Connecting;
        assert!(state.transition(SessionState::Disconnected).is_ok());
        assert!(state.transition(SessionState::Connecting).is_ok());
    }

    #[test]
    fn test_reauthenticate_with_new_token() {
        let mut state = SessionState::Authenticated;
        assert!(state.transition(SessionState::Authenticating).is_ok());
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut state = SessionState::Closed;
        assert!(state.transition(SessionState::Connecting).is_err());
        assert!(!state.is_connected());
    }
}
