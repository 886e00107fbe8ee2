//! Client readiness state machine and events

use crate::{Error, Result};

/// Readiness of a client
///
/// `Dead` and `Closed` are permanent; `Readable` toggles with
/// `Reauthenticating` whenever the token is replaced or the socket reconnects.
#[derive(Debug, Clone)]
pub enum Readiness {
    /// Created, not connecting yet
    Idle,

    /// Acquiring a token, opening and authenticating the socket
    Connecting,

    /// Authenticated; requests are released immediately
    Readable,

    /// Token replaced or socket reconnected; waiting for the new acknowledgement
    Reauthenticating,

    /// Failed permanently with the stored error
    Dead(Error),

    /// Closed by the application
    Closed,
}

impl Readiness {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: &Readiness) -> bool {
        use Readiness::*;

        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Readable)
                | (Readable, Reauthenticating)
                | (Reauthenticating, Reauthenticating)
                | (Reauthenticating, Readable)
                | (Idle | Connecting | Readable | Reauthenticating, Dead(_))
                | (Idle | Connecting | Readable | Reauthenticating, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: Readiness) -> Result<()> {
        if !self.can_transition_to(&next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {}", self),
                actual: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }

    /// Requests are released immediately
    pub fn is_readable(&self) -> bool {
        matches!(self, Readiness::Readable)
    }

    /// Closed by the application
    pub fn is_closed(&self) -> bool {
        matches!(self, Readiness::Closed)
    }

    /// Dead or closed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Readiness::Dead(_) | Readiness::Closed)
    }

    /// Error every request fails with in this state, if any
    pub fn failure(&self) -> Option<Error> {
        match self {
            Readiness::Dead(e) => Some(e.clone()),
            Readiness::Closed => Some(Error::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Readable => write!(f, "readable"),
            Self::Reauthenticating => write!(f, "reauthenticating"),
            Self::Dead(_) => write!(f, "dead"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Event published to client subscribers
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Client became readable
    Readable,
    /// Client went dead; published once
    Error(Error),
    /// Socket lost; requests queue until re-authenticated
    Disconnected,
    /// Socket reconnect attempt
    Reconnecting {
        /// Attempt number, from 1
        attempt: u32,
    },
    /// Socket reconnect attempts exhausted
    ReconnectFailed(Error),
    /// Token replaced
    TokenRefreshed {
        /// Generation of the new token
        generation: u64,
    },
    /// Client closed
    Closed,
}
