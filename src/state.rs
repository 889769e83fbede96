// Session state management

use crate::error::{PlayerError, Result};
use parking_lot::RwLock;
use std::sync::Arc;

/// Session state
///
/// A session moves `Idle -> Starting -> Playing -> Idle`. A start that fails
/// synchronously, or that is preempted by a later request before its
/// asynchronous setup completes, returns straight to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No player is active
    Idle,
    /// A source is being set up (download, decode, stream init)
    Starting,
    /// A source is audible and the visualization loop is running
    Playing,
}

/// Thread-safe session state container
#[derive(Clone)]
pub struct SessionStateContainer {
    state: Arc<RwLock<SessionState>>,
}

impl SessionStateContainer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState::Idle)),
        }
    }

    pub fn get(&self) -> SessionState {
        *self.state.read()
    }

    /// Apply a state change after validating it against the transition
    /// table. An invalid transition leaves the state untouched.
    pub fn transition(&self, new_state: SessionState) -> Result<()> {
        let mut state = self.state.write();
        Self::validate_transition(*state, new_state)?;
        *state = new_state;
        log::debug!("Session state changed to: {:?}", new_state);
        Ok(())
    }

    /// Validate a session state transition
    pub fn validate_transition(from: SessionState, to: SessionState) -> Result<()> {
        match (from, to) {
            (SessionState::Idle, SessionState::Starting) => Ok(()),

            (SessionState::Starting, SessionState::Playing) => Ok(()),
            // Start failed synchronously or was preempted
            (SessionState::Starting, SessionState::Idle) => Ok(()),
            // Fallback replaces an in-flight start with another start
            (SessionState::Starting, SessionState::Starting) => Ok(()),

            // Manual stop, natural end, error, page hidden/unloaded
            (SessionState::Playing, SessionState::Idle) => Ok(()),
            // A different player was toggled while one was playing
            (SessionState::Playing, SessionState::Starting) => Ok(()),

            // stop() is idempotent
            (SessionState::Idle, SessionState::Idle) => Ok(()),

            _ => Err(PlayerError::InvalidState(format!(
                "Invalid session transition from {:?} to {:?}",
                from, to
            ))),
        }
    }
}

impl Default for SessionStateContainer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_idle() {
        let container = SessionStateContainer::new();
        assert_eq!(container.get(), SessionState::Idle);
    }

    #[test]
    fn test_transition_applies_valid_changes() {
        let container = SessionStateContainer::new();
        assert!(container.transition(SessionState::Starting).is_ok());
        assert_eq!(container.get(), SessionState::Starting);
        assert!(container.transition(SessionState::Playing).is_ok());
        assert_eq!(container.get(), SessionState::Playing);
    }

    #[test]
    fn test_transition_rejects_and_preserves_state() {
        let container = SessionStateContainer::new();
        assert!(container.transition(SessionState::Playing).is_err());
        assert_eq!(container.get(), SessionState::Idle);
    }

    #[test]
    fn test_valid_transitions() {
        use SessionState::*;
        for (from, to) in [
            (Idle, Starting),
            (Starting, Playing),
            (Starting, Idle),
            (Starting, Starting),
            (Playing, Idle),
            (Playing, Starting),
            (Idle, Idle),
        ] {
            assert!(SessionStateContainer::validate_transition(from, to).is_ok());
        }
    }

    #[test]
    fn test_invalid_transitions() {
        use SessionState::*;
        for (from, to) in [(Idle, Playing), (Playing, Playing)] {
            assert!(SessionStateContainer::validate_transition(from, to).is_err());
        }
    }
}
