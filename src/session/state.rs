//! Session lifecycle states

use serde::Serialize;
use std::fmt;

/// Where a session is in its lifecycle.
///
/// `Idle → Connecting → Active → Closing → Idle`, with `Error` entered when
/// acquisition fails and always followed by `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Closing,
    Error,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Active)
                | (Connecting, Closing)
                | (Connecting, Error)
                | (Active, Closing)
                | (Closing, Idle)
                | (Error, Idle)
        )
    }

    /// True between a start request and the return to `Idle`
    pub fn is_running(self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_lifecycle_transitions() {
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Active));
        assert!(Active.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Idle));
        assert!(Connecting.can_transition_to(Error));
        assert!(Error.can_transition_to(Idle));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Idle.can_transition_to(Active));
        assert!(!Active.can_transition_to(Connecting));
        assert!(!Active.can_transition_to(Idle));
        assert!(!Error.can_transition_to(Active));
        assert!(!Closing.can_transition_to(Active));
    }

    #[test]
    fn test_display() {
        assert_eq!(Active.to_string(), "active");
        assert!(!Idle.is_running());
        assert!(Closing.is_running());
    }
}
