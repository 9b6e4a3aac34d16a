use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of the single upstream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
        })
    }
}

/// What callers see of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub qr_code: Option<String>,
    pub error: Option<String>,
}

/// Session state owned by the client.
///
/// `qr_code` is only ever present while `Connecting`; every transition out of
/// `Connecting` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub state: ConnectionState,
    pub qr_code: Option<String>,
    /// Last error message, kept until the next connection attempt.
    pub error: Option<String>,
    /// Bumped for every transport instance created.
    pub generation: u64,
}

impl SessionState {
    /// Whether a transport is starting or running.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether an event tagged with `generation` belongs to the live transport.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Start a new connection attempt and return its generation.
    pub fn begin_connecting(&mut self) -> u64 {
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.qr_code = None;
        self.error = None;
        self.generation
    }

    /// Store a QR code. Ignored unless connecting.
    pub fn set_qr_code(&mut self, code: impl Into<String>) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.qr_code = Some(code.into());
        true
    }

    /// Move to `Connected`. Only legal from `Connecting` or `Connected`.
    pub fn mark_connected(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.qr_code = None;
        self.error = None;
        true
    }

    /// Move to `Disconnected`, recording `error` when given.
    pub fn mark_disconnected(&mut self, error: Option<String>) {
        self.state = ConnectionState::Disconnected;
        self.qr_code = None;
        if error.is_some() {
            self.error = error;
        }
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            qr_code: self.qr_code.clone(),
            error: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qr_only_while_connecting() {
        let mut state = SessionState::default();
        assert!(!state.set_qr_code("early"));
        assert_eq!(state.qr_code, None);

        let generation = state.begin_connecting();
        assert_eq!(generation, 1);
        assert!(state.set_qr_code("ABC"));
        assert_eq!(state.snapshot().qr_code.as_deref(), Some("ABC"));

        assert!(state.mark_connected());
        assert_eq!(state.state, ConnectionState::Connected);
        assert_eq!(state.qr_code, None);
        assert!(!state.set_qr_code("late"));
    }

    #[test]
    fn test_ready_ignored_when_disconnected() {
        let mut state = SessionState::default();
        assert!(!state.mark_connected());
        assert_eq!(state.state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_keeps_previous_error_without_new_one() {
        let mut state = SessionState::default();
        state.begin_connecting();
        state.record_error("bad credentials");
        state.mark_disconnected(None);
        assert_eq!(state.error.as_deref(), Some("bad credentials"));

        state.mark_disconnected(Some("logout".into()));
        assert_eq!(state.error.as_deref(), Some("logout"));
    }

    #[test]
    fn test_generation_increments_per_attempt() {
        let mut state = SessionState::default();
        let first = state.begin_connecting();
        state.mark_disconnected(None);
        let second = state.begin_connecting();
        assert!(second > first);
        assert!(!state.is_current(first));
        assert!(state.is_current(second));
    }
}
