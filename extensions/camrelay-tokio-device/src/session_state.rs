use std::fmt;

/// Lifecycle of a `TransportSession`.
///
/// `Closed` is terminal; every other state can be left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,

    /// The relay accepted the credential; the session is about to go live.
    Authenticated,
    Connected,

    /// A reconnect loop is running.
    Reconnecting,
    Closed,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticated => "authenticated",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}
