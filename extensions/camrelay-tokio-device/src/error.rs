use camrelay::message::MessageDecodeError;
use std::fmt;
use tokio_tungstenite::tungstenite;

/// Failures of the device's relay session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// No live connection and none could be established.
    NotConnected,

    /// The session was closed and will not reconnect.
    Closed,

    /// The relay refused the credential.
    Unauthorized(String),

    /// The connection opened but the relay never acknowledged it.
    Handshake(String),
    Transport(String),
    Decode(MessageDecodeError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotConnected => write!(f, "not connected to the relay"),
            SessionError::Closed => write!(f, "session closed"),
            SessionError::Unauthorized(reason) => write!(f, "relay rejected credential: {reason}"),
            SessionError::Handshake(reason) => write!(f, "handshake failed: {reason}"),
            SessionError::Transport(reason) => write!(f, "transport error: {reason}"),
            SessionError::Decode(err) => write!(f, "decode error: {err}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<MessageDecodeError> for SessionError {
    fn from(err: MessageDecodeError) -> Self {
        SessionError::Decode(err)
    }
}

impl From<tungstenite::Error> for SessionError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) if response.status() == 401 => {
                SessionError::Unauthorized("HTTP 401".into())
            }
            other => SessionError::Transport(other.to_string()),
        }
    }
}

/// Failures while negotiating a viewer's peer connection.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingError {
    /// A candidate or answer arrived for a peer with no session.
    UnknownPeer(String),

    /// An offer carried no session description.
    EmptyDescription,

    /// The WebRTC engine rejected an operation.
    Engine(String),
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingError::UnknownPeer(peer) => write!(f, "no session for peer {peer}"),
            SignalingError::EmptyDescription => write!(f, "empty session description"),
            SignalingError::Engine(reason) => write!(f, "webrtc error: {reason}"),
        }
    }
}

impl std::error::Error for SignalingError {}

impl From<webrtc::Error> for SignalingError {
    fn from(err: webrtc::Error) -> Self {
        SignalingError::Engine(err.to_string())
    }
}

#[derive(Debug)]
pub enum DeviceError {
    Io(std::io::Error),

    /// A requested recording path escapes the recording root.
    PathTraversal(String),
    NotFound(String),

    /// The capture or recorder process could not be started or fed.
    Capture(String),
    Session(SessionError),
    Signaling(SignalingError),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Io(err) => write!(f, "io error: {err}"),
            DeviceError::PathTraversal(path) => write!(f, "path escapes recording root: {path}"),
            DeviceError::NotFound(path) => write!(f, "no such recording: {path}"),
            DeviceError::Capture(reason) => write!(f, "capture error: {reason}"),
            DeviceError::Session(err) => write!(f, "{err}"),
            DeviceError::Signaling(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeviceError::Io(err) => Some(err),
            DeviceError::Session(err) => Some(err),
            DeviceError::Signaling(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        DeviceError::Io(err)
    }
}

impl From<SessionError> for DeviceError {
    fn from(err: SessionError) -> Self {
        DeviceError::Session(err)
    }
}

impl From<SignalingError> for DeviceError {
    fn from(err: SignalingError) -> Self {
        DeviceError::Signaling(err)
    }
}
