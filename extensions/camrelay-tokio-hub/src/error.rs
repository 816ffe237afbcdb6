use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;

/// Failures surfaced by the relay to HTTP callers and hub operations.
#[derive(Debug, Clone, PartialEq)]
pub enum HubError {
    /// No such device, or no such entity connected.
    NotFound(String),

    /// The device exists but belongs to another account.
    Forbidden,

    /// The device is known and owned by the caller, but not connected.
    DeviceOffline(String),

    /// The device did not answer within the request timeout.
    GatewayTimeout,

    /// An identical request is already waiting on the same device.
    DuplicateRequest,

    /// Writing to a connection failed.
    Transport(String),

    /// The device answered with an error of its own.
    Device(String),

    /// The collaborator store failed.
    Directory(String),

    /// A local handler is already registered for this payload kind.
    HandlerExists(&'static str),

    Unauthorized(AuthError),
}

impl HubError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::Forbidden => StatusCode::FORBIDDEN,
            HubError::DeviceOffline(_) => StatusCode::SERVICE_UNAVAILABLE,
            HubError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            HubError::DuplicateRequest => StatusCode::CONFLICT,
            HubError::Transport(_) | HubError::Device(_) => StatusCode::BAD_GATEWAY,
            HubError::Directory(_) | HubError::HandlerExists(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            HubError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::NotFound(id) => write!(f, "{id} not found"),
            HubError::Forbidden => write!(f, "access denied"),
            HubError::DeviceOffline(id) => write!(f, "device {id} is offline"),
            HubError::GatewayTimeout => write!(f, "device did not respond in time"),
            HubError::DuplicateRequest => write!(f, "an identical request is already pending"),
            HubError::Transport(reason) => write!(f, "transport error: {reason}"),
            HubError::Device(reason) => write!(f, "device error: {reason}"),
            HubError::Directory(reason) => write!(f, "directory error: {reason}"),
            HubError::HandlerExists(kind) => {
                write!(f, "a handler for `{kind}` is already registered")
            }
            HubError::Unauthorized(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for HubError {}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

impl From<CorrelationError> for HubError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::DuplicateKey => HubError::DuplicateRequest,
            CorrelationError::TimedOut => HubError::GatewayTimeout,
            CorrelationError::Cancelled => HubError::Transport(err.to_string()),
        }
    }
}

impl From<AuthError> for HubError {
    fn from(err: AuthError) -> Self {
        HubError::Unauthorized(err)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Neither a bearer header nor a `token` query parameter was supplied.
    MissingCredential,

    InvalidCredential,

    /// Viewer-only surface reached with a device credential.
    WrongEntityKind,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingCredential => write!(f, "missing credential"),
            AuthError::InvalidCredential => write!(f, "invalid credential"),
            AuthError::WrongEntityKind => write!(f, "credential not valid for this endpoint"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationError {
    /// A request with the same key is still in flight.
    DuplicateKey,

    TimedOut,

    /// The response slot was dropped without a value.
    Cancelled,
}

impl fmt::Display for CorrelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationError::DuplicateKey => write!(f, "request key already in flight"),
            CorrelationError::TimedOut => write!(f, "timed out waiting for response"),
            CorrelationError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for CorrelationError {}
