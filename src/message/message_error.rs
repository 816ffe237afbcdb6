use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum MessageDecodeError {
    /// Zero-length input; not even a version byte.
    Empty,

    /// Leading version byte names a protocol revision this build does not speak.
    UnsupportedVersion(u8),

    /// Body did not decode as a `Message`.
    Corrupt(String),
}

impl fmt::Display for MessageDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageDecodeError::Empty => write!(f, "empty message"),
            MessageDecodeError::UnsupportedVersion(version) => {
                write!(f, "unsupported wire version {version}")
            }
            MessageDecodeError::Corrupt(reason) => write!(f, "corrupt message body: {reason}"),
        }
    }
}

impl std::error::Error for MessageDecodeError {}
