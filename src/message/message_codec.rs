use crate::constants::WIRE_VERSION;
use crate::message::{Message, MessageDecodeError};

/// Converts `Message`s to and from their wire form.
///
/// The wire form is a single version byte followed by the bitcode body.
/// Length framing is left to the transport, which carries exactly one
/// encoded message per binary frame.
pub struct MessageCodec;

impl MessageCodec {
    pub fn encode(message: &Message) -> Vec<u8> {
        let body = bitcode::encode(message);

        let mut bytes = Vec::with_capacity(1 + body.len());
        bytes.push(WIRE_VERSION);
        bytes.extend_from_slice(&body);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Message, MessageDecodeError> {
        let (&version, body) = bytes.split_first().ok_or(MessageDecodeError::Empty)?;

        if version != WIRE_VERSION {
            return Err(MessageDecodeError::UnsupportedVersion(version));
        }

        bitcode::decode::<Message>(body).map_err(|e| MessageDecodeError::Corrupt(e.to_string()))
    }
}
