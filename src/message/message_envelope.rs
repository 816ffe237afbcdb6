use crate::constants::SERVER_ADDRESS;
use crate::message::{MessagePayload, SignalingPayload};
use bitcode::{Decode, Encode};

/// Routing envelope exchanged between devices, viewers and the relay.
///
/// `from` is informational when sent; the relay overwrites it with the
/// sender's authenticated entity id before forwarding.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: String,
    pub to: String,
    pub payload: MessagePayload,
}

impl Message {
    pub fn new(from: impl Into<String>, to: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            payload,
        }
    }

    /// A message addressed to the relay itself.
    pub fn to_server(from: impl Into<String>, payload: MessagePayload) -> Self {
        Self::new(from, SERVER_ADDRESS, payload)
    }

    /// A message originated by the relay.
    pub fn from_server(to: impl Into<String>, payload: MessagePayload) -> Self {
        Self::new(SERVER_ADDRESS, to, payload)
    }

    pub fn signaling(
        from: impl Into<String>,
        to: impl Into<String>,
        signal: SignalingPayload,
    ) -> Self {
        Self::new(from, to, MessagePayload::Signaling(signal))
    }

    pub fn is_for_server(&self) -> bool {
        self.to == SERVER_ADDRESS
    }

    pub fn kind_name(&self) -> &'static str {
        self.payload.kind_name()
    }
}
