mod device_settings;
mod identity;
mod message_codec;
mod message_envelope;
mod message_error;
mod message_payload;

pub use device_settings::{DeviceSettings, RecordingMode};
pub use identity::{EntityKind, Identity};
pub use message_codec::MessageCodec;
pub use message_envelope::Message;
pub use message_error::MessageDecodeError;
pub use message_payload::{IceCandidate, MessagePayload, SegmentInfo, SignalingPayload};
