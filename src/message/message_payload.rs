use crate::message::DeviceSettings;
use bitcode::{Decode, Encode};

/// A trickled ICE candidate, carried verbatim between the two peers.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq, Default)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
    pub username_fragment: Option<String>,
}

/// WebRTC negotiation messages.
///
/// The variant is chosen by the sender, so receivers never have to guess
/// whether a body is a session description or a candidate.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum SignalingPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate(IceCandidate),
}

impl SignalingPayload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SignalingPayload::Offer { .. } => "offer",
            SignalingPayload::Answer { .. } => "answer",
            SignalingPayload::IceCandidate(_) => "ice-candidate",
        }
    }
}

/// One recording session available on a device.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Path relative to the device's recording root, e.g.
    /// `2024-05-01_10-00-00/index.m3u8`.
    pub file_name: String,

    /// Seconds since the UNIX epoch.
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    /// First message of a session that did not authenticate during the upgrade.
    Init { credential: String },

    Signaling(SignalingPayload),

    SegmentRequest {
        file_name: String,
    },

    SegmentResponse {
        file_name: String,
        data: Vec<u8>,
        error: Option<String>,
    },

    ListRequest {
        request_id: u64,
    },

    ListResponse {
        request_id: u64,
        segments: Vec<SegmentInfo>,
    },

    ConfigUpdate(DeviceSettings),

    /// Presence change of another entity in the same account.
    Refresh {
        entity_id: String,
        online: bool,
    },

    Ack,
    Nack {
        reason: String,
    },
}

impl MessagePayload {
    /// Stable name of the variant; local relay handlers are keyed by it.
    pub fn kind_name(&self) -> &'static str {
        match self {
            MessagePayload::Init { .. } => "init",
            MessagePayload::Signaling(_) => "signaling",
            MessagePayload::SegmentRequest { .. } => "segment-request",
            MessagePayload::SegmentResponse { .. } => "segment-response",
            MessagePayload::ListRequest { .. } => "list-request",
            MessagePayload::ListResponse { .. } => "list-response",
            MessagePayload::ConfigUpdate(_) => "config-update",
            MessagePayload::Refresh { .. } => "refresh",
            MessagePayload::Ack => "ack",
            MessagePayload::Nack { .. } => "nack",
        }
    }
}
