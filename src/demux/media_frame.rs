use bytes::Bytes;
use std::time::Duration;

/// The framing a demuxer produced a `MediaFrame` from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// A complete JPEG image, SOI through EOI inclusive.
    Jpeg,

    /// One Annex B delimited H.264 unit, including its leading start code
    /// when the stream provided one.
    H264Nal,
}

/// H.264 NAL unit types relevant to a live relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    SliceNonIdr,
    SliceIdr,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    Other(u8),
}

impl From<u8> for NalUnitType {
    fn from(header: u8) -> Self {
        match header & 0x1F {
            1 => NalUnitType::SliceNonIdr,
            5 => NalUnitType::SliceIdr,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::AccessUnitDelimiter,
            n => NalUnitType::Other(n),
        }
    }
}

/// A discrete unit cut out of a raw capture stream.
///
/// The payload is always an owned copy; frames are handed to several sinks
/// at once, so `Bytes` keeps that fan-out to a reference count bump.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFrame {
    pub kind: MediaKind,
    pub payload: Bytes,

    /// Inter-frame duration hint forwarded to media senders.
    pub duration: Duration,
}

impl MediaFrame {
    pub fn new(kind: MediaKind, payload: impl Into<Bytes>, duration: Duration) -> Self {
        Self {
            kind,
            payload: payload.into(),
            duration,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Type of an H.264 unit, skipping its start code if present.
    ///
    /// Returns `None` for JPEG frames and for units too short to carry a
    /// NAL header.
    pub fn nal_unit_type(&self) -> Option<NalUnitType> {
        if self.kind != MediaKind::H264Nal {
            return None;
        }

        let body = match self.payload.as_ref() {
            [0, 0, 0, 1, rest @ ..] => rest,
            [0, 0, 1, rest @ ..] => rest,
            other => other,
        };

        body.first().map(|&header| NalUnitType::from(header))
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self.nal_unit_type(), Some(NalUnitType::SliceIdr))
    }
}
