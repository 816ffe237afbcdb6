use crate::constants::{
    DEFAULT_DEMUX_BUFFER_CAPACITY, DEFAULT_FRAME_DURATION, DEFAULT_MIN_FRAME_SIZE,
};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Encoding of the raw capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxMode {
    Mjpeg,
    H264,
}

impl fmt::Display for DemuxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DemuxMode::Mjpeg => write!(f, "mjpeg"),
            DemuxMode::H264 => write!(f, "h264"),
        }
    }
}

impl FromStr for DemuxMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mjpeg" | "jpeg" => Ok(DemuxMode::Mjpeg),
            "h264" | "avc" => Ok(DemuxMode::H264),
            other => Err(format!("unknown stream encoding: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DemuxOptions {
    /// Ring (MJPEG) or linear (H.264) buffer capacity in bytes.
    pub capacity: usize,

    /// JPEG spans shorter than this are discarded as noise.
    pub min_frame_size: usize,

    /// MJPEG only: emit just the newest complete frame of each read cycle.
    pub latest_frame_only: bool,

    /// Duration hint attached to every emitted frame.
    pub frame_duration: Duration,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_DEMUX_BUFFER_CAPACITY,
            min_frame_size: DEFAULT_MIN_FRAME_SIZE,
            latest_frame_only: false,
            frame_duration: DEFAULT_FRAME_DURATION,
        }
    }
}

impl DemuxOptions {
    /// Derives the frame duration hint from a capture frame rate.
    pub fn with_fps(mut self, fps: u32) -> Self {
        if fps > 0 {
            self.frame_duration = Duration::from_secs(1) / fps;
        }
        self
    }
}

/// What happened during a single `push_bytes` call (one read cycle).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DemuxCycleReport {
    /// Frames handed to the sink callback.
    pub emitted: usize,

    /// Complete frames superseded in latest-frame-only mode.
    pub skipped: usize,

    /// Marker-bounded spans rejected as undersized noise.
    pub rejected: usize,

    /// Bytes lost to overflow or safety-valve resets.
    pub discarded_bytes: usize,
}
