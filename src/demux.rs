mod demux_options;
mod h264_demuxer;
mod media_frame;
mod mjpeg_demuxer;
mod ring_buffer;

pub use demux_options::{DemuxCycleReport, DemuxMode, DemuxOptions};
pub use h264_demuxer::H264Demuxer;
pub use media_frame::{MediaFrame, MediaKind, NalUnitType};
pub use mjpeg_demuxer::MjpegDemuxer;
pub use ring_buffer::RingBuffer;

/// A demuxer for whichever encoding the capture process was started with.
pub enum StreamDemuxer {
    Mjpeg(MjpegDemuxer),
    H264(H264Demuxer),
}

impl StreamDemuxer {
    pub fn new(mode: DemuxMode, options: DemuxOptions) -> Self {
        match mode {
            DemuxMode::Mjpeg => StreamDemuxer::Mjpeg(MjpegDemuxer::new(options)),
            DemuxMode::H264 => StreamDemuxer::H264(H264Demuxer::new(options)),
        }
    }

    pub fn mode(&self) -> DemuxMode {
        match self {
            StreamDemuxer::Mjpeg(_) => DemuxMode::Mjpeg,
            StreamDemuxer::H264(_) => DemuxMode::H264,
        }
    }

    pub fn buffered(&self) -> usize {
        match self {
            StreamDemuxer::Mjpeg(demuxer) => demuxer.buffered(),
            StreamDemuxer::H264(demuxer) => demuxer.buffered(),
        }
    }

    pub fn push_bytes<F>(&mut self, data: &[u8], on_frame: F) -> DemuxCycleReport
    where
        F: FnMut(MediaFrame),
    {
        match self {
            StreamDemuxer::Mjpeg(demuxer) => demuxer.push_bytes(data, on_frame),
            StreamDemuxer::H264(demuxer) => demuxer.push_bytes(data, on_frame),
        }
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
