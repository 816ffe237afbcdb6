use crate::constants::H264_START_CODE;
use crate::demux::{DemuxCycleReport, DemuxOptions, MediaFrame, MediaKind, find_subsequence};
use std::time::Duration;

/// Splits an Annex B H.264 byte stream on its four byte start codes.
///
/// Unlike the MJPEG path this uses a plain linear buffer: every emitted
/// unit is the data *preceding* a start code, after which the buffer is
/// shifted so that start code becomes the new origin. A start code at
/// offset 0 therefore never produces an emission on its own.
///
/// Only the last `START_CODE.len() - 1` previously buffered bytes are
/// rescanned on each push, which is enough to catch a start code split
/// across two reads without rescanning the whole unit.
pub struct H264Demuxer {
    buffer: Vec<u8>,
    capacity: usize,
    frame_duration: Duration,
}

impl H264Demuxer {
    pub fn new(options: DemuxOptions) -> Self {
        Self {
            buffer: Vec::with_capacity(options.capacity),
            capacity: options.capacity.max(H264_START_CODE.len()),
            frame_duration: options.frame_duration,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn push_bytes<F>(&mut self, data: &[u8], mut on_frame: F) -> DemuxCycleReport
    where
        F: FnMut(MediaFrame),
    {
        let mut report = DemuxCycleReport::default();

        let mut search_from = self
            .buffer
            .len()
            .saturating_sub(H264_START_CODE.len() - 1);
        self.buffer.extend_from_slice(data);

        while let Some(rel) = self
            .buffer
            .get(search_from..)
            .and_then(|window| find_subsequence(window, &H264_START_CODE))
        {
            let pos = search_from + rel;

            if pos > 0 {
                let unit: Vec<u8> = self.buffer.drain(..pos).collect();
                on_frame(MediaFrame::new(
                    MediaKind::H264Nal,
                    unit,
                    self.frame_duration,
                ));
                report.emitted += 1;
            }

            // The start code now sits at offset 0; look past it.
            search_from = 1;
        }

        if self.buffer.len() > self.capacity {
            let lost = self.buffer.len();
            tracing::warn!(
                discarded = lost,
                "h264 buffer full without a start code; resetting"
            );
            self.buffer.clear();
            report.discarded_bytes += lost;
        }

        report
    }
}
