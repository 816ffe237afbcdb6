use crate::constants::{
    JPEG_EOI_MARKER, JPEG_SOI_MARKER, SAFETY_VALVE_DENOMINATOR, SAFETY_VALVE_NUMERATOR,
};
use crate::demux::{DemuxCycleReport, DemuxOptions, MediaFrame, MediaKind, RingBuffer};

/// Cuts a raw MJPEG byte stream into individual JPEG images.
///
/// Bytes are pushed in arbitrary chunks (one chunk per read from the
/// capture source). Images are located by their SOI / EOI markers inside a
/// `RingBuffer`, so memory stays bounded by one in-flight image plus slack
/// no matter how much garbage the source produces.
///
/// ### Behavior Summary:
/// - Spans shorter than `min_frame_size` are dropped as noise.
/// - In latest-frame-only mode, only the last image completed during a
///   read cycle is emitted; the others are counted as skipped.
/// - If unconsumed data grows past 75% of capacity without completing an
///   image, the whole buffer is reset and the loss is logged.
pub struct MjpegDemuxer {
    ring: RingBuffer,
    options: DemuxOptions,
}

impl MjpegDemuxer {
    pub fn new(options: DemuxOptions) -> Self {
        Self {
            ring: RingBuffer::new(options.capacity),
            options,
        }
    }

    /// Bytes currently buffered and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Processes one read cycle worth of bytes.
    ///
    /// `on_frame` is invoked synchronously for every emitted image.
    pub fn push_bytes<F>(&mut self, data: &[u8], mut on_frame: F) -> DemuxCycleReport
    where
        F: FnMut(MediaFrame),
    {
        let mut report = DemuxCycleReport {
            discarded_bytes: self.ring.push(data),
            ..Default::default()
        };

        let mut latest: Option<MediaFrame> = None;
        let mut completed = 0usize;

        while !self.ring.is_empty() {
            let frame_start = match self.ring.mark() {
                Some(start) => start,
                None => match self.ring.find(0, self.ring.len(), &JPEG_SOI_MARKER) {
                    Some(start) => {
                        self.ring.set_mark(start);
                        start
                    }
                    None => {
                        // Keep a possible marker prefix straddling the next read.
                        let keep = JPEG_SOI_MARKER.len() - 1;
                        self.ring.discard(self.ring.len().saturating_sub(keep));
                        break;
                    }
                },
            };

            let end_idx = match self.ring.find(
                frame_start + JPEG_SOI_MARKER.len(),
                self.ring.len(),
                &JPEG_EOI_MARKER,
            ) {
                Some(idx) => idx,
                None => {
                    // Compact so the in-flight image starts at offset 0.
                    if frame_start > 0 {
                        self.ring.discard(frame_start);
                    }
                    break;
                }
            };

            let frame_end = end_idx + JPEG_EOI_MARKER.len();
            let frame_size = frame_end - frame_start;

            if frame_size >= self.options.min_frame_size {
                if let Some(bytes) = self.ring.extract(frame_start, frame_end) {
                    let frame =
                        MediaFrame::new(MediaKind::Jpeg, bytes, self.options.frame_duration);

                    if self.options.latest_frame_only {
                        completed += 1;
                        latest = Some(frame);
                    } else {
                        on_frame(frame);
                        report.emitted += 1;
                    }
                }
            } else {
                tracing::debug!(size = frame_size, "rejecting undersized jpeg span");
                report.rejected += 1;
            }

            self.ring.discard(frame_end);
            self.ring.clear_mark();
        }

        if let Some(frame) = latest {
            on_frame(frame);
            report.emitted += 1;
            report.skipped = completed - 1;

            if report.skipped > 0 {
                tracing::debug!(
                    skipped = report.skipped,
                    "skipped frames for latest-only mode"
                );
            }
        }

        let limit = self.ring.capacity() * SAFETY_VALVE_NUMERATOR / SAFETY_VALVE_DENOMINATOR;
        if self.ring.len() > limit {
            let lost = self.ring.len();
            tracing::warn!(
                discarded = lost,
                "buffer filling without complete frames; resetting"
            );
            self.ring.clear();
            report.discarded_bytes += lost;
        }

        report
    }
}
