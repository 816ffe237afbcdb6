use camrelay::constants::DEMUX_READ_CHUNK_SIZE;
use camrelay::demux::{MediaFrame, StreamDemuxer};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Consecutive failed reads after which the capture source is abandoned.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 8;

struct FrameSink {
    name: String,
    sender: mpsc::Sender<MediaFrame>,
}

/// Hands every demuxed frame to a set of bounded sink queues.
///
/// A full queue drops the frame for that sink only; the capture reader
/// never waits on a slow consumer.
#[derive(Default)]
pub struct FrameFanout {
    sinks: Vec<FrameSink>,
}

impl FrameFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink with room for `capacity` queued frames.
    pub fn add_sink(&mut self, name: impl Into<String>, capacity: usize) -> mpsc::Receiver<MediaFrame> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        self.sinks.push(FrameSink {
            name: name.into(),
            sender,
        });
        receiver
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Detaches sinks whose receivers were dropped.
    pub fn prune_closed(&mut self) {
        self.sinks.retain(|sink| {
            let open = !sink.sender.is_closed();
            if !open {
                tracing::warn!(sink = %sink.name, "sink went away; detaching it");
            }
            open
        });
    }

    pub fn dispatch(&mut self, frame: MediaFrame) {
        self.sinks.retain(|sink| match sink.sender.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(sink = %sink.name, "sink queue full; dropping frame");
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(sink = %sink.name, "sink went away; detaching it");
                false
            }
        });
    }
}

/// Totals over the lifetime of one `run_demux` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DemuxSummary {
    pub bytes_read: u64,
    pub frames: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub discarded_bytes: u64,
}

/// Reads `source` to its end, demuxing into `fanout`.
///
/// Read errors are logged and retried; a run of them ends the pump.
pub async fn run_demux<R>(mut source: R, mut demuxer: StreamDemuxer, mut fanout: FrameFanout) -> DemuxSummary
where
    R: AsyncRead + Unpin,
{
    let mut summary = DemuxSummary::default();
    let mut chunk = vec![0u8; DEMUX_READ_CHUNK_SIZE];
    let mut consecutive_errors = 0;

    loop {
        let read = match source.read(&mut chunk).await {
            Ok(0) => {
                tracing::info!(mode = %demuxer.mode(), "capture stream ended");
                break;
            }
            Ok(read) => read,
            Err(err) => {
                consecutive_errors += 1;
                tracing::error!(error = %err, attempt = consecutive_errors, "capture read failed");

                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    break;
                }
                tokio::task::yield_now().await;
                continue;
            }
        };
        consecutive_errors = 0;

        let report = demuxer.push_bytes(&chunk[..read], |frame| fanout.dispatch(frame));

        summary.bytes_read += read as u64;
        summary.frames += report.emitted as u64;
        summary.skipped += report.skipped as u64;
        summary.rejected += report.rejected as u64;
        summary.discarded_bytes += report.discarded_bytes as u64;

        fanout.prune_closed();
        if fanout.sink_count() == 0 {
            tracing::info!("no frame sinks left; stopping capture pump");
            break;
        }
    }

    tracing::debug!(?summary, "demux pump finished");
    summary
}
