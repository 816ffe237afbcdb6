use camrelay::demux::{DemuxMode, StreamDemuxer};
use camrelay_app::{DeviceArgs, init_tracing};
use camrelay_tokio_device::capture::spawn_capture;
use camrelay_tokio_device::error::SessionError;
use camrelay_tokio_device::media_sinks::{spawn_recording_sink, spawn_track_writer};
use camrelay_tokio_device::mjpeg_preview::MjpegPreview;
use camrelay_tokio_device::{
    DeviceAgent, DirectoryRecordingStore, FrameFanout, SignalingRelay, TransportSession,
    h264_video_track, run_demux,
};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Frames each sink may fall behind before frames are dropped for it.
const FRAME_QUEUE_DEPTH: usize = 64;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = DeviceArgs::parse();
    let capture = args.capture_options();

    let session = TransportSession::new(args.session_config());
    match session.connect().await {
        Ok(()) => {}
        Err(err @ SessionError::Unauthorized(_)) => return Err(err.into()),
        // The agent loop reconnects with backoff.
        Err(err) => tracing::warn!(error = %err, "relay unreachable; will keep retrying"),
    }

    let store = DirectoryRecordingStore::new(&args.record_dir, &args.device_id);
    tokio::fs::create_dir_all(store.root()).await?;

    let video_track = h264_video_track(&args.device_id);
    let (outbound, queued) = mpsc::unbounded_channel();
    let signaling = Arc::new(SignalingRelay::new(
        &args.device_id,
        args.ice_servers.clone(),
        video_track.clone(),
        outbound,
    )?);

    let agent = Arc::new(DeviceAgent::new(
        &args.device_id,
        session.clone(),
        signaling,
        Arc::new(store.clone()),
        args.initial_settings(),
    ));

    let mut fanout = FrameFanout::new();
    let mut sink_tasks = Vec::new();
    match capture.mode {
        DemuxMode::H264 => {
            sink_tasks.push(spawn_track_writer(
                video_track,
                fanout.add_sink("webrtc-track", FRAME_QUEUE_DEPTH),
            ));
            sink_tasks.push(spawn_recording_sink(
                store.root().to_path_buf(),
                fanout.add_sink("recorder", FRAME_QUEUE_DEPTH),
                agent.settings(),
            ));
        }
        DemuxMode::Mjpeg => {
            let preview = MjpegPreview::new();
            let frames = fanout.add_sink("mjpeg-preview", FRAME_QUEUE_DEPTH);
            sink_tasks.push(preview.spawn_feeder(frames));

            let listener = TcpListener::bind(args.preview_listen.as_str()).await?;
            sink_tasks.push(tokio::spawn(async move {
                if let Err(err) = preview.serve_with_listener(listener).await {
                    tracing::error!(error = %err, "mjpeg preview stopped");
                }
            }));
        }
    }

    let (mut capture_process, stdout) = spawn_capture(&capture)?;
    let demuxer = StreamDemuxer::new(capture.mode, args.demux_options());
    let pump = tokio::spawn(run_demux(stdout, demuxer, fanout));

    let running = agent.clone();
    let mut agent_task = tokio::spawn(async move { running.run(queued).await });
    let mut agent_finished = false;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted; shutting down");
        }
        finished = pump => match finished {
            Ok(summary) => tracing::warn!(?summary, "capture ended"),
            Err(err) => tracing::error!(error = %err, "capture pump panicked"),
        },
        finished = &mut agent_task => {
            agent_finished = true;
            match finished {
                Ok(()) => tracing::error!("relay session ended; stopping capture"),
                Err(err) => tracing::error!(error = %err, "device agent panicked"),
            }
        }
    }

    session.close().await;
    if !agent_finished {
        if let Err(err) = agent_task.await {
            tracing::error!(error = %err, "device agent panicked");
        }
    }
    for task in sink_tasks {
        task.abort();
    }
    if let Err(err) = capture_process.kill().await {
        tracing::debug!(error = %err, "capture process already gone");
    }

    Ok(())
}
