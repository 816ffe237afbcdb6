//! Consumers of the demuxed frame stream: the shared WebRTC track and the
//! on-disk HLS recorder.

use crate::error::DeviceError;
use crate::recording_store::{PLAYLIST_NAME, SESSION_DIR_FORMAT};
use camrelay::demux::{MediaFrame, MediaKind, NalUnitType};
use camrelay::message::{DeviceSettings, RecordingMode};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Length of each HLS segment written by the recorder, in seconds.
pub const HLS_SEGMENT_SECONDS: u32 = 4;

/// Grace period for the recorder to flush after its input closes.
const RECORDER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Sample duration for a NAL unit. Parameter sets and delimiters share the
/// timestamp of the picture they precede.
fn sample_duration(frame: &MediaFrame) -> Duration {
    match frame.nal_unit_type() {
        Some(
            NalUnitType::Sps | NalUnitType::Pps | NalUnitType::Sei | NalUnitType::AccessUnitDelimiter,
        ) => Duration::ZERO,
        _ => frame.duration,
    }
}

/// Writes H.264 frames into the track shared by every viewer session.
pub fn spawn_track_writer(
    track: Arc<TrackLocalStaticSample>,
    mut frames: mpsc::Receiver<MediaFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if frame.kind != MediaKind::H264Nal {
                continue;
            }

            let sample = Sample {
                duration: sample_duration(&frame),
                data: frame.payload,
                ..Default::default()
            };

            if let Err(err) = track.write_sample(&sample).await {
                tracing::warn!(error = %err, "failed to write sample to track");
            }
        }
        tracing::debug!("track writer stopped");
    })
}

/// One ffmpeg process turning piped H.264 into an HLS session directory.
pub struct SegmentRecorder {
    child: Child,
    stdin: Option<ChildStdin>,
    session_dir: PathBuf,
}

impl SegmentRecorder {
    pub fn session_name() -> String {
        Local::now().format(SESSION_DIR_FORMAT).to_string()
    }

    /// ffmpeg arguments recording stdin into `session_dir`.
    pub fn ffmpeg_args(session_dir: &Path) -> Vec<String> {
        let segment_pattern = session_dir.join("segment%05d.ts");
        let playlist = session_dir.join(PLAYLIST_NAME);

        vec![
            "-f".into(),
            "h264".into(),
            "-i".into(),
            "pipe:0".into(),
            "-c:v".into(),
            "copy".into(),
            "-f".into(),
            "hls".into(),
            "-hls_time".into(),
            HLS_SEGMENT_SECONDS.to_string(),
            "-hls_list_size".into(),
            "0".into(),
            "-hls_segment_filename".into(),
            segment_pattern.to_string_lossy().into_owned(),
            "-loglevel".into(),
            "error".into(),
            playlist.to_string_lossy().into_owned(),
        ]
    }

    /// Creates a fresh session directory under `device_root` and starts
    /// recording into it.
    pub async fn start(device_root: &Path) -> Result<Self, DeviceError> {
        let session_dir = device_root.join(Self::session_name());
        tokio::fs::create_dir_all(&session_dir).await?;

        let mut child = Command::new("ffmpeg")
            .args(Self::ffmpeg_args(&session_dir))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| DeviceError::Capture(format!("ffmpeg recorder: {err}")))?;

        let stdin = child.stdin.take();
        tracing::info!(session_dir = %session_dir.display(), "recording started");

        Ok(Self {
            child,
            stdin,
            session_dir,
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub async fn write_frame(&mut self, frame: &MediaFrame) -> Result<(), DeviceError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| DeviceError::Capture("recorder input closed".into()))?;

        stdin.write_all(&frame.payload).await?;
        Ok(())
    }

    /// Closes the recorder's input and waits for it to finalize the
    /// playlist, killing it if it lingers.
    pub async fn stop(mut self) -> Result<(), DeviceError> {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        match tokio::time::timeout(RECORDER_STOP_TIMEOUT, self.child.wait()).await {
            Ok(status) => {
                tracing::info!(status = %status?, "recording stopped");
            }
            Err(_) => {
                tracing::warn!("recorder did not exit; killing it");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

/// Feeds frames into a recorder while the settings ask for continuous
/// recording, starting and stopping it as they change.
///
/// Recording starts at the next keyframe so every session directory holds
/// a decodable stream.
pub fn spawn_recording_sink(
    device_root: PathBuf,
    mut frames: mpsc::Receiver<MediaFrame>,
    mut settings: watch::Receiver<DeviceSettings>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut recorder: Option<SegmentRecorder> = None;

        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };

                    if settings.borrow().recording != RecordingMode::Continuous {
                        continue;
                    }

                    if recorder.is_none() {
                        if !frame.is_keyframe() && frame.nal_unit_type() != Some(NalUnitType::Sps) {
                            continue;
                        }
                        match SegmentRecorder::start(&device_root).await {
                            Ok(started) => recorder = Some(started),
                            Err(err) => {
                                tracing::error!(error = %err, "could not start recorder");
                                continue;
                            }
                        }
                    }

                    if let Some(active) = recorder.as_mut() {
                        if let Err(err) = active.write_frame(&frame).await {
                            tracing::error!(error = %err, "recorder write failed");
                            if let Some(failed) = recorder.take() {
                                let _ = failed.stop().await;
                            }
                        }
                    }
                }

                changed = settings.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let mode = settings.borrow_and_update().recording;
                    if mode == RecordingMode::Off {
                        if let Some(active) = recorder.take() {
                            if let Err(err) = active.stop().await {
                                tracing::warn!(error = %err, "error stopping recorder");
                            }
                        }
                    }
                }
            }
        }

        if let Some(active) = recorder.take() {
            let _ = active.stop().await;
        }
        tracing::debug!("recording sink stopped");
    })
}
