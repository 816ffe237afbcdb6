//! Command-line configuration shared by the `camrelay-hub` and
//! `camrelay-device` binaries.

use camrelay::constants::{DEFAULT_DEMUX_BUFFER_CAPACITY, DEFAULT_MIN_FRAME_SIZE};
use camrelay::demux::{DemuxMode, DemuxOptions};
use camrelay::message::{DeviceSettings, EntityKind, Identity, RecordingMode};
use camrelay_tokio_device::capture::{CameraBackend, CaptureOptions};
use camrelay_tokio_device::SessionConfig;
use camrelay_tokio_hub::{HubServerConfig, MemoryDirectory, RelayHubConfig};
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber, honoring `RUST_LOG` and defaulting to
/// `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// `token=kind:entity:account`, e.g. `s3cret=device:cam-1:acct-1`.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticCredential {
    pub token: String,
    pub identity: Identity,
}

impl FromStr for StaticCredential {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (token, identity) = s
            .split_once('=')
            .ok_or_else(|| format!("expected token=kind:entity:account, got {s:?}"))?;

        let mut parts = identity.splitn(3, ':');
        let (Some(kind), Some(entity_id), Some(account_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("expected kind:entity:account, got {identity:?}"));
        };

        if token.is_empty() || entity_id.is_empty() || account_id.is_empty() {
            return Err(format!("empty field in credential {s:?}"));
        }

        Ok(Self {
            token: token.to_string(),
            identity: Identity::new(entity_id, kind.parse::<EntityKind>()?, account_id),
        })
    }
}

/// `device=account`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOwnership {
    pub device_id: String,
    pub account_id: String,
}

impl FromStr for DeviceOwnership {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((device_id, account_id)) if !device_id.is_empty() && !account_id.is_empty() => {
                Ok(Self {
                    device_id: device_id.to_string(),
                    account_id: account_id.to_string(),
                })
            }
            _ => Err(format!("expected device=account, got {s:?}")),
        }
    }
}

/// Relay hub: WebSocket transport plus the recording HTTP routes.
#[derive(Debug, Parser)]
#[command(name = "camrelay-hub", version, about)]
pub struct HubArgs {
    /// Address to listen on.
    #[arg(long, env = "CAMRELAY_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Seconds a segment or listing request waits for the device.
    #[arg(long, env = "CAMRELAY_REQUEST_TIMEOUT", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Seconds between pings to each connection.
    #[arg(long, env = "CAMRELAY_HEARTBEAT", default_value_t = 5)]
    pub heartbeat_secs: u64,

    /// Seconds of silence after which a connection is dropped.
    #[arg(long, env = "CAMRELAY_CLIENT_TIMEOUT", default_value_t = 15)]
    pub client_timeout_secs: u64,

    /// Accepted credential, `token=kind:entity:account`. Repeatable.
    #[arg(long = "credential", env = "CAMRELAY_CREDENTIALS", value_delimiter = ',')]
    pub credentials: Vec<StaticCredential>,

    /// Extra device ownership, `device=account`. Repeatable.
    #[arg(long = "device", env = "CAMRELAY_DEVICES", value_delimiter = ',')]
    pub devices: Vec<DeviceOwnership>,
}

impl HubArgs {
    pub fn directory(&self) -> MemoryDirectory {
        let directory = MemoryDirectory::new();

        for credential in &self.credentials {
            directory.add_credential(credential.token.clone(), credential.identity.clone());
        }
        for ownership in &self.devices {
            directory.add_device(ownership.device_id.clone(), ownership.account_id.clone());
        }
        directory
    }

    pub fn hub_config(&self) -> RelayHubConfig {
        RelayHubConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn server_config(&self) -> HubServerConfig {
        HubServerConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            client_timeout: Duration::from_secs(self.client_timeout_secs),
            ..Default::default()
        }
    }
}

/// Camera device: captures, relays signaling and serves recordings.
#[derive(Debug, Parser)]
#[command(name = "camrelay-device", version, about)]
pub struct DeviceArgs {
    /// WebSocket URL of the relay hub.
    #[arg(long, env = "CAMRELAY_RELAY_URL", default_value = "ws://127.0.0.1:8080/api/ws")]
    pub relay_url: String,

    /// Bearer credential issued for this device.
    #[arg(long, env = "CAMRELAY_CREDENTIAL")]
    pub credential: String,

    #[arg(long, env = "CAMRELAY_DEVICE_ID")]
    pub device_id: String,

    /// auto, libcamera, raspivid or ffmpeg.
    #[arg(long, env = "CAMRELAY_BACKEND", default_value = "auto")]
    pub backend: CameraBackend,

    /// h264 or mjpeg.
    #[arg(long, env = "CAMRELAY_ENCODING", default_value = "h264")]
    pub encoding: DemuxMode,

    #[arg(long, env = "CAMRELAY_WIDTH", default_value_t = 1280)]
    pub width: u32,

    #[arg(long, env = "CAMRELAY_HEIGHT", default_value_t = 720)]
    pub height: u32,

    #[arg(long, env = "CAMRELAY_FPS", default_value_t = 30)]
    pub fps: u32,

    /// Bits per second; 0 keeps the capture program's default.
    #[arg(long, env = "CAMRELAY_BITRATE", default_value_t = 0)]
    pub bitrate: u32,

    #[arg(long, env = "CAMRELAY_ROTATION", default_value_t = 0)]
    pub rotation: u16,

    #[arg(long, env = "CAMRELAY_HFLIP")]
    pub hflip: bool,

    #[arg(long, env = "CAMRELAY_VFLIP")]
    pub vflip: bool,

    #[arg(long, env = "CAMRELAY_AUTOFOCUS")]
    pub autofocus: bool,

    /// Emit only the newest complete JPEG of each read.
    #[arg(long, env = "CAMRELAY_LATEST_FRAME_ONLY")]
    pub latest_frame_only: bool,

    #[arg(long, env = "CAMRELAY_RING_CAPACITY", default_value_t = DEFAULT_DEMUX_BUFFER_CAPACITY)]
    pub ring_capacity: usize,

    #[arg(long, env = "CAMRELAY_MIN_FRAME_SIZE", default_value_t = DEFAULT_MIN_FRAME_SIZE)]
    pub min_frame_size: usize,

    #[arg(long, env = "CAMRELAY_RECORD_DIR", default_value = "recordings")]
    pub record_dir: PathBuf,

    /// Record HLS continuously from startup.
    #[arg(long, env = "CAMRELAY_RECORD")]
    pub record: bool,

    /// Where the MJPEG preview is served when `--encoding mjpeg` is used.
    #[arg(long, env = "CAMRELAY_PREVIEW_LISTEN", default_value = "0.0.0.0:8081")]
    pub preview_listen: String,

    /// STUN/TURN URLs offered to the WebRTC engine.
    #[arg(
        long = "ice-server",
        env = "CAMRELAY_ICE_SERVERS",
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302"
    )]
    pub ice_servers: Vec<String>,
}

impl DeviceArgs {
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            backend: self.backend,
            mode: self.encoding,
            width: self.width,
            height: self.height,
            fps: self.fps,
            bitrate: self.bitrate,
            rotation: self.rotation,
            horizontal_flip: self.hflip,
            vertical_flip: self.vflip,
            autofocus: self.autofocus,
        }
    }

    pub fn demux_options(&self) -> DemuxOptions {
        DemuxOptions {
            capacity: self.ring_capacity,
            min_frame_size: self.min_frame_size,
            latest_frame_only: self.latest_frame_only,
            ..Default::default()
        }
        .with_fps(self.fps)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(&self.relay_url, &self.credential)
    }

    pub fn initial_settings(&self) -> DeviceSettings {
        DeviceSettings {
            recording: if self.record {
                RecordingMode::Continuous
            } else {
                RecordingMode::Off
            },
            latest_frame_only: self.latest_frame_only,
            rotation: self.rotation,
            horizontal_flip: self.hflip,
            vertical_flip: self.vflip,
        }
    }
}
