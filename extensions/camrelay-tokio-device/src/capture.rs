//! Capture process selection and command lines.
//!
//! The camera is an external program writing a raw MJPEG or Annex B H.264
//! stream to its stdout; this module only decides which program and with
//! which arguments.

use crate::error::DeviceError;
use camrelay::demux::DemuxMode;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use tokio::process::{Child, ChildStdout, Command};

/// Bitrate passed to libcamera-vid when none is configured.
pub const DEFAULT_LIBCAMERA_BITRATE: u32 = 5_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraBackend {
    /// First of libcamera-vid, raspivid, ffmpeg found on `PATH`.
    #[default]
    Auto,
    Libcamera,
    Raspivid,

    /// Synthetic test pattern, for hosts without a camera.
    Ffmpeg,
}

impl CameraBackend {
    pub fn program(&self) -> &'static str {
        match self {
            CameraBackend::Libcamera => "libcamera-vid",
            CameraBackend::Raspivid => "raspivid",
            CameraBackend::Auto | CameraBackend::Ffmpeg => "ffmpeg",
        }
    }

    /// Resolves `Auto` against the programs installed on this host, falling
    /// back to ffmpeg so the eventual spawn error names a real program.
    pub fn resolve(self) -> CameraBackend {
        if self != CameraBackend::Auto {
            return self;
        }

        [
            CameraBackend::Libcamera,
            CameraBackend::Raspivid,
            CameraBackend::Ffmpeg,
        ]
        .into_iter()
        .find(|backend| program_on_path(backend.program()))
        .unwrap_or(CameraBackend::Ffmpeg)
    }
}

impl fmt::Display for CameraBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraBackend::Auto => write!(f, "auto"),
            CameraBackend::Libcamera => write!(f, "libcamera"),
            CameraBackend::Raspivid => write!(f, "raspivid"),
            CameraBackend::Ffmpeg => write!(f, "ffmpeg"),
        }
    }
}

impl FromStr for CameraBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(CameraBackend::Auto),
            "libcamera" | "libcamera-vid" => Ok(CameraBackend::Libcamera),
            "raspivid" => Ok(CameraBackend::Raspivid),
            "ffmpeg" | "test" => Ok(CameraBackend::Ffmpeg),
            other => Err(format!("unknown camera backend: {other}")),
        }
    }
}

fn program_on_path(program: &str) -> bool {
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| is_file(&dir.join(program)))
    })
}

fn is_file(path: &Path) -> bool {
    path.metadata().is_ok_and(|metadata| metadata.is_file())
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub backend: CameraBackend,
    pub mode: DemuxMode,
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Bits per second; `0` keeps the program's default.
    pub bitrate: u32,

    /// Degrees clockwise; only 90, 180 and 270 have an effect.
    pub rotation: u16,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    pub autofocus: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            backend: CameraBackend::Auto,
            mode: DemuxMode::H264,
            width: 1280,
            height: 720,
            fps: 30,
            bitrate: 0,
            rotation: 0,
            horizontal_flip: false,
            vertical_flip: false,
            autofocus: false,
        }
    }
}

impl CaptureOptions {
    /// Command line for `backend`, which must already be resolved.
    pub fn args_for(&self, backend: CameraBackend) -> Vec<String> {
        match backend {
            CameraBackend::Libcamera => self.libcamera_args(),
            CameraBackend::Raspivid => self.raspivid_args(),
            CameraBackend::Auto | CameraBackend::Ffmpeg => self.ffmpeg_args(),
        }
    }

    fn libcamera_args(&self) -> Vec<String> {
        let mut args = strings(&["-t", "0", "-o", "-"]);
        args.extend([
            "--width".into(),
            self.width.to_string(),
            "--height".into(),
            self.height.to_string(),
            "--framerate".into(),
            self.fps.to_string(),
            "-n".into(),
        ]);

        match self.mode {
            DemuxMode::Mjpeg => args.extend(strings(&["--codec", "mjpeg"])),
            DemuxMode::H264 => args.extend(strings(&[
                "--inline",
                "--profile",
                "baseline",
                "--low-latency",
            ])),
        }

        let bitrate = if self.bitrate > 0 {
            self.bitrate
        } else {
            DEFAULT_LIBCAMERA_BITRATE
        };
        args.extend(["-b".into(), bitrate.to_string()]);

        if self.autofocus {
            args.extend(strings(&["--autofocus-mode", "continuous"]));
        }
        if self.horizontal_flip {
            args.push("--hflip".into());
        }
        if self.vertical_flip {
            args.push("--vflip".into());
        }
        if self.rotation != 0 {
            args.extend(["--rotation".into(), self.rotation.to_string()]);
        }
        args
    }

    fn raspivid_args(&self) -> Vec<String> {
        let mut args = strings(&["-t", "0", "-o", "-"]);
        args.extend([
            "-w".into(),
            self.width.to_string(),
            "-h".into(),
            self.height.to_string(),
            "-fps".into(),
            self.fps.to_string(),
            "-n".into(),
        ]);

        match self.mode {
            DemuxMode::Mjpeg => args.extend(strings(&["-cd", "MJPEG"])),
            DemuxMode::H264 => args.extend(strings(&["-pf", "baseline", "-ih"])),
        }

        if self.horizontal_flip {
            args.push("-hf".into());
        }
        if self.vertical_flip {
            args.push("-vf".into());
        }
        if self.rotation != 0 {
            args.extend(["-rot".into(), self.rotation.to_string()]);
        }
        args
    }

    fn ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec![
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!(
                "testsrc=size={}x{}:rate={}:duration=3600",
                self.width, self.height, self.fps
            ),
        ];

        if let Some(filter) = self.ffmpeg_filter() {
            args.extend(["-vf".into(), filter]);
        }

        match self.mode {
            DemuxMode::Mjpeg => args.extend(strings(&["-f", "mjpeg", "-q:v", "5"])),
            DemuxMode::H264 => {
                args.extend(strings(&[
                    "-c:v",
                    "libx264",
                    "-preset",
                    "ultrafast",
                    "-force_key_frames",
                    "expr:gte(t,n_forced*1)",
                    "-pix_fmt",
                    "yuv420p",
                    "-f",
                    "h264",
                ]));
                if self.bitrate > 0 {
                    args.extend(["-b:v".into(), self.bitrate.to_string()]);
                }
            }
        }

        args.extend(strings(&["-loglevel", "error", "-"]));
        args
    }

    fn ffmpeg_filter(&self) -> Option<String> {
        let mut filters: Vec<&str> = Vec::new();

        match (self.vertical_flip, self.horizontal_flip) {
            (true, true) => filters.push("transpose=2,transpose=2"),
            (true, false) => filters.push("vflip"),
            (false, true) => filters.push("hflip"),
            (false, false) => {}
        }

        match self.rotation {
            90 => filters.push("transpose=1"),
            180 => filters.push("transpose=2,transpose=2"),
            270 => filters.push("transpose=2"),
            _ => {}
        }

        (!filters.is_empty()).then(|| filters.join(","))
    }

    /// The capture process for these options, stdout piped.
    pub fn command(&self) -> Command {
        let backend = self.backend.resolve();

        let mut command = Command::new(backend.program());
        command
            .args(self.args_for(backend))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

/// Starts the capture process and hands back its stdout.
pub fn spawn_capture(options: &CaptureOptions) -> Result<(Child, ChildStdout), DeviceError> {
    let backend = options.backend.resolve();
    tracing::info!(
        %backend,
        mode = %options.mode,
        width = options.width,
        height = options.height,
        fps = options.fps,
        "starting capture"
    );

    let mut child = options
        .command()
        .spawn()
        .map_err(|err| DeviceError::Capture(format!("{}: {err}", backend.program())))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DeviceError::Capture("capture stdout not piped".into()))?;

    Ok((child, stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libcamera_h264_defaults_bitrate() {
        let args = CaptureOptions::default().args_for(CameraBackend::Libcamera);

        assert_eq!(
            args,
            strings(&[
                "-t", "0", "-o", "-", "--width", "1280", "--height", "720", "--framerate", "30",
                "-n", "--inline", "--profile", "baseline", "--low-latency", "-b", "5000000",
            ])
        );
    }

    #[test]
    fn raspivid_mjpeg_with_flips() {
        let options = CaptureOptions {
            mode: DemuxMode::Mjpeg,
            horizontal_flip: true,
            rotation: 90,
            ..Default::default()
        };

        let args = options.args_for(CameraBackend::Raspivid);
        assert!(args.windows(2).any(|pair| pair == ["-cd", "MJPEG"]));
        assert!(args.contains(&"-hf".to_string()));
        assert!(!args.contains(&"-vf".to_string()));
        assert!(args.windows(2).any(|pair| pair == ["-rot", "90"]));
    }

    #[test]
    fn ffmpeg_combines_flip_and_rotation_filters() {
        let options = CaptureOptions {
            vertical_flip: true,
            rotation: 270,
            bitrate: 800_000,
            ..Default::default()
        };

        let args = options.args_for(CameraBackend::Ffmpeg);
        assert!(args.windows(2).any(|pair| pair == ["-vf", "vflip,transpose=2"]));
        assert!(args.windows(2).any(|pair| pair == ["-b:v", "800000"]));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn ffmpeg_ignores_odd_rotation() {
        let options = CaptureOptions {
            rotation: 45,
            ..Default::default()
        };

        assert!(!options.args_for(CameraBackend::Ffmpeg).contains(&"-vf".to_string()));
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("libcamera-vid".parse(), Ok(CameraBackend::Libcamera));
        assert_eq!("AUTO".parse(), Ok(CameraBackend::Auto));
        assert!("webcam".parse::<CameraBackend>().is_err());
        assert_eq!(CameraBackend::Libcamera.resolve(), CameraBackend::Libcamera);
    }
}
