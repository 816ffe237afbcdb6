use crate::error::DeviceError;
use camrelay::message::SegmentInfo;
use chrono::{Local, NaiveDateTime, TimeZone};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// `strftime` pattern naming each recording session directory.
pub const SESSION_DIR_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Playlist written inside every session directory.
pub const PLAYLIST_NAME: &str = "index.m3u8";

/// Recordings a device can list and serve on request.
#[async_trait::async_trait]
pub trait RecordingStore: Send + Sync {
    /// One entry per recording session, oldest first.
    async fn recorded_segments(&self) -> Result<Vec<SegmentInfo>, DeviceError>;

    /// Contents of `name`, relative to the store root.
    async fn fetch_segment(&self, name: &str) -> Result<Vec<u8>, DeviceError>;
}

/// Recordings laid out as `<record_dir>/<device_id>/<session>/...`.
#[derive(Debug, Clone)]
pub struct DirectoryRecordingStore {
    root: PathBuf,
}

impl DirectoryRecordingStore {
    pub fn new(record_dir: impl AsRef<Path>, device_id: &str) -> Self {
        Self {
            root: record_dir.as_ref().join(device_id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `name` under the root, refusing anything that could step
    /// outside it.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, DeviceError> {
        let relative = Path::new(name);

        let contained = !name.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if !contained {
            tracing::warn!(%name, "rejected recording path");
            return Err(DeviceError::PathTraversal(name.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn session_info(&self, name: &str, dir: &Path) -> SegmentInfo {
        let start_time = NaiveDateTime::parse_from_str(name, SESSION_DIR_FORMAT)
            .ok()
            .and_then(|naive| Local.from_local_datetime(&naive).earliest())
            .map_or(0, |at| at.timestamp());

        SegmentInfo {
            file_name: format!("{name}/{PLAYLIST_NAME}"),
            start_time,
            end_time: latest_modification(dir).await.unwrap_or(start_time).max(start_time),
        }
    }
}

/// Newest modification time among the files directly inside `dir`.
async fn latest_modification(dir: &Path) -> Option<i64> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut latest = None;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let modified = entry
            .metadata()
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok())
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map(|since| since.as_secs() as i64);

        latest = latest.max(modified);
    }
    latest
}

#[async_trait::async_trait]
impl RecordingStore for DirectoryRecordingStore {
    async fn recorded_segments(&self) -> Result<Vec<SegmentInfo>, DeviceError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            sessions.push(self.session_info(&name, &entry.path()).await);
        }

        sessions.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        Ok(sessions)
    }

    async fn fetch_segment(&self, name: &str) -> Result<Vec<u8>, DeviceError> {
        let path = self.resolve(name)?;

        tokio::fs::read(&path).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound => DeviceError::NotFound(name.to_string()),
            _ => DeviceError::Io(err),
        })
    }
}
