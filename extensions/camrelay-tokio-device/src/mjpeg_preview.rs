use axum::{
    Router,
    body::Body,
    extract::State,
    http::header,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use bytes::{BufMut, Bytes, BytesMut};
use camrelay::demux::{MediaFrame, MediaKind};
use std::convert::Infallible;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Multipart boundary separating JPEGs in the preview stream.
pub const MJPEG_BOUNDARY: &str = "camrelayframe";

/// Frames a preview client may fall behind before it skips ahead.
const PREVIEW_QUEUE_DEPTH: usize = 10;

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>camrelay preview</title></head>
<body style="text-align: center">
<img src="/stream" alt="camera preview" style="max-width: 100%" />
</body>
</html>
"#;

/// Live `multipart/x-mixed-replace` preview of an MJPEG capture.
///
/// - `GET /` serves a page embedding the stream.
/// - `GET /stream` streams every JPEG fed in through `spawn_feeder`.
#[derive(Clone)]
pub struct MjpegPreview {
    frames: broadcast::Sender<Bytes>,
}

impl Default for MjpegPreview {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegPreview {
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(PREVIEW_QUEUE_DEPTH);
        Self { frames }
    }

    /// Number of clients currently streaming.
    pub fn viewer_count(&self) -> usize {
        self.frames.receiver_count()
    }

    /// Forwards JPEG frames from a frame pump sink to every preview client.
    ///
    /// The task runs until the sink's sender is dropped, whether or not
    /// anyone is watching.
    pub fn spawn_feeder(&self, mut frames: mpsc::Receiver<MediaFrame>) -> JoinHandle<()> {
        let preview = self.frames.clone();

        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if frame.kind != MediaKind::Jpeg {
                    continue;
                }
                // No subscribers is not an error.
                let _ = preview.send(frame.payload);
            }
            tracing::debug!("mjpeg preview feeder finished");
        })
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/", get(Self::index_handler))
            .route("/stream", get(Self::stream_handler))
            .with_state(self)
    }

    pub async fn serve_with_listener(self, listener: TcpListener) -> Result<(), axum::BoxError> {
        let address = listener.local_addr()?;

        tracing::info!(%address, "mjpeg preview listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    async fn index_handler() -> Html<&'static str> {
        Html(INDEX_PAGE)
    }

    async fn stream_handler(State(preview): State<MjpegPreview>) -> Response {
        let receiver = preview.frames.subscribe();
        tracing::info!(viewers = preview.viewer_count(), "preview client connected");

        let parts = futures_util::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(jpeg) => return Some((Ok::<_, Infallible>(multipart_part(&jpeg)), receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "preview client lagging; skipping frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        (
            [(
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"),
            )],
            [(header::CACHE_CONTROL, "no-cache"), (header::PRAGMA, "no-cache")],
            Body::from_stream(parts),
        )
            .into_response()
    }
}

/// One JPEG framed as a part of the multipart stream.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let head = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );

    let mut part = BytesMut::with_capacity(head.len() + jpeg.len() + 2);
    part.put_slice(head.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_carries_length_and_trailing_crlf() {
        let part = multipart_part(&[0xFF, 0xD8, 0xFF, 0xD9]);

        let expected_head = format!(
            "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n"
        );
        assert!(part.starts_with(expected_head.as_bytes()));
        assert!(part.ends_with(&[0xFF, 0xD8, 0xFF, 0xD9, b'\r', b'\n']));
    }
}
