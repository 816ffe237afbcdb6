use camrelay::demux::{DemuxMode, DemuxOptions, MediaFrame, MediaKind, StreamDemuxer};
use camrelay_tokio_device::mjpeg_preview::{MJPEG_BOUNDARY, MjpegPreview, multipart_part};
use camrelay_tokio_device::{FrameFanout, run_demux};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

fn jpeg_frame(len: usize) -> Vec<u8> {
    let mut frame = vec![0xFF, 0xD8];
    frame.extend(std::iter::repeat_n(0x11, len - 4));
    frame.extend([0xFF, 0xD9]);
    frame
}

async fn start_preview(preview: MjpegPreview) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = preview.serve_with_listener(listener).await;
    });
    address
}

#[tokio::test]
async fn mjpeg_capture_is_read_to_the_end_with_a_preview_attached() {
    let stream: Vec<u8> = (0..10).flat_map(|_| jpeg_frame(4004)).collect();

    let preview = MjpegPreview::new();
    let mut fanout = FrameFanout::new();
    let feeder = preview.spawn_feeder(fanout.add_sink("preview", 16));

    let demuxer = StreamDemuxer::new(DemuxMode::Mjpeg, DemuxOptions::default());
    let summary = run_demux(stream.as_slice(), demuxer, fanout).await;

    assert_eq!(summary.bytes_read, stream.len() as u64);
    assert_eq!(summary.frames, 10);

    // The pump dropped its senders on return.
    timeout(Duration::from_secs(5), feeder).await.unwrap().unwrap();
}

#[tokio::test]
async fn preview_client_receives_multipart_jpegs() {
    let preview = MjpegPreview::new();
    let mut fanout = FrameFanout::new();
    let _feeder = preview.spawn_feeder(fanout.add_sink("preview", 16));
    let address = start_preview(preview.clone()).await;

    let mut response = reqwest::get(format!("http://{address}/stream")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}")
    );
    assert_eq!(preview.viewer_count(), 1);

    let jpeg = jpeg_frame(2048);
    fanout.dispatch(MediaFrame::new(
        MediaKind::Jpeg,
        jpeg.clone(),
        Duration::from_millis(33),
    ));

    let expected = multipart_part(&jpeg);
    let mut body = Vec::new();
    while body.len() < expected.len() {
        let chunk = timeout(Duration::from_secs(5), response.chunk())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("stream ended early");
        body.extend_from_slice(&chunk);
    }

    assert_eq!(&body[..expected.len()], expected.as_ref());
}

#[tokio::test]
async fn non_jpeg_frames_are_not_streamed() {
    let preview = MjpegPreview::new();
    let mut fanout = FrameFanout::new();
    let _feeder = preview.spawn_feeder(fanout.add_sink("preview", 16));
    let address = start_preview(preview.clone()).await;

    let mut response = reqwest::get(format!("http://{address}/stream")).await.unwrap();

    fanout.dispatch(MediaFrame::new(
        MediaKind::H264Nal,
        vec![0, 0, 0, 1, 0x65, 0xAB],
        Duration::from_millis(33),
    ));
    let jpeg = jpeg_frame(1500);
    fanout.dispatch(MediaFrame::new(
        MediaKind::Jpeg,
        jpeg.clone(),
        Duration::from_millis(33),
    ));

    let expected = multipart_part(&jpeg);
    let mut body = Vec::new();
    while body.len() < expected.len() {
        let chunk = timeout(Duration::from_secs(5), response.chunk())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        body.extend_from_slice(&chunk);
    }

    // The first bytes on the wire belong to the JPEG, not the NAL unit.
    assert_eq!(&body[..expected.len()], expected.as_ref());
}

#[tokio::test]
async fn index_page_embeds_the_stream() {
    let address = start_preview(MjpegPreview::new()).await;

    let page = reqwest::get(format!("http://{address}/"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(page.contains(r#"src="/stream""#));
}
