use camrelay::demux::{DemuxOptions, MediaFrame, MediaKind, MjpegDemuxer};
use rand::Rng;
use rand::rngs::ThreadRng;

const MIN_FRAME_SIZE: usize = 1024;

/// Bytes that can never form part of a marker.
fn filler(rng: &mut ThreadRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| rng.random_range(0x00..0xFF)).collect()
}

fn jpeg_frame(rng: &mut ThreadRng, len: usize) -> Vec<u8> {
    let mut frame = vec![0xFF, 0xD8];
    frame.extend(filler(rng, len - 4));
    frame.extend([0xFF, 0xD9]);
    frame
}

fn feed_in_random_chunks(
    rng: &mut ThreadRng,
    demuxer: &mut MjpegDemuxer,
    stream: &[u8],
) -> Vec<MediaFrame> {
    let mut frames = Vec::new();
    let mut offset = 0;

    while offset < stream.len() {
        let take = rng.random_range(1..=5_000).min(stream.len() - offset);
        demuxer.push_bytes(&stream[offset..offset + take], |frame| frames.push(frame));
        offset += take;
    }

    frames
}

#[test]
fn emits_exactly_the_valid_frames_in_order() {
    let mut rng = rand::rng();

    for _ in 0..20 {
        let frame_count = rng.random_range(1..12);
        let mut stream = Vec::new();
        let mut expected = Vec::new();

        for _ in 0..frame_count {
            // Leading noise, then a few short false-positive marker pairs.
            let noise_len = rng.random_range(0..3_000);
            stream.extend(filler(&mut rng, noise_len));

            for _ in 0..rng.random_range(0..3) {
                let inner_len = rng.random_range(0..MIN_FRAME_SIZE - 4);
                stream.extend([0xFF, 0xD8]);
                stream.extend(filler(&mut rng, inner_len));
                stream.extend([0xFF, 0xD9]);
                let noise_len = rng.random_range(0..200);
                stream.extend(filler(&mut rng, noise_len));
            }

            let frame_len = rng.random_range(MIN_FRAME_SIZE..20_000);
            let frame = jpeg_frame(&mut rng, frame_len);
            stream.extend(&frame);
            expected.push(frame);
        }

        let trailing_len = rng.random_range(0..500);
        stream.extend(filler(&mut rng, trailing_len));

        let mut demuxer = MjpegDemuxer::new(DemuxOptions::default());
        let frames = feed_in_random_chunks(&mut rng, &mut demuxer, &stream);

        assert_eq!(frames.len(), expected.len());
        for (frame, source) in frames.iter().zip(expected.iter()) {
            assert_eq!(frame.kind, MediaKind::Jpeg);
            assert_eq!(frame.payload.as_ref(), source.as_slice());
        }
    }
}

#[test]
fn marker_split_across_reads_is_found() {
    let mut rng = rand::rng();
    let frame = jpeg_frame(&mut rng, 2_048);

    let mut demuxer = MjpegDemuxer::new(DemuxOptions::default());
    let mut frames = Vec::new();

    // Split inside the SOI marker and again inside the EOI marker.
    demuxer.push_bytes(&frame[..1], |f| frames.push(f));
    demuxer.push_bytes(&frame[1..frame.len() - 1], |f| frames.push(f));
    assert!(frames.is_empty());

    demuxer.push_bytes(&frame[frame.len() - 1..], |f| frames.push(f));

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload.as_ref(), frame.as_slice());
    assert_eq!(demuxer.buffered(), 0);
}

#[test]
fn undersized_span_is_rejected_without_emitting() {
    let mut demuxer = MjpegDemuxer::new(DemuxOptions::default());
    let mut frames = Vec::new();

    let report = demuxer.push_bytes(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9], |f| frames.push(f));

    assert!(frames.is_empty());
    assert_eq!(report.rejected, 1);
    assert_eq!(report.emitted, 0);
}

#[test]
fn latest_only_emits_last_frame_of_read_cycle() {
    let mut rng = rand::rng();
    let options = DemuxOptions {
        latest_frame_only: true,
        ..Default::default()
    };
    let mut demuxer = MjpegDemuxer::new(options);

    let first = jpeg_frame(&mut rng, 1_500);
    let second = jpeg_frame(&mut rng, 1_600);
    let third = jpeg_frame(&mut rng, 1_700);
    let chunk: Vec<u8> = [first, second, third.clone()].concat();

    let mut frames = Vec::new();
    let report = demuxer.push_bytes(&chunk, |f| frames.push(f));

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload.as_ref(), third.as_slice());
    assert_eq!(report.emitted, 1);
    assert_eq!(report.skipped, 2);
}

#[test]
fn latest_only_with_single_frame_reports_no_skips() {
    let mut rng = rand::rng();
    let options = DemuxOptions {
        latest_frame_only: true,
        ..Default::default()
    };
    let mut demuxer = MjpegDemuxer::new(options);

    let frame = jpeg_frame(&mut rng, 1_500);
    let mut frames = Vec::new();
    let report = demuxer.push_bytes(&frame, |f| frames.push(f));

    assert_eq!(frames.len(), 1);
    assert_eq!(report.skipped, 0);
}

#[test]
fn safety_valve_resets_runaway_frame() {
    let mut rng = rand::rng();
    let options = DemuxOptions {
        capacity: 4_096,
        ..Default::default()
    };
    let mut demuxer = MjpegDemuxer::new(options);

    let mut chunk = vec![0xFF, 0xD8];
    chunk.extend(filler(&mut rng, 3_500));

    let report = demuxer.push_bytes(&chunk, |_| panic!("no frame expected"));

    assert_eq!(report.discarded_bytes, chunk.len());
    assert_eq!(demuxer.buffered(), 0);

    // The demuxer recovers and finds the next clean frame.
    let frame = jpeg_frame(&mut rng, 2_000);
    let mut frames = Vec::new();
    demuxer.push_bytes(&frame, |f| frames.push(f));
    assert_eq!(frames.len(), 1);
}

#[test]
fn noise_without_markers_is_not_retained() {
    let mut rng = rand::rng();
    let mut demuxer = MjpegDemuxer::new(DemuxOptions::default());

    for _ in 0..100 {
        let noise = filler(&mut rng, 4_096);
        demuxer.push_bytes(&noise, |_| panic!("no frame expected"));
        assert!(demuxer.buffered() <= 1);
    }
}
