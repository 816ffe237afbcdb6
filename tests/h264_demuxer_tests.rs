use camrelay::constants::H264_START_CODE;
use camrelay::demux::{
    DemuxMode, DemuxOptions, H264Demuxer, MediaKind, NalUnitType, StreamDemuxer,
};

fn three_unit_stream() -> (Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>) {
    let a = vec![0x09, 0xF0, 0x11, 0x22];
    let b = vec![0x67, 0x42, 0x00, 0x1F, 0xAA];
    let c = vec![0x65, 0x88, 0x84, 0x00];

    let stream = [
        a.clone(),
        H264_START_CODE.to_vec(),
        b.clone(),
        H264_START_CODE.to_vec(),
        c.clone(),
    ]
    .concat();

    (stream, a, b, c)
}

#[test]
fn emits_spans_between_start_codes() {
    let (stream, a, b, _c) = three_unit_stream();

    let mut demuxer = H264Demuxer::new(DemuxOptions::default());
    let mut units = Vec::new();
    let report = demuxer.push_bytes(&stream, |unit| units.push(unit));

    assert_eq!(report.emitted, 2);
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].payload.as_ref(), a.as_slice());
    assert_eq!(
        units[1].payload.as_ref(),
        [H264_START_CODE.to_vec(), b].concat().as_slice()
    );
    assert!(units.iter().all(|unit| unit.kind == MediaKind::H264Nal));

    // The trailing unit stays buffered until the next start code.
    assert_eq!(demuxer.buffered(), H264_START_CODE.len() + 4);
}

#[test]
fn start_code_split_across_reads_is_found() {
    let (stream, a, b, _c) = three_unit_stream();

    let mut demuxer = H264Demuxer::new(DemuxOptions::default());
    let mut units = Vec::new();
    for byte in &stream {
        demuxer.push_bytes(std::slice::from_ref(byte), |unit| units.push(unit));
    }

    assert_eq!(units.len(), 2);
    assert_eq!(units[0].payload.as_ref(), a.as_slice());
    assert_eq!(
        units[1].payload.as_ref(),
        [H264_START_CODE.to_vec(), b].concat().as_slice()
    );
}

#[test]
fn leading_start_code_is_not_an_emission() {
    let mut demuxer = H264Demuxer::new(DemuxOptions::default());
    let mut units = Vec::new();

    let report = demuxer.push_bytes(&[0, 0, 0, 1, 0x65, 0x01], |unit| units.push(unit));

    assert_eq!(report.emitted, 0);
    assert!(units.is_empty());
}

#[test]
fn classifies_nal_unit_types() {
    let mut demuxer = StreamDemuxer::new(DemuxMode::H264, DemuxOptions::default());
    let mut units = Vec::new();

    let stream = [
        &H264_START_CODE[..],
        &[0x67, 0x42],
        &H264_START_CODE[..],
        &[0x65, 0x88],
        &H264_START_CODE[..],
    ]
    .concat();
    demuxer.push_bytes(&stream, |unit| units.push(unit));

    assert_eq!(units.len(), 2);
    assert_eq!(units[0].nal_unit_type(), Some(NalUnitType::Sps));
    assert!(!units[0].is_keyframe());
    assert_eq!(units[1].nal_unit_type(), Some(NalUnitType::SliceIdr));
    assert!(units[1].is_keyframe());
}

#[test]
fn buffer_without_start_code_is_reset_at_capacity() {
    let options = DemuxOptions {
        capacity: 64,
        ..Default::default()
    };
    let mut demuxer = H264Demuxer::new(options);

    let report = demuxer.push_bytes(&[0x42; 100], |_| panic!("no unit expected"));

    assert_eq!(report.discarded_bytes, 100);
    assert_eq!(demuxer.buffered(), 0);
}
