use std::time::Duration;

/// Size of a single read from the capture source.
pub const DEMUX_READ_CHUNK_SIZE: usize = 4096;

/// Default capacity of the MJPEG ring buffer and of the H.264 linear buffer.
pub const DEFAULT_DEMUX_BUFFER_CAPACITY: usize = 256 * 1024;

/// Smallest span between SOI and EOI markers that is treated as a real image.
///
/// Marker pairs closer together than this are almost always coincidental
/// byte patterns inside other data and are discarded as noise.
pub const DEFAULT_MIN_FRAME_SIZE: usize = 1024;

/// Fraction (numerator / denominator) of the ring capacity that may be
/// occupied by unconsumed bytes before the demuxer resets its buffer.
pub const SAFETY_VALVE_NUMERATOR: usize = 3;
pub const SAFETY_VALVE_DENOMINATOR: usize = 4;

/// JPEG start-of-image marker.
pub const JPEG_SOI_MARKER: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker.
pub const JPEG_EOI_MARKER: [u8; 2] = [0xFF, 0xD9];

/// H.264 Annex B four byte start code.
pub const H264_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Default inter-frame duration hint (30 fps).
pub const DEFAULT_FRAME_DURATION: Duration = Duration::from_micros(33_333);

/// Version byte prepended to every encoded `Message`.
///
/// Peers reject messages carrying any other value rather than attempting
/// to decode a body laid out by a different protocol revision.
pub const WIRE_VERSION: u8 = 1;

/// Address used in `Message::to` when the relay itself is the recipient.
pub const SERVER_ADDRESS: &str = "server";
