//! Transport framing: one envelope per 4-byte big-endian length-prefixed frame.

use tokio_util::codec::LengthDelimitedCodec;

/// Default maximum frame length (16 MB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Build the frame codec used on both ends of a connection.
///
/// Frames longer than `max_frame_length` fail the stream with an I/O error,
/// which the connection task treats as a transport fault.
pub fn frame_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_length)
        .new_codec()
}
