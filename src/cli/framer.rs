//! Line framing for the CLI text protocol (C5).
//!
//! Thin wrapper over [`tokio_util::codec::LinesCodec`] enforcing spec.md
//! §4.5's 4096-byte maximum line length: a line longer than that is
//! discarded rather than buffered forever, and the connection keeps
//! going (the codec resumes cleanly at the next `\n`). This is the
//! line-oriented analogue of the binary protocol's stream framer (C2),
//! reusing the same `tokio_util::codec` machinery the frame codec is
//! built on rather than hand-rolling a second one.

use tokio_util::codec::LinesCodec;

/// Maximum line length (spec.md §4.5) before a line is discarded.
pub const MAX_LINE_BYTES: usize = 4096;

/// Build a line codec enforcing [`MAX_LINE_BYTES`].
pub fn cli_line_codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_LINE_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use tokio_util::codec::Decoder;

    #[test]
    fn short_lines_decode_normally() {
        let mut codec = cli_line_codec();
        let mut buf = BytesMut::from("CMD:ping\n");
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line, "CMD:ping");
    }

    #[test]
    fn overlong_line_is_discarded_but_connection_continues() {
        // Property 12's "never panics or loops" extended to the framing
        // layer: an unterminated line past the limit doesn't wedge the
        // decoder, and a well-formed line right after it still decodes.
        let mut codec = cli_line_codec();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'a'; MAX_LINE_BYTES + 10]);
        buf.extend_from_slice(b"\n");
        buf.extend_from_slice(b"CMD:ping\n");

        assert!(codec.decode(&mut buf).is_err());
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line, "CMD:ping");
    }

    #[test]
    fn partial_line_waits_for_more_bytes() {
        let mut codec = cli_line_codec();
        let mut buf = BytesMut::from("CMD:pi");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }
}
