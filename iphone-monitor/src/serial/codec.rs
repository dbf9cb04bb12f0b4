//! Codec for the microcontroller's wire format.
//!
//! Inbound traffic is newline-terminated text. Outbound traffic is single raw
//! bytes with no framing.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::tracing::prelude::*;

/// Longest line kept before the buffer is discarded.
pub const MAX_LINE_LEN: usize = 1024;

/// Splits input into lines and encodes single bytes.
///
/// Decoded lines have trailing whitespace (including `\r`) stripped. A line
/// that is not valid UTF-8 decodes to an empty string instead of an error, so
/// garbage on the wire never tears down the stream.
#[derive(Debug, Default)]
pub struct LineCodec;

impl LineCodec {
    fn finish(line: &[u8]) -> String {
        match std::str::from_utf8(line) {
            Ok(text) => text.trim_end().to_string(),
            Err(e) => {
                warn!("Discarding undecodable line ({} bytes): {}", line.len(), e);
                String::new()
            }
        }
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(pos) = src.iter().position(|&b| b == b'\n') {
            let line = src.split_to(pos + 1);
            return Ok(Some(Self::finish(&line[..pos])));
        }

        if src.len() > MAX_LINE_LEN {
            warn!("Discarding {} bytes without a line terminator", src.len());
            src.advance(src.len());
            return Ok(Some(String::new()));
        }

        Ok(None)
    }

    fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() => Ok(None),
            None => {
                let rest = src.split_to(src.len());
                Ok(Some(Self::finish(&rest)))
            }
        }
    }
}

impl Encoder<u8> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, byte: u8, dst: &mut BytesMut) -> Result<(), Self::Error> {
        trace!("TX {:?}", byte as char);
        dst.put_u8(byte);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn decode_all(input: &[u8]) -> Vec<String> {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(input);
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(&mut buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test_case(b"READY\n", "READY" ; "bare newline")]
    #[test_case(b"READY\r\n", "READY" ; "crlf")]
    #[test_case(
        b"Connection confirmed  \r\n",
        "Connection confirmed" ;
        "trailing spaces"
    )]
    #[test_case(b"  LED on\n", "  LED on" ; "leading space kept")]
    #[test_case(b"\n", "" ; "empty line")]
    fn test_decode_line(input: &[u8], expected: &str) {
        assert_eq!(decode_all(input), vec![expected.to_string()]);
    }

    #[test]
    fn test_partial_line_waits() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(&b"REA"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"REA");

        buf.extend_from_slice(b"DY\nConn");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("READY".to_string()));
        assert_eq!(&buf[..], b"Conn");
    }

    #[test]
    fn test_multiple_lines_in_one_read() {
        assert_eq!(decode_all(b"boot\nREADY\n"), vec!["boot", "READY"]);
    }

    #[test]
    fn test_invalid_utf8_decodes_empty() {
        let lines = decode_all(b"\xff\xfe\nREADY\n");
        assert_eq!(lines, vec!["", "READY"]);
    }

    #[test]
    fn test_overlong_garbage_is_dropped() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(&[b'x'; MAX_LINE_LEN + 1][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(String::new()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unterminated_tail_at_eof() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(&b"bye"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("bye".to_string()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_encode_single_byte() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::new();
        codec.encode(b'A', &mut buf).unwrap();
        codec.encode(b'0', &mut buf).unwrap();
        assert_eq!(&buf[..], b"A0");
    }
}
