//! CRLF line framing for the text protocol

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum line size (1 MB, comfortably above any INFO payload)
const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Framing error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("line too long: {size} bytes (max {max})")]
    LineTooLong { size: usize, max: usize },
}

/// Splits a byte stream into CRLF-terminated protocol lines.
///
/// Partial trailing data stays buffered until its delimiter arrives; a lone
/// `\r` at the end of the buffer is not a terminator. The scan position is
/// carried across reads so already-inspected bytes are not rescanned.
///
/// The encoder side passes already-framed bytes through untouched: the
/// outbound path builds its own `<verb> <payload>\r\n` lines.
#[derive(Debug, Default)]
pub struct LineCodec {
    scanned: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, CodecError> {
        // Stop one byte short of the end so a delimiter split across two
        // reads is retried once the second byte is in.
        while self.scanned + 1 < src.len() {
            if src[self.scanned] == b'\r' && src[self.scanned + 1] == b'\n' {
                let line = src.split_to(self.scanned);
                src.advance(2);
                self.scanned = 0;
                let text = std::str::from_utf8(&line)?.to_owned();
                return Ok(Some(text));
            }
            self.scanned += 1;
        }

        if src.len() > MAX_LINE_SIZE {
            return Err(CodecError::LineTooLong {
                size: src.len(),
                max: MAX_LINE_SIZE,
            });
        }

        Ok(None)
    }
}

impl Encoder<Bytes> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), CodecError> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
