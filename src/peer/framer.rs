//! Incremental NDJSON line framer for the peer's output stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! misbehaving peer cannot make the bridge buffer an unterminated line
//! forever.
//!
//! The framer is push-based: [`LineFramer::feed`] appends a raw chunk and
//! returns a lazy iterator over the lines completed so far. Whatever the
//! iterator does not consume stays buffered and is yielded by the next feed.
//! A trailing partial line is kept until its newline arrives.

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted from the peer: 16 MiB.
///
/// Tool results may embed base64 screenshots, so the bound is generous.
/// Longer lines yield [`AppError::Codec`]`("line too long: …")` and are
/// discarded up to the next newline.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Accumulates raw bytes and splits them into complete lines.
#[derive(Debug)]
pub struct LineFramer {
    codec: LinesCodec,
    buf: BytesMut,
}

impl LineFramer {
    /// Create a framer with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a framer with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            codec: LinesCodec::new_with_max_length(max_length),
            buf: BytesMut::new(),
        }
    }

    /// Append `chunk` and iterate over the lines it completes.
    ///
    /// Empty and whitespace-only lines are skipped. Oversized lines and lines
    /// that are not UTF-8 surface as `Err` items; iteration may continue past
    /// them.
    pub fn feed(&mut self, chunk: &[u8]) -> Lines<'_> {
        self.buf.extend_from_slice(chunk);
        Lines {
            framer: self,
            at_eof: false,
        }
    }

    /// Flush the buffered remainder once the stream has ended.
    ///
    /// A final line without a terminating newline is yielded as a line.
    pub fn finish(&mut self) -> Lines<'_> {
        Lines {
            framer: self,
            at_eof: true,
        }
    }

    /// Bytes currently buffered, waiting for a newline.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy iterator over complete lines, borrowed from a [`LineFramer`].
#[derive(Debug)]
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
    at_eof: bool,
}

impl Iterator for Lines<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let LineFramer { codec, buf } = &mut *self.framer;
            let decoded = if self.at_eof {
                codec.decode_eof(buf)
            } else {
                codec.decode(buf)
            };

            match decoded {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => return Some(Ok(line)),
                Ok(None) => return None,
                Err(err) => return Some(Err(map_codec_error(err))),
            }
        }
    }
}

/// Parse one framed line as a JSON document.
///
/// # Errors
///
/// Returns `AppError::Codec("malformed json: …")` if the line is not JSON.
pub fn parse_line(line: &str) -> Result<Value> {
    serde_json::from_str(line).map_err(|err| AppError::Codec(format!("malformed json: {err}")))
}

fn map_codec_error(err: LinesCodecError) -> AppError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => AppError::Codec("line too long".into()),
        LinesCodecError::Io(io_err) => AppError::Codec(format!("undecodable line: {io_err}")),
    }
}
