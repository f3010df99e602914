//! NDJSON codec for the relay connection.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so a misbehaving sandbox cannot make the reader allocate without
//! bound.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use action_relay::relay::codec::RelayCodec;
//!
//! let reader = FramedRead::new(read_half, RelayCodec::new(1_048_576));
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Default maximum inbound line length: 1 MiB.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited JSON codec for both directions of the relay.
///
/// # Decoder
///
/// Inbound lines longer than the configured limit return
/// [`AppError::Relay`]`("line too long: …")`; the codec then discards up to
/// the next newline and keeps going. I/O errors map to [`AppError::Io`].
///
/// # Encoder
///
/// Outbound strings are written as `item\n`. The length limit is a
/// decoder-side concern and is not enforced on encode.
#[derive(Debug)]
pub struct RelayCodec {
    inner: LinesCodec,
    max_line_bytes: usize,
}

impl RelayCodec {
    /// Create a codec that rejects inbound lines longer than `max_line_bytes`.
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
        }
    }

    fn map_error(&self, e: LinesCodecError) -> AppError {
        match e {
            LinesCodecError::MaxLineLengthExceeded => AppError::Relay(format!(
                "line too long: exceeded {} bytes",
                self.max_line_bytes
            )),
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Default for RelayCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl Decoder for RelayCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner.decode(src).map_err(|e| self.map_error(e))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner.decode_eof(src).map_err(|e| self.map_error(e))
    }
}

impl Encoder<String> for RelayCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner.encode(item, dst).map_err(|e| self.map_error(e))
    }
}
