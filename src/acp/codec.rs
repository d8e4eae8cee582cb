//! NDJSON line codec shared by both protocol legs.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so an unterminated or runaway line from either peer cannot exhaust
//! memory. The same codec frames the upstream ACP stream (editor client on
//! the bridge's own stdio) and the downstream agent stream (each child's
//! stdio).
//!
//! Framing is part of the wire contract, not an implementation detail:
//! outbound objects are serialised to a single line plus one `\n`; inbound
//! partial lines stay buffered inside the codec until their newline arrives,
//! and only a fully terminated line is ever handed to the JSON layer.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted by the codec: 4 MiB.
///
/// Agent messages embed complete tool results and finalised assistant
/// content, so the cap is considerably larger than a typical control frame.
/// Lines exceeding it cause [`NdjsonCodec::decode`] to return
/// [`AppError::Agent`] with `"line too long"` rather than allocating.
pub const MAX_LINE_BYTES: usize = 4 * 1_048_576;

/// NDJSON codec for bidirectional newline-delimited JSON streams.
///
/// Delegates line framing to [`LinesCodec`] with a fixed [`MAX_LINE_BYTES`]
/// limit. Each newline-terminated UTF-8 string is one complete message.
#[derive(Debug)]
pub struct NdjsonCodec(LinesCodec);

impl NdjsonCodec {
    /// Create a new codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` while `src` holds only a partial line (buffering).
    /// Returns `Err(AppError::Agent("line too long: …"))` when the line
    /// exceeds [`MAX_LINE_BYTES`].
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode the final line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for NdjsonCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated NDJSON line into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on underlying I/O failures.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // The max-length limit is a decoder-side concern only.
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Agent(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
