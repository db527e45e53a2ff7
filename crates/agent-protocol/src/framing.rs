use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Upper bound for a single frame payload.
///
/// A header announcing more than this is treated as a corrupt stream rather than
/// an allocation request. Must agree with what the agent is willing to send.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

pub const HEADER_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("declared frame length exceeds limit of {limit} bytes")]
    TooLarge { limit: usize },
    #[error("frame codec failure: {0}")]
    Codec(#[source] std::io::Error),
}

impl FrameError {
    fn from_codec(err: std::io::Error, limit: usize) -> Self {
        if matches!(
            err.kind(),
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::InvalidInput
        ) {
            Self::TooLarge { limit }
        } else {
            Self::Codec(err)
        }
    }
}

/// `LengthDelimitedCodec` configured for the agent wire format: a 4-byte
/// little-endian unsigned length followed by the payload.
pub fn codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(HEADER_LEN)
        .little_endian()
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// Accumulates raw stream bytes and yields complete frame payloads.
pub struct FrameCodec {
    codec: LengthDelimitedCodec,
    buffer: BytesMut,
    limit: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_LENGTH)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            codec: codec(limit),
            buffer: BytesMut::new(),
            limit,
        }
    }

    pub fn encode(&mut self, payload: &[u8]) -> Result<Bytes, FrameError> {
        let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
        self.codec
            .encode(Bytes::copy_from_slice(payload), &mut out)
            .map_err(|err| FrameError::from_codec(err, self.limit))?;
        Ok(out.freeze())
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete payload, `None` while the buffered bytes are
    /// still a partial frame. An empty payload is a real message.
    pub fn extract_message(&mut self) -> Result<Option<Bytes>, FrameError> {
        match self.codec.decode(&mut self.buffer) {
            Ok(Some(frame)) => Ok(Some(frame.freeze())),
            Ok(None) => Ok(None),
            Err(err) => Err(FrameError::from_codec(err, self.limit)),
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}
