//! Length-prefixed bincode framing for [`Envelope`]s.
//!
//! Every frame is a 4-byte big-endian length followed by the bincode body.
//! The codec separates two failure classes: a body that does not decode is
//! reported as an *item* (`Ok(Some(Err(..)))`) so the frame stream keeps
//! going, while broken framing or I/O is reported as a codec error, which
//! ends the stream.

use crate::{Envelope, MAX_FRAME_LEN};
use bytes::{Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A single frame whose body could not be decoded.
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Whether the connection can no longer be used after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Malformed(_))
    }
}

#[derive(Debug)]
pub struct EnvelopeCodec {
    frames: LengthDelimitedCodec,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
        }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Result<Envelope, TransportError>;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.frames.decode(src)? else {
            return Ok(None);
        };

        Ok(Some(
            bincode::deserialize::<Envelope>(&frame)
                .map_err(|e| TransportError::Malformed(e.to_string())),
        ))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = bincode::serialize(&item)
            .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        self.frames.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}
