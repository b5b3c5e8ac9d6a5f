//! Text-safe encoding of chunk payloads.

use base64::{Engine, engine::general_purpose::STANDARD};

/// Error returned when a chunk payload cannot be decoded.
#[derive(Debug, thiserror::Error)]
#[error("invalid chunk encoding: {0}")]
pub struct CodecError(pub String);

/// Deterministic byte <-> text transform for chunk payloads.
pub trait ChunkCodec: Send + Sync {
    fn encode(&self, bytes: &[u8]) -> String;
    fn decode(&self, text: &str) -> Result<Vec<u8>, CodecError>;
}

/// Standard padded base64, the encoding existing peers use.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl ChunkCodec for Base64Codec {
    fn encode(&self, bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    fn decode(&self, text: &str) -> Result<Vec<u8>, CodecError> {
        STANDARD
            .decode(text)
            .map_err(|e| CodecError(e.to_string()))
    }
}
