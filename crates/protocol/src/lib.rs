//! Wire protocol for MirrorLink chunked file transfers.
//!
//! Every message is a JSON envelope `{ "type": ..., "data": ... }` carrying
//! one of five payloads. Field names and the conditional presence of
//! `checksum` are shared with existing peers and must not change.

pub mod codec;
pub mod constants;
pub mod envelope;
pub mod messages;

// Re-export primary types for convenience.
pub use codec::{Base64Codec, ChunkCodec, CodecError};
pub use constants::MessageType;
pub use envelope::{Message, ParseError};
pub use messages::{
    FileChunk, FileChunkAck, FileTransferComplete, FileTransferInit, TransferVerified,
};
