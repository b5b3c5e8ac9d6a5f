//! Chunked file transfer over a message-oriented connection.
//!
//! A [`TransferSession`] pairs a [`sender::Sender`] and a
//! [`receiver::Receiver`] state machine for one connection. The host feeds
//! inbound text messages to [`TransferSession::handle_message`] and calls
//! [`TransferSession::tick`] periodically; the machines never block waiting
//! for the peer. [`TransferService`] wraps that loop in a tokio task.

mod chunked;
mod config;
mod connection;
mod context;
mod io;
mod progress;
pub mod receiver;
pub mod sender;
mod service;
mod session;
mod table;
mod types;
mod validation;

pub use chunked::{Sha256Digester, checksum_bytes, chunk_len, chunk_offset, total_chunks};
pub use config::TransferConfig;
pub use connection::{Connection, ConnectionError};
pub use context::Collaborators;
pub use io::{
    ByteSink, ByteSource, DirectoryStorage, FileSink, FileSource, MemorySink, MemorySource,
    MemoryStorage, SinkProvider,
};
pub use progress::{ChannelObserver, ProgressThrottle, TransferEvent, TransferObserver};
pub use service::{DEFAULT_TICK_INTERVAL, ServiceHandle, TransferService};
pub use session::TransferSession;
pub use table::TransferTable;
pub use types::{
    Chunk, Digester, FailureReason, TransferId, TransferMetadata, TransferOutcome,
    TransferStatus,
};
pub use validation::validate_file_name;

/// Default chunk size: 64 KiB.
///
/// Larger chunks cut per-message overhead; smaller ones lower latency and
/// the cost of a retransmission. Both peers must agree on the value.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer already active: {0}")]
    Capacity(String),

    #[error("transfer not found: {0}")]
    NotFound(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("transport error: {0}")]
    Transport(#[from] ConnectionError),

    #[error("transfer service stopped")]
    ServiceStopped,
}
