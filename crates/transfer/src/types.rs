use std::borrow::Borrow;
use std::fmt;
use std::io::Read;

use mirrorlink_protocol::{FileTransferComplete, FileTransferInit};

use crate::chunked::chunk_offset;

/// Opaque identifier of one transfer, chosen by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(String);

impl TransferId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TransferId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransferId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransferId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Immutable description of the file being transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMetadata {
    pub id: TransferId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    /// Digest of the entire file, computed before the transfer starts.
    pub checksum: Option<String>,
}

impl TransferMetadata {
    pub fn from_init(init: &FileTransferInit) -> Self {
        Self {
            id: TransferId::new(init.id.as_str()),
            name: init.name.clone(),
            size: init.size,
            mime_type: init.mime_type.clone(),
            checksum: init.checksum.clone(),
        }
    }

    pub fn to_init(&self) -> FileTransferInit {
        FileTransferInit {
            id: self.id.to_string(),
            name: self.name.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
            checksum: self.checksum.clone(),
        }
    }

    pub fn to_complete(&self) -> FileTransferComplete {
        FileTransferComplete {
            id: self.id.to_string(),
            name: self.name.clone(),
            size: self.size,
            checksum: self.checksum.clone(),
        }
    }
}

/// A decoded slice of a file, addressed by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub transfer_id: TransferId,
    pub index: u64,
    pub payload: Vec<u8>,
}

impl Chunk {
    /// Byte offset of this chunk within the file.
    pub fn offset(&self, chunk_size: usize) -> u64 {
        chunk_offset(self.index, chunk_size)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Lifecycle state of a transfer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Init sent or received, no chunk traffic yet.
    Initiated,
    /// Sender emitting chunks / receiver accepting them.
    InProgress,
    /// Sender: every chunk sent, waiting for the remaining acks.
    AwaitingCompletion,
    /// Sender: completion sent, waiting for the verification result.
    AwaitingVerification,
    /// Receiver: checking completeness and checksum.
    Verifying,
    Verified,
    Failed,
    Aborted,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Verified | TransferStatus::Failed | TransferStatus::Aborted
        )
    }
}

/// Why a transfer did not end verified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("incomplete transfer: {received} of {expected} chunks")]
    Incomplete { received: u64, expected: u64 },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("peer reported verification failure")]
    Rejected,

    #[error("connection lost")]
    Disconnected,

    #[error("aborted: {0}")]
    Aborted(String),
}

/// Final result reported through `on_transfer_finished`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Verified,
    Failed(FailureReason),
}

impl TransferOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, TransferOutcome::Verified)
    }

    /// Status the record ends in for this outcome.
    pub fn status(&self) -> TransferStatus {
        match self {
            TransferOutcome::Verified => TransferStatus::Verified,
            TransferOutcome::Failed(FailureReason::Aborted(_)) => TransferStatus::Aborted,
            TransferOutcome::Failed(_) => TransferStatus::Failed,
        }
    }
}

/// Content hash collaborator.
pub trait Digester: Send + Sync {
    /// Returns the lowercase hex digest of everything `reader` yields.
    fn digest(&self, reader: &mut dyn Read) -> std::io::Result<String>;
}
