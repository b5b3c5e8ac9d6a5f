use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sender -> receiver
// ---------------------------------------------------------------------------

/// Announces a new transfer and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTransferInit {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "mime")]
    pub mime_type: String,
    /// Whole-file digest; omitted from the wire when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// One codec-encoded slice of the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChunk {
    pub id: String,
    pub index: u64,
    /// Encoded payload text (see [`crate::codec`]).
    pub chunk: String,
}

/// Sent once every chunk has been acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTransferComplete {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

// ---------------------------------------------------------------------------
// Receiver -> sender
// ---------------------------------------------------------------------------

/// Acknowledges one accepted chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChunkAck {
    pub id: String,
    pub index: u64,
}

/// Reports the verification outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferVerified {
    pub id: String,
    pub verified: bool,
}
