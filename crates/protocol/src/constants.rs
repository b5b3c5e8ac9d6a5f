use std::fmt;

use serde::{Deserialize, Serialize};

/// File transfer message type identifier (the envelope's `type` tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Sender -> receiver
    #[serde(rename = "fileTransferInit")]
    FileTransferInit,
    #[serde(rename = "fileChunk")]
    FileChunk,
    #[serde(rename = "fileTransferComplete")]
    FileTransferComplete,

    // Receiver -> sender
    #[serde(rename = "fileChunkAck")]
    FileChunkAck,
    #[serde(rename = "transferVerified")]
    TransferVerified,

    /// Any tag this side does not understand.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::FileTransferInit => "fileTransferInit",
            MessageType::FileChunk => "fileChunk",
            MessageType::FileTransferComplete => "fileTransferComplete",
            MessageType::FileChunkAck => "fileChunkAck",
            MessageType::TransferVerified => "transferVerified",
            MessageType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
