use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::MessageType;
use crate::messages::{
    FileChunk, FileChunkAck, FileTransferComplete, FileTransferInit, TransferVerified,
};

/// Errors produced while parsing an inbound message.
///
/// Callers drop the message on any of these; no transfer state is touched.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown message type")]
    UnknownType,

    #[error("{0} message has no data")]
    MissingData(MessageType),

    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: MessageType,
        #[source]
        source: serde_json::Error,
    },
}

/// Inbound envelope with the `data` field left unparsed until the tag is known.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    msg_type: MessageType,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

/// Outbound envelope: `{ "type": ..., "data": ... }`.
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    msg_type: MessageType,
    data: &'a T,
}

/// One file transfer protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    FileTransferInit(FileTransferInit),
    FileChunk(FileChunk),
    FileChunkAck(FileChunkAck),
    FileTransferComplete(FileTransferComplete),
    TransferVerified(TransferVerified),
}

impl Message {
    /// Returns the envelope tag for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::FileTransferInit(_) => MessageType::FileTransferInit,
            Message::FileChunk(_) => MessageType::FileChunk,
            Message::FileChunkAck(_) => MessageType::FileChunkAck,
            Message::FileTransferComplete(_) => MessageType::FileTransferComplete,
            Message::TransferVerified(_) => MessageType::TransferVerified,
        }
    }

    /// Returns the transfer id the message refers to.
    pub fn transfer_id(&self) -> &str {
        match self {
            Message::FileTransferInit(m) => &m.id,
            Message::FileChunk(m) => &m.id,
            Message::FileChunkAck(m) => &m.id,
            Message::FileTransferComplete(m) => &m.id,
            Message::TransferVerified(m) => &m.id,
        }
    }

    /// Serializes the message into its wire envelope.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let msg_type = self.message_type();
        match self {
            Message::FileTransferInit(data) => encode(msg_type, data),
            Message::FileChunk(data) => encode(msg_type, data),
            Message::FileChunkAck(data) => encode(msg_type, data),
            Message::FileTransferComplete(data) => encode(msg_type, data),
            Message::TransferVerified(data) => encode(msg_type, data),
        }
    }

    /// Parses a wire envelope.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(ParseError::Malformed)?;
        let kind = raw.msg_type;
        if kind == MessageType::Unknown {
            return Err(ParseError::UnknownType);
        }
        let data = raw.data.ok_or(ParseError::MissingData(kind))?;
        let data = data.as_ref();

        match kind {
            MessageType::FileTransferInit => decode(kind, data).map(Message::FileTransferInit),
            MessageType::FileChunk => decode(kind, data).map(Message::FileChunk),
            MessageType::FileChunkAck => decode(kind, data).map(Message::FileChunkAck),
            MessageType::FileTransferComplete => {
                decode(kind, data).map(Message::FileTransferComplete)
            }
            MessageType::TransferVerified => decode(kind, data).map(Message::TransferVerified),
            MessageType::Unknown => Err(ParseError::UnknownType),
        }
    }
}

fn encode<T: Serialize>(msg_type: MessageType, data: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Envelope { msg_type, data })
}

fn decode<T: DeserializeOwned>(kind: MessageType, data: &RawValue) -> Result<T, ParseError> {
    serde_json::from_str(data.get()).map_err(|source| ParseError::InvalidPayload { kind, source })
}

impl From<FileTransferInit> for Message {
    fn from(m: FileTransferInit) -> Self {
        Message::FileTransferInit(m)
    }
}

impl From<FileChunk> for Message {
    fn from(m: FileChunk) -> Self {
        Message::FileChunk(m)
    }
}

impl From<FileChunkAck> for Message {
    fn from(m: FileChunkAck) -> Self {
        Message::FileChunkAck(m)
    }
}

impl From<FileTransferComplete> for Message {
    fn from(m: FileTransferComplete) -> Self {
        Message::FileTransferComplete(m)
    }
}

impl From<TransferVerified> for Message {
    fn from(m: TransferVerified) -> Self {
        Message::TransferVerified(m)
    }
}
