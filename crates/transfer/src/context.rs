use std::sync::Arc;

use mirrorlink_protocol::{Base64Codec, ChunkCodec, Message};

use crate::chunked::Sha256Digester;
use crate::connection::{Connection, ConnectionError};
use crate::progress::TransferObserver;
use crate::types::Digester;

/// External collaborators shared by both state machines of a session.
#[derive(Clone)]
pub struct Collaborators {
    pub connection: Arc<dyn Connection>,
    pub codec: Arc<dyn ChunkCodec>,
    pub digester: Arc<dyn Digester>,
    pub observer: Arc<dyn TransferObserver>,
}

impl Collaborators {
    /// Base64 chunks and SHA-256 digests, the defaults existing peers use.
    pub fn new(connection: Arc<dyn Connection>, observer: Arc<dyn TransferObserver>) -> Self {
        Self {
            connection,
            codec: Arc::new(Base64Codec),
            digester: Arc::new(Sha256Digester),
            observer,
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn ChunkCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_digester(mut self, digester: Arc<dyn Digester>) -> Self {
        self.digester = digester;
        self
    }

    /// Serializes and sends one message.
    pub(crate) fn send(&self, message: Message) -> Result<(), ConnectionError> {
        if !self.connection.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let text = message
            .to_json()
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))?;
        self.connection.send(&text)
    }
}
