//! Transfer tuning knobs.
//!
//! Hosts usually embed this in their own JSON settings file, so the serde
//! representation uses camelCase keys and every field has a default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Default number of chunks in flight before the sender waits for acks.
pub const DEFAULT_WINDOW_SIZE: usize = 8;

/// Default time the sender waits for an ack before retransmitting.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default retransmissions of the oldest unacked chunk before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default bound on a transfer making no progress at all.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time a retired id keeps absorbing late duplicates.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferConfig {
    /// Bytes per chunk.
    pub chunk_size: usize,
    /// Maximum unacknowledged chunks; 1 is stop-and-wait.
    pub window_size: usize,
    pub ack_timeout_ms: u64,
    pub max_retries: u32,
    pub idle_timeout_ms: u64,
    pub grace_ms: u64,
    /// Compute the whole-file digest on the sender when the caller gave none.
    pub compute_missing_checksum: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            window_size: DEFAULT_WINDOW_SIZE,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT.as_millis() as u64,
            max_retries: DEFAULT_MAX_RETRIES,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT.as_millis() as u64,
            grace_ms: DEFAULT_GRACE.as_millis() as u64,
            compute_missing_checksum: false,
        }
    }
}

impl TransferConfig {
    /// Parses and validates a JSON config.
    pub fn from_json(json: &str) -> Result<Self, TransferError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TransferError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the state machines cannot run with.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidConfig("chunkSize must be > 0".into()));
        }
        if self.window_size == 0 {
            return Err(TransferError::InvalidConfig("windowSize must be >= 1".into()));
        }
        if self.ack_timeout_ms == 0 || self.idle_timeout_ms == 0 {
            return Err(TransferError::InvalidConfig(
                "timeouts must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}
