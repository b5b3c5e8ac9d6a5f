//! Inbound side: accepts chunks into a positional sink, acks each one, and
//! verifies completeness and checksum when the sender declares completion.
//!
//! ```text
//! Idle -> Initiated -> InProgress -> Verifying -> Verified | Failed
//! ```

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{debug, info, warn};

use mirrorlink_protocol::{
    FileChunk, FileChunkAck, FileTransferComplete, FileTransferInit, TransferVerified,
};

use crate::TransferError;
use crate::chunked::{chunk_len, total_chunks};
use crate::config::TransferConfig;
use crate::context::Collaborators;
use crate::io::{ByteSink, SinkProvider};
use crate::progress::ProgressThrottle;
use crate::table::TransferTable;
use crate::types::{
    Chunk, FailureReason, TransferId, TransferMetadata, TransferOutcome, TransferStatus,
};

/// Receiver-side transfer record.
pub struct InboundTransfer {
    metadata: TransferMetadata,
    total_chunks: u64,
    received_chunks: BTreeSet<u64>,
    written_bytes: u64,
    status: TransferStatus,
    last_activity: Instant,
    sink: Box<dyn ByteSink>,
}

impl InboundTransfer {
    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    pub fn received_count(&self) -> u64 {
        self.received_chunks.len() as u64
    }

    pub fn has_chunk(&self, index: u64) -> bool {
        self.received_chunks.contains(&index)
    }

    pub fn written_bytes(&self) -> u64 {
        self.written_bytes
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Checks the record against the sender's completion message.
    fn verify(
        &mut self,
        complete: &FileTransferComplete,
        ctx: &Collaborators,
    ) -> Result<(), FailureReason> {
        let received = self.received_count();
        if received != self.total_chunks {
            return Err(FailureReason::Incomplete {
                received,
                expected: self.total_chunks,
            });
        }
        if complete.size != self.metadata.size {
            return Err(FailureReason::SizeMismatch {
                expected: self.metadata.size,
                actual: complete.size,
            });
        }
        if self.written_bytes != self.metadata.size {
            return Err(FailureReason::SizeMismatch {
                expected: self.metadata.size,
                actual: self.written_bytes,
            });
        }

        let Some(expected) = complete.checksum.as_ref().or(self.metadata.checksum.as_ref()) else {
            // No digest to compare against: completeness is the verdict.
            return Ok(());
        };
        let mut reader = self
            .sink
            .reader()
            .map_err(|e| FailureReason::Io(e.to_string()))?;
        let actual = ctx
            .digester
            .digest(&mut reader)
            .map_err(|e| FailureReason::Io(e.to_string()))?;
        if !actual.eq_ignore_ascii_case(expected) {
            debug!(transfer = %self.metadata.id, %expected, %actual, "digest mismatch");
            return Err(FailureReason::ChecksumMismatch);
        }
        Ok(())
    }
}

/// Drives every inbound transfer of one connection session.
pub struct Receiver {
    config: TransferConfig,
    table: TransferTable<InboundTransfer>,
    ctx: Collaborators,
    storage: Box<dyn SinkProvider>,
    throttle: ProgressThrottle,
}

impl Receiver {
    pub fn new(config: TransferConfig, ctx: Collaborators, storage: Box<dyn SinkProvider>) -> Self {
        Self {
            table: TransferTable::new(config.grace()),
            config,
            ctx,
            storage,
            throttle: ProgressThrottle::default(),
        }
    }

    /// Handles `fileTransferInit`.
    pub fn on_init(&mut self, init: &FileTransferInit, now: Instant) {
        if let Err(e) = self.table.check_available(&init.id, now) {
            warn!(transfer = %init.id, error = %e, "init rejected");
            return;
        }

        let metadata = TransferMetadata::from_init(init);
        let id = metadata.id.clone();
        let sink = match self.storage.open_sink(&metadata) {
            Ok(sink) => sink,
            Err(e) => {
                warn!(transfer = %id, error = %e, "cannot open destination");
                self.table.mark_retired(id.clone(), now);
                self.report_verdict(id.as_str(), false);
                let outcome = TransferOutcome::Failed(FailureReason::Io(e.to_string()));
                self.ctx.observer.on_transfer_finished(&id, &outcome);
                return;
            }
        };

        let record = InboundTransfer {
            total_chunks: total_chunks(metadata.size, self.config.chunk_size),
            metadata,
            received_chunks: BTreeSet::new(),
            written_bytes: 0,
            status: TransferStatus::Initiated,
            last_activity: now,
            sink,
        };
        info!(
            transfer = %id,
            name = %record.metadata.name,
            size = record.metadata.size,
            chunks = record.total_chunks,
            "inbound transfer started"
        );
        if let Err(e) = self.table.insert(id.clone(), record, now) {
            warn!(transfer = %id, error = %e, "init rejected");
            return;
        }
        if let Some(t) = self.table.get_mut(id.as_str()) {
            t.status = TransferStatus::InProgress;
        }
    }

    /// Handles `fileChunk`.
    pub fn on_chunk(&mut self, chunk: &FileChunk, now: Instant) {
        let Some(t) = self.table.get_mut(&chunk.id) else {
            debug!(transfer = %chunk.id, index = chunk.index, "chunk for inactive transfer ignored");
            return;
        };
        if t.status != TransferStatus::InProgress {
            debug!(transfer = %chunk.id, status = ?t.status, "chunk in wrong state ignored");
            return;
        }
        if chunk.index >= t.total_chunks {
            warn!(
                transfer = %chunk.id,
                index = chunk.index,
                total = t.total_chunks,
                "chunk index out of range ignored"
            );
            return;
        }

        t.last_activity = now;
        if t.received_chunks.contains(&chunk.index) {
            // Our ack was probably lost; repeat it without rewriting.
            debug!(transfer = %chunk.id, index = chunk.index, "duplicate chunk");
            self.ack(&chunk.id, chunk.index, now);
            return;
        }

        let decoded = match self.ctx.codec.decode(&chunk.chunk) {
            Ok(payload) => Chunk {
                transfer_id: t.metadata.id.clone(),
                index: chunk.index,
                payload,
            },
            Err(e) => {
                // Not acked, so the sender retransmits it.
                warn!(transfer = %chunk.id, index = chunk.index, error = %e, "undecodable chunk dropped");
                return;
            }
        };

        let expected = chunk_len(decoded.index, t.metadata.size, self.config.chunk_size);
        if decoded.len() != expected {
            // Would overlap a neighbour or leave a hole; retransmitting cannot fix it.
            warn!(
                transfer = %chunk.id,
                index = chunk.index,
                expected,
                actual = decoded.len(),
                "chunk has wrong length"
            );
            self.report_verdict(&chunk.id, false);
            let reason = FailureReason::SizeMismatch {
                expected: expected as u64,
                actual: decoded.len() as u64,
            };
            self.finish(&chunk.id, TransferOutcome::Failed(reason), now);
            return;
        }

        let offset = decoded.offset(self.config.chunk_size);
        if let Err(e) = t.sink.write_at(offset, &decoded.payload) {
            warn!(transfer = %chunk.id, index = chunk.index, error = %e, "sink write failed");
            self.report_verdict(&chunk.id, false);
            self.finish(&chunk.id, TransferOutcome::Failed(FailureReason::Io(e.to_string())), now);
            return;
        }
        t.received_chunks.insert(decoded.index);
        t.written_bytes += decoded.len() as u64;
        debug!(transfer = %chunk.id, index = chunk.index, bytes = decoded.len(), "chunk written");

        let (done, total) = (t.written_bytes, t.metadata.size);
        if self.throttle.should_emit(&t.metadata.id, done, total, now) {
            self.ctx.observer.on_progress(&t.metadata.id, done, total);
        }

        self.ack(&chunk.id, chunk.index, now);
    }

    /// Handles `fileTransferComplete`: verifies, reports, retires.
    pub fn on_complete(&mut self, complete: &FileTransferComplete, now: Instant) {
        let Some(t) = self.table.get_mut(&complete.id) else {
            debug!(transfer = %complete.id, "completion for inactive transfer ignored");
            return;
        };
        t.status = TransferStatus::Verifying;
        let outcome = match t.verify(complete, &self.ctx) {
            Ok(()) => TransferOutcome::Verified,
            Err(reason) => TransferOutcome::Failed(reason),
        };
        self.report_verdict(&complete.id, outcome.is_verified());
        self.finish(&complete.id, outcome, now);
    }

    /// Aborts an inbound transfer and tells the sender to stop.
    pub fn abort(&mut self, id: &str, reason: &str, now: Instant) -> Result<(), TransferError> {
        if !self.table.contains(id) {
            return Err(TransferError::NotFound(id.to_string()));
        }
        self.report_verdict(id, false);
        self.finish(
            id,
            TransferOutcome::Failed(FailureReason::Aborted(reason.to_string())),
            now,
        );
        Ok(())
    }

    /// Reclaims abandoned receives and expires old tombstones.
    pub fn tick(&mut self, now: Instant) {
        let idle_timeout = self.config.idle_timeout();
        for id in self.table.ids() {
            let abandoned = self.table.get(id.as_str()).is_some_and(|t| {
                now.saturating_duration_since(t.last_activity) >= idle_timeout
            });
            if abandoned {
                self.finish(
                    id.as_str(),
                    TransferOutcome::Failed(FailureReason::Timeout("no chunk received".into())),
                    now,
                );
            }
        }
        self.table.purge(now);
    }

    /// Fails every active transfer, e.g. when the connection drops.
    pub fn fail_all(&mut self, reason: FailureReason, now: Instant) {
        for id in self.table.ids() {
            self.finish(id.as_str(), TransferOutcome::Failed(reason.clone()), now);
        }
    }

    pub fn transfer(&self, id: &str) -> Option<&InboundTransfer> {
        self.table.get(id)
    }

    pub fn active(&self) -> Vec<TransferId> {
        self.table.ids()
    }

    fn ack(&mut self, id: &str, index: u64, now: Instant) {
        let ack = FileChunkAck {
            id: id.to_string(),
            index,
        };
        if let Err(e) = self.ctx.send(ack.into()) {
            warn!(transfer = %id, index, error = %e, "failed to send ack");
            self.finish(id, TransferOutcome::Failed(FailureReason::Disconnected), now);
        }
    }

    fn report_verdict(&self, id: &str, verified: bool) {
        let msg = TransferVerified {
            id: id.to_string(),
            verified,
        };
        if let Err(e) = self.ctx.send(msg.into()) {
            warn!(transfer = %id, error = %e, "failed to send verification result");
        }
    }

    /// Retires the record and releases its sink on every path.
    fn finish(&mut self, id: &str, outcome: TransferOutcome, now: Instant) {
        let Some(mut t) = self.table.retire(id, now) else {
            return;
        };
        let keep = outcome.is_verified();
        if let Err(e) = t.sink.finish(keep) {
            warn!(transfer = %id, error = %e, "failed to release sink");
        }
        self.throttle.forget(&t.metadata.id);

        match &outcome {
            TransferOutcome::Verified => info!(
                transfer = %id,
                bytes = t.written_bytes,
                "inbound transfer verified"
            ),
            TransferOutcome::Failed(reason) => {
                warn!(transfer = %id, %reason, "inbound transfer failed")
            }
        }
        self.ctx.observer.on_transfer_finished(&t.metadata.id, &outcome);
    }
}
