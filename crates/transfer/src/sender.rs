//! Outbound side: reads the source, emits chunks inside an ack window,
//! retransmits on ack timeout, then waits for the receiver's verdict.
//!
//! ```text
//! Idle -> Initiated -> InProgress -> AwaitingCompletion -> AwaitingVerification
//!                                                        -> Verified | Failed
//! ```
//!
//! Every entry point returns as soon as the state is updated; the machine
//! resumes when the next ack, verification result or tick arrives.

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{debug, info, warn};

use mirrorlink_protocol::{FileChunk, FileChunkAck, TransferVerified};

use crate::TransferError;
use crate::chunked::{chunk_len, read_chunk, total_chunks};
use crate::config::TransferConfig;
use crate::context::Collaborators;
use crate::io::ByteSource;
use crate::progress::ProgressThrottle;
use crate::table::TransferTable;
use crate::types::{FailureReason, TransferId, TransferMetadata, TransferOutcome, TransferStatus};

/// Sender-side transfer record.
pub struct OutboundTransfer {
    metadata: TransferMetadata,
    total_chunks: u64,
    next_index_to_send: u64,
    highest_acked_index: Option<u64>,
    /// Every index below this one has been acked.
    acked_through: u64,
    /// Acks that arrived ahead of a gap; never larger than the window.
    acked_ahead: BTreeSet<u64>,
    acked_bytes: u64,
    status: TransferStatus,
    retries: u32,
    last_progress: Instant,
    source: Box<dyn ByteSource>,
}

impl OutboundTransfer {
    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    pub fn next_index_to_send(&self) -> u64 {
        self.next_index_to_send
    }

    pub fn highest_acked_index(&self) -> Option<u64> {
        self.highest_acked_index
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn acked_bytes(&self) -> u64 {
        self.acked_bytes
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Chunks sent but not covered by the contiguous ack prefix.
    fn outstanding(&self) -> u64 {
        self.next_index_to_send - self.acked_through
    }

    fn all_acked(&self) -> bool {
        self.acked_through == self.total_chunks
    }

    /// Records an ack; returns `false` for duplicates.
    fn record_ack(&mut self, index: u64) -> bool {
        if index < self.acked_through || !self.acked_ahead.insert(index) {
            return false;
        }
        while self.acked_ahead.remove(&self.acked_through) {
            self.acked_through += 1;
        }
        self.highest_acked_index = Some(self.highest_acked_index.map_or(index, |h| h.max(index)));
        true
    }
}

/// Drives every outbound transfer of one connection session.
pub struct Sender {
    config: TransferConfig,
    table: TransferTable<OutboundTransfer>,
    ctx: Collaborators,
    throttle: ProgressThrottle,
}

impl Sender {
    pub fn new(config: TransferConfig, ctx: Collaborators) -> Self {
        Self {
            table: TransferTable::new(config.grace()),
            config,
            ctx,
            throttle: ProgressThrottle::default(),
        }
    }

    /// Starts sending `source` as the file described by `metadata`.
    ///
    /// Emits `fileTransferInit` and the first window of chunks before
    /// returning. Failures after the init went out are reported through
    /// `on_transfer_finished`, not as an `Err`.
    pub fn start_transfer(
        &mut self,
        mut metadata: TransferMetadata,
        mut source: Box<dyn ByteSource>,
        now: Instant,
    ) -> Result<TransferId, TransferError> {
        let id = metadata.id.clone();
        self.table.check_available(id.as_str(), now)?;

        if source.len() != metadata.size {
            return Err(TransferError::InvalidMetadata(format!(
                "size {} does not match source length {}",
                metadata.size,
                source.len()
            )));
        }

        if metadata.checksum.is_none() && self.config.compute_missing_checksum {
            let mut reader = source.reader()?;
            metadata.checksum = Some(self.ctx.digester.digest(&mut reader)?);
        }

        self.ctx.send(metadata.to_init().into())?;

        let record = OutboundTransfer {
            total_chunks: total_chunks(metadata.size, self.config.chunk_size),
            metadata,
            next_index_to_send: 0,
            highest_acked_index: None,
            acked_through: 0,
            acked_ahead: BTreeSet::new(),
            acked_bytes: 0,
            status: TransferStatus::Initiated,
            retries: 0,
            last_progress: now,
            source,
        };
        info!(
            transfer = %id,
            name = %record.metadata.name,
            size = record.metadata.size,
            chunks = record.total_chunks,
            "outbound transfer started"
        );
        self.table.insert(id.clone(), record, now)?;

        self.pump(id.as_str(), now);
        Ok(id)
    }

    /// Handles `fileChunkAck`.
    pub fn on_ack(&mut self, ack: &FileChunkAck, now: Instant) {
        let Some(t) = self.table.get_mut(&ack.id) else {
            debug!(transfer = %ack.id, index = ack.index, "ack for inactive transfer ignored");
            return;
        };
        if !matches!(
            t.status,
            TransferStatus::InProgress | TransferStatus::AwaitingCompletion
        ) {
            debug!(transfer = %ack.id, index = ack.index, status = ?t.status, "late ack ignored");
            return;
        }
        if ack.index >= t.next_index_to_send {
            warn!(transfer = %ack.id, index = ack.index, "ack for unsent chunk ignored");
            return;
        }
        let (through_before, highest_before) = (t.acked_through, t.highest_acked_index);
        if !t.record_ack(ack.index) {
            debug!(transfer = %ack.id, index = ack.index, "duplicate ack");
            return;
        }

        // Progress means the highest ack or the contiguous prefix moved.
        if t.acked_through > through_before || t.highest_acked_index > highest_before {
            t.retries = 0;
            t.last_progress = now;
        }
        t.acked_bytes += chunk_len(ack.index, t.metadata.size, self.config.chunk_size) as u64;
        let (done, total) = (t.acked_bytes, t.metadata.size);
        if self.throttle.should_emit(&t.metadata.id, done, total, now) {
            self.ctx.observer.on_progress(&t.metadata.id, done, total);
        }

        self.pump(&ack.id, now);
    }

    /// Handles `transferVerified`.
    pub fn on_verified(&mut self, msg: &TransferVerified, now: Instant) {
        let Some(t) = self.table.get(&msg.id) else {
            debug!(transfer = %msg.id, "verification for inactive transfer ignored");
            return;
        };
        let outcome = match (t.status, msg.verified) {
            (TransferStatus::AwaitingVerification, true) => TransferOutcome::Verified,
            // The receiver gave up early (sink failure, abort) or the checksum did not match.
            (_, false) => TransferOutcome::Failed(FailureReason::Rejected),
            (status, true) => {
                warn!(transfer = %msg.id, ?status, "premature verification ignored");
                return;
            }
        };
        self.finish(&msg.id, outcome, now);
    }

    /// Aborts an active transfer; no further chunks are sent.
    pub fn abort(&mut self, id: &str, reason: &str, now: Instant) -> Result<(), TransferError> {
        if !self.table.contains(id) {
            return Err(TransferError::NotFound(id.to_string()));
        }
        self.finish(
            id,
            TransferOutcome::Failed(FailureReason::Aborted(reason.to_string())),
            now,
        );
        Ok(())
    }

    /// Applies ack and idle timeouts and expires old tombstones.
    pub fn tick(&mut self, now: Instant) {
        let ack_timeout = self.config.ack_timeout();
        let idle_timeout = self.config.idle_timeout();

        for id in self.table.ids() {
            let failure = {
                let Some(t) = self.table.get_mut(id.as_str()) else {
                    continue;
                };
                let waited = now.saturating_duration_since(t.last_progress);
                match t.status {
                    TransferStatus::InProgress | TransferStatus::AwaitingCompletion
                        if t.outstanding() > 0 && waited >= ack_timeout =>
                    {
                        if t.retries >= self.config.max_retries {
                            Some(FailureReason::Timeout(format!(
                                "no ack for chunk {} after {} retries",
                                t.acked_through, t.retries
                            )))
                        } else {
                            t.retries += 1;
                            t.last_progress = now;
                            let index = t.acked_through;
                            warn!(transfer = %id, index, attempt = t.retries, "ack timeout, retransmitting");
                            send_chunk(t, index, &self.config, &self.ctx).err()
                        }
                    }
                    TransferStatus::AwaitingVerification if waited >= idle_timeout => Some(
                        FailureReason::Timeout("no verification result".into()),
                    ),
                    _ => None,
                }
            };
            if let Some(reason) = failure {
                self.finish(id.as_str(), TransferOutcome::Failed(reason), now);
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

    pub fn transfer(&self, id: &str) -> Option<&OutboundTransfer> {
        self.table.get(id)
    }

    pub fn active(&self) -> Vec<TransferId> {
        self.table.ids()
    }

    /// Sends as many chunks as the window allows, then completion if due.
    fn pump(&mut self, id: &str, now: Instant) {
        let result = match self.table.get_mut(id) {
            Some(t) => fill_window(t, &self.config, &self.ctx)
                .and_then(|()| send_completion_if_due(t, &self.ctx, now)),
            None => return,
        };
        if let Err(reason) = result {
            self.finish(id, TransferOutcome::Failed(reason), now);
        }
    }

    /// Retires the record, releases the source and notifies the observer.
    fn finish(&mut self, id: &str, outcome: TransferOutcome, now: Instant) {
        let Some(t) = self.table.retire(id, now) else {
            return;
        };
        drop(t.source);
        self.throttle.forget(&t.metadata.id);

        match &outcome {
            TransferOutcome::Verified => info!(transfer = %id, "outbound transfer verified"),
            TransferOutcome::Failed(reason) => {
                warn!(transfer = %id, %reason, "outbound transfer failed")
            }
        }
        self.ctx.observer.on_transfer_finished(&t.metadata.id, &outcome);
    }
}

fn fill_window(
    t: &mut OutboundTransfer,
    config: &TransferConfig,
    ctx: &Collaborators,
) -> Result<(), FailureReason> {
    if t.status == TransferStatus::Initiated {
        t.status = TransferStatus::InProgress;
    }
    while t.next_index_to_send < t.total_chunks && t.outstanding() < config.window_size as u64 {
        let index = t.next_index_to_send;
        send_chunk(t, index, config, ctx)?;
        t.next_index_to_send += 1;
    }
    if t.status == TransferStatus::InProgress && t.next_index_to_send == t.total_chunks {
        t.status = TransferStatus::AwaitingCompletion;
    }
    Ok(())
}

fn send_completion_if_due(
    t: &mut OutboundTransfer,
    ctx: &Collaborators,
    now: Instant,
) -> Result<(), FailureReason> {
    if t.status != TransferStatus::AwaitingCompletion || !t.all_acked() {
        return Ok(());
    }
    ctx.send(t.metadata.to_complete().into()).map_err(|e| {
        warn!(transfer = %t.metadata.id, error = %e, "failed to send completion");
        FailureReason::Disconnected
    })?;
    t.status = TransferStatus::AwaitingVerification;
    t.last_progress = now;
    debug!(transfer = %t.metadata.id, "all chunks acked, completion sent");
    Ok(())
}

fn send_chunk(
    t: &mut OutboundTransfer,
    index: u64,
    config: &TransferConfig,
    ctx: &Collaborators,
) -> Result<(), FailureReason> {
    let payload = read_chunk(t.source.as_mut(), index, t.metadata.size, config.chunk_size)
        .map_err(|e| FailureReason::Io(e.to_string()))?;
    let chunk = FileChunk {
        id: t.metadata.id.to_string(),
        index,
        chunk: ctx.codec.encode(&payload),
    };
    ctx.send(chunk.into()).map_err(|e| {
        warn!(transfer = %t.metadata.id, index, error = %e, "failed to send chunk");
        FailureReason::Disconnected
    })?;
    debug!(transfer = %t.metadata.id, index, bytes = payload.len(), "chunk sent");
    Ok(())
}
