use std::time::Instant;

use tracing::{debug, info, warn};

use mirrorlink_protocol::{Message, ParseError};

use crate::TransferError;
use crate::config::TransferConfig;
use crate::context::Collaborators;
use crate::io::{ByteSource, SinkProvider};
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::types::{FailureReason, TransferId, TransferMetadata};

/// Both transfer roles for a single connection.
///
/// All state lives here; two sessions on two connections share nothing.
pub struct TransferSession {
    sender: Sender,
    receiver: Receiver,
}

impl TransferSession {
    /// Validates `config` and builds the sender and receiver machines.
    pub fn new(
        config: TransferConfig,
        ctx: Collaborators,
        storage: Box<dyn SinkProvider>,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        debug!(
            chunk_size = config.chunk_size,
            window = config.window_size,
            "transfer session created"
        );
        Ok(Self {
            sender: Sender::new(config.clone(), ctx.clone()),
            receiver: Receiver::new(config, ctx, storage),
        })
    }

    /// Parses one inbound text message and routes it to the owning machine.
    ///
    /// Anything that does not parse is logged and dropped.
    pub fn handle_message(&mut self, text: &str, now: Instant) {
        let msg = match Message::parse(text) {
            Ok(msg) => msg,
            Err(ParseError::UnknownType) => {
                debug!("ignoring message of unknown type");
                return;
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed message");
                return;
            }
        };

        match msg {
            Message::FileTransferInit(init) => self.receiver.on_init(&init, now),
            Message::FileChunk(chunk) => self.receiver.on_chunk(&chunk, now),
            Message::FileTransferComplete(complete) => self.receiver.on_complete(&complete, now),
            Message::FileChunkAck(ack) => self.sender.on_ack(&ack, now),
            Message::TransferVerified(verified) => self.sender.on_verified(&verified, now),
        }
    }

    /// Starts an outbound transfer. See [`Sender::start_transfer`].
    pub fn start_transfer(
        &mut self,
        metadata: TransferMetadata,
        source: Box<dyn ByteSource>,
        now: Instant,
    ) -> Result<TransferId, TransferError> {
        self.sender.start_transfer(metadata, source, now)
    }

    /// Aborts the transfer with `id`, whichever side owns it.
    pub fn abort(&mut self, id: &str, reason: &str, now: Instant) -> Result<(), TransferError> {
        if self.sender.transfer(id).is_some() {
            self.sender.abort(id, reason, now)
        } else {
            self.receiver.abort(id, reason, now)
        }
    }

    /// Drives retransmissions and timeouts on both sides.
    pub fn tick(&mut self, now: Instant) {
        self.sender.tick(now);
        self.receiver.tick(now);
    }

    /// Fails every active transfer after the connection was lost.
    pub fn on_disconnected(&mut self, now: Instant) {
        let active = self.active_transfers().len();
        if active > 0 {
            info!(active, "connection lost, failing active transfers");
        }
        self.sender.fail_all(FailureReason::Disconnected, now);
        self.receiver.fail_all(FailureReason::Disconnected, now);
    }

    /// Ids of every active transfer, outbound first.
    pub fn active_transfers(&self) -> Vec<TransferId> {
        let mut ids = self.sender.active();
        ids.extend(self.receiver.active());
        ids
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::chunked::checksum_bytes;
    use crate::connection::testing::RecordingConnection;
    use crate::io::{MemorySource, MemoryStorage};
    use crate::progress::{ChannelObserver, TransferEvent};
    use crate::types::TransferOutcome;

    struct Peer {
        session: TransferSession,
        conn: Arc<RecordingConnection>,
        storage: MemoryStorage,
        events: UnboundedReceiver<TransferEvent>,
    }

    fn peer() -> Peer {
        let config = TransferConfig {
            chunk_size: 4,
            window_size: 2,
            ack_timeout_ms: 1000,
            ..TransferConfig::default()
        };
        let conn = Arc::new(RecordingConnection::new());
        let (observer, events) = ChannelObserver::new();
        let storage = MemoryStorage::new();
        let ctx = Collaborators::new(conn.clone(), Arc::new(observer));
        Peer {
            session: TransferSession::new(config, ctx, Box::new(storage.clone())).unwrap(),
            conn,
            storage,
            events,
        }
    }

    fn metadata(id: &str, data: &[u8]) -> TransferMetadata {
        TransferMetadata {
            id: id.into(),
            name: "photo.jpg".into(),
            size: data.len() as u64,
            mime_type: "image/jpeg".into(),
            checksum: Some(checksum_bytes(data)),
        }
    }

    /// Shuttles messages both ways until neither side has anything to say.
    /// `drop_to_b` can swallow messages on the way to `b`.
    fn exchange(a: &mut Peer, b: &mut Peer, now: Instant, mut drop_to_b: impl FnMut(&str) -> bool) {
        loop {
            let to_b = a.conn.take_raw();
            let to_a = b.conn.take_raw();
            if to_b.is_empty() && to_a.is_empty() {
                break;
            }
            for text in to_b.iter().filter(|t| !drop_to_b(t.as_str())) {
                b.session.handle_message(text, now);
            }
            for text in &to_a {
                a.session.handle_message(text, now);
            }
        }
    }

    fn finished(events: &mut UnboundedReceiver<TransferEvent>) -> Vec<TransferOutcome> {
        let mut out = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if let TransferEvent::Finished { outcome, .. } = ev {
                out.push(outcome);
            }
        }
        out
    }

    #[test]
    fn loopback_transfer_verifies_on_both_sides() {
        let (mut a, mut b) = (peer(), peer());
        let data = b"the quick brown fox".to_vec();
        let now = Instant::now();

        let id = a
            .session
            .start_transfer(metadata("t1", &data), Box::new(MemorySource::new(data.clone())), now)
            .unwrap();
        assert_eq!(id.as_str(), "t1");
        exchange(&mut a, &mut b, now, |_| false);

        assert_eq!(b.storage.get("t1").unwrap(), data);
        assert_eq!(finished(&mut a.events), vec![TransferOutcome::Verified]);
        assert_eq!(finished(&mut b.events), vec![TransferOutcome::Verified]);
        assert!(a.session.active_transfers().is_empty());
        assert!(b.session.active_transfers().is_empty());
    }

    #[test]
    fn lost_chunk_recovered_by_retransmission() {
        let (mut a, mut b) = (peer(), peer());
        let data = b"0123456789".to_vec();
        let now = Instant::now();
        a.session
            .start_transfer(metadata("t1", &data), Box::new(MemorySource::new(data.clone())), now)
            .unwrap();

        let mut dropped = false;
        exchange(&mut a, &mut b, now, |text| {
            let lose = !dropped && text.contains("\"fileChunk\"") && text.contains("\"index\":1");
            dropped |= lose;
            lose
        });
        assert!(dropped);
        assert_eq!(a.session.active_transfers().len(), 1);

        a.session.tick(now + Duration::from_millis(1000));
        exchange(&mut a, &mut b, now + Duration::from_millis(1000), |_| false);

        assert_eq!(b.storage.get("t1").unwrap(), data);
        assert_eq!(finished(&mut a.events), vec![TransferOutcome::Verified]);
    }

    #[test]
    fn corrupted_payload_rejected_end_to_end() {
        let (mut a, mut b) = (peer(), peer());
        let data = b"0123456789".to_vec();
        let mut meta = metadata("t1", &data);
        meta.checksum = Some(checksum_bytes(b"something else"));
        let now = Instant::now();
        a.session
            .start_transfer(meta, Box::new(MemorySource::new(data)), now)
            .unwrap();
        exchange(&mut a, &mut b, now, |_| false);

        assert_eq!(
            finished(&mut a.events),
            vec![TransferOutcome::Failed(FailureReason::Rejected)]
        );
        assert_eq!(
            finished(&mut b.events),
            vec![TransferOutcome::Failed(FailureReason::ChecksumMismatch)]
        );
    }

    #[test]
    fn unparseable_messages_are_dropped() {
        let mut a = peer();
        let now = Instant::now();
        a.session.handle_message("not json", now);
        a.session.handle_message(r#"{"type":"somethingNew","data":{}}"#, now);
        a.session.handle_message(r#"{"type":"fileChunk","data":{"id":"x"}}"#, now);
        a.session.handle_message(r#"{"type":"fileChunk"}"#, now);
        assert!(a.conn.take_raw().is_empty());
        assert!(a.session.active_transfers().is_empty());
    }

    #[test]
    fn abort_routes_to_owning_side() {
        let (mut a, mut b) = (peer(), peer());
        let data = b"0123456789".to_vec();
        let now = Instant::now();
        a.session
            .start_transfer(metadata("t1", &data), Box::new(MemorySource::new(data)), now)
            .unwrap();
        // Deliver the init and first window only.
        for text in a.conn.take_raw() {
            b.session.handle_message(&text, now);
        }
        assert_eq!(b.session.active_transfers(), vec![TransferId::from("t1")]);

        b.session.abort("t1", "user cancelled", now).unwrap();
        assert!(b.session.active_transfers().is_empty());
        exchange(&mut a, &mut b, now, |_| false);
        assert_eq!(
            finished(&mut a.events),
            vec![TransferOutcome::Failed(FailureReason::Rejected)]
        );

        let err = a.session.abort("t1", "again", now).unwrap_err();
        assert!(matches!(err, TransferError::NotFound(_)));
    }

    #[test]
    fn disconnect_fails_both_roles() {
        let (mut a, mut b) = (peer(), peer());
        let data = b"0123456789".to_vec();
        let now = Instant::now();
        a.session
            .start_transfer(metadata("out", &data), Box::new(MemorySource::new(data.clone())), now)
            .unwrap();
        b.session
            .start_transfer(metadata("in", &data), Box::new(MemorySource::new(data)), now)
            .unwrap();
        for text in b.conn.take_raw() {
            a.session.handle_message(&text, now);
        }
        assert_eq!(a.session.active_transfers().len(), 2);

        a.session.on_disconnected(now);
        assert!(a.session.active_transfers().is_empty());
        assert_eq!(
            finished(&mut a.events),
            vec![
                TransferOutcome::Failed(FailureReason::Disconnected),
                TransferOutcome::Failed(FailureReason::Disconnected),
            ]
        );
    }

    #[test]
    fn invalid_config_rejected() {
        let conn = Arc::new(RecordingConnection::new());
        let (observer, _events) = ChannelObserver::new();
        let ctx = Collaborators::new(conn, Arc::new(observer));
        let config = TransferConfig {
            window_size: 0,
            ..TransferConfig::default()
        };
        let result = TransferSession::new(config, ctx, Box::new(MemoryStorage::new()));
        assert!(matches!(result, Err(TransferError::InvalidConfig(_))));
    }
}
