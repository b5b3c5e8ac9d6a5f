//! Async driver for a [`TransferSession`].
//!
//! The session runs on its own tokio task. Inbound messages, host commands
//! and the retransmission tick are all serialized through one loop, so the
//! state machines never need a lock.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::TransferError;
use crate::io::ByteSource;
use crate::session::TransferSession;
use crate::types::{TransferId, TransferMetadata};

/// How often timeouts are checked when the host does not say otherwise.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

const COMMAND_QUEUE: usize = 256;

enum Command {
    Incoming(String),
    Start {
        metadata: TransferMetadata,
        source: Box<dyn ByteSource>,
        reply: oneshot::Sender<Result<TransferId, TransferError>>,
    },
    Abort {
        id: String,
        reason: String,
        reply: oneshot::Sender<Result<(), TransferError>>,
    },
    Disconnected,
    Active {
        reply: oneshot::Sender<Vec<TransferId>>,
    },
}

/// Cloneable handle for talking to a running [`TransferService`].
#[derive(Clone)]
pub struct ServiceHandle {
    commands: mpsc::Sender<Command>,
}

impl ServiceHandle {
    /// Queues one text message received from the peer.
    pub async fn deliver(&self, text: impl Into<String>) -> Result<(), TransferError> {
        self.send(Command::Incoming(text.into())).await
    }

    pub async fn start_transfer(
        &self,
        metadata: TransferMetadata,
        source: Box<dyn ByteSource>,
    ) -> Result<TransferId, TransferError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start {
            metadata,
            source,
            reply,
        })
        .await?;
        rx.await.map_err(|_| TransferError::ServiceStopped)?
    }

    pub async fn abort(&self, id: &str, reason: &str) -> Result<(), TransferError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Abort {
            id: id.to_string(),
            reason: reason.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| TransferError::ServiceStopped)?
    }

    /// Reports that the underlying connection went away.
    pub async fn disconnected(&self) -> Result<(), TransferError> {
        self.send(Command::Disconnected).await
    }

    pub async fn active_transfers(&self) -> Result<Vec<TransferId>, TransferError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Active { reply }).await?;
        rx.await.map_err(|_| TransferError::ServiceStopped)
    }

    async fn send(&self, command: Command) -> Result<(), TransferError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TransferError::ServiceStopped)
    }
}

/// A [`TransferSession`] running on a background task.
pub struct TransferService {
    handle: ServiceHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TransferService {
    /// Spawns the driver loop. Must be called inside a tokio runtime.
    pub fn spawn(session: TransferSession, tick_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(session, rx, tick_interval, cancel.clone()));
        Self {
            handle: ServiceHandle { commands: tx },
            cancel,
            task,
        }
    }

    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    /// Returns a token that stops the service when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the loop; active transfers fail as disconnected.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Waits for the loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("transfer service task failed: {e}");
        }
    }
}

fn now() -> Instant {
    // Follows the paused clock under tokio's test-util.
    tokio::time::Instant::now().into_std()
}

async fn run(
    mut session: TransferSession,
    mut commands: mpsc::Receiver<Command>,
    tick_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(tick_ms = tick_interval.as_millis() as u64, "transfer service started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => session.tick(now()),
            command = commands.recv() => match command {
                Some(command) => apply(&mut session, command),
                None => {
                    debug!("all service handles dropped");
                    break;
                }
            },
        }
    }

    session.on_disconnected(now());
    info!("transfer service stopped");
}

fn apply(session: &mut TransferSession, command: Command) {
    // A dropped reply receiver means the caller stopped waiting.
    match command {
        Command::Incoming(text) => session.handle_message(&text, now()),
        Command::Start {
            metadata,
            source,
            reply,
        } => {
            let _ = reply.send(session.start_transfer(metadata, source, now()));
        }
        Command::Abort { id, reason, reply } => {
            let _ = reply.send(session.abort(&id, &reason, now()));
        }
        Command::Disconnected => session.on_disconnected(now()),
        Command::Active { reply } => {
            let _ = reply.send(session.active_transfers());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mirrorlink_protocol::{Base64Codec, ChunkCodec, FileChunk, FileTransferInit, Message};
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::config::TransferConfig;
    use crate::connection::testing::RecordingConnection;
    use crate::context::Collaborators;
    use crate::io::{MemorySource, MemoryStorage};
    use crate::progress::{ChannelObserver, TransferEvent};
    use crate::types::{FailureReason, TransferOutcome};

    struct Fixture {
        service: TransferService,
        conn: Arc<RecordingConnection>,
        storage: MemoryStorage,
        events: UnboundedReceiver<TransferEvent>,
    }

    fn fixture() -> Fixture {
        let config = TransferConfig {
            chunk_size: 4,
            ack_timeout_ms: 100,
            max_retries: 3,
            ..TransferConfig::default()
        };
        let conn = Arc::new(RecordingConnection::new());
        let (observer, events) = ChannelObserver::new();
        let storage = MemoryStorage::new();
        let ctx = Collaborators::new(conn.clone(), Arc::new(observer));
        let session = TransferSession::new(config, ctx, Box::new(storage.clone())).unwrap();
        Fixture {
            service: TransferService::spawn(session, Duration::from_millis(10)),
            conn,
            storage,
            events,
        }
    }

    fn metadata(id: &str, size: u64) -> TransferMetadata {
        TransferMetadata {
            id: id.into(),
            name: "notes.txt".into(),
            size,
            mime_type: "text/plain".into(),
            checksum: None,
        }
    }

    async fn next_outcome(events: &mut UnboundedReceiver<TransferEvent>) -> TransferOutcome {
        loop {
            match events.recv().await {
                Some(TransferEvent::Finished { outcome, .. }) => return outcome,
                Some(TransferEvent::Progress { .. }) => continue,
                None => panic!("observer channel closed"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_sends_init_and_window() {
        let fx = fixture();
        let handle = fx.service.handle();
        let id = handle
            .start_transfer(
                metadata("t1", 8),
                Box::new(MemorySource::new(b"abcdefgh".to_vec())),
            )
            .await
            .unwrap();
        assert_eq!(id.as_str(), "t1");

        let sent = fx.conn.take();
        assert!(matches!(sent[0], Message::FileTransferInit(_)));
        let chunks = sent
            .iter()
            .filter(|m| matches!(m, Message::FileChunk(_)))
            .count();
        assert_eq!(chunks, 2);
        assert_eq!(handle.active_transfers().await.unwrap(), vec![id]);
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_transfer_times_out_after_retries() {
        let mut fx = fixture();
        let handle = fx.service.handle();
        handle
            .start_transfer(
                metadata("t1", 8),
                Box::new(MemorySource::new(b"abcdefgh".to_vec())),
            )
            .await
            .unwrap();

        let outcome = next_outcome(&mut fx.events).await;
        assert!(matches!(
            outcome,
            TransferOutcome::Failed(FailureReason::Timeout(_))
        ));

        let chunk_indices: Vec<u64> = fx
            .conn
            .take()
            .into_iter()
            .filter_map(|m| match m {
                Message::FileChunk(c) => Some(c.index),
                _ => None,
            })
            .collect();
        // First window, then three retransmissions of the oldest chunk.
        assert_eq!(chunk_indices, vec![0, 1, 0, 0, 0]);
        assert!(handle.active_transfers().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delivered_messages_reach_receiver() {
        let mut fx = fixture();
        let handle = fx.service.handle();
        let init = FileTransferInit {
            id: "in".into(),
            name: "notes.txt".into(),
            size: 6,
            mime_type: "text/plain".into(),
            checksum: None,
        };
        handle
            .deliver(Message::from(init).to_json().unwrap())
            .await
            .unwrap();
        for (index, part) in [&b"hell"[..], &b"o!"[..]].into_iter().enumerate() {
            let chunk = FileChunk {
                id: "in".into(),
                index: index as u64,
                chunk: Base64Codec.encode(part),
            };
            handle
                .deliver(Message::from(chunk).to_json().unwrap())
                .await
                .unwrap();
        }
        handle
            .deliver(r#"{"type":"fileTransferComplete","data":{"id":"in","name":"notes.txt","size":6}}"#)
            .await
            .unwrap();

        assert_eq!(next_outcome(&mut fx.events).await, TransferOutcome::Verified);
        assert_eq!(fx.storage.get("in").unwrap(), b"hello!");
        let verdicts: Vec<bool> = fx
            .conn
            .take()
            .into_iter()
            .filter_map(|m| match m {
                Message::TransferVerified(v) => Some(v.verified),
                _ => None,
            })
            .collect();
        assert_eq!(verdicts, vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_command_fails_active_transfers() {
        let mut fx = fixture();
        let handle = fx.service.handle();
        handle
            .start_transfer(
                metadata("t1", 8),
                Box::new(MemorySource::new(b"abcdefgh".to_vec())),
            )
            .await
            .unwrap();
        handle.disconnected().await.unwrap();
        assert_eq!(
            next_outcome(&mut fx.events).await,
            TransferOutcome::Failed(FailureReason::Disconnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let mut fx = fixture();
        let handle = fx.service.handle();
        handle
            .start_transfer(
                metadata("t1", 8),
                Box::new(MemorySource::new(b"abcdefgh".to_vec())),
            )
            .await
            .unwrap();

        fx.service.shutdown();
        fx.service.join().await;

        assert_eq!(
            next_outcome(&mut fx.events).await,
            TransferOutcome::Failed(FailureReason::Disconnected)
        );
        let err = handle.abort("t1", "too late").await.unwrap_err();
        assert!(matches!(err, TransferError::ServiceStopped));
    }
}
