//! The already-established connection the transfer protocol rides on.

/// Errors reported by the connection collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Outbound half of a message-oriented connection.
///
/// Inbound messages are delivered by the host through
/// [`TransferSession::handle_message`](crate::TransferSession::handle_message).
pub trait Connection: Send + Sync {
    fn send(&self, message: &str) -> Result<(), ConnectionError>;

    fn is_connected(&self) -> bool;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use mirrorlink_protocol::Message;

    use super::*;

    /// Records every sent message; can be switched offline.
    #[derive(Default)]
    pub struct RecordingConnection {
        sent: Mutex<Vec<String>>,
        offline: AtomicBool,
    }

    impl RecordingConnection {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        /// Removes and parses everything sent so far.
        pub fn take(&self) -> Vec<Message> {
            std::mem::take(&mut *self.sent.lock().unwrap())
                .iter()
                .map(|text| Message::parse(text).unwrap())
                .collect()
        }

        /// Removes and returns the raw text sent so far.
        pub fn take_raw(&self) -> Vec<String> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl Connection for RecordingConnection {
        fn send(&self, message: &str) -> Result<(), ConnectionError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(ConnectionError::NotConnected);
            }
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }

        fn is_connected(&self) -> bool {
            !self.offline.load(Ordering::SeqCst)
        }
    }
}
