//! Outbound handle to one live socket.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::warn;

use playhub_core::types::{ConnectionId, SessionId};

use crate::message::ServerMessage;

/// A handle to a single socket connection.
///
/// The socket task owns the receiving end; everything else pushes through
/// the bounded sender. A full buffer drops the message rather than stalling
/// the sender.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Connection id.
    pub id: ConnectionId,
    /// Identity that owns the connection.
    pub identity_id: String,
    /// Display name.
    pub display_name: String,
    /// Session id.
    pub session_id: SessionId,
    sender: mpsc::Sender<ServerMessage>,
    alive: AtomicBool,
}

impl ConnectionHandle {
    /// Create a handle and the receiver the socket task drains.
    pub fn new(
        id: ConnectionId,
        identity_id: String,
        display_name: String,
        session_id: SessionId,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let handle = Self {
            id,
            identity_id,
            display_name,
            session_id,
            sender,
            alive: AtomicBool::new(true),
        };
        (handle, receiver)
    }

    /// Queue a message for the client. Returns `false` if it was dropped.
    pub fn send(&self, msg: ServerMessage) -> bool {
        if !self.is_alive() {
            return false;
        }
        match self.sender.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conn_id = %self.id, "Send buffer full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.mark_dead();
                false
            }
        }
    }

    /// Check if connection is alive
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Mark connection as dead
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_drops_when_full_or_closed() {
        let (handle, mut rx) =
            ConnectionHandle::new(ConnectionId::new(), "a".into(), "A".into(), SessionId::new(), 1);
        let ping = || ServerMessage::Heartbeat {
            timestamp: chrono::Utc::now(),
        };
        assert!(handle.send(ping()));
        assert!(!handle.send(ping()));
        assert!(rx.recv().await.is_some());

        drop(rx);
        assert!(!handle.send(ping()));
        assert!(!handle.is_alive());
    }
}
