//! Admission, registration and session recovery.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use playhub_core::error::AppError;
use playhub_core::result::AppResult;
use playhub_core::traits::identity::Identity;
use playhub_core::types::{ConnectionId, SessionId};

use crate::channel::Channel;
use crate::connection::{
    ConnectionHandle, ConnectionMetadata, ConnectionRecord, SessionRecoveryRecord, TrafficDirection,
    TransportKind,
};
use crate::message::{ClientMessage, PresenceState, ServerMessage};
use crate::rate_limit::RateLimitAction;

use super::ConnectionOrchestrator;

/// A registered socket connection.
#[derive(Debug)]
pub struct Accepted {
    /// Outbound handle.
    pub handle: Arc<ConnectionHandle>,
    /// Messages for the socket writer.
    pub receiver: mpsc::Receiver<ServerMessage>,
    /// Registry record.
    pub record: ConnectionRecord,
    /// Whether a previous session was resumed.
    pub recovered: bool,
}

impl ConnectionOrchestrator {
    /// Verify a bearer token.
    pub async fn authenticate(&self, token: Option<&str>) -> AppResult<Identity> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::authentication("Missing access token"))?;
        self.verifier
            .verify(token)
            .await?
            .ok_or_else(|| AppError::authentication("Invalid or expired access token"))
    }

    /// Handshake admission: rate limit the remote address, then verify the
    /// token. Nothing is registered.
    pub async fn admit(&self, token: Option<&str>, remote_addr: &str) -> AppResult<Identity> {
        let admitted = async {
            self.limiter
                .check_enhanced(remote_addr, RateLimitAction::Connection)
                .await
                .into_result(RateLimitAction::Connection)?;
            self.authenticate(token).await
        }
        .await;
        if let Err(e) = &admitted {
            self.metrics.inc_rejected();
            info!(remote_addr, code = %e.code(), "Handshake rejected");
        }
        admitted
    }

    /// Register an admitted socket. Resumes the session when `session_id`
    /// names a recovery record of the same identity.
    pub async fn connect(
        &self,
        identity: Identity,
        session_id: Option<SessionId>,
        remote_addr: Option<String>,
    ) -> AppResult<Accepted> {
        let id = ConnectionId::new();
        let recovery = self.find_recovery(&identity, session_id).await;
        let session = recovery
            .as_ref()
            .map(|r| r.session_id)
            .unwrap_or_default();
        let (handle, receiver) = ConnectionHandle::new(
            id,
            identity.id.clone(),
            identity.display_name.clone(),
            session,
            self.config.channel_buffer_size,
        );
        let handle = Arc::new(handle);
        self.sockets.insert(id, Arc::clone(&handle));

        let recovered = recovery.is_some();
        let record = match self
            .establish(id, &identity, session, recovery, ConnectionMetadata::websocket(remote_addr))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.disconnect(id).await;
                return Err(e);
            }
        };
        Ok(Accepted {
            handle,
            receiver,
            record,
            recovered,
        })
    }

    async fn find_recovery(
        &self,
        identity: &Identity,
        session_id: Option<SessionId>,
    ) -> Option<SessionRecoveryRecord> {
        let record = self.registry.recover(session_id?).await?;
        if record.identity_id != identity.id {
            warn!(
                identity_id = %identity.id,
                session_id = %record.session_id,
                "Recovery record belongs to another identity, ignoring"
            );
            return None;
        }
        Some(record)
    }

    /// Shared registration path for sockets and fallback clients.
    async fn establish(
        &self,
        id: ConnectionId,
        identity: &Identity,
        session: SessionId,
        recovery: Option<SessionRecoveryRecord>,
        metadata: ConnectionMetadata,
    ) -> AppResult<ConnectionRecord> {
        let record = self
            .registry
            .register(id, identity, Some(session), metadata)
            .await;
        self.metrics.inc_connections();

        let own = Channel::User(identity.id.clone()).to_string();
        self.attach(id, &own, false).await?;
        self.reply(
            id,
            ServerMessage::Connected {
                connection_id: id,
                session_id: record.session_id,
                identity_id: identity.id.clone(),
                recovered: recovery.is_some(),
            },
        );

        if let Some(recovery) = recovery {
            self.restore(&record, identity, recovery).await;
        }

        self.publish(
            &Channel::Presence.to_string(),
            ServerMessage::Presence {
                identity_id: identity.id.clone(),
                display_name: identity.display_name.clone(),
                state: PresenceState::Online,
            },
        );
        Ok(self.registry.get(id).await.unwrap_or(record))
    }

    /// Re-subscribe held channels, rejoin the game and push its state.
    async fn restore(&self, record: &ConnectionRecord, identity: &Identity, recovery: SessionRecoveryRecord) {
        let id = record.connection_id;
        for channel in &recovery.subscriptions {
            let restorable = match Channel::parse(channel) {
                Some(Channel::Game(_)) | None => false,
                Some(parsed) => parsed.permits(&identity.id),
            };
            if restorable {
                if let Err(e) = self.attach(id, channel, false).await {
                    debug!(conn_id = %id, channel = %channel, error = %e, "Could not restore subscription");
                }
            }
        }

        if let Some(game_id) = recovery.game_id {
            if let Err(e) = self.enter_game(record, game_id).await {
                info!(
                    conn_id = %id,
                    game_id = %game_id,
                    error = %e,
                    "Could not rejoin game on recovery"
                );
            }
        }

        self.registry.consume_recovery(recovery.session_id).await;
        info!(
            conn_id = %id,
            session_id = %recovery.session_id,
            "Session recovered"
        );
    }

    /// Open a server-push connection for an admitted identity.
    pub async fn fallback_connect_sse(
        &self,
        identity: Identity,
        session_id: Option<SessionId>,
        remote_addr: Option<String>,
    ) -> AppResult<(ConnectionId, mpsc::Receiver<ServerMessage>)> {
        let recovery = self.find_recovery(&identity, session_id).await;
        let (id, stream) = self.fallback.connect_sse(identity.clone());
        self.establish_fallback(id, &identity, recovery, TransportKind::Sse, remote_addr)
            .await?;
        Ok((id, stream))
    }

    /// Open a long-poll connection for an admitted identity.
    pub async fn fallback_connect_long_poll(
        &self,
        identity: Identity,
        session_id: Option<SessionId>,
        remote_addr: Option<String>,
    ) -> AppResult<ConnectionId> {
        let recovery = self.find_recovery(&identity, session_id).await;
        let id = self.fallback.connect_long_poll(identity.clone());
        self.establish_fallback(id, &identity, recovery, TransportKind::LongPoll, remote_addr)
            .await?;
        Ok(id)
    }

    async fn establish_fallback(
        &self,
        id: ConnectionId,
        identity: &Identity,
        recovery: Option<SessionRecoveryRecord>,
        transport: TransportKind,
        remote_addr: Option<String>,
    ) -> AppResult<()> {
        let metadata = ConnectionMetadata {
            transport,
            remote_addr,
        };
        let session = recovery
            .as_ref()
            .map(|r| r.session_id)
            .unwrap_or_default();
        if let Err(e) = self.establish(id, identity, session, recovery, metadata).await {
            self.disconnect(id).await;
            return Err(e);
        }
        Ok(())
    }

    /// Check that `identity` owns fallback connection `id`.
    fn fallback_owner(&self, id: ConnectionId, identity: &Identity) -> AppResult<()> {
        match self.fallback.touch(id) {
            Some(owner) if owner.id == identity.id => {
                self.registry.touch(id);
                Ok(())
            }
            Some(_) => Err(AppError::authentication(
                "Connection belongs to another identity",
            )),
            None => Err(AppError::not_found(format!("Connection {id} not found"))),
        }
    }

    /// Long-poll for messages.
    pub async fn fallback_poll(
        &self,
        id: ConnectionId,
        identity: &Identity,
        timeout: Option<Duration>,
    ) -> AppResult<Vec<ServerMessage>> {
        self.fallback_owner(id, identity)?;
        let messages = self.fallback.poll(id, timeout).await?;
        for message in &messages {
            let size = serde_json::to_string(message).map(|s| s.len()).unwrap_or(0);
            self.registry
                .record_traffic(id, TrafficDirection::Outbound, size);
        }
        Ok(messages)
    }

    /// Run a client message sent over a fallback connection.
    pub async fn fallback_message(
        &self,
        id: ConnectionId,
        identity: &Identity,
        message: ClientMessage,
    ) -> AppResult<()> {
        self.fallback_owner(id, identity)?;
        let size = serde_json::to_string(&message).map(|s| s.len()).unwrap_or(0);
        self.registry
            .record_traffic(id, TrafficDirection::Inbound, size);
        self.metrics.inc_received();
        self.dispatch(id, message).await
    }

    /// Close a fallback connection.
    pub async fn fallback_disconnect(&self, id: ConnectionId, identity: &Identity) -> AppResult<()> {
        self.fallback_owner(id, identity)?;
        self.disconnect(id).await;
        Ok(())
    }
}
