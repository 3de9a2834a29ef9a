//! Per-connection server session.
//!
//! A session moves through two states: awaiting the application
//! handshake, then serving pull and push requests. Any error ends only
//! this session; the listener keeps accepting.

use crate::apply::apply_entries;
use crate::auth::Authenticator;
use crate::channel::{ChannelSecurity, SecureChannel};
use crate::crypto::HandshakeRole;
use crate::error::{AuthError, NetError, ProtocolError};
use crate::PULL_BATCH_LIMIT;
use docmesh_core::{HlcClock, MergePolicy};
use docmesh_store::DocumentStore;
use docmesh_types::{
    AckResponse, ChangeSetResponse, GossipRelay, HandshakeRequest, HandshakeResponse, Message,
    OplogEntry, PullChangesRequest, PushChangesRequest, WireOplogEntry, COMPRESSION_BROTLI,
};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Shared state handed to every session.
pub(crate) struct SessionContext<S> {
    pub node_id: String,
    pub store: Arc<S>,
    pub clock: Arc<HlcClock>,
    pub authenticator: Arc<dyn Authenticator>,
    pub policy: MergePolicy,
    pub security: ChannelSecurity,
    pub compression: bool,
    pub gossip_intake: Option<mpsc::UnboundedSender<GossipRelay>>,
}

pub(crate) struct Session<S, IO> {
    ctx: Arc<SessionContext<S>>,
    channel: SecureChannel<IO>,
    peer_node_id: Option<String>,
}

impl<S, IO> Session<S, IO>
where
    S: DocumentStore,
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Drive one connection to completion.
    pub(crate) async fn run(ctx: Arc<SessionContext<S>>, stream: IO) -> Result<(), NetError> {
        let channel = SecureChannel::establish(stream, ctx.security, HandshakeRole::Responder).await?;
        let mut session = Session {
            ctx,
            channel,
            peer_node_id: None,
        };

        loop {
            let message = match session.channel.recv_message().await {
                Ok(message) => message,
                // Peer hung up between requests.
                Err(NetError::Transport(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(())
                }
                Err(e) => return Err(e),
            };

            match message {
                Message::HandshakeRequest(request) => session.handle_handshake(request).await?,
                _ if session.peer_node_id.is_none() => {
                    return Err(AuthError::NotAuthenticated.into());
                }
                Message::PullChanges(request) => session.handle_pull(request).await?,
                Message::PushChanges(request) => session.handle_push(request).await?,
                other => {
                    return Err(ProtocolError::UnexpectedMessage {
                        expected: "pull or push request",
                        actual: format!("{:?}", other.message_type()),
                    }
                    .into());
                }
            }
        }
    }

    async fn handle_handshake(&mut self, request: HandshakeRequest) -> Result<(), NetError> {
        let accepted = self
            .ctx
            .authenticator
            .authenticate(&request.node_id, &request.auth_token)
            .await;

        let selected_compression = if accepted
            && self.ctx.compression
            && request
                .supported_compression
                .iter()
                .any(|c| c == COMPRESSION_BROTLI)
        {
            Some(COMPRESSION_BROTLI.to_string())
        } else {
            None
        };

        let response = Message::HandshakeResponse(HandshakeResponse {
            accepted,
            server_node_id: self.ctx.node_id.clone(),
            selected_compression: selected_compression.clone(),
        });
        self.channel.send_message(&response).await?;

        if !accepted {
            tracing::info!(peer = %request.node_id, "handshake rejected");
            return Err(AuthError::TokenMismatch.into());
        }

        if selected_compression.is_some() {
            self.channel.enable_compression();
        }
        tracing::info!(
            peer = %request.node_id,
            compression = selected_compression.as_deref().unwrap_or("none"),
            "handshake accepted"
        );
        self.peer_node_id = Some(request.node_id);
        Ok(())
    }

    async fn handle_pull(&mut self, request: PullChangesRequest) -> Result<(), NetError> {
        let since = request.timestamp().map_err(ProtocolError::Wire)?;
        let entries = self
            .ctx
            .store
            .oplog_after(&since, PULL_BATCH_LIMIT)
            .await?;
        let has_more = entries.len() == PULL_BATCH_LIMIT;

        tracing::debug!(
            peer = self.peer_node_id.as_deref().unwrap_or(""),
            count = entries.len(),
            has_more,
            "serving pull since {since}"
        );

        let response = Message::ChangeSet(ChangeSetResponse {
            entries: entries.iter().map(WireOplogEntry::from_entry).collect(),
            has_more,
        });
        self.channel.send_message(&response).await
    }

    async fn handle_push(&mut self, request: PushChangesRequest) -> Result<(), NetError> {
        let entries: Vec<OplogEntry> = request
            .entries
            .into_iter()
            .map(WireOplogEntry::into_entry)
            .collect::<Result<_, _>>()
            .map_err(ProtocolError::Wire)?;

        // Gossip-tagged pushes go to the gossip service, which owns
        // dedup, hop limiting and re-propagation.
        if let (Some(message_id), Some(intake)) = (&request.message_id, &self.ctx.gossip_intake) {
            for entry in &entries {
                self.ctx.clock.update(&entry.timestamp);
            }
            let relay = GossipRelay {
                entries,
                source_node_id: request
                    .source_node_id
                    .or_else(|| self.peer_node_id.clone())
                    .unwrap_or_default(),
                message_id: message_id.clone(),
                hops: request.hops,
            };
            let delivered = intake.send(relay).is_ok();
            return self
                .channel
                .send_message(&Message::Ack(AckResponse { success: delivered }))
                .await;
        }

        let result = apply_entries(
            self.ctx.store.as_ref(),
            &self.ctx.clock,
            &entries,
            self.ctx.policy,
        )
        .await;

        match result {
            Ok(applied) => {
                tracing::debug!(
                    peer = self.peer_node_id.as_deref().unwrap_or(""),
                    received = entries.len(),
                    applied,
                    "applied push"
                );
                self.channel
                    .send_message(&Message::Ack(AckResponse { success: true }))
                    .await
            }
            Err(err) => {
                // The store rejected the batch wholesale; tell the peer
                // before this session is torn down so it can retry on
                // the next cycle.
                let _ = self
                    .channel
                    .send_message(&Message::Ack(AckResponse { success: false }))
                    .await;
                Err(err)
            }
        }
    }
}
