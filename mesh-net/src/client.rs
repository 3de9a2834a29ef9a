//! The sync protocol client.

use crate::channel::{ChannelSecurity, SecureChannel};
use crate::crypto::HandshakeRole;
use crate::error::{AuthError, NetError, ProtocolError};
use crate::REQUEST_TIMEOUT;
use docmesh_types::{
    AckResponse, GossipRelay, HandshakeRequest, HlcTimestamp, Message, OplogEntry,
    PullChangesRequest, PushChangesRequest, WireOplogEntry, COMPRESSION_BROTLI,
};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Connection parameters for one peer.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// This node's id, presented during the handshake.
    pub node_id: String,
    /// Peer hostname or address.
    pub host: String,
    /// Peer port.
    pub port: u16,
    /// Shared cluster secret.
    pub auth_token: String,
    /// Whether to run the key exchange prolog.
    pub security: ChannelSecurity,
    /// Whether to offer brotli compression.
    pub compression: bool,
}

/// A connection to one peer.
///
/// Requests are strictly serialized: the `&mut self` receivers make one
/// outstanding request per connection a compile-time property. Every
/// exchange is bounded by [`REQUEST_TIMEOUT`].
pub struct SyncClient {
    config: ClientConfig,
    channel: Option<SecureChannel<TcpStream>>,
    server_node_id: Option<String>,
}

impl SyncClient {
    /// Create a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            channel: None,
            server_node_id: None,
        }
    }

    /// Connect and run the application handshake.
    ///
    /// A rejected handshake is fatal for the connection and surfaces as
    /// [`AuthError::HandshakeRejected`].
    pub async fn connect(&mut self) -> Result<(), NetError> {
        let address = (self.config.host.as_str(), self.config.port);
        let stream = timeout(REQUEST_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| NetError::Timeout(REQUEST_TIMEOUT))??;

        let mut channel =
            SecureChannel::establish(stream, self.config.security, HandshakeRole::Initiator).await?;

        let supported_compression = if self.config.compression {
            vec![COMPRESSION_BROTLI.to_string()]
        } else {
            Vec::new()
        };
        channel
            .send_message(&Message::HandshakeRequest(HandshakeRequest {
                node_id: self.config.node_id.clone(),
                auth_token: self.config.auth_token.clone(),
                supported_compression,
            }))
            .await?;

        let response = timeout(REQUEST_TIMEOUT, channel.recv_message())
            .await
            .map_err(|_| NetError::Timeout(REQUEST_TIMEOUT))??;

        let response = match response {
            Message::HandshakeResponse(response) => response,
            other => {
                return Err(ProtocolError::UnexpectedMessage {
                    expected: "handshake response",
                    actual: format!("{:?}", other.message_type()),
                }
                .into());
            }
        };

        if !response.accepted {
            return Err(AuthError::HandshakeRejected.into());
        }
        if response.selected_compression.as_deref() == Some(COMPRESSION_BROTLI) {
            channel.enable_compression();
        }

        tracing::debug!(
            peer = %response.server_node_id,
            "connected to {}:{}",
            self.config.host,
            self.config.port
        );
        self.server_node_id = Some(response.server_node_id);
        self.channel = Some(channel);
        Ok(())
    }

    /// Whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// The server's node id, known after a successful handshake.
    pub fn server_node_id(&self) -> Option<&str> {
        self.server_node_id.as_deref()
    }

    /// Pull oplog entries strictly after `since`.
    ///
    /// Returns the entries and whether more are likely available. A
    /// batch filled to `batch_size` counts as "more" even when the
    /// server left the flag unset.
    pub async fn pull_changes(
        &mut self,
        since: &HlcTimestamp,
        batch_size: usize,
    ) -> Result<(Vec<OplogEntry>, bool), NetError> {
        let request = Message::PullChanges(PullChangesRequest::since(since));
        match self.request(&request).await? {
            Message::ChangeSet(set) => {
                let entries: Vec<OplogEntry> = set
                    .entries
                    .into_iter()
                    .map(WireOplogEntry::into_entry)
                    .collect::<Result<_, _>>()
                    .map_err(ProtocolError::Wire)?;
                let has_more = set.has_more || (batch_size > 0 && entries.len() >= batch_size);
                Ok((entries, has_more))
            }
            other => Err(ProtocolError::UnexpectedMessage {
                expected: "change set",
                actual: format!("{:?}", other.message_type()),
            }
            .into()),
        }
    }

    /// Push a batch of local oplog entries to the peer.
    pub async fn push_changes(&mut self, entries: &[OplogEntry]) -> Result<bool, NetError> {
        self.send_push(entries, None, None, 0).await
    }

    /// Push a gossip message, carrying its routing metadata.
    pub async fn push_gossip(&mut self, relay: &GossipRelay) -> Result<bool, NetError> {
        self.send_push(
            &relay.entries,
            Some(relay.source_node_id.clone()),
            Some(relay.message_id.clone()),
            relay.hops,
        )
        .await
    }

    async fn send_push(
        &mut self,
        entries: &[OplogEntry],
        source_node_id: Option<String>,
        message_id: Option<String>,
        hops: u32,
    ) -> Result<bool, NetError> {
        let request = Message::PushChanges(PushChangesRequest {
            entries: entries.iter().map(WireOplogEntry::from_entry).collect(),
            source_node_id,
            message_id,
            hops,
        });
        match self.request(&request).await? {
            Message::Ack(AckResponse { success }) => Ok(success),
            other => Err(ProtocolError::UnexpectedMessage {
                expected: "ack",
                actual: format!("{:?}", other.message_type()),
            }
            .into()),
        }
    }

    /// Drop the connection. Safe to call when already disconnected.
    pub async fn disconnect(&mut self) {
        self.channel = None;
        self.server_node_id = None;
    }

    async fn request(&mut self, message: &Message) -> Result<Message, NetError> {
        let channel = self.channel.as_mut().ok_or(NetError::NotConnected)?;
        channel.send_message(message).await?;
        timeout(REQUEST_TIMEOUT, channel.recv_message())
            .await
            .map_err(|_| NetError::Timeout(REQUEST_TIMEOUT))?
    }
}
