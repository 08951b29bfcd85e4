//! Session Transport
//!
//! The relay substrate is a black box behind [`Transport`]: the host
//! allocates a relay and gets a join code back, the client joins with that
//! code, and both then exchange [`PeerMessage`]s with FIFO ordering per
//! sender. Connection changes and inbound messages arrive as
//! [`TransportEvent`]s on a channel owned by the match driver.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::network::protocol::{PeerId, PeerMessage, Target};

/// Events surfaced by a transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer joined the relay (host side).
    PeerConnected(PeerId),
    /// A peer left or the relay went away.
    PeerDisconnected(PeerId),
    /// Inbound message.
    Message {
        /// Sending connection.
        from: PeerId,
        /// Payload.
        message: PeerMessage,
    },
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Relay allocation failed.
    #[error("Relay allocation failed: {0}")]
    AllocationFailed(String),

    /// No relay for this join code.
    #[error("Unknown join code")]
    JoinCodeNotFound,

    /// Relay has no free connection slot.
    #[error("Relay allocation is full")]
    AllocationFull,

    /// Endpoint is not connected.
    #[error("Not connected")]
    NotConnected,

    /// Peer channel closed.
    #[error("Channel closed")]
    ChannelClosed,
}

/// Relay transport endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Allocate a relay for `max_connections` remote peers and start hosting.
    /// Returns the join code.
    async fn allocate_and_host(&self, max_connections: usize) -> Result<String, TransportError>;

    /// Join a relay as client.
    async fn join(&self, join_code: &str) -> Result<PeerId, TransportError>;

    /// This endpoint's connection id, if connected.
    fn local_peer(&self) -> Option<PeerId>;

    /// Whether this endpoint is hosting.
    fn is_host(&self) -> bool;

    /// Whether this endpoint is connected as a client.
    fn is_connected_client(&self) -> bool;

    /// Connections known to this endpoint, including itself.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Send a message.
    fn send(&self, target: Target, message: PeerMessage) -> Result<(), TransportError>;

    /// Tear the endpoint down.
    fn shutdown(&self);
}

/// Logging wrapper used by the lobby and match layers.
#[derive(Clone)]
pub struct SessionTransport {
    inner: Arc<dyn Transport>,
}

impl SessionTransport {
    /// Wrap a transport endpoint.
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self { inner }
    }

    /// Allocate a relay and start hosting. Returns the join code.
    pub async fn create_relay(&self, max_connections: usize) -> Result<String, TransportError> {
        match self.inner.allocate_and_host(max_connections).await {
            Ok(code) => {
                info!("Relay allocated for {} connection(s), join code {}", max_connections, code);
                Ok(code)
            }
            Err(e) => {
                error!("Relay allocation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Join a relay by code.
    pub async fn join_relay(&self, join_code: &str) -> bool {
        match self.inner.join(join_code).await {
            Ok(peer) => {
                info!("Joined relay {} as {}", join_code, peer);
                true
            }
            Err(e) => {
                warn!("Failed to join relay {}: {}", join_code, e);
                false
            }
        }
    }

    /// Whether this peer is hosting.
    pub fn is_connected_as_host(&self) -> bool {
        self.inner.is_host()
    }

    /// Whether this peer is connected as client.
    pub fn is_connected_as_client(&self) -> bool {
        self.inner.is_connected_client()
    }

    /// Whether the transport is up in either role.
    pub fn is_running(&self) -> bool {
        self.inner.is_host() || self.inner.is_connected_client()
    }

    /// This peer's connection id.
    pub fn local_peer(&self) -> Option<PeerId> {
        self.inner.local_peer()
    }

    /// Connections known to this peer, including itself.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.connected_peers()
    }

    /// Send a message, logging failures.
    pub fn send(&self, target: Target, message: PeerMessage) -> bool {
        #[cfg(feature = "debug-tracing")]
        debug!("-> {:?}: {:?}", target, message);

        match self.inner.send(target, message) {
            Ok(()) => true,
            Err(e) => {
                debug!("Send to {:?} failed: {}", target, e);
                false
            }
        }
    }

    /// Shut the transport down.
    pub fn disconnect(&self) {
        if self.is_running() {
            info!("Disconnecting relay transport");
        }
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTransport")
            .field("host", &self.inner.is_host())
            .field("client", &self.inner.is_connected_client())
            .finish()
    }
}
