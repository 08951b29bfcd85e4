//! In-Process Relay
//!
//! A [`Transport`] implementation where both endpoints live in the same
//! process. Used by the demo binary and the tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::network::protocol::{PeerId, PeerMessage, Target};
use crate::network::transport::{Transport, TransportError, TransportEvent};

type Inbox = mpsc::UnboundedSender<TransportEvent>;

struct Allocation {
    max_clients: usize,
    host: Inbox,
    clients: BTreeMap<PeerId, Inbox>,
    next_peer: u64,
}

#[derive(Default)]
struct RelayHub {
    allocations: BTreeMap<String, Allocation>,
    fail_next_allocation: bool,
}

/// Shared relay that hands out connected endpoints.
#[derive(Clone, Default)]
pub struct LocalRelay {
    hub: Arc<Mutex<RelayHub>>,
}

impl LocalRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new endpoint and the receiver for its events.
    pub fn endpoint(&self) -> (Arc<LocalTransport>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let endpoint = LocalTransport {
            hub: self.hub.clone(),
            inbox,
            state: Mutex::new(EndpointState::Idle),
            muted: AtomicBool::new(false),
        };
        (Arc::new(endpoint), rx)
    }

    /// Make the next allocation fail.
    pub fn fail_next_allocation(&self) {
        self.hub.lock().fail_next_allocation = true;
    }

    /// Live allocation count.
    pub fn allocation_count(&self) -> usize {
        self.hub.lock().allocations.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EndpointState {
    Idle,
    Hosting { code: String },
    Client { code: String, peer: PeerId },
}

/// One side of a [`LocalRelay`] connection.
pub struct LocalTransport {
    hub: Arc<Mutex<RelayHub>>,
    inbox: Inbox,
    state: Mutex<EndpointState>,
    muted: AtomicBool,
}

impl LocalTransport {
    /// Silently drop every outgoing message while muted.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn deliver(inbox: &Inbox, event: TransportEvent) -> Result<(), TransportError> {
        inbox.send(event).map_err(|_| TransportError::ChannelClosed)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn allocate_and_host(&self, max_connections: usize) -> Result<String, TransportError> {
        self.shutdown();

        let mut hub = self.hub.lock();
        if std::mem::take(&mut hub.fail_next_allocation) {
            return Err(TransportError::AllocationFailed("relay capacity exhausted".into()));
        }

        let code = uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase();
        hub.allocations.insert(code.clone(), Allocation {
            max_clients: max_connections,
            host: self.inbox.clone(),
            clients: BTreeMap::new(),
            next_peer: 1,
        });
        drop(hub);

        *self.state.lock() = EndpointState::Hosting { code: code.clone() };
        Ok(code)
    }

    async fn join(&self, join_code: &str) -> Result<PeerId, TransportError> {
        self.shutdown();

        let mut hub = self.hub.lock();
        let allocation = hub
            .allocations
            .get_mut(join_code)
            .ok_or(TransportError::JoinCodeNotFound)?;
        if allocation.clients.len() >= allocation.max_clients {
            return Err(TransportError::AllocationFull);
        }

        let peer = PeerId(allocation.next_peer);
        allocation.next_peer += 1;
        allocation.clients.insert(peer, self.inbox.clone());
        Self::deliver(&allocation.host, TransportEvent::PeerConnected(peer))?;
        drop(hub);

        *self.state.lock() = EndpointState::Client {
            code: join_code.to_string(),
            peer,
        };
        Ok(peer)
    }

    fn local_peer(&self) -> Option<PeerId> {
        match &*self.state.lock() {
            EndpointState::Idle => None,
            EndpointState::Hosting { .. } => Some(PeerId::HOST),
            EndpointState::Client { peer, .. } => Some(*peer),
        }
    }

    fn is_host(&self) -> bool {
        matches!(&*self.state.lock(), EndpointState::Hosting { .. })
    }

    fn is_connected_client(&self) -> bool {
        let state = self.state.lock();
        match &*state {
            EndpointState::Client { code, peer } => self
                .hub
                .lock()
                .allocations
                .get(code)
                .is_some_and(|a| a.clients.contains_key(peer)),
            _ => false,
        }
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        let state = self.state.lock();
        let hub = self.hub.lock();
        match &*state {
            EndpointState::Idle => Vec::new(),
            EndpointState::Hosting { code } => {
                let mut peers = vec![PeerId::HOST];
                if let Some(allocation) = hub.allocations.get(code) {
                    peers.extend(allocation.clients.keys().copied());
                }
                peers
            }
            EndpointState::Client { code, peer } => match hub.allocations.get(code) {
                Some(a) if a.clients.contains_key(peer) => vec![PeerId::HOST, *peer],
                _ => Vec::new(),
            },
        }
    }

    fn send(&self, target: Target, message: PeerMessage) -> Result<(), TransportError> {
        if self.muted.load(Ordering::SeqCst) {
            return Ok(());
        }

        let state = self.state.lock();
        let hub = self.hub.lock();
        match (&*state, target) {
            (EndpointState::Hosting { code }, Target::Clients) => {
                let allocation = hub.allocations.get(code).ok_or(TransportError::NotConnected)?;
                for inbox in allocation.clients.values() {
                    Self::deliver(inbox, TransportEvent::Message {
                        from: PeerId::HOST,
                        message: message.clone(),
                    })?;
                }
                Ok(())
            }
            (EndpointState::Hosting { code }, Target::Peer(peer)) => {
                let inbox = hub
                    .allocations
                    .get(code)
                    .and_then(|a| a.clients.get(&peer))
                    .ok_or(TransportError::NotConnected)?;
                Self::deliver(inbox, TransportEvent::Message { from: PeerId::HOST, message })
            }
            (EndpointState::Client { code, peer }, Target::Host) => {
                let allocation = hub.allocations.get(code).ok_or(TransportError::NotConnected)?;
                if !allocation.clients.contains_key(peer) {
                    return Err(TransportError::NotConnected);
                }
                Self::deliver(&allocation.host, TransportEvent::Message { from: *peer, message })
            }
            _ => Err(TransportError::NotConnected),
        }
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut *state, EndpointState::Idle);
        let mut hub = self.hub.lock();

        match previous {
            EndpointState::Idle => {}
            EndpointState::Hosting { code } => {
                if let Some(allocation) = hub.allocations.remove(&code) {
                    debug!("Relay {} released by host", code);
                    for inbox in allocation.clients.values() {
                        let _ = inbox.send(TransportEvent::PeerDisconnected(PeerId::HOST));
                    }
                }
            }
            EndpointState::Client { code, peer } => {
                if let Some(allocation) = hub.allocations.get_mut(&code) {
                    if allocation.clients.remove(&peer).is_some() {
                        debug!("{} left relay {}", peer, code);
                        let _ = allocation.host.send(TransportEvent::PeerDisconnected(peer));
                    }
                }
            }
        }
    }
}
