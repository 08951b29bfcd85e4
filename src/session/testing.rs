//! Test doubles for the session state machines.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::core::config::SessionConfig;
use crate::network::protocol::{PeerId, PeerMessage, Role, Target};
use crate::network::transport::{SessionTransport, Transport, TransportError};
use crate::session::context::{GameplayHooks, SessionContext};
use crate::session::events::SessionEvent;

/// Transport that records outbound messages instead of delivering them.
pub(crate) struct RecordingTransport {
    host: bool,
    local: PeerId,
    peers: Mutex<Vec<PeerId>>,
    sent: Mutex<Vec<(Target, PeerMessage)>>,
    running: AtomicBool,
}

impl RecordingTransport {
    pub(crate) fn new(host: bool, local: PeerId, peers: Vec<PeerId>) -> Self {
        Self {
            host,
            local,
            peers: Mutex::new(peers),
            sent: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
        }
    }

    pub(crate) fn set_peers(&self, peers: Vec<PeerId>) {
        *self.peers.lock() = peers;
    }

    pub(crate) fn sent(&self) -> Vec<(Target, PeerMessage)> {
        self.sent.lock().clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn allocate_and_host(&self, _max_connections: usize) -> Result<String, TransportError> {
        Ok("TEST".to_string())
    }

    async fn join(&self, _join_code: &str) -> Result<PeerId, TransportError> {
        Ok(self.local)
    }

    fn local_peer(&self) -> Option<PeerId> {
        self.is_running().then_some(self.local)
    }

    fn is_host(&self) -> bool {
        self.host && self.is_running()
    }

    fn is_connected_client(&self) -> bool {
        !self.host && self.is_running()
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        if self.is_running() {
            self.peers.lock().clone()
        } else {
            Vec::new()
        }
    }

    fn send(&self, target: Target, message: PeerMessage) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push((target, message));
        Ok(())
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Gameplay hooks that count calls.
#[derive(Default)]
pub(crate) struct RecordingGameplay {
    countdowns: AtomicUsize,
    input_disabled: AtomicUsize,
    stops: AtomicUsize,
    damage: AtomicI32,
}

impl RecordingGameplay {
    pub(crate) fn countdowns(&self) -> usize {
        self.countdowns.load(Ordering::SeqCst)
    }

    pub(crate) fn input_disabled(&self) -> usize {
        self.input_disabled.load(Ordering::SeqCst)
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub(crate) fn damage_taken(&self) -> i32 {
        self.damage.load(Ordering::SeqCst)
    }
}

impl GameplayHooks for RecordingGameplay {
    fn begin_countdown(&self) {
        self.countdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn disable_input(&self) {
        self.input_disabled.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn apply_damage(&self, damage: i32) {
        self.damage.fetch_add(damage, Ordering::SeqCst);
    }
}

/// A context wired to recording doubles.
pub(crate) struct Harness {
    pub ctx: SessionContext,
    pub transport: Arc<RecordingTransport>,
    pub gameplay: Arc<RecordingGameplay>,
    pub t0: Instant,
}

impl Harness {
    pub(crate) fn host(peers: Vec<PeerId>) -> Self {
        Self::build(Role::Host, Arc::new(RecordingTransport::new(true, PeerId::HOST, peers)))
    }

    pub(crate) fn client(local: PeerId) -> Self {
        let peers = vec![PeerId::HOST, local];
        Self::build(Role::Client, Arc::new(RecordingTransport::new(false, local, peers)))
    }

    pub(crate) fn single_player() -> Self {
        let gameplay = Arc::new(RecordingGameplay::default());
        Self {
            ctx: SessionContext::single_player(SessionConfig::default(), gameplay.clone()),
            transport: Arc::new(RecordingTransport::new(true, PeerId::HOST, Vec::new())),
            gameplay,
            t0: Instant::now(),
        }
    }

    fn build(role: Role, transport: Arc<RecordingTransport>) -> Self {
        let gameplay = Arc::new(RecordingGameplay::default());
        let ctx = SessionContext::multiplayer(
            role,
            SessionConfig::default(),
            SessionTransport::new(transport.clone()),
            gameplay.clone(),
        );
        Self { ctx, transport, gameplay, t0: Instant::now() }
    }
}

/// Everything currently buffered on an event receiver.
pub(crate) fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
