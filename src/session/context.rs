//! Session Context
//!
//! Everything the match state machines need from the outside world, built
//! once by the caller and handed down to the heartbeat and the arbiter.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::core::config::SessionConfig;
use crate::network::protocol::{PeerId, PeerMessage, Role, Target};
use crate::network::transport::SessionTransport;
use crate::session::events::{MatchReport, SessionEvent};
use crate::session::mode::GameMode;

/// Calls into the gameplay layer.
pub trait GameplayHooks: Send + Sync {
    /// Start the pre-match countdown.
    fn begin_countdown(&self) {}

    /// Stop accepting player input.
    fn disable_input(&self) {}

    /// Stop all gameplay: input, spawning, enemies, audio.
    fn stop(&self);

    /// Apply damage from an opponent's special attack.
    fn apply_damage(&self, _damage: i32) {}
}

/// Gameplay hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGameplay;

impl GameplayHooks for NoopGameplay {
    fn stop(&self) {}
}

/// Per-match context owned by the driver.
pub struct SessionContext {
    role: Role,
    mode: GameMode,
    config: SessionConfig,
    transport: Option<SessionTransport>,
    gameplay: Arc<dyn GameplayHooks>,
    events: broadcast::Sender<SessionEvent>,
    report: Option<MatchReport>,
    gameplay_stopped: bool,
}

impl SessionContext {
    /// Context for a two-player match.
    pub fn multiplayer(
        role: Role,
        config: SessionConfig,
        transport: SessionTransport,
        gameplay: Arc<dyn GameplayHooks>,
    ) -> Self {
        Self::build(role, GameMode::Multiplayer, config, Some(transport), gameplay)
    }

    /// Context for a local run.
    pub fn single_player(config: SessionConfig, gameplay: Arc<dyn GameplayHooks>) -> Self {
        Self::build(Role::Host, GameMode::SinglePlayer, config, None, gameplay)
    }

    fn build(
        role: Role,
        mode: GameMode,
        config: SessionConfig,
        transport: Option<SessionTransport>,
        gameplay: Arc<dyn GameplayHooks>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            role,
            mode,
            config,
            transport,
            gameplay,
            events,
            report: None,
            gameplay_stopped: false,
        }
    }

    /// Local role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Play mode.
    pub fn mode(&self) -> GameMode {
        self.mode
    }

    /// Whether this is a local run.
    pub fn is_single_player(&self) -> bool {
        self.mode == GameMode::SinglePlayer
    }

    /// Timing configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Transport, if any.
    pub fn transport(&self) -> Option<&SessionTransport> {
        self.transport.as_ref()
    }

    /// Local connection id.
    pub fn local_peer(&self) -> PeerId {
        match (&self.transport, self.role) {
            (_, Role::Host) => PeerId::HOST,
            (Some(t), Role::Client) => t.local_peer().unwrap_or(PeerId::HOST),
            (None, Role::Client) => PeerId::HOST,
        }
    }

    /// Connections currently up, including our own.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.transport.as_ref().map(|t| t.connected_peers()).unwrap_or_default()
    }

    /// Whether the transport is up.
    pub fn transport_running(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_running())
    }

    /// Send a message to the other side.
    pub fn send(&self, target: Target, message: PeerMessage) -> bool {
        match &self.transport {
            Some(transport) => transport.send(target, message),
            None => false,
        }
    }

    /// Tear the transport down.
    pub fn shutdown_transport(&self) {
        if let Some(transport) = &self.transport {
            transport.disconnect();
        }
    }

    /// Gameplay collaborator.
    pub fn gameplay(&self) -> &dyn GameplayHooks {
        self.gameplay.as_ref()
    }

    /// Publish an event.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Event sender, for handles outliving a borrow of the context.
    pub fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    /// Show the final result. Only the first call per match has effect.
    pub fn finish(&mut self, report: MatchReport) -> bool {
        if self.report.is_some() {
            debug!("Result already shown; ignoring {:?}", report.outcome);
            return false;
        }
        self.report = Some(report);
        info!(
            "Match ended: {:?} ({} vs {})",
            report.outcome, report.my_score, report.opponent_score
        );
        self.emit(SessionEvent::MatchEnded(report));
        true
    }

    /// Whether the final result has been shown.
    pub fn result_shown(&self) -> bool {
        self.report.is_some()
    }

    /// The result shown for this match, if any.
    pub fn report(&self) -> Option<MatchReport> {
        self.report
    }

    /// Stop gameplay. Only the first call has effect.
    pub fn stop_gameplay(&mut self) {
        if !self.gameplay_stopped {
            self.gameplay_stopped = true;
            self.gameplay.stop();
        }
    }
}
