//! Match Driver
//!
//! Single task that owns the match state machines. A fixed tick, transport
//! events and local commands are multiplexed with `tokio::select!`; the
//! heartbeat and the arbiter never run concurrently with each other.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::lobby::coordinator::{LobbyCoordinator, LobbyError};
use crate::network::protocol::{GameOverReason, PeerId, PeerMessage, Role};
use crate::network::transport::TransportEvent;
use crate::session::arbiter::{GameOverArbiter, SinglePlayerTally};
use crate::session::connectivity::ConnectivityMonitor;
use crate::session::context::SessionContext;
use crate::session::events::{MatchReport, SessionEvent};
use crate::session::heartbeat::{MatchPhase, SessionHeartbeat};

/// Input from the gameplay and presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCommand {
    /// Local score changed.
    SetScore(i32),
    /// Local health changed.
    SetHealth {
        /// Current health.
        current: i32,
        /// Maximum health.
        max: i32,
    },
    /// An attack enemy was sent to the opponent.
    AttackSent,
    /// An opponent's attack enemy was defeated.
    AttackEnemyDefeated,
    /// Special attack gauge filled.
    ArmSpecialAttack,
    /// Fire the special attack.
    UseSpecialAttack,
    /// Local game-over trigger.
    GameOver(GameOverReason),
    /// Host: start when both peers are ready.
    RequestStart,
    /// Network reachability probe result.
    Reachability(bool),
    /// Single-player grading counters.
    Tally(SinglePlayerTally),
    /// Leave the match and the session.
    Leave,
}

/// Cloneable handle to a running [`MatchDriver`].
#[derive(Debug, Clone)]
pub struct MatchHandle {
    commands: mpsc::UnboundedSender<MatchCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl MatchHandle {
    /// Queue a command. False if the driver has stopped.
    pub fn send(&self, command: MatchCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Report the local game over.
    pub fn report_game_over(&self, reason: GameOverReason) -> bool {
        self.send(MatchCommand::GameOver(reason))
    }

    /// Update the local score.
    pub fn set_score(&self, score: i32) -> bool {
        self.send(MatchCommand::SetScore(score))
    }

    /// Leave the match.
    pub fn leave(&self) -> bool {
        self.send(MatchCommand::Leave)
    }
}

/// Owns one match from connection to result.
pub struct MatchDriver {
    ctx: SessionContext,
    heartbeat: SessionHeartbeat,
    arbiter: GameOverArbiter,
    connectivity: ConnectivityMonitor,
    lobby: Option<LobbyCoordinator>,
    transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    commands: mpsc::UnboundedReceiver<MatchCommand>,
}

impl MatchDriver {
    /// Create a driver and its handle.
    ///
    /// `lobby` is used to lock the session at start, re-join the relay and
    /// leave when the match ends. Local runs pass `None` for both it and
    /// `transport_events`.
    pub fn new(
        ctx: SessionContext,
        lobby: Option<LobbyCoordinator>,
        transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ) -> (Self, MatchHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let handle = MatchHandle {
            commands: command_tx,
            events: ctx.event_sender(),
        };
        let heartbeat = SessionHeartbeat::new(ctx.role(), ctx.config());
        let arbiter = GameOverArbiter::new(ctx.role(), ctx.config());
        let connectivity = ConnectivityMonitor::new(ctx.config());

        let driver = Self {
            ctx,
            heartbeat,
            arbiter,
            connectivity,
            lobby,
            transport_events,
            commands,
        };
        (driver, handle)
    }

    /// Run on a new task.
    pub fn spawn(self) -> JoinHandle<Option<MatchReport>> {
        tokio::spawn(self.run())
    }

    /// Run until the result is shown or the player leaves.
    #[instrument(skip_all)]
    pub async fn run(mut self) -> Option<MatchReport> {
        let mut tick = interval(self.ctx.config().tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Match driver started as {:?} ({:?})", self.ctx.role(), self.ctx.mode());

        loop {
            tokio::select! {
                _ = tick.tick() => self.on_tick(Instant::now()).await,
                Some(event) = next_transport_event(&mut self.transport_events) => {
                    self.on_transport_event(event, Instant::now());
                }
                command = self.commands.recv() => match command {
                    Some(MatchCommand::Leave) | None => {
                        self.leave().await;
                        break;
                    }
                    Some(command) => self.on_command(command, Instant::now()).await,
                },
            }

            if self.ctx.result_shown() {
                self.close().await;
                break;
            }
        }

        info!("Match driver stopped");
        self.ctx.report()
    }

    // =========================================================================
    // TICK
    // =========================================================================

    async fn on_tick(&mut self, now: Instant) {
        self.maybe_begin(now);

        self.connectivity.tick(&self.ctx, self.heartbeat.phase(), now);
        self.heartbeat.tick(&mut self.ctx, now);
        self.arbiter.tick(&mut self.ctx, &mut self.heartbeat, now);

        if self.ctx.config().auto_start
            && self.ctx.role().is_host()
            && self.heartbeat.phase() == MatchPhase::ReadyCheck
            && self.heartbeat.all_ready(&self.ctx)
        {
            self.start_match().await;
        }

        if self.heartbeat.awaiting_transport_check() {
            self.verify_transport(now).await;
        }
    }

    fn maybe_begin(&mut self, now: Instant) {
        if self.heartbeat.phase() != MatchPhase::Lobby || self.ctx.result_shown() {
            return;
        }
        if self.ctx.is_single_player() {
            self.heartbeat.begin_local(&mut self.ctx, now);
        } else if self.ctx.transport_running() {
            self.heartbeat.begin(&mut self.ctx, now);
        }
    }

    async fn start_match(&mut self) {
        if !self.ctx.role().is_host() || self.heartbeat.phase() != MatchPhase::ReadyCheck {
            return;
        }
        if !self.heartbeat.all_ready(&self.ctx) {
            debug!("Start requested before both peers are ready");
            return;
        }

        if let Some(lobby) = &self.lobby {
            if let Err(e) = lobby.lock_session().await {
                warn!("Could not lock session before start: {}", e);
            }
        }
        self.heartbeat.request_start(&mut self.ctx);
    }

    async fn verify_transport(&mut self, now: Instant) {
        let connected = match self.ctx.role() {
            Role::Host => self.ctx.transport().is_some_and(|t| t.is_connected_as_host()),
            Role::Client => {
                if self.ctx.transport().is_some_and(|t| t.is_connected_as_client()) {
                    true
                } else if let Some(lobby) = &self.lobby {
                    info!("Transport down at start; re-joining relay");
                    lobby.rejoin_relay().await
                } else {
                    false
                }
            }
        };

        if connected {
            if let Some(lobby) = &self.lobby {
                lobby.notify_game_started().await;
            }
            self.heartbeat.enter_active(&mut self.ctx, now);
            return;
        }

        self.heartbeat.abort_start(&mut self.ctx);
        if let Some(lobby) = &self.lobby {
            if let Err(e) = lobby.leave_session().await {
                warn!("Leaving after failed start: {}", e);
            }
        }
    }

    // =========================================================================
    // TRANSPORT
    // =========================================================================

    fn on_transport_event(&mut self, event: TransportEvent, now: Instant) {
        self.maybe_begin(now);

        match event {
            TransportEvent::PeerConnected(peer) => {
                self.heartbeat.on_peer_connected(&mut self.ctx, peer);
            }
            TransportEvent::PeerDisconnected(peer) => {
                self.heartbeat.on_peer_disconnected(&mut self.ctx, peer);
                self.arbiter.on_peer_disconnected(&mut self.ctx, &mut self.heartbeat, peer);
            }
            TransportEvent::Message { from, message } => self.dispatch(from, message, now),
        }
    }

    fn dispatch(&mut self, from: PeerId, message: PeerMessage, now: Instant) {
        let role = self.ctx.role();
        if !message.accepted_by(role) {
            debug!("Dropping {:?} from {}: not accepted by {:?}", message, from, role);
            return;
        }

        let ctx = &mut self.ctx;
        let heartbeat = &mut self.heartbeat;
        let arbiter = &mut self.arbiter;
        match message {
            PeerMessage::SetReady { ready } => heartbeat.on_set_ready(ctx, from, ready),
            PeerMessage::ReportGameOver { reason } => {
                arbiter.on_report_game_over(ctx, heartbeat, from, reason, now)
            }
            PeerMessage::ReportFinalScore { peer, score } => {
                arbiter.on_report_final_score(ctx, heartbeat, from, peer, score)
            }
            PeerMessage::ReportPeriodicState(state) | PeerMessage::PushPeriodicState(state) => {
                heartbeat.on_remote_state(ctx, state, now)
            }
            PeerMessage::RequestSpecialAttack => {
                let before = heartbeat.local_stats().current_hp;
                heartbeat.on_request_special_attack(ctx, from);
                self.check_health_depleted(before, now);
            }
            PeerMessage::PushConnectedCount { count } => heartbeat.on_push_connected_count(ctx, count),
            PeerMessage::PushStartSignal => heartbeat.on_push_start_signal(ctx),
            PeerMessage::PushGameOverFlag => arbiter.on_push_game_over_flag(ctx, heartbeat, now),
            PeerMessage::RequestFinalScore => arbiter.on_request_final_score(ctx, heartbeat),
            PeerMessage::PushFinalOutcome(outcome) => {
                arbiter.on_push_final_outcome(ctx, heartbeat, outcome)
            }
            PeerMessage::PushSpecialAttackEffect { damage } => {
                let before = heartbeat.local_stats().current_hp;
                heartbeat.on_special_attack_effect(ctx, damage);
                self.check_health_depleted(before, now);
            }
        }
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    async fn on_command(&mut self, command: MatchCommand, now: Instant) {
        match command {
            MatchCommand::SetScore(score) => self.heartbeat.set_score(score),
            MatchCommand::SetHealth { current, max } => {
                let before = self.heartbeat.local_stats().current_hp;
                self.heartbeat.set_health(current, max);
                self.check_health_depleted(before, now);
            }
            MatchCommand::AttackSent => self.heartbeat.record_attack_sent(),
            MatchCommand::AttackEnemyDefeated => self.heartbeat.record_attack_enemy_defeated(),
            MatchCommand::ArmSpecialAttack => self.heartbeat.arm_special_attack(&mut self.ctx),
            MatchCommand::UseSpecialAttack => {
                let before = self.heartbeat.local_stats().current_hp;
                if !self.heartbeat.use_special_attack(&mut self.ctx) {
                    debug!("Special attack not available");
                }
                self.check_health_depleted(before, now);
            }
            MatchCommand::GameOver(reason) => {
                self.arbiter
                    .report_game_over(&mut self.ctx, &mut self.heartbeat, reason, now)
            }
            MatchCommand::RequestStart => self.start_match().await,
            MatchCommand::Reachability(reachable) => self.connectivity.set_reachable(reachable, now),
            MatchCommand::Tally(tally) => self.arbiter.set_tally(tally),
            MatchCommand::Leave => self.leave().await,
        }
    }

    /// Health reaching zero while playing ends the match for this side.
    fn check_health_depleted(&mut self, hp_before: i32, now: Instant) {
        let hp = self.heartbeat.local_stats().current_hp;
        if hp_before > 0 && hp <= 0 && self.heartbeat.phase() == MatchPhase::Active {
            info!("Health depleted");
            self.arbiter.report_game_over(
                &mut self.ctx,
                &mut self.heartbeat,
                GameOverReason::HealthDepleted,
                now,
            );
        }
    }

    // =========================================================================
    // TEARDOWN
    // =========================================================================

    /// Result shown: leave the session without treating it as a drop.
    async fn close(&mut self) {
        self.heartbeat.notify_intentional_disconnect();
        self.leave_lobby().await;
        self.ctx.shutdown_transport();
    }

    /// Player quit: leave and reset everything.
    async fn leave(&mut self) {
        info!("Leaving match");
        self.heartbeat.notify_intentional_disconnect();
        self.leave_lobby().await;
        self.heartbeat.reset(&mut self.ctx);
        self.arbiter.reset();
        self.connectivity.reset(&self.ctx);
        self.ctx.stop_gameplay();
    }

    async fn leave_lobby(&self) {
        let Some(lobby) = &self.lobby else {
            return;
        };
        match lobby.leave_session().await {
            Ok(()) => {}
            Err(LobbyError::NotInSession) => debug!("Session already left"),
            Err(e) => warn!("Failed to leave session: {}", e),
        }
    }
}

async fn next_transport_event(
    rx: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
