//! Session Heartbeat
//!
//! Liveness and light state replication between the two peers, plus the
//! ready-check → start handshake that precedes a match.
//!
//! ```text
//! Lobby ─begin─▶ ReadyCheck ─start flag─▶ Countdown ─transport ok─▶ Active
//!                                                                     │
//!                         Ended ◀── outcome / peer lost ── Terminating ◀┘
//! ```
//!
//! All methods are synchronous and take the current instant explicitly; the
//! match driver calls [`SessionHeartbeat::tick`] on a fixed interval.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::config::SessionConfig;
use crate::core::periodic::{Cadence, Deadline};
use crate::core::replicated::{Authority, Replicated};
use crate::network::protocol::{PeerId, PeerMessage, PeriodicState, Role, Target};
use crate::session::context::SessionContext;
use crate::session::events::{MatchReport, SessionEvent, SilenceStage};

/// Match lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Not connected to the other peer yet.
    Lobby,
    /// Connected, waiting for both ready signals.
    ReadyCheck,
    /// Start flag raised, verifying transport and counting down.
    Countdown,
    /// Gameplay running.
    Active,
    /// Game over announced, waiting for the outcome.
    Terminating,
    /// Result shown or connection lost.
    Ended,
}

/// Map a silence duration to its escalation stage.
pub fn silence_stage(silence: Duration, config: &SessionConfig) -> SilenceStage {
    if silence >= config.disconnect_timeout {
        SilenceStage::TimedOut
    } else if silence >= config.second_warning_after {
        SilenceStage::SecondWarning
    } else if silence >= config.first_warning_after {
        SilenceStage::FirstWarning
    } else {
        SilenceStage::Clear
    }
}

/// Time of the last heartbeat received from the remote peer.
#[derive(Debug, Clone, Default)]
pub struct LivenessClock {
    last_heard: Option<Instant>,
}

impl LivenessClock {
    /// Mark the peer as heard from at `now`.
    pub fn reset(&mut self, now: Instant) {
        self.last_heard = Some(now);
    }

    /// Silence so far. Zero if never started.
    pub fn silence(&self, now: Instant) -> Duration {
        self.last_heard
            .map(|heard| now.saturating_duration_since(heard))
            .unwrap_or_default()
    }
}

/// Ready flags held by the host, one per connected peer.
#[derive(Debug, Clone, Default)]
pub struct ReadyState {
    peers: BTreeMap<PeerId, bool>,
}

impl ReadyState {
    /// Track a newly connected peer as not ready.
    pub fn register(&mut self, peer: PeerId) {
        self.peers.entry(peer).or_insert(false);
    }

    /// Forget a disconnected peer.
    pub fn remove(&mut self, peer: PeerId) {
        self.peers.remove(&peer);
    }

    /// Record a ready signal. Ignored for unknown peers.
    pub fn set(&mut self, peer: PeerId, ready: bool) -> bool {
        match self.peers.get_mut(&peer) {
            Some(flag) => {
                *flag = ready;
                true
            }
            None => false,
        }
    }

    /// Exactly two distinct peers connected, both ready.
    pub fn all_ready(&self, connected: &[PeerId]) -> bool {
        let mut distinct = connected.to_vec();
        distinct.sort();
        distinct.dedup();
        distinct.len() == 2 && distinct.iter().all(|p| self.peers.get(p).copied().unwrap_or(false))
    }

    /// Forget everyone.
    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

/// Local player stats fed by the gameplay layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalStats {
    /// Current score.
    pub score: i32,
    /// Current health.
    pub current_hp: i32,
    /// Maximum health.
    pub max_hp: i32,
    /// Opponent-sent attack enemies defeated locally.
    pub defeated_attack_enemies: u32,
    /// Attack enemies sent to the opponent.
    pub sent_attack_enemies: u32,
}

impl Default for LocalStats {
    fn default() -> Self {
        Self {
            score: 0,
            current_hp: 0,
            max_hp: 1,
            defeated_attack_enemies: 0,
            sent_attack_enemies: 0,
        }
    }
}

impl LocalStats {
    fn sample(&self) -> PeriodicState {
        PeriodicState {
            score: self.score,
            current_hp: self.current_hp,
            max_hp: self.max_hp,
            defeated_count: self.defeated_attack_enemies,
        }
    }
}

/// Heartbeat, ready check and liveness for one match.
#[derive(Debug)]
pub struct SessionHeartbeat {
    role: Role,
    phase: MatchPhase,
    ready: ReadyState,
    ready_check_passed: bool,
    start_signal: Replicated<bool>,
    connected_count: Replicated<usize>,
    liveness: LivenessClock,
    stage: SilenceStage,
    remote: Option<PeriodicState>,
    local: LocalStats,
    send_cadence: Cadence,
    ready_signal: Deadline,
    game_over: bool,
    disconnect_handled: bool,
    intentional_disconnect: bool,
    special_attack_armed: bool,
}

impl SessionHeartbeat {
    /// Create for `role`.
    pub fn new(role: Role, config: &SessionConfig) -> Self {
        let authority = if role.is_host() { Authority::Owner } else { Authority::Mirror };
        Self {
            role,
            phase: MatchPhase::Lobby,
            ready: ReadyState::default(),
            ready_check_passed: false,
            start_signal: Replicated::with_authority(authority, false),
            connected_count: Replicated::with_authority(authority, 0),
            liveness: LivenessClock::default(),
            stage: SilenceStage::Clear,
            remote: None,
            local: LocalStats::default(),
            send_cadence: Cadence::new(config.heartbeat_interval),
            ready_signal: Deadline::new(),
            game_over: false,
            disconnect_handled: false,
            intentional_disconnect: false,
            special_attack_armed: false,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Current silence stage.
    pub fn stage(&self) -> SilenceStage {
        self.stage
    }

    /// Latest opponent sample while active.
    pub fn remote_state(&self) -> Option<PeriodicState> {
        self.remote
    }

    /// Local stats.
    pub fn local_stats(&self) -> &LocalStats {
        &self.local
    }

    /// Whether the start flag is raised.
    pub fn start_signal(&self) -> bool {
        *self.start_signal.get()
    }

    /// Replicated connected-peer count.
    pub fn connected_count(&self) -> usize {
        *self.connected_count.get()
    }

    /// Whether the match has been declared over.
    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    /// Whether the special attack is armed.
    pub fn special_attack_armed(&self) -> bool {
        self.special_attack_armed
    }

    /// Attack enemies we sent that the opponent has not defeated yet.
    pub fn pending_attack_markers(&self) -> u32 {
        let defeated = self.remote.map(|r| r.defeated_count).unwrap_or(0);
        self.local.sent_attack_enemies.saturating_sub(defeated)
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Transport is up: start heartbeats and schedule the ready signal.
    pub fn begin(&mut self, ctx: &mut SessionContext, now: Instant) {
        self.cancel_timers();
        self.game_over = false;
        self.disconnect_handled = false;
        self.intentional_disconnect = false;
        self.ready_check_passed = false;
        self.special_attack_armed = false;
        self.stage = SilenceStage::Clear;
        self.remote = None;

        if self.role.is_host() {
            self.ready.clear();
            for peer in ctx.connected_peers() {
                self.ready.register(peer);
            }
            self.publish_peer_count(ctx);
        }

        self.ready_signal.arm(now, ctx.config().ready_settle_delay);
        self.send_cadence.start(now);
        self.liveness.reset(now);
        self.phase = MatchPhase::ReadyCheck;
        info!("Heartbeat started as {:?}", self.role);
    }

    /// Local run: no peers and no ready check, straight into play.
    pub fn begin_local(&mut self, ctx: &mut SessionContext, now: Instant) {
        self.cancel_timers();
        self.game_over = false;
        self.disconnect_handled = false;
        self.special_attack_armed = false;
        self.stage = SilenceStage::Clear;
        self.phase = MatchPhase::Countdown;
        self.enter_active(ctx, now);
    }

    /// Host: a peer joined the relay.
    pub fn on_peer_connected(&mut self, ctx: &mut SessionContext, peer: PeerId) {
        if !self.role.is_host() {
            return;
        }
        info!("{} connected", peer);
        self.ready.register(peer);
        self.publish_peer_count(ctx);
        self.refresh_ready_check(ctx);
    }

    /// A peer left the relay.
    pub fn on_peer_disconnected(&mut self, ctx: &mut SessionContext, peer: PeerId) {
        if self.role.is_host() {
            self.ready.remove(peer);
            self.publish_peer_count(ctx);
            self.refresh_ready_check(ctx);
        }

        if self.game_over || self.disconnect_handled {
            debug!("{} disconnected after match end; ignoring", peer);
            return;
        }

        let opponent_left = match self.role {
            Role::Host => !peer.is_host(),
            Role::Client => peer.is_host(),
        };
        if opponent_left && self.phase == MatchPhase::Active {
            warn!("Opponent {} left during the match", peer);
            self.handle_peer_lost(ctx);
        }
    }

    /// Host: a ready signal arrived (or the host's own).
    pub fn on_set_ready(&mut self, ctx: &mut SessionContext, from: PeerId, ready: bool) {
        if !self.role.is_host() {
            return;
        }
        if !self.ready.set(from, ready) {
            debug!("Ready signal from unregistered {}", from);
            return;
        }
        info!("{} ready = {}", from, ready);
        self.refresh_ready_check(ctx);
    }

    /// Whether both peers are connected and ready.
    pub fn all_ready(&self, ctx: &SessionContext) -> bool {
        self.ready.all_ready(&ctx.connected_peers())
    }

    /// Host: raise the start flag if the ready check passes.
    pub fn request_start(&mut self, ctx: &mut SessionContext) -> bool {
        if !self.role.is_host() || self.phase != MatchPhase::ReadyCheck {
            return false;
        }
        if !self.all_ready(ctx) {
            info!("Start refused: both peers must be connected and ready");
            return false;
        }

        match self.start_signal.set(true) {
            Ok(Some(_)) => {
                ctx.send(Target::Clients, PeerMessage::PushStartSignal);
                self.on_start_signal(ctx);
                true
            }
            _ => false,
        }
    }

    /// Client: the host raised the start flag.
    pub fn on_push_start_signal(&mut self, ctx: &mut SessionContext) {
        if let Ok(Some(_)) = self.start_signal.apply_remote(true) {
            self.on_start_signal(ctx);
        }
    }

    /// Client: replicated peer count from the host.
    pub fn on_push_connected_count(&mut self, ctx: &mut SessionContext, count: usize) {
        if let Ok(Some(change)) = self.connected_count.apply_remote(count) {
            ctx.emit(SessionEvent::PeerCountChanged(change.new));
        }
    }

    /// Start flag raised, transport must be verified before play.
    pub fn awaiting_transport_check(&self) -> bool {
        self.phase == MatchPhase::Countdown
    }

    /// Transport verified: gameplay begins.
    pub fn enter_active(&mut self, ctx: &mut SessionContext, now: Instant) {
        if self.phase != MatchPhase::Countdown {
            return;
        }
        ctx.gameplay().begin_countdown();
        self.liveness.reset(now);
        self.stage = SilenceStage::Clear;
        self.phase = MatchPhase::Active;
        info!("Match active");
        ctx.emit(SessionEvent::MatchStarted);
    }

    /// Transport could not be established at start.
    pub fn abort_start(&mut self, ctx: &mut SessionContext) {
        warn!("Transport unavailable at match start");
        self.cancel_timers();
        self.phase = MatchPhase::Lobby;
        ctx.emit(SessionEvent::TransportLost);
    }

    /// Drive timers: ready signal, outgoing heartbeat, silence checks.
    pub fn tick(&mut self, ctx: &mut SessionContext, now: Instant) {
        if matches!(self.phase, MatchPhase::Lobby | MatchPhase::Ended) {
            return;
        }

        if self.ready_signal.fired(now) {
            self.send_ready(ctx);
        }

        if self.send_cadence.poll(now) && !self.game_over {
            let sample = self.local.sample();
            match self.role {
                Role::Host => ctx.send(Target::Clients, PeerMessage::PushPeriodicState(sample)),
                Role::Client => ctx.send(Target::Host, PeerMessage::ReportPeriodicState(sample)),
            };
        }

        if self.phase == MatchPhase::Active {
            self.check_liveness(ctx, now);
        }
    }

    /// A heartbeat sample arrived from the opponent.
    pub fn on_remote_state(&mut self, ctx: &mut SessionContext, state: PeriodicState, now: Instant) {
        self.liveness.reset(now);
        if self.phase != MatchPhase::Active {
            return;
        }

        self.remote = Some(state);
        let hp_fraction = (state.max_hp > 0).then(|| state.current_hp as f32 / state.max_hp as f32);
        ctx.emit(SessionEvent::RemoteStateUpdated {
            state,
            hp_fraction,
            pending_attack_markers: self.pending_attack_markers(),
        });
    }

    /// Game over observed: stop heartbeats and silence checks.
    pub fn notify_game_over(&mut self, ctx: &mut SessionContext) {
        if self.game_over {
            return;
        }
        self.game_over = true;
        self.cancel_timers();
        self.clear_escalation(ctx);
        if self.phase != MatchPhase::Ended {
            self.phase = MatchPhase::Terminating;
        }
        debug!("Heartbeat stopped for game over");
    }

    /// Outcome shown.
    pub fn mark_ended(&mut self) {
        self.cancel_timers();
        self.phase = MatchPhase::Ended;
    }

    /// The local player is leaving on purpose; do not treat it as a drop.
    pub fn notify_intentional_disconnect(&mut self) {
        self.intentional_disconnect = true;
    }

    /// Tear everything down and return to the lobby phase.
    pub fn reset(&mut self, ctx: &mut SessionContext) {
        self.cancel_timers();
        self.ready.clear();
        self.ready_check_passed = false;
        self.start_signal.reset(false);
        self.connected_count.reset(0);
        self.game_over = false;
        self.disconnect_handled = false;
        self.intentional_disconnect = false;
        self.special_attack_armed = false;
        self.stage = SilenceStage::Clear;
        self.remote = None;
        self.local = LocalStats::default();
        self.liveness = LivenessClock::default();
        self.phase = MatchPhase::Lobby;
        ctx.shutdown_transport();
        info!("Heartbeat reset");
    }

    // =========================================================================
    // LOCAL STATS
    // =========================================================================

    /// Local score changed.
    pub fn set_score(&mut self, score: i32) {
        self.local.score = score;
    }

    /// Local health changed.
    pub fn set_health(&mut self, current_hp: i32, max_hp: i32) {
        self.local.current_hp = current_hp;
        self.local.max_hp = max_hp;
    }

    /// An attack enemy was sent to the opponent.
    pub fn record_attack_sent(&mut self) {
        self.local.sent_attack_enemies += 1;
    }

    /// An attack enemy sent by the opponent was defeated.
    pub fn record_attack_enemy_defeated(&mut self) {
        self.local.defeated_attack_enemies += 1;
    }

    // =========================================================================
    // SPECIAL ATTACK
    // =========================================================================

    /// The local gauge is full.
    pub fn arm_special_attack(&mut self, ctx: &mut SessionContext) {
        if self.special_attack_armed || self.phase != MatchPhase::Active {
            return;
        }
        self.special_attack_armed = true;
        ctx.emit(SessionEvent::SpecialAttackArmed);
    }

    /// Fire the special attack at the opponent. Consumes the arming.
    pub fn use_special_attack(&mut self, ctx: &mut SessionContext) -> bool {
        if !self.special_attack_armed || self.phase != MatchPhase::Active || self.game_over {
            return false;
        }
        self.special_attack_armed = false;

        match self.role {
            Role::Host => self.route_special_attack(ctx, PeerId::HOST),
            Role::Client => {
                ctx.send(Target::Host, PeerMessage::RequestSpecialAttack);
            }
        }
        ctx.emit(SessionEvent::SpecialAttackSent);
        true
    }

    /// Host: a client fired its special attack.
    pub fn on_request_special_attack(&mut self, ctx: &mut SessionContext, from: PeerId) {
        if !self.role.is_host() || self.phase != MatchPhase::Active || self.game_over {
            return;
        }
        self.route_special_attack(ctx, from);
    }

    /// The opponent's special attack landed here.
    pub fn on_special_attack_effect(&mut self, ctx: &mut SessionContext, damage: i32) {
        if self.phase != MatchPhase::Active || self.game_over {
            return;
        }
        self.local.current_hp = (self.local.current_hp - damage).max(0);
        ctx.gameplay().apply_damage(damage);
        info!("Special attack hit for {} (hp {})", damage, self.local.current_hp);
        ctx.emit(SessionEvent::SpecialAttackReceived {
            damage,
            hp_after: self.local.current_hp,
        });
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn route_special_attack(&mut self, ctx: &mut SessionContext, attacker: PeerId) {
        let damage = ctx.config().special_attack_damage;
        for peer in ctx.connected_peers() {
            if peer == attacker {
                continue;
            }
            if peer.is_host() {
                self.on_special_attack_effect(ctx, damage);
            } else {
                ctx.send(Target::Peer(peer), PeerMessage::PushSpecialAttackEffect { damage });
            }
        }
    }

    fn send_ready(&mut self, ctx: &mut SessionContext) {
        match self.role {
            Role::Host => self.on_set_ready(ctx, PeerId::HOST, true),
            Role::Client => {
                debug!("Sending ready signal");
                ctx.send(Target::Host, PeerMessage::SetReady { ready: true });
            }
        }
    }

    fn refresh_ready_check(&mut self, ctx: &mut SessionContext) {
        let all_ready = self.all_ready(ctx);
        if all_ready && !self.ready_check_passed {
            info!("Ready check passed");
            ctx.emit(SessionEvent::ReadyCheckPassed);
        }
        self.ready_check_passed = all_ready;
    }

    fn publish_peer_count(&mut self, ctx: &mut SessionContext) {
        let count = ctx.connected_peers().len();
        if let Ok(Some(change)) = self.connected_count.set(count) {
            ctx.send(Target::Clients, PeerMessage::PushConnectedCount { count });
            ctx.emit(SessionEvent::PeerCountChanged(change.new));
        }
    }

    fn on_start_signal(&mut self, ctx: &mut SessionContext) {
        info!("Start signal raised");
        self.phase = MatchPhase::Countdown;
        ctx.emit(SessionEvent::StartSignalReceived);
    }

    fn check_liveness(&mut self, ctx: &mut SessionContext, now: Instant) {
        if ctx.is_single_player() || self.game_over || self.disconnect_handled || self.intentional_disconnect {
            return;
        }

        let silence = self.liveness.silence(now);
        let stage = silence_stage(silence, ctx.config());
        if stage != self.stage {
            match stage {
                SilenceStage::Clear => info!("Opponent heartbeat recovered"),
                SilenceStage::FirstWarning | SilenceStage::SecondWarning => {
                    warn!("No heartbeat for {:?} ({:?})", silence, stage)
                }
                SilenceStage::TimedOut => error!("No heartbeat for {:?}; opponent lost", silence),
            }
            self.stage = stage;
            ctx.emit(SessionEvent::PeerSilenceEscalated(stage));
        }

        if stage == SilenceStage::TimedOut {
            self.handle_peer_lost(ctx);
        }
    }

    fn handle_peer_lost(&mut self, ctx: &mut SessionContext) {
        if self.intentional_disconnect {
            debug!("Peer loss during intentional disconnect; ignoring");
            return;
        }
        if self.disconnect_handled {
            return;
        }
        self.disconnect_handled = true;
        self.clear_escalation(ctx);
        self.cancel_timers();
        self.phase = MatchPhase::Ended;

        ctx.finish(MatchReport::disconnected(self.local.score));
        ctx.stop_gameplay();
        ctx.shutdown_transport();
    }

    fn clear_escalation(&mut self, ctx: &mut SessionContext) {
        if self.stage != SilenceStage::Clear {
            self.stage = SilenceStage::Clear;
            ctx.emit(SessionEvent::PeerSilenceEscalated(SilenceStage::Clear));
        }
    }

    fn cancel_timers(&mut self) {
        self.send_cadence.cancel();
        self.ready_signal.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::LocalOutcome;
    use crate::session::testing::{drain, Harness};
    use proptest::prelude::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    /// Host heartbeat brought to Active with one connected client.
    fn active_host(h: &mut Harness) -> SessionHeartbeat {
        let mut hb = SessionHeartbeat::new(Role::Host, h.ctx.config());
        hb.begin(&mut h.ctx, h.t0);
        hb.on_set_ready(&mut h.ctx, PeerId::HOST, true);
        hb.on_set_ready(&mut h.ctx, PeerId(1), true);
        assert!(hb.request_start(&mut h.ctx));
        hb.enter_active(&mut h.ctx, h.t0);
        hb
    }

    #[test]
    fn test_ready_check_and_start() {
        let mut h = Harness::host(vec![PeerId::HOST, PeerId(1)]);
        let mut events = h.ctx.subscribe();
        let mut hb = SessionHeartbeat::new(Role::Host, h.ctx.config());
        hb.begin(&mut h.ctx, h.t0);
        assert_eq!(hb.phase(), MatchPhase::ReadyCheck);

        // Host's own ready fires after the settle delay.
        hb.tick(&mut h.ctx, h.t0 + Duration::from_millis(500));
        assert!(!hb.all_ready(&h.ctx));
        hb.tick(&mut h.ctx, h.t0 + secs(1));
        assert!(!hb.request_start(&mut h.ctx));

        hb.on_set_ready(&mut h.ctx, PeerId(1), true);
        assert!(drain(&mut events).contains(&SessionEvent::ReadyCheckPassed));
        assert!(hb.request_start(&mut h.ctx));
        assert!(hb.start_signal());
        assert_eq!(hb.phase(), MatchPhase::Countdown);
        assert!(h.transport.sent().contains(&(Target::Clients, PeerMessage::PushStartSignal)));

        hb.enter_active(&mut h.ctx, h.t0 + secs(1));
        assert_eq!(hb.phase(), MatchPhase::Active);
        assert_eq!(h.gameplay.countdowns(), 1);
    }

    #[test]
    fn test_client_sends_ready_after_settle() {
        let mut h = Harness::client(PeerId(1));
        let mut hb = SessionHeartbeat::new(Role::Client, h.ctx.config());
        hb.begin(&mut h.ctx, h.t0);
        hb.tick(&mut h.ctx, h.t0 + Duration::from_millis(999));
        assert!(!h.transport.sent().iter().any(|(_, m)| matches!(m, PeerMessage::SetReady { .. })));

        hb.tick(&mut h.ctx, h.t0 + secs(1));
        assert!(h.transport.sent().contains(&(Target::Host, PeerMessage::SetReady { ready: true })));
    }

    #[test]
    fn test_client_follows_start_signal_once() {
        let mut h = Harness::client(PeerId(1));
        let mut events = h.ctx.subscribe();
        let mut hb = SessionHeartbeat::new(Role::Client, h.ctx.config());
        hb.begin(&mut h.ctx, h.t0);

        hb.on_push_start_signal(&mut h.ctx);
        hb.on_push_start_signal(&mut h.ctx);
        assert!(hb.awaiting_transport_check());
        let starts = drain(&mut events)
            .into_iter()
            .filter(|e| *e == SessionEvent::StartSignalReceived)
            .count();
        assert_eq!(starts, 1);

        // Clients never raise the flag themselves.
        assert!(!hb.request_start(&mut h.ctx));
    }

    #[test]
    fn test_disconnect_clears_ready_entry() {
        let mut h = Harness::host(vec![PeerId::HOST, PeerId(1)]);
        let mut hb = SessionHeartbeat::new(Role::Host, h.ctx.config());
        hb.begin(&mut h.ctx, h.t0);
        hb.on_set_ready(&mut h.ctx, PeerId::HOST, true);
        hb.on_set_ready(&mut h.ctx, PeerId(1), true);
        assert!(hb.all_ready(&h.ctx));

        h.transport.set_peers(vec![PeerId::HOST]);
        hb.on_peer_disconnected(&mut h.ctx, PeerId(1));
        assert_eq!(hb.connected_count(), 1);

        // Reconnecting peer starts unready.
        h.transport.set_peers(vec![PeerId::HOST, PeerId(1)]);
        hb.on_peer_connected(&mut h.ctx, PeerId(1));
        assert!(!hb.all_ready(&h.ctx));
    }

    #[test]
    fn test_silence_escalation_stages() {
        let mut h = Harness::host(vec![PeerId::HOST, PeerId(1)]);
        let mut events = h.ctx.subscribe();
        let mut hb = active_host(&mut h);
        drain(&mut events);

        hb.tick(&mut h.ctx, h.t0 + secs(5));
        assert_eq!(hb.stage(), SilenceStage::FirstWarning);
        hb.tick(&mut h.ctx, h.t0 + secs(10));
        assert_eq!(hb.stage(), SilenceStage::SecondWarning);

        // A heartbeat clears the warning on the next tick.
        hb.on_remote_state(&mut h.ctx, PeriodicState::default(), h.t0 + secs(11));
        hb.tick(&mut h.ctx, h.t0 + secs(11));
        assert_eq!(hb.stage(), SilenceStage::Clear);

        hb.tick(&mut h.ctx, h.t0 + secs(31));
        assert_eq!(hb.phase(), MatchPhase::Ended);

        let seen = drain(&mut events);
        let stages: Vec<_> = seen
            .iter()
            .filter_map(|e| match e {
                SessionEvent::PeerSilenceEscalated(stage) => Some(*stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                SilenceStage::FirstWarning,
                SilenceStage::SecondWarning,
                SilenceStage::Clear,
                SilenceStage::TimedOut,
                SilenceStage::Clear,
            ]
        );
        assert!(seen.iter().any(|e| matches!(
            e,
            SessionEvent::MatchEnded(report) if report.outcome == LocalOutcome::Disconnected
        )));
        assert_eq!(h.gameplay.stops(), 1);
        assert!(!h.transport.is_running());
    }

    #[test]
    fn test_peer_left_during_match_ends_it() {
        let mut h = Harness::host(vec![PeerId::HOST, PeerId(1)]);
        let mut hb = active_host(&mut h);
        h.transport.set_peers(vec![PeerId::HOST]);
        hb.on_peer_disconnected(&mut h.ctx, PeerId(1));
        assert_eq!(hb.phase(), MatchPhase::Ended);
        assert!(h.ctx.result_shown());
    }

    #[test]
    fn test_peer_left_after_game_over_is_ignored() {
        let mut h = Harness::host(vec![PeerId::HOST, PeerId(1)]);
        let mut hb = active_host(&mut h);
        hb.notify_game_over(&mut h.ctx);
        hb.on_peer_disconnected(&mut h.ctx, PeerId(1));
        assert_eq!(hb.phase(), MatchPhase::Terminating);
        assert!(!h.ctx.result_shown());

        // No silence checks once over.
        hb.tick(&mut h.ctx, h.t0 + secs(60));
        assert!(!h.ctx.result_shown());
    }

    #[test]
    fn test_intentional_disconnect_suppresses_loss() {
        let mut h = Harness::host(vec![PeerId::HOST, PeerId(1)]);
        let mut hb = active_host(&mut h);
        hb.notify_intentional_disconnect();
        hb.tick(&mut h.ctx, h.t0 + secs(30));
        hb.on_peer_disconnected(&mut h.ctx, PeerId(1));
        assert!(!h.ctx.result_shown());
    }

    #[test]
    fn test_remote_state_and_attack_markers() {
        let mut h = Harness::host(vec![PeerId::HOST, PeerId(1)]);
        let mut events = h.ctx.subscribe();
        let mut hb = active_host(&mut h);
        for _ in 0..3 {
            hb.record_attack_sent();
        }

        hb.on_remote_state(
            &mut h.ctx,
            PeriodicState { score: 1200, current_hp: 30, max_hp: 60, defeated_count: 1 },
            h.t0 + secs(1),
        );
        assert_eq!(hb.pending_attack_markers(), 2);

        let update = drain(&mut events).into_iter().find_map(|e| match e {
            SessionEvent::RemoteStateUpdated { hp_fraction, pending_attack_markers, .. } => {
                Some((hp_fraction, pending_attack_markers))
            }
            _ => None,
        });
        assert_eq!(update, Some((Some(0.5), 2)));

        // Opponent defeated more than we sent: clamp at zero.
        hb.on_remote_state(
            &mut h.ctx,
            PeriodicState { defeated_count: 9, ..Default::default() },
            h.t0 + secs(2),
        );
        assert_eq!(hb.pending_attack_markers(), 0);
    }

    #[test]
    fn test_heartbeat_cadence() {
        let mut h = Harness::client(PeerId(1));
        let mut hb = SessionHeartbeat::new(Role::Client, h.ctx.config());
        hb.begin(&mut h.ctx, h.t0);
        hb.set_score(4200);

        for ms in (100..=3000).step_by(100) {
            hb.tick(&mut h.ctx, h.t0 + Duration::from_millis(ms));
        }
        let beats: Vec<_> = h
            .transport
            .sent()
            .into_iter()
            .filter(|(_, m)| m.is_heartbeat())
            .collect();
        assert_eq!(beats.len(), 3);
        assert!(matches!(
            beats[0],
            (Target::Host, PeerMessage::ReportPeriodicState(PeriodicState { score: 4200, .. }))
        ));
    }

    #[test]
    fn test_special_attack_routing() {
        let mut h = Harness::host(vec![PeerId::HOST, PeerId(1)]);
        let mut hb = active_host(&mut h);
        hb.set_health(25, 100);

        // Not armed yet.
        assert!(!hb.use_special_attack(&mut h.ctx));
        hb.arm_special_attack(&mut h.ctx);
        assert!(hb.use_special_attack(&mut h.ctx));
        assert!(!hb.special_attack_armed());
        assert!(h
            .transport
            .sent()
            .contains(&(Target::Peer(PeerId(1)), PeerMessage::PushSpecialAttackEffect { damage: 10 })));

        // Client's attack lands on the host, clamped at zero.
        hb.on_request_special_attack(&mut h.ctx, PeerId(1));
        hb.on_request_special_attack(&mut h.ctx, PeerId(1));
        hb.on_request_special_attack(&mut h.ctx, PeerId(1));
        assert_eq!(hb.local_stats().current_hp, 0);
        assert_eq!(h.gameplay.damage_taken(), 30);
    }

    #[test]
    fn test_local_run_never_times_out() {
        let mut h = Harness::single_player();
        let mut hb = SessionHeartbeat::new(Role::Host, h.ctx.config());
        hb.begin_local(&mut h.ctx, h.t0);
        assert_eq!(hb.phase(), MatchPhase::Active);
        hb.tick(&mut h.ctx, h.t0 + secs(120));
        assert_eq!(hb.phase(), MatchPhase::Active);
        assert!(!h.ctx.result_shown());
    }

    #[test]
    fn test_reset_returns_to_lobby() {
        let mut h = Harness::host(vec![PeerId::HOST, PeerId(1)]);
        let mut hb = active_host(&mut h);
        hb.record_attack_sent();
        hb.reset(&mut h.ctx);
        assert_eq!(hb.phase(), MatchPhase::Lobby);
        assert!(!hb.start_signal());
        assert_eq!(hb.local_stats().sent_attack_enemies, 0);
        assert!(!h.transport.is_running());
    }

    proptest! {
        #[test]
        fn prop_start_iff_two_connected_and_ready(
            connected in prop::collection::btree_set(0u64..3, 1..=3),
            signals in prop::collection::vec((0u64..3, any::<bool>()), 0..12),
        ) {
            let connected: Vec<PeerId> = connected.into_iter().map(PeerId).collect();
            let mut h = Harness::host(connected.clone());
            let mut hb = SessionHeartbeat::new(Role::Host, h.ctx.config());
            hb.begin(&mut h.ctx, h.t0);

            let mut last = BTreeMap::new();
            for (peer, ready) in &signals {
                hb.on_set_ready(&mut h.ctx, PeerId(*peer), *ready);
                last.insert(PeerId(*peer), *ready);
            }

            let expected = connected.len() == 2
                && connected.iter().all(|p| last.get(p).copied().unwrap_or(false));
            prop_assert_eq!(hb.request_start(&mut h.ctx), expected);
            prop_assert_eq!(hb.start_signal(), expected);
        }

        #[test]
        fn prop_twenty_seconds_of_silence_always_disconnects(
            mut beats in prop::collection::vec(0u64..60_000, 0..20),
        ) {
            beats.sort();
            let mut h = Harness::host(vec![PeerId::HOST, PeerId(1)]);
            let mut hb = active_host(&mut h);

            for ms in &beats {
                let at = h.t0 + Duration::from_millis(*ms);
                hb.on_remote_state(&mut h.ctx, PeriodicState::default(), at);
                hb.tick(&mut h.ctx, at);
            }
            let last = beats.last().copied().unwrap_or(0);
            let quiet_until = h.t0 + Duration::from_millis(last);

            hb.tick(&mut h.ctx, quiet_until + Duration::from_millis(19_900));
            prop_assert_ne!(hb.phase(), MatchPhase::Ended);

            hb.tick(&mut h.ctx, quiet_until + secs(20));
            prop_assert_eq!(hb.phase(), MatchPhase::Ended);
            prop_assert!(h.ctx.result_shown());
        }
    }
}
