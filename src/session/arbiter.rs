//! Game Over Arbiter
//!
//! Decides when a match is over and who won. The host owns the is-over flag:
//! the first report flips it, final scores are collected from every connected
//! peer (bounded by a deadline), and the decided outcome is broadcast.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::config::SessionConfig;
use crate::core::periodic::{Cadence, Deadline};
use crate::core::replicated::{Authority, Replicated};
use crate::network::protocol::{
    FinalOutcome, GameOverReason, MatchResult, PeerId, PeerMessage, Role, Target,
};
use crate::session::context::SessionContext;
use crate::session::events::{LocalOutcome, MatchReport, Rank, SessionEvent};
use crate::session::heartbeat::SessionHeartbeat;

/// Decide a two-player result.
///
/// The health loser loses outright. Otherwise the higher score wins and equal
/// scores draw. A side that never reported its score loses by default; with
/// no scores at all the result is [`MatchResult::Unresolved`].
pub fn decide_outcome(
    health_loser: Option<Role>,
    host_score: Option<i32>,
    client_score: Option<i32>,
) -> MatchResult {
    match health_loser {
        Some(Role::Host) => return MatchResult::ClientWins,
        Some(Role::Client) => return MatchResult::HostWins,
        None => {}
    }

    match (host_score, client_score) {
        (Some(host), Some(client)) if host > client => MatchResult::HostWins,
        (Some(host), Some(client)) if host < client => MatchResult::ClientWins,
        (Some(_), Some(_)) => MatchResult::Draw,
        (Some(_), None) => MatchResult::HostWins,
        (None, Some(_)) => MatchResult::ClientWins,
        (None, None) => MatchResult::Unresolved,
    }
}

/// Counters for grading a single-player run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinglePlayerTally {
    /// Correct answers given.
    pub correct_answers: u32,
    /// Answers given.
    pub total_answers: u32,
    /// Enemies defeated.
    pub defeated_enemies: u32,
    /// Enemies spawned in the run.
    pub total_enemies: u32,
}

/// Grade a finished single-player run.
pub fn grade_single_player(reason: GameOverReason, tally: &SinglePlayerTally) -> Rank {
    let cleared = tally.defeated_enemies >= tally.total_enemies;
    if reason == GameOverReason::HealthDepleted || !cleared {
        return Rank::C;
    }

    if tally.total_answers == 0 {
        return Rank::B;
    }
    let accuracy = tally.correct_answers as f64 / tally.total_answers as f64;
    if accuracy >= 1.0 {
        Rank::S
    } else if accuracy >= 0.8 {
        Rank::A
    } else {
        Rank::B
    }
}

#[derive(Debug)]
struct ScoreCollection {
    scores: BTreeMap<PeerId, i32>,
    deadline: Deadline,
}

/// Game-over reporting, score collection and outcome delivery.
#[derive(Debug)]
pub struct GameOverArbiter {
    role: Role,
    is_over: Replicated<bool>,
    reported: Option<GameOverReason>,
    announce: Cadence,
    health_loser: Option<Role>,
    collection: Option<ScoreCollection>,
    outcome_deadline: Deadline,
    outcome_wait: Duration,
    score_reported: bool,
    tally: SinglePlayerTally,
}

impl GameOverArbiter {
    /// Create for `role`.
    pub fn new(role: Role, config: &SessionConfig) -> Self {
        let authority = if role.is_host() { Authority::Owner } else { Authority::Mirror };
        Self {
            role,
            is_over: Replicated::with_authority(authority, false),
            reported: None,
            announce: Cadence::new(config.announce_interval),
            health_loser: None,
            collection: None,
            outcome_deadline: Deadline::new(),
            outcome_wait: config.score_collection_timeout + config.disconnect_timeout,
            score_reported: false,
            tally: SinglePlayerTally::default(),
        }
    }

    /// Whether the authoritative flag is raised.
    pub fn is_over(&self) -> bool {
        *self.is_over.get()
    }

    /// Whether the host is collecting final scores.
    pub fn is_collecting(&self) -> bool {
        self.collection.is_some()
    }

    /// Replace the single-player tally.
    pub fn set_tally(&mut self, tally: SinglePlayerTally) {
        self.tally = tally;
    }

    /// Local trigger: score quota reached or health depleted.
    pub fn report_game_over(
        &mut self,
        ctx: &mut SessionContext,
        heartbeat: &mut SessionHeartbeat,
        reason: GameOverReason,
        now: Instant,
    ) {
        if self.reported.is_some() || self.is_over() {
            debug!("Game over already reported; ignoring {:?}", reason);
            return;
        }
        self.reported = Some(reason);
        info!("Game over: {:?}", reason);

        let my_score = heartbeat.local_stats().score;

        if ctx.is_single_player() {
            let _ = self.is_over.set(true);
            heartbeat.notify_game_over(ctx);
            ctx.stop_gameplay();
            let rank = grade_single_player(reason, &self.tally);
            ctx.finish(MatchReport {
                outcome: LocalOutcome::SinglePlayer { rank },
                my_score,
                opponent_score: 0,
            });
            heartbeat.mark_ended();
            return;
        }

        if !ctx.transport_running() {
            warn!("Game over with no transport; ending as disconnected");
            heartbeat.notify_game_over(ctx);
            ctx.stop_gameplay();
            ctx.finish(MatchReport::disconnected(my_score));
            heartbeat.mark_ended();
            return;
        }

        ctx.gameplay().disable_input();
        match self.role {
            Role::Host => self.on_report_game_over(ctx, heartbeat, PeerId::HOST, reason, now),
            Role::Client => {
                ctx.send(Target::Host, PeerMessage::ReportGameOver { reason });
                self.announce.start(now);
            }
        }
    }

    /// Host: a game-over report arrived (or the host's own).
    pub fn on_report_game_over(
        &mut self,
        ctx: &mut SessionContext,
        heartbeat: &mut SessionHeartbeat,
        from: PeerId,
        reason: GameOverReason,
        now: Instant,
    ) {
        if !self.role.is_host() {
            return;
        }
        if self.is_over() {
            debug!("Duplicate game-over report from {}", from);
            return;
        }

        if reason == GameOverReason::HealthDepleted {
            self.health_loser = Some(if from.is_host() { Role::Host } else { Role::Client });
        }

        if let Ok(Some(_)) = self.is_over.set(true) {
            info!("{} reported game over ({:?}); collecting scores", from, reason);
            ctx.send(Target::Clients, PeerMessage::PushGameOverFlag);
            self.on_flag_raised(ctx, heartbeat);
            ctx.send(Target::Clients, PeerMessage::RequestFinalScore);

            let mut scores = BTreeMap::new();
            scores.insert(PeerId::HOST, heartbeat.local_stats().score);
            let mut deadline = Deadline::new();
            deadline.arm(now, ctx.config().score_collection_timeout);
            self.collection = Some(ScoreCollection { scores, deadline });
            self.try_arbitrate(ctx, heartbeat);
        }
    }

    /// Client: the host raised the flag.
    ///
    /// Arms a deadline that outlasts the host's score collection; if no
    /// outcome arrives by then the match ends as disconnected.
    pub fn on_push_game_over_flag(
        &mut self,
        ctx: &mut SessionContext,
        heartbeat: &mut SessionHeartbeat,
        now: Instant,
    ) {
        if let Ok(Some(_)) = self.is_over.apply_remote(true) {
            self.on_flag_raised(ctx, heartbeat);
            self.outcome_deadline.arm(now, self.outcome_wait);
        }
    }

    /// Client: the host asked for our final score.
    pub fn on_request_final_score(&mut self, ctx: &mut SessionContext, heartbeat: &SessionHeartbeat) {
        if self.score_reported {
            debug!("Final score already reported");
            return;
        }
        self.score_reported = true;
        let score = heartbeat.local_stats().score;
        info!("Reporting final score {}", score);
        ctx.send(
            Target::Host,
            PeerMessage::ReportFinalScore { peer: ctx.local_peer(), score },
        );
    }

    /// Host: a final score arrived. Only the first per peer counts.
    pub fn on_report_final_score(
        &mut self,
        ctx: &mut SessionContext,
        heartbeat: &mut SessionHeartbeat,
        from: PeerId,
        peer: PeerId,
        score: i32,
    ) {
        let Some(collection) = self.collection.as_mut() else {
            debug!("Score from {} outside collection; ignoring", from);
            return;
        };
        if peer != from {
            warn!("{} reported a score on behalf of {}", from, peer);
        }
        collection.scores.entry(from).or_insert(score);
        self.try_arbitrate(ctx, heartbeat);
    }

    /// A peer left.
    pub fn on_peer_disconnected(
        &mut self,
        ctx: &mut SessionContext,
        heartbeat: &mut SessionHeartbeat,
        peer: PeerId,
    ) {
        match self.role {
            Role::Host => self.try_arbitrate(ctx, heartbeat),
            Role::Client if peer.is_host() && self.is_over() && !ctx.result_shown() => {
                warn!("Host left before delivering the outcome");
                ctx.stop_gameplay();
                ctx.finish(MatchReport::disconnected(heartbeat.local_stats().score));
                heartbeat.mark_ended();
            }
            Role::Client => {}
        }
    }

    /// Client: the host decided.
    pub fn on_push_final_outcome(
        &mut self,
        ctx: &mut SessionContext,
        heartbeat: &mut SessionHeartbeat,
        outcome: FinalOutcome,
    ) {
        self.apply_final_outcome(ctx, heartbeat, outcome);
    }

    /// Drive the announcement and the collection deadline.
    pub fn tick(&mut self, ctx: &mut SessionContext, heartbeat: &mut SessionHeartbeat, now: Instant) {
        if self.announce.poll(now) {
            match self.reported {
                Some(_) if self.is_over() || ctx.result_shown() => self.announce.cancel(),
                Some(reason) => {
                    debug!("Re-announcing game over");
                    ctx.send(Target::Host, PeerMessage::ReportGameOver { reason });
                }
                None => self.announce.cancel(),
            }
        }

        let expired = self
            .collection
            .as_mut()
            .is_some_and(|collection| collection.deadline.fired(now));
        if expired {
            warn!("Score collection timed out; deciding with what arrived");
            self.arbitrate(ctx, heartbeat);
        }

        if self.outcome_deadline.fired(now) && !ctx.result_shown() {
            warn!("No outcome from host after {:?}; ending as disconnected", self.outcome_wait);
            ctx.stop_gameplay();
            ctx.finish(MatchReport::disconnected(heartbeat.local_stats().score));
            heartbeat.mark_ended();
        }
    }

    /// Clear all per-match state.
    pub fn reset(&mut self) {
        self.is_over.reset(false);
        self.reported = None;
        self.announce.cancel();
        self.health_loser = None;
        self.collection = None;
        self.outcome_deadline.cancel();
        self.score_reported = false;
        self.tally = SinglePlayerTally::default();
    }

    fn on_flag_raised(&mut self, ctx: &mut SessionContext, heartbeat: &mut SessionHeartbeat) {
        self.announce.cancel();
        heartbeat.notify_game_over(ctx);
        ctx.stop_gameplay();
        ctx.emit(SessionEvent::GameOverFlagRaised);
    }

    fn try_arbitrate(&mut self, ctx: &mut SessionContext, heartbeat: &mut SessionHeartbeat) {
        let complete = self.collection.as_ref().is_some_and(|collection| {
            ctx.connected_peers()
                .iter()
                .all(|peer| collection.scores.contains_key(peer))
        });
        if complete {
            self.arbitrate(ctx, heartbeat);
        }
    }

    fn arbitrate(&mut self, ctx: &mut SessionContext, heartbeat: &mut SessionHeartbeat) {
        let Some(collection) = self.collection.take() else {
            return;
        };

        let host_score = collection.scores.get(&PeerId::HOST).copied();
        let client_score = collection
            .scores
            .iter()
            .find(|(peer, _)| !peer.is_host())
            .map(|(_, score)| *score);
        let result = decide_outcome(self.health_loser, host_score, client_score);
        let outcome = FinalOutcome {
            result,
            host_score: host_score.unwrap_or(0),
            client_score: client_score.unwrap_or(0),
        };

        info!(
            "Outcome decided: {:?} ({} vs {})",
            result, outcome.host_score, outcome.client_score
        );
        ctx.send(Target::Clients, PeerMessage::PushFinalOutcome(outcome));
        self.apply_final_outcome(ctx, heartbeat, outcome);
    }

    fn apply_final_outcome(
        &mut self,
        ctx: &mut SessionContext,
        heartbeat: &mut SessionHeartbeat,
        outcome: FinalOutcome,
    ) {
        self.announce.cancel();
        self.outcome_deadline.cancel();
        ctx.stop_gameplay();
        ctx.finish(MatchReport::from_final(&outcome, self.role));
        heartbeat.mark_ended();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::heartbeat::MatchPhase;
    use crate::session::testing::{drain, Harness};

    fn ended(events: &[SessionEvent]) -> Vec<MatchReport> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::MatchEnded(report) => Some(*report),
                _ => None,
            })
            .collect()
    }

    fn outcomes_sent(h: &Harness) -> Vec<FinalOutcome> {
        h.transport
            .sent()
            .into_iter()
            .filter_map(|(_, m)| match m {
                PeerMessage::PushFinalOutcome(outcome) => Some(outcome),
                _ => None,
            })
            .collect()
    }

    fn host_pair() -> (Harness, SessionHeartbeat, GameOverArbiter) {
        let h = Harness::host(vec![PeerId::HOST, PeerId(1)]);
        let hb = SessionHeartbeat::new(Role::Host, h.ctx.config());
        let arbiter = GameOverArbiter::new(Role::Host, h.ctx.config());
        (h, hb, arbiter)
    }

    #[test]
    fn test_decide_outcome() {
        assert_eq!(
            decide_outcome(Some(Role::Client), Some(5000), Some(7000)),
            MatchResult::HostWins
        );
        assert_eq!(decide_outcome(None, Some(8000), Some(8000)), MatchResult::Draw);
        assert_eq!(decide_outcome(None, Some(100), None), MatchResult::HostWins);
        assert_eq!(decide_outcome(None, None, Some(100)), MatchResult::ClientWins);
        assert_eq!(decide_outcome(None, None, None), MatchResult::Unresolved);
        assert_eq!(decide_outcome(None, Some(1), Some(2)), MatchResult::ClientWins);
    }

    #[test]
    fn test_health_loser_always_loses() {
        for host in [None, Some(0), Some(i32::MAX)] {
            for client in [None, Some(0), Some(i32::MAX)] {
                assert_eq!(decide_outcome(Some(Role::Host), host, client), MatchResult::ClientWins);
                assert_eq!(decide_outcome(Some(Role::Client), host, client), MatchResult::HostWins);
            }
        }
    }

    #[test]
    fn test_single_player_grades() {
        let perfect = SinglePlayerTally {
            correct_answers: 20,
            total_answers: 20,
            defeated_enemies: 20,
            total_enemies: 20,
        };
        assert_eq!(grade_single_player(GameOverReason::ScoreQuota, &perfect), Rank::S);
        assert_eq!(grade_single_player(GameOverReason::HealthDepleted, &perfect), Rank::C);

        let good = SinglePlayerTally { correct_answers: 16, ..perfect };
        assert_eq!(grade_single_player(GameOverReason::ScoreQuota, &good), Rank::A);

        let sloppy = SinglePlayerTally { correct_answers: 10, ..perfect };
        assert_eq!(grade_single_player(GameOverReason::ScoreQuota, &sloppy), Rank::B);

        let unfinished = SinglePlayerTally { defeated_enemies: 19, ..perfect };
        assert_eq!(grade_single_player(GameOverReason::ScoreQuota, &unfinished), Rank::C);
    }

    #[test]
    fn test_single_player_run_ends_locally() {
        let mut h = Harness::single_player();
        let mut events = h.ctx.subscribe();
        let mut hb = SessionHeartbeat::new(Role::Host, h.ctx.config());
        let mut arbiter = GameOverArbiter::new(Role::Host, h.ctx.config());
        hb.set_score(3100);
        arbiter.set_tally(SinglePlayerTally {
            correct_answers: 5,
            total_answers: 5,
            defeated_enemies: 5,
            total_enemies: 5,
        });

        arbiter.report_game_over(&mut h.ctx, &mut hb, GameOverReason::ScoreQuota, h.t0);
        arbiter.report_game_over(&mut h.ctx, &mut hb, GameOverReason::HealthDepleted, h.t0);

        let reports = ended(&drain(&mut events));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, LocalOutcome::SinglePlayer { rank: Rank::S });
        assert_eq!(reports[0].my_score, 3100);
        assert_eq!(h.gameplay.stops(), 1);
        assert!(h.transport.sent().is_empty());
    }

    #[test]
    fn test_no_transport_ends_disconnected() {
        let (mut h, mut hb, mut arbiter) = host_pair();
        let mut events = h.ctx.subscribe();
        h.ctx.shutdown_transport();
        arbiter.report_game_over(&mut h.ctx, &mut hb, GameOverReason::ScoreQuota, h.t0);
        let reports = ended(&drain(&mut events));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, LocalOutcome::Disconnected);
    }

    #[test]
    fn test_host_collects_and_decides() {
        let (mut h, mut hb, mut arbiter) = host_pair();
        let mut events = h.ctx.subscribe();
        hb.set_score(5000);

        // Client hit zero health.
        arbiter.on_report_game_over(&mut h.ctx, &mut hb, PeerId(1), GameOverReason::HealthDepleted, h.t0);
        assert!(arbiter.is_over());
        assert!(arbiter.is_collecting());
        assert_eq!(hb.phase(), MatchPhase::Terminating);
        let sent: Vec<_> = h.transport.sent().into_iter().map(|(_, m)| m).collect();
        assert_eq!(sent, vec![PeerMessage::PushGameOverFlag, PeerMessage::RequestFinalScore]);

        arbiter.on_report_final_score(&mut h.ctx, &mut hb, PeerId(1), PeerId(1), 7000);
        assert!(!arbiter.is_collecting());
        assert_eq!(
            outcomes_sent(&h),
            vec![FinalOutcome { result: MatchResult::HostWins, host_score: 5000, client_score: 7000 }]
        );

        let reports = ended(&drain(&mut events));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, LocalOutcome::Win);
        assert_eq!(hb.phase(), MatchPhase::Ended);
    }

    #[test]
    fn test_repeated_reports_flip_once() {
        let (mut h, mut hb, mut arbiter) = host_pair();
        let mut events = h.ctx.subscribe();

        arbiter.report_game_over(&mut h.ctx, &mut hb, GameOverReason::ScoreQuota, h.t0);
        for _ in 0..3 {
            arbiter.on_report_game_over(&mut h.ctx, &mut hb, PeerId(1), GameOverReason::ScoreQuota, h.t0);
        }
        arbiter.on_report_final_score(&mut h.ctx, &mut hb, PeerId(1), PeerId(1), 10);
        arbiter.on_report_final_score(&mut h.ctx, &mut hb, PeerId(1), PeerId(1), 99);

        let flags = h
            .transport
            .sent()
            .into_iter()
            .filter(|(_, m)| *m == PeerMessage::PushGameOverFlag)
            .count();
        assert_eq!(flags, 1);
        assert_eq!(outcomes_sent(&h).len(), 1);
        assert_eq!(
            drain(&mut events)
                .into_iter()
                .filter(|e| *e == SessionEvent::GameOverFlagRaised)
                .count(),
            1
        );
        assert_eq!(h.gameplay.input_disabled(), 1);
    }

    #[test]
    fn test_first_score_per_peer_wins() {
        let (mut h, mut hb, mut arbiter) = host_pair();
        h.transport.set_peers(vec![PeerId::HOST, PeerId(1), PeerId(2)]);
        hb.set_score(8000);
        arbiter.report_game_over(&mut h.ctx, &mut hb, GameOverReason::ScoreQuota, h.t0);

        arbiter.on_report_final_score(&mut h.ctx, &mut hb, PeerId(1), PeerId(1), 8000);
        arbiter.on_report_final_score(&mut h.ctx, &mut hb, PeerId(1), PeerId(1), 9000);
        assert!(arbiter.is_collecting());

        // Remaining peer leaves: everyone still connected has answered.
        h.transport.set_peers(vec![PeerId::HOST, PeerId(1)]);
        arbiter.on_peer_disconnected(&mut h.ctx, &mut hb, PeerId(2));
        assert_eq!(
            outcomes_sent(&h),
            vec![FinalOutcome { result: MatchResult::Draw, host_score: 8000, client_score: 8000 }]
        );
    }

    #[test]
    fn test_collection_deadline() {
        let (mut h, mut hb, mut arbiter) = host_pair();
        hb.set_score(1234);
        arbiter.report_game_over(&mut h.ctx, &mut hb, GameOverReason::ScoreQuota, h.t0);

        arbiter.tick(&mut h.ctx, &mut hb, h.t0 + Duration::from_secs(19));
        assert!(outcomes_sent(&h).is_empty());

        arbiter.tick(&mut h.ctx, &mut hb, h.t0 + Duration::from_secs(20));
        assert_eq!(
            outcomes_sent(&h),
            vec![FinalOutcome { result: MatchResult::HostWins, host_score: 1234, client_score: 0 }]
        );
    }

    #[test]
    fn test_client_announces_until_flag() {
        let mut h = Harness::client(PeerId(1));
        let mut hb = SessionHeartbeat::new(Role::Client, h.ctx.config());
        let mut arbiter = GameOverArbiter::new(Role::Client, h.ctx.config());

        arbiter.report_game_over(&mut h.ctx, &mut hb, GameOverReason::ScoreQuota, h.t0);
        for s in 1..=3 {
            arbiter.tick(&mut h.ctx, &mut hb, h.t0 + Duration::from_secs(s));
        }
        let announcements = |h: &Harness| {
            h.transport
                .sent()
                .into_iter()
                .filter(|(_, m)| matches!(m, PeerMessage::ReportGameOver { .. }))
                .count()
        };
        assert_eq!(announcements(&h), 4);

        arbiter.on_push_game_over_flag(&mut h.ctx, &mut hb, h.t0 + Duration::from_secs(3));
        arbiter.tick(&mut h.ctx, &mut hb, h.t0 + Duration::from_secs(4));
        assert_eq!(announcements(&h), 4);
        assert_eq!(h.gameplay.stops(), 1);
    }

    #[test]
    fn test_client_answers_once_and_applies_outcome() {
        let mut h = Harness::client(PeerId(1));
        let mut events = h.ctx.subscribe();
        let mut hb = SessionHeartbeat::new(Role::Client, h.ctx.config());
        let mut arbiter = GameOverArbiter::new(Role::Client, h.ctx.config());
        hb.set_score(7000);

        arbiter.on_push_game_over_flag(&mut h.ctx, &mut hb, h.t0);
        arbiter.on_request_final_score(&mut h.ctx, &hb);
        arbiter.on_request_final_score(&mut h.ctx, &hb);
        assert_eq!(
            h.transport.sent(),
            vec![(Target::Host, PeerMessage::ReportFinalScore { peer: PeerId(1), score: 7000 })]
        );

        let outcome = FinalOutcome { result: MatchResult::HostWins, host_score: 5000, client_score: 7000 };
        arbiter.on_push_final_outcome(&mut h.ctx, &mut hb, outcome);
        arbiter.on_push_final_outcome(&mut h.ctx, &mut hb, outcome);

        let reports = ended(&drain(&mut events));
        assert_eq!(
            reports,
            vec![MatchReport { outcome: LocalOutcome::Lose, my_score: 7000, opponent_score: 5000 }]
        );
    }

    #[test]
    fn test_client_host_gone_before_outcome() {
        let mut h = Harness::client(PeerId(1));
        let mut hb = SessionHeartbeat::new(Role::Client, h.ctx.config());
        let mut arbiter = GameOverArbiter::new(Role::Client, h.ctx.config());
        arbiter.on_push_game_over_flag(&mut h.ctx, &mut hb, h.t0);
        arbiter.on_peer_disconnected(&mut h.ctx, &mut hb, PeerId::HOST);
        assert!(h.ctx.result_shown());
        assert_eq!(hb.phase(), MatchPhase::Ended);
    }

    #[test]
    fn test_client_gives_up_on_silent_host() {
        let mut h = Harness::client(PeerId(1));
        let mut events = h.ctx.subscribe();
        let mut hb = SessionHeartbeat::new(Role::Client, h.ctx.config());
        let mut arbiter = GameOverArbiter::new(Role::Client, h.ctx.config());
        hb.set_score(4200);

        arbiter.on_push_game_over_flag(&mut h.ctx, &mut hb, h.t0);
        arbiter.on_request_final_score(&mut h.ctx, &hb);

        // Host never answers and the transport never reports it gone.
        for s in 1..40 {
            let now = h.t0 + Duration::from_secs(s);
            hb.tick(&mut h.ctx, now);
            arbiter.tick(&mut h.ctx, &mut hb, now);
        }
        assert!(!h.ctx.result_shown());

        let now = h.t0 + Duration::from_secs(40);
        hb.tick(&mut h.ctx, now);
        arbiter.tick(&mut h.ctx, &mut hb, now);
        assert_eq!(hb.phase(), MatchPhase::Ended);
        assert_eq!(
            ended(&drain(&mut events)),
            vec![MatchReport { outcome: LocalOutcome::Disconnected, my_score: 4200, opponent_score: 0 }]
        );

        arbiter.tick(&mut h.ctx, &mut hb, h.t0 + Duration::from_secs(300));
        assert!(ended(&drain(&mut events)).is_empty());
    }

    #[test]
    fn test_outcome_cancels_client_deadline() {
        let mut h = Harness::client(PeerId(1));
        let mut events = h.ctx.subscribe();
        let mut hb = SessionHeartbeat::new(Role::Client, h.ctx.config());
        let mut arbiter = GameOverArbiter::new(Role::Client, h.ctx.config());

        arbiter.on_push_game_over_flag(&mut h.ctx, &mut hb, h.t0);
        let outcome = FinalOutcome { result: MatchResult::ClientWins, host_score: 1, client_score: 2 };
        arbiter.on_push_final_outcome(&mut h.ctx, &mut hb, outcome);
        arbiter.tick(&mut h.ctx, &mut hb, h.t0 + Duration::from_secs(60));

        let reports = ended(&drain(&mut events));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, LocalOutcome::Win);
    }

    #[test]
    fn test_reset_clears_flag() {
        let (mut h, mut hb, mut arbiter) = host_pair();
        arbiter.report_game_over(&mut h.ctx, &mut hb, GameOverReason::ScoreQuota, h.t0);
        arbiter.reset();
        assert!(!arbiter.is_over());
        assert!(!arbiter.is_collecting());
    }
}
