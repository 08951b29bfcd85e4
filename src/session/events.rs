//! Session Events
//!
//! Notifications for the presentation layer. Nothing in the core waits on
//! them; they are fire-and-forget over a broadcast channel.

use crate::network::protocol::{FinalOutcome, MatchResult, PeriodicState, Role};

/// Escalation of remote-peer silence while a match is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SilenceStage {
    /// Heartbeats arriving normally.
    Clear,
    /// First warning threshold passed.
    FirstWarning,
    /// Second warning threshold passed.
    SecondWarning,
    /// Peer considered gone.
    TimedOut,
}

/// Single-player grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rank {
    /// Perfect accuracy.
    S,
    /// At least 80% accuracy.
    A,
    /// Cleared every enemy.
    B,
    /// Ran out of health or time.
    C,
}

/// How the match ended from the local player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOutcome {
    /// Local player won.
    Win,
    /// Local player lost.
    Lose,
    /// Scores tied.
    Draw,
    /// Connection lost or no result could be decided.
    Disconnected,
    /// Single-player run finished.
    SinglePlayer {
        /// Grade for the run.
        rank: Rank,
    },
}

/// Final result shown to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchReport {
    /// Outcome.
    pub outcome: LocalOutcome,
    /// Local score.
    pub my_score: i32,
    /// Opponent score (0 in single player).
    pub opponent_score: i32,
}

impl MatchReport {
    /// Map the host's decision to the local point of view.
    pub fn from_final(final_outcome: &FinalOutcome, role: Role) -> Self {
        let (my_score, opponent_score) = match role {
            Role::Host => (final_outcome.host_score, final_outcome.client_score),
            Role::Client => (final_outcome.client_score, final_outcome.host_score),
        };
        let outcome = match (final_outcome.result, role) {
            (MatchResult::Draw, _) => LocalOutcome::Draw,
            (MatchResult::HostWins, Role::Host) | (MatchResult::ClientWins, Role::Client) => LocalOutcome::Win,
            (MatchResult::HostWins, Role::Client) | (MatchResult::ClientWins, Role::Host) => LocalOutcome::Lose,
            (MatchResult::Unresolved, _) => LocalOutcome::Disconnected,
        };
        Self { outcome, my_score, opponent_score }
    }

    /// Report for a lost connection.
    pub fn disconnected(my_score: i32) -> Self {
        Self { outcome: LocalOutcome::Disconnected, my_score, opponent_score: 0 }
    }
}

/// Events emitted by the match layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Connected peer count changed.
    PeerCountChanged(usize),
    /// Host: both peers are connected and ready.
    ReadyCheckPassed,
    /// Start flag observed; verifying transport before play.
    StartSignalReceived,
    /// Gameplay began.
    MatchStarted,
    /// Latest state of the opponent.
    RemoteStateUpdated {
        /// Opponent sample.
        state: PeriodicState,
        /// Opponent health as a fraction of max, if max is known.
        hp_fraction: Option<f32>,
        /// Attack enemies sent by us and not yet defeated by the opponent.
        pending_attack_markers: u32,
    },
    /// Remote silence crossed a threshold (or cleared).
    PeerSilenceEscalated(SilenceStage),
    /// Special attack can be used.
    SpecialAttackArmed,
    /// Special attack sent to the opponent.
    SpecialAttackSent,
    /// Opponent's special attack landed.
    SpecialAttackReceived {
        /// Damage applied.
        damage: i32,
        /// Health after the hit.
        hp_after: i32,
    },
    /// The authoritative over-flag flipped.
    GameOverFlagRaised,
    /// Final result. Emitted at most once per match.
    MatchEnded(MatchReport),
    /// Client could not establish the transport at start; session left.
    TransportLost,
    /// Lobby reachability warning shown (`true`) or cleared (`false`).
    ConnectivityWarning(bool),
}
