//! Protocol Messages
//!
//! Peer-to-peer messages exchanged over the relay once both players are
//! connected. The host is authoritative: clients report, the host pushes.
//! All messages are serialized as JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// IDENTITIES
// =============================================================================

/// Transport-level connection identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// The host's own connection.
    pub const HOST: PeerId = PeerId(0);

    /// Whether this is the host connection.
    pub fn is_host(&self) -> bool {
        *self == Self::HOST
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Role of the local peer in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Owns the session record and all shared state.
    Host,
    /// The joining peer.
    Client,
}

impl Role {
    /// Whether this is the host role.
    pub fn is_host(&self) -> bool {
        matches!(self, Role::Host)
    }
}

/// Addressing for an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The host (client side).
    Host,
    /// Every connected client (host side).
    Clients,
    /// A single connection (host side).
    Peer(PeerId),
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// Why a player's match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    /// Time or score quota reached.
    ScoreQuota,
    /// The reporting player's health hit zero.
    HealthDepleted,
}

/// Authoritative match result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    /// Equal scores.
    Draw,
    /// Host won.
    HostWins,
    /// Client won.
    ClientWins,
    /// Neither score arrived.
    Unresolved,
}

/// Periodic liveness + state sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeriodicState {
    /// Current score.
    pub score: i32,
    /// Current health.
    pub current_hp: i32,
    /// Maximum health.
    pub max_hp: i32,
    /// Attack enemies sent by the opponent that this player has defeated.
    pub defeated_count: u32,
}

/// Final decision broadcast by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalOutcome {
    /// Who won.
    pub result: MatchResult,
    /// Host's reported score (0 if missing).
    pub host_score: i32,
    /// Client's reported score (0 if missing).
    pub client_score: i32,
}

// =============================================================================
// PEER MESSAGES
// =============================================================================

/// Messages exchanged between the two peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    // ----- client -> host -----
    /// Ready-check signal.
    SetReady { ready: bool },

    /// Local game over, repeated until acknowledged by the over-flag.
    ReportGameOver { reason: GameOverReason },

    /// Answer to [`PeerMessage::RequestFinalScore`].
    ReportFinalScore { peer: PeerId, score: i32 },

    /// Client heartbeat.
    ReportPeriodicState(PeriodicState),

    /// Ask the host to deliver a special attack to the opponent.
    RequestSpecialAttack,

    // ----- host -> client -----
    /// Host heartbeat.
    PushPeriodicState(PeriodicState),

    /// Replicated connected-peer count.
    PushConnectedCount { count: usize },

    /// Replicated start flag flipped.
    PushStartSignal,

    /// Replicated over-flag flipped.
    PushGameOverFlag,

    /// Ask for the final score.
    RequestFinalScore,

    /// Arbitration result.
    PushFinalOutcome(FinalOutcome),

    /// Special attack landing on the receiver.
    PushSpecialAttackEffect { damage: i32 },
}

impl PeerMessage {
    /// Whether this message is addressed to the host.
    pub fn is_host_bound(&self) -> bool {
        matches!(
            self,
            PeerMessage::SetReady { .. }
                | PeerMessage::ReportGameOver { .. }
                | PeerMessage::ReportFinalScore { .. }
                | PeerMessage::ReportPeriodicState(_)
                | PeerMessage::RequestSpecialAttack
        )
    }

    /// Whether a peer in `role` should accept this message.
    pub fn accepted_by(&self, role: Role) -> bool {
        self.is_host_bound() == role.is_host()
    }

    /// Whether this is a heartbeat sample.
    pub fn is_heartbeat(&self) -> bool {
        matches!(
            self,
            PeerMessage::ReportPeriodicState(_) | PeerMessage::PushPeriodicState(_)
        )
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
