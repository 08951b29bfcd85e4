//! Session Configuration
//!
//! Timing constants for the match and lobby layers. Every value has a
//! production default and can be overridden from the environment
//! (`DUEL_*` variables, milliseconds unless stated otherwise).

use std::time::Duration;

/// Configuration for an in-match session (heartbeat, ready check, arbitration).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between outgoing heartbeats.
    pub heartbeat_interval: Duration,
    /// Delay between the transport coming up and the local ready signal.
    pub ready_settle_delay: Duration,
    /// Silence before the first warning stage.
    pub first_warning_after: Duration,
    /// Silence before the second warning stage.
    pub second_warning_after: Duration,
    /// Silence after which the remote peer is considered gone.
    pub disconnect_timeout: Duration,
    /// Interval between repeated game-over announcements to the host.
    pub announce_interval: Duration,
    /// Upper bound on waiting for final score reports.
    pub score_collection_timeout: Duration,
    /// Driver tick interval.
    pub tick_interval: Duration,
    /// Damage applied by a received special attack.
    pub special_attack_damage: i32,
    /// Host starts the match as soon as the ready check passes.
    pub auto_start: bool,
    /// Lobby reachability loss tolerated before warning.
    pub connectivity_warning_after: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            ready_settle_delay: Duration::from_secs(1),
            first_warning_after: Duration::from_secs(5),
            second_warning_after: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(20),
            announce_interval: Duration::from_secs(1),
            // Bounded by the same window that declares a silent peer gone.
            score_collection_timeout: Duration::from_secs(20),
            tick_interval: Duration::from_millis(100),
            special_attack_damage: 10,
            auto_start: true,
            connectivity_warning_after: Duration::from_secs(4),
        }
    }
}

impl SessionConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            heartbeat_interval: env_millis("DUEL_HEARTBEAT_INTERVAL_MS")
                .unwrap_or(defaults.heartbeat_interval),
            ready_settle_delay: env_millis("DUEL_READY_SETTLE_MS")
                .unwrap_or(defaults.ready_settle_delay),
            first_warning_after: env_millis("DUEL_FIRST_WARNING_MS")
                .unwrap_or(defaults.first_warning_after),
            second_warning_after: env_millis("DUEL_SECOND_WARNING_MS")
                .unwrap_or(defaults.second_warning_after),
            disconnect_timeout: env_millis("DUEL_DISCONNECT_TIMEOUT_MS")
                .unwrap_or(defaults.disconnect_timeout),
            announce_interval: env_millis("DUEL_ANNOUNCE_INTERVAL_MS")
                .unwrap_or(defaults.announce_interval),
            score_collection_timeout: env_millis("DUEL_SCORE_COLLECTION_MS")
                .unwrap_or(defaults.score_collection_timeout),
            tick_interval: env_millis("DUEL_TICK_INTERVAL_MS")
                .unwrap_or(defaults.tick_interval),
            special_attack_damage: std::env::var("DUEL_SPECIAL_ATTACK_DAMAGE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.special_attack_damage),
            auto_start: std::env::var("DUEL_AUTO_START")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.auto_start),
            connectivity_warning_after: env_millis("DUEL_CONNECTIVITY_WARNING_MS")
                .unwrap_or(defaults.connectivity_warning_after),
        }
    }
}

/// Configuration for the lobby coordinator.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Players per session.
    pub capacity: usize,
    /// Interval between directory liveness pings (host only).
    pub directory_ping_interval: Duration,
    /// Interval between record polls (non-host only).
    pub poll_interval: Duration,
    /// Join attempts before giving up.
    pub join_attempts: u32,
    /// Fixed delay between join attempts.
    pub join_retry_delay: Duration,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            capacity: crate::PLAYERS_PER_SESSION,
            directory_ping_interval: Duration::from_secs(15),
            poll_interval: Duration::from_secs(2),
            join_attempts: 3,
            join_retry_delay: Duration::from_millis(2000),
        }
    }
}

impl LobbyConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            capacity: defaults.capacity,
            directory_ping_interval: env_millis("DUEL_DIRECTORY_PING_MS")
                .unwrap_or(defaults.directory_ping_interval),
            poll_interval: env_millis("DUEL_POLL_INTERVAL_MS")
                .unwrap_or(defaults.poll_interval),
            join_attempts: std::env::var("DUEL_JOIN_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.join_attempts),
            join_retry_delay: env_millis("DUEL_JOIN_RETRY_DELAY_MS")
                .unwrap_or(defaults.join_retry_delay),
        }
    }

    /// Transport connections to allocate for the host (everyone but the host).
    pub fn relay_connections(&self) -> usize {
        self.capacity.saturating_sub(1)
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
