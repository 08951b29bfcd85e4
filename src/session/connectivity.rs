//! Connectivity Monitor
//!
//! Lobby-time reachability watchdog. Shows a warning once the local network
//! has been unreachable for a while and clears it on recovery. Inactive in
//! single-player runs and while a match is being played.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::core::config::SessionConfig;
use crate::session::context::SessionContext;
use crate::session::events::SessionEvent;
use crate::session::heartbeat::MatchPhase;

/// Reachability watchdog.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    threshold: Duration,
    reachable: bool,
    unreachable_since: Option<Instant>,
    warning_shown: bool,
}

impl ConnectivityMonitor {
    /// Create with the configured threshold.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            threshold: config.connectivity_warning_after,
            reachable: true,
            unreachable_since: None,
            warning_shown: false,
        }
    }

    /// Whether the warning is currently shown.
    pub fn warning_shown(&self) -> bool {
        self.warning_shown
    }

    /// Record the latest reachability probe.
    pub fn set_reachable(&mut self, reachable: bool, now: Instant) {
        self.reachable = reachable;
        if reachable {
            self.unreachable_since = None;
        } else if self.unreachable_since.is_none() {
            self.unreachable_since = Some(now);
        }
    }

    /// Raise or clear the warning.
    pub fn tick(&mut self, ctx: &SessionContext, phase: MatchPhase, now: Instant) {
        if ctx.is_single_player() || phase == MatchPhase::Active {
            self.clear(ctx);
            return;
        }

        match self.unreachable_since {
            Some(since) if !self.reachable => {
                if !self.warning_shown && now.saturating_duration_since(since) >= self.threshold {
                    warn!("Network unreachable for {:?}", self.threshold);
                    self.warning_shown = true;
                    ctx.emit(SessionEvent::ConnectivityWarning(true));
                }
            }
            _ => {
                if self.warning_shown {
                    info!("Network reachable again");
                }
                self.clear(ctx);
            }
        }
    }

    /// Back to the lobby: forget everything.
    pub fn reset(&mut self, ctx: &SessionContext) {
        self.reachable = true;
        self.unreachable_since = None;
        self.clear(ctx);
    }

    fn clear(&mut self, ctx: &SessionContext) {
        if self.warning_shown {
            self.warning_shown = false;
            ctx.emit(SessionEvent::ConnectivityWarning(false));
        }
    }
}
