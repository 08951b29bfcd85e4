//! Match Layer
//!
//! Everything that runs once both peers share a transport: the ready check,
//! heartbeats, game-over arbitration and the task that drives them.

pub mod arbiter;
pub mod connectivity;
pub mod context;
pub mod driver;
pub mod events;
pub mod heartbeat;
pub mod mode;

#[cfg(test)]
pub(crate) mod testing;

pub use arbiter::{decide_outcome, grade_single_player, GameOverArbiter, SinglePlayerTally};
pub use connectivity::ConnectivityMonitor;
pub use context::{GameplayHooks, NoopGameplay, SessionContext};
pub use driver::{MatchCommand, MatchDriver, MatchHandle};
pub use events::{LocalOutcome, MatchReport, Rank, SessionEvent, SilenceStage};
pub use heartbeat::{silence_stage, LocalStats, MatchPhase, SessionHeartbeat};
pub use mode::{resolve_game_mode, GameMode, ModeSelector, PreferenceError, PreferenceStore, Preferences};
