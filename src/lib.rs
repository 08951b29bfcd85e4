//! # Duel Session
//!
//! Session coordination for two-player online duels: finding or creating a
//! session in a matchmaking directory, bringing both peers onto a relay
//! transport, keeping them in sync with heartbeats, and arbitrating the
//! outcome when the match ends.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DUEL SESSION                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Shared primitives                        │
//! │  ├── config.rs    - Timing and lobby configuration           │
//! │  ├── replicated.rs- Single-writer replicated values          │
//! │  └── periodic.rs  - Periodic tasks and tick-driven timers    │
//! │                                                              │
//! │  network/         - Peer transport                           │
//! │  ├── protocol.rs  - Peer message types                       │
//! │  ├── transport.rs - Relay transport seam                     │
//! │  └── local.rs     - In-process relay                         │
//! │                                                              │
//! │  lobby/           - Matchmaking directory                    │
//! │  ├── record.rs    - Session records and naming               │
//! │  ├── directory.rs - Directory seam and errors                │
//! │  ├── memory.rs    - In-memory directory                      │
//! │  └── coordinator.rs - Create / join / leave / poll           │
//! │                                                              │
//! │  session/         - Running match                            │
//! │  ├── heartbeat.rs - Ready check, liveness, replication       │
//! │  ├── arbiter.rs   - Game over and outcome decision           │
//! │  ├── driver.rs    - Task multiplexing ticks and events       │
//! │  └── mode.rs      - Play mode resolution                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! The host owns every piece of shared state (start flag, peer count,
//! is-over flag) and decides the outcome. Clients only report and mirror.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod lobby;
pub mod network;
pub mod session;

// Re-export commonly used types
pub use core::config::{LobbyConfig, SessionConfig};
pub use lobby::{InMemoryDirectory, LobbyCoordinator, LobbyEvent, MatchmakingDirectory, ModeTag, PlayerId};
pub use network::{LocalRelay, PeerMessage, Role, SessionTransport};
pub use session::{
    GameMode, LocalOutcome, MatchCommand, MatchDriver, MatchHandle, MatchReport, SessionContext,
    SessionEvent,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Players per session.
pub const PLAYERS_PER_SESSION: usize = 2;
