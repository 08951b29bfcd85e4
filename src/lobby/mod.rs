//! Lobby Layer
//!
//! Finding, creating and leaving sessions in the external matchmaking
//! directory, and handing the relay join code to the transport.

pub mod coordinator;
pub mod directory;
pub mod memory;
pub mod record;

pub use coordinator::{LeaveReason, LobbyCoordinator, LobbyError, LobbyEvent};
pub use directory::{
    CreateSessionRequest, DirectoryError, MatchmakingDirectory, SessionQuery, SessionUpdate,
};
pub use memory::{DirectoryOp, InMemoryDirectory};
pub use record::{DataEntry, ModeTag, PlayerId, SessionId, SessionRecord, Visibility};
