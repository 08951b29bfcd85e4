//! Matchmaking Directory
//!
//! Port to the external registry where session records live. The directory
//! is shared infrastructure that can fail transiently at any call, so every
//! operation returns a [`DirectoryError`] the coordinator classifies.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::lobby::record::{DataEntry, ModeTag, PlayerId, SessionRecord};

/// Directory errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// Directory unreachable or failing.
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    /// Too many requests.
    #[error("Rate limited")]
    RateLimited,

    /// No such session.
    #[error("Session not found")]
    SessionNotFound,

    /// Player is not in the session.
    #[error("Player not found in session")]
    PlayerNotFound,

    /// No free slot.
    #[error("Session is full")]
    SessionFull,

    /// Session closed to joins.
    #[error("Session is locked")]
    SessionLocked,

    /// Caller may not modify the session.
    #[error("Only the host may modify the session")]
    NotHost,
}

impl DirectoryError {
    /// The session refused the join (capacity, lock or gone).
    pub fn is_join_rejection(&self) -> bool {
        matches!(
            self,
            DirectoryError::SessionFull
                | DirectoryError::SessionLocked
                | DirectoryError::SessionNotFound
        )
    }

    /// The remembered session or membership no longer exists.
    pub fn is_membership_lost(&self) -> bool {
        matches!(self, DirectoryError::SessionNotFound | DirectoryError::PlayerNotFound)
    }
}

/// Parameters for a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSessionRequest {
    /// Initial name.
    pub name: String,
    /// Maximum players.
    pub capacity: usize,
    /// Hidden from queries.
    pub is_private: bool,
    /// Owner, also the first player.
    pub host: PlayerId,
    /// Initial data bag.
    pub data: BTreeMap<String, DataEntry>,
}

/// Partial update of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    /// New name.
    pub name: Option<String>,
    /// New lock state.
    pub is_locked: Option<bool>,
    /// Entries to insert or replace.
    pub data: BTreeMap<String, DataEntry>,
}

/// Filter for listing sessions. Results are ordered by name ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionQuery {
    /// Minimum free slots.
    pub min_available_slots: usize,
    /// Include locked sessions.
    pub include_locked: bool,
    /// Required substring of the name.
    pub name_contains: Option<String>,
}

impl SessionQuery {
    /// Joinable public sessions of one mode.
    pub fn open_sessions(mode: &ModeTag) -> Self {
        Self {
            min_available_slots: 1,
            include_locked: false,
            name_contains: Some(mode.name_filter()),
        }
    }

    /// Whether `record` passes the filter.
    pub fn matches(&self, record: &SessionRecord) -> bool {
        !record.is_private
            && record.available_slots() >= self.min_available_slots
            && (self.include_locked || !record.is_locked)
            && self
                .name_contains
                .as_deref()
                .map_or(true, |needle| record.name.contains(needle))
    }
}

/// External session registry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatchmakingDirectory: Send + Sync {
    /// Create a session owned by `request.host`.
    async fn create_session(&self, request: CreateSessionRequest) -> Result<SessionRecord, DirectoryError>;

    /// Apply a partial update.
    async fn update_session(&self, id: &str, update: SessionUpdate) -> Result<SessionRecord, DirectoryError>;

    /// Fetch a session.
    async fn get_session(&self, id: &str) -> Result<SessionRecord, DirectoryError>;

    /// List sessions, ordered by name ascending.
    async fn query_sessions(&self, query: SessionQuery) -> Result<Vec<SessionRecord>, DirectoryError>;

    /// Join by directory id.
    async fn join_by_id(&self, id: &str, player: &PlayerId) -> Result<SessionRecord, DirectoryError>;

    /// Join by shareable code.
    async fn join_by_code(&self, code: &str, player: &PlayerId) -> Result<SessionRecord, DirectoryError>;

    /// Remove a player from a session.
    async fn remove_player(&self, id: &str, player: &PlayerId) -> Result<(), DirectoryError>;

    /// Delete a session.
    async fn delete_session(&self, id: &str) -> Result<(), DirectoryError>;

    /// Keep a session alive.
    async fn ping(&self, id: &str) -> Result<(), DirectoryError>;
}
