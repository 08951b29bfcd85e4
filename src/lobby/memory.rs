//! In-Memory Directory
//!
//! Process-local [`MatchmakingDirectory`] with scripted failures, used by
//! the demo binary and the tests. Records that miss liveness pings for
//! longer than the stale window drop out of queries, like the hosted
//! directory's inactive lobbies.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

use crate::lobby::directory::{
    CreateSessionRequest, DirectoryError, MatchmakingDirectory, SessionQuery, SessionUpdate,
};
use crate::lobby::record::{PlayerId, SessionId, SessionRecord};

/// Directory operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DirectoryOp {
    /// `create_session`
    Create,
    /// `update_session`
    Update,
    /// `get_session`
    Get,
    /// `query_sessions`
    Query,
    /// `join_by_id`
    JoinById,
    /// `join_by_code`
    JoinByCode,
    /// `remove_player`
    RemovePlayer,
    /// `delete_session`
    Delete,
    /// `ping`
    Ping,
}

struct DirectoryState {
    sessions: BTreeMap<SessionId, SessionRecord>,
    faults: BTreeMap<DirectoryOp, VecDeque<DirectoryError>>,
    calls: BTreeMap<DirectoryOp, u32>,
    stale_after: chrono::Duration,
}

/// Process-local directory.
pub struct InMemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    /// Create an empty directory with a 30 second stale window.
    pub fn new() -> Self {
        Self::with_stale_after(chrono::Duration::seconds(30))
    }

    /// Create with a custom stale window.
    pub fn with_stale_after(stale_after: chrono::Duration) -> Self {
        Self {
            state: Mutex::new(DirectoryState {
                sessions: BTreeMap::new(),
                faults: BTreeMap::new(),
                calls: BTreeMap::new(),
                stale_after,
            }),
        }
    }

    /// Fail the next calls to `op` with `errors`, in order.
    pub fn inject_failures(&self, op: DirectoryOp, errors: impl IntoIterator<Item = DirectoryError>) {
        self.state.lock().faults.entry(op).or_default().extend(errors);
    }

    /// Calls made to `op` so far, failed ones included.
    pub fn call_count(&self, op: DirectoryOp) -> u32 {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Snapshot of a stored record.
    pub fn session(&self, id: &str) -> Option<SessionRecord> {
        self.state.lock().sessions.get(id).cloned()
    }

    /// Stored record count.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    fn begin(state: &mut DirectoryState, op: DirectoryOp) -> Result<(), DirectoryError> {
        *state.calls.entry(op).or_insert(0) += 1;
        match state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => {
                debug!("Injected {:?} failure: {}", op, err);
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn admit(record: &mut SessionRecord, player: &PlayerId) -> Result<SessionRecord, DirectoryError> {
        if record.has_player(player) {
            return Ok(record.clone());
        }
        if record.is_locked {
            return Err(DirectoryError::SessionLocked);
        }
        if record.available_slots() == 0 {
            return Err(DirectoryError::SessionFull);
        }
        record.players.push(player.clone());
        record.last_updated = Utc::now();
        Ok(record.clone())
    }
}

#[async_trait]
impl MatchmakingDirectory for InMemoryDirectory {
    async fn create_session(&self, request: CreateSessionRequest) -> Result<SessionRecord, DirectoryError> {
        let mut state = self.state.lock();
        Self::begin(&mut state, DirectoryOp::Create)?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let join_code = request
            .is_private
            .then(|| uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase());
        let record = SessionRecord {
            id: id.clone(),
            name: request.name,
            host_id: request.host.clone(),
            capacity: request.capacity,
            players: vec![request.host],
            is_private: request.is_private,
            is_locked: false,
            join_code,
            data: request.data,
            last_updated: Utc::now(),
        };
        state.sessions.insert(id, record.clone());
        Ok(record)
    }

    async fn update_session(&self, id: &str, update: SessionUpdate) -> Result<SessionRecord, DirectoryError> {
        let mut state = self.state.lock();
        Self::begin(&mut state, DirectoryOp::Update)?;

        let record = state.sessions.get_mut(id).ok_or(DirectoryError::SessionNotFound)?;
        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(locked) = update.is_locked {
            record.is_locked = locked;
        }
        record.data.extend(update.data);
        record.last_updated = Utc::now();
        Ok(record.clone())
    }

    async fn get_session(&self, id: &str) -> Result<SessionRecord, DirectoryError> {
        let mut state = self.state.lock();
        Self::begin(&mut state, DirectoryOp::Get)?;
        state.sessions.get(id).cloned().ok_or(DirectoryError::SessionNotFound)
    }

    async fn query_sessions(&self, query: SessionQuery) -> Result<Vec<SessionRecord>, DirectoryError> {
        let mut state = self.state.lock();
        Self::begin(&mut state, DirectoryOp::Query)?;

        let oldest = Utc::now() - state.stale_after;
        let mut found: Vec<SessionRecord> = state
            .sessions
            .values()
            .filter(|r| r.last_updated >= oldest && query.matches(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn join_by_id(&self, id: &str, player: &PlayerId) -> Result<SessionRecord, DirectoryError> {
        let mut state = self.state.lock();
        Self::begin(&mut state, DirectoryOp::JoinById)?;
        let record = state.sessions.get_mut(id).ok_or(DirectoryError::SessionNotFound)?;
        Self::admit(record, player)
    }

    async fn join_by_code(&self, code: &str, player: &PlayerId) -> Result<SessionRecord, DirectoryError> {
        let mut state = self.state.lock();
        Self::begin(&mut state, DirectoryOp::JoinByCode)?;
        let record = state
            .sessions
            .values_mut()
            .find(|r| r.join_code.as_deref() == Some(code))
            .ok_or(DirectoryError::SessionNotFound)?;
        Self::admit(record, player)
    }

    async fn remove_player(&self, id: &str, player: &PlayerId) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        Self::begin(&mut state, DirectoryOp::RemovePlayer)?;
        let record = state.sessions.get_mut(id).ok_or(DirectoryError::SessionNotFound)?;
        let before = record.players.len();
        record.players.retain(|p| p != player);
        if record.players.len() == before {
            return Err(DirectoryError::PlayerNotFound);
        }
        record.last_updated = Utc::now();
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        Self::begin(&mut state, DirectoryOp::Delete)?;
        state
            .sessions
            .remove(id)
            .map(|_| ())
            .ok_or(DirectoryError::SessionNotFound)
    }

    async fn ping(&self, id: &str) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        Self::begin(&mut state, DirectoryOp::Ping)?;
        let record = state.sessions.get_mut(id).ok_or(DirectoryError::SessionNotFound)?;
        record.last_updated = Utc::now();
        Ok(())
    }
}
