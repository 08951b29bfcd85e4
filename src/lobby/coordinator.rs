//! Lobby Coordinator
//!
//! Owns the session record lifecycle for the local player: create, join,
//! list, leave, remove and lock. The host keeps its record alive with
//! periodic directory pings; the non-host polls the record until the relay
//! join code appears and then joins the transport.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::core::config::LobbyConfig;
use crate::core::periodic::{PeriodicTask, TaskControl, TaskSet};
use crate::lobby::directory::{
    CreateSessionRequest, DirectoryError, MatchmakingDirectory, SessionQuery, SessionUpdate,
};
use crate::lobby::record::{
    public_display_name, DataEntry, ModeTag, PlayerId, SessionRecord, KEY_DISPLAY_NAME,
    KEY_GAME_TYPE, KEY_RELAY_CODE, PENDING_SESSION_NAME,
};
use crate::network::protocol::Role;
use crate::network::transport::{SessionTransport, TransportError};

const PING_TASK: &str = "directory-ping";
const POLL_TASK: &str = "record-poll";

/// Why the local player left a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// The player asked to leave.
    Requested,
    /// The host removed the session.
    SessionRemoved,
    /// The directory no longer knows the session or the player.
    MembershipLost,
    /// Liveness pings failed before the match started.
    DirectoryUnreachable,
    /// The relay could not be joined.
    TransportFailed,
}

/// Lobby notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    /// Entered a session.
    Joined(SessionRecord),
    /// The remembered record changed.
    RecordUpdated(SessionRecord),
    /// Left the current session.
    Left(LeaveReason),
    /// Result of a list refresh.
    ListUpdated(Vec<SessionRecord>),
}

/// Lobby errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    /// Another create or join is in flight.
    #[error("Another create or join is in flight")]
    Busy,

    /// Already inside a session.
    #[error("Already in a session")]
    AlreadyInSession,

    /// Not inside a session.
    #[error("Not in a session")]
    NotInSession,

    /// Host-only operation.
    #[error("Only the host may do this")]
    NotHost,

    /// Session removal in progress.
    #[error("Session is being removed")]
    Deleting,

    /// Relay allocation failed.
    #[error("Relay allocation failed: {0}")]
    AllocationFailed(#[from] TransportError),

    /// Directory call failed.
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Join gave up.
    #[error("Join failed after {attempts} attempt(s): {last}")]
    JoinFailed {
        /// Attempts made.
        attempts: u32,
        /// Last error seen.
        last: DirectoryError,
    },
}

#[derive(Debug, Default)]
struct LobbyState {
    joined: Option<SessionRecord>,
    deleting: bool,
    game_started: bool,
    polling: bool,
}

struct LobbyInner {
    directory: Arc<dyn MatchmakingDirectory>,
    transport: SessionTransport,
    player: PlayerId,
    config: LobbyConfig,
    state: RwLock<LobbyState>,
    in_flight: AtomicBool,
    events: broadcast::Sender<LobbyEvent>,
    tasks: parking_lot::Mutex<TaskSet>,
}

/// Marks a create or join as in flight until dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, LobbyError> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| Self(flag))
            .map_err(|_| LobbyError::Busy)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Session record lifecycle for one local player.
#[derive(Clone)]
pub struct LobbyCoordinator {
    inner: Arc<LobbyInner>,
}

impl LobbyCoordinator {
    /// Create a coordinator.
    pub fn new(
        directory: Arc<dyn MatchmakingDirectory>,
        transport: SessionTransport,
        player: PlayerId,
        config: LobbyConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(LobbyInner {
                directory,
                transport,
                player,
                config,
                state: RwLock::new(LobbyState::default()),
                in_flight: AtomicBool::new(false),
                events,
                tasks: parking_lot::Mutex::new(TaskSet::new()),
            }),
        }
    }

    /// Subscribe to lobby events.
    pub fn subscribe(&self) -> broadcast::Receiver<LobbyEvent> {
        self.inner.events.subscribe()
    }

    /// Local player identity.
    pub fn player(&self) -> &PlayerId {
        &self.inner.player
    }

    /// Transport used for relay joins.
    pub fn transport(&self) -> &SessionTransport {
        &self.inner.transport
    }

    /// The remembered record, if any.
    pub async fn current_session(&self) -> Option<SessionRecord> {
        self.inner.state.read().await.joined.clone()
    }

    /// Local role in the current session.
    pub async fn role(&self) -> Option<Role> {
        let state = self.inner.state.read().await;
        state.joined.as_ref().map(|r| r.role_of(&self.inner.player))
    }

    /// Whether the local player hosts the current session.
    pub async fn is_host(&self) -> bool {
        self.role().await == Some(Role::Host)
    }

    /// Relay join code of the current session.
    pub async fn relay_code(&self) -> Option<String> {
        let state = self.inner.state.read().await;
        state.joined.as_ref().and_then(|r| r.relay_code().map(str::to_string))
    }

    /// Whether the non-host is still polling the record.
    pub async fn is_polling(&self) -> bool {
        self.inner.state.read().await.polling
    }

    // =========================================================================
    // CREATE / JOIN
    // =========================================================================

    /// Allocate a relay and publish a public session for `mode`.
    #[instrument(skip(self))]
    pub async fn create_public_session(&self, mode: &ModeTag) -> Result<SessionRecord, LobbyError> {
        let _in_flight = InFlight::acquire(&self.inner.in_flight)?;
        self.ensure_idle().await?;

        let relay_code = self.allocate_relay().await?;
        let mut data = BTreeMap::new();
        data.insert(KEY_RELAY_CODE.to_string(), DataEntry::member(relay_code));
        data.insert(KEY_GAME_TYPE.to_string(), DataEntry::public(mode.as_str()));

        let record = self
            .publish(CreateSessionRequest {
                name: PENDING_SESSION_NAME.to_string(),
                capacity: self.inner.config.capacity,
                is_private: false,
                host: self.inner.player.clone(),
                data,
            })
            .await?;

        let short_id = record.short_id().to_string();
        let mut rename = SessionUpdate {
            name: Some(mode.public_session_name(&short_id)),
            ..Default::default()
        };
        rename.data.insert(
            KEY_DISPLAY_NAME.to_string(),
            DataEntry::public(public_display_name(&short_id)),
        );

        let record = match self.inner.directory.update_session(&record.id, rename).await {
            Ok(renamed) => renamed,
            Err(e) => {
                warn!("Session {} created but rename failed ({}); keeping temporary name", record.id, e);
                record
            }
        };

        info!("Public session {} created as '{}'", record.id, record.name);
        self.enter_session(record.clone()).await;
        Ok(record)
    }

    /// Allocate a relay and publish a private session joinable by code.
    ///
    /// The join code is in the returned record.
    #[instrument(skip(self))]
    pub async fn create_private_session(
        &self,
        display_name: &str,
        mode: &ModeTag,
    ) -> Result<SessionRecord, LobbyError> {
        let _in_flight = InFlight::acquire(&self.inner.in_flight)?;
        self.ensure_idle().await?;

        let relay_code = self.allocate_relay().await?;
        let mut data = BTreeMap::new();
        data.insert(KEY_RELAY_CODE.to_string(), DataEntry::member(relay_code));
        data.insert(KEY_GAME_TYPE.to_string(), DataEntry::public(mode.as_str()));
        data.insert(KEY_DISPLAY_NAME.to_string(), DataEntry::public(display_name));

        let record = self
            .publish(CreateSessionRequest {
                name: mode.private_session_name(display_name),
                capacity: self.inner.config.capacity,
                is_private: true,
                host: self.inner.player.clone(),
                data,
            })
            .await?;

        info!(
            "Private session {} created, join code {}",
            record.id,
            record.join_code.as_deref().unwrap_or("-")
        );
        self.enter_session(record.clone()).await;
        Ok(record)
    }

    /// Join a session by shareable code, retrying transient failures.
    #[instrument(skip(self))]
    pub async fn join_by_code(&self, code: &str) -> Result<SessionRecord, LobbyError> {
        let _in_flight = InFlight::acquire(&self.inner.in_flight)?;
        self.ensure_idle().await?;

        let record = self
            .with_retries("join by code", || {
                let directory = self.inner.directory.clone();
                let player = self.inner.player.clone();
                let code = code.to_string();
                async move { directory.join_by_code(&code, &player).await }
            })
            .await?;

        info!("Joined session {} by code", record.id);
        self.enter_session(record.clone()).await;
        Ok(record)
    }

    /// Join a listed session by id, retrying transient failures.
    #[instrument(skip(self))]
    pub async fn join_by_id(&self, id: &str) -> Result<SessionRecord, LobbyError> {
        let _in_flight = InFlight::acquire(&self.inner.in_flight)?;
        self.ensure_idle().await?;

        let record = self
            .with_retries("join by id", || {
                let directory = self.inner.directory.clone();
                let player = self.inner.player.clone();
                let id = id.to_string();
                async move { directory.join_by_id(&id, &player).await }
            })
            .await?;

        info!("Joined session {}", record.id);
        self.enter_session(record.clone()).await;
        Ok(record)
    }

    // =========================================================================
    // LEAVE / REMOVE / LOCK
    // =========================================================================

    /// Leave the current session. The host removes it instead.
    #[instrument(skip(self))]
    pub async fn leave_session(&self) -> Result<(), LobbyError> {
        let record = self.current_session().await.ok_or(LobbyError::NotInSession)?;
        if record.role_of(&self.inner.player).is_host() {
            return self.remove_session().await;
        }

        match self.inner.directory.remove_player(&record.id, &self.inner.player).await {
            Ok(()) => info!("Left session {}", record.id),
            Err(e) => warn!("Failed to leave session {} cleanly: {}", record.id, e),
        }
        self.reset_local_state(LeaveReason::Requested).await;
        Ok(())
    }

    /// Delete the current session (host only).
    #[instrument(skip(self))]
    pub async fn remove_session(&self) -> Result<(), LobbyError> {
        let record = {
            let mut state = self.inner.state.write().await;
            let record = state.joined.clone().ok_or(LobbyError::NotInSession)?;
            if !record.role_of(&self.inner.player).is_host() {
                return Err(LobbyError::NotHost);
            }
            if state.deleting {
                return Err(LobbyError::Deleting);
            }
            state.deleting = true;
            record
        };

        let result = self.inner.directory.delete_session(&record.id).await;
        self.inner.state.write().await.deleting = false;

        match result {
            Ok(()) => {
                info!("Session {} removed", record.id);
                self.reset_local_state(LeaveReason::SessionRemoved).await;
                Ok(())
            }
            Err(e) => {
                error!("Failed to remove session {}: {}", record.id, e);
                Err(e.into())
            }
        }
    }

    /// Close the current session to new joins (host only).
    #[instrument(skip(self))]
    pub async fn lock_session(&self) -> Result<(), LobbyError> {
        let record = self.current_session().await.ok_or(LobbyError::NotInSession)?;
        if !record.role_of(&self.inner.player).is_host() {
            return Err(LobbyError::NotHost);
        }

        let update = SessionUpdate { is_locked: Some(true), ..Default::default() };
        match self.inner.directory.update_session(&record.id, update).await {
            Ok(locked) => {
                info!("Session {} locked", locked.id);
                self.store_record(locked).await;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to lock session {}: {}", record.id, e);
                Err(e.into())
            }
        }
    }

    /// List joinable public sessions of `mode`. Directory errors yield an empty list.
    pub async fn refresh_session_list(&self, mode: &ModeTag) -> Vec<SessionRecord> {
        let sessions = match self.inner.directory.query_sessions(SessionQuery::open_sessions(mode)).await {
            Ok(sessions) => {
                debug!("Found {} open {} session(s)", sessions.len(), mode);
                sessions
            }
            Err(e) => {
                warn!("Session list refresh failed: {}", e);
                Vec::new()
            }
        };
        let _ = self.inner.events.send(LobbyEvent::ListUpdated(sessions.clone()));
        sessions
    }

    /// Gameplay began: stop polling and tolerate directory hiccups.
    pub async fn notify_game_started(&self) {
        self.inner.state.write().await.game_started = true;
        self.stop_polling().await;
    }

    /// Stop polling the record.
    pub async fn stop_polling(&self) {
        self.inner.state.write().await.polling = false;
        if self.inner.tasks.lock().cancel(POLL_TASK) {
            debug!("Record polling stopped");
        }
    }

    /// Join the transport using the current relay code.
    pub async fn rejoin_relay(&self) -> bool {
        match self.relay_code().await {
            Some(code) => self.inner.transport.join_relay(&code).await,
            None => {
                warn!("No relay code published for the current session");
                false
            }
        }
    }

    /// Application exit: host removes its session, client leaves.
    pub async fn shutdown(&self) {
        if self.current_session().await.is_some() {
            if let Err(e) = self.leave_session().await {
                warn!("Leave on shutdown failed: {}", e);
            }
        }
        self.inner.tasks.lock().cancel_all();
    }

    // =========================================================================
    // BACKGROUND WORK
    // =========================================================================

    async fn directory_ping_tick(&self) -> TaskControl {
        let (id, game_started) = {
            let state = self.inner.state.read().await;
            match &state.joined {
                Some(r) if r.role_of(&self.inner.player).is_host() => (r.id.clone(), state.game_started),
                _ => return TaskControl::Stop,
            }
        };

        match self.inner.directory.ping(&id).await {
            Ok(()) => {
                debug!("Directory ping for {}", id);
                TaskControl::Continue
            }
            Err(e) if !game_started => {
                error!("Directory ping failed before match start ({}); leaving session", e);
                self.reset_local_state(LeaveReason::DirectoryUnreachable).await;
                TaskControl::Stop
            }
            Err(e) => {
                warn!("Directory ping failed during match: {}", e);
                TaskControl::Continue
            }
        }
    }

    async fn poll_tick(&self) -> TaskControl {
        let id = {
            let state = self.inner.state.read().await;
            match (&state.joined, state.polling) {
                (Some(r), true) => r.id.clone(),
                _ => return TaskControl::Stop,
            }
        };

        let record = match self.inner.directory.get_session(&id).await {
            Ok(record) => record,
            Err(e) if e.is_membership_lost() => {
                warn!("Session {} is gone ({}); resetting", id, e);
                self.reset_local_state(LeaveReason::MembershipLost).await;
                return TaskControl::Stop;
            }
            Err(e) => {
                warn!("Polling session {} failed: {}", id, e);
                return TaskControl::Continue;
            }
        };

        {
            let mut state = self.inner.state.write().await;
            let matches = state.joined.as_ref().is_some_and(|r| r.id == record.id);
            if !matches || !state.polling {
                state.polling = false;
                return TaskControl::Stop;
            }
            if state.joined.as_ref() != Some(&record) {
                state.joined = Some(record.clone());
                let _ = self.inner.events.send(LobbyEvent::RecordUpdated(record.clone()));
            }
        }

        if let Some(code) = record.relay_code() {
            if !self.inner.transport.is_connected_as_client() {
                info!("Relay code published for {}, joining transport", record.id);
                if !self.inner.transport.join_relay(code).await {
                    warn!("Could not join relay for {}; leaving session", record.id);
                    if let Err(e) = self.leave_session().await {
                        warn!("Leave after relay failure failed: {}", e);
                    }
                    let _ = self.inner.events.send(LobbyEvent::Left(LeaveReason::TransportFailed));
                    return TaskControl::Stop;
                }
            }
        }

        TaskControl::Continue
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    async fn ensure_idle(&self) -> Result<(), LobbyError> {
        let state = self.inner.state.read().await;
        if state.deleting {
            return Err(LobbyError::Deleting);
        }
        if state.joined.is_some() {
            return Err(LobbyError::AlreadyInSession);
        }
        Ok(())
    }

    async fn allocate_relay(&self) -> Result<String, LobbyError> {
        Ok(self
            .inner
            .transport
            .create_relay(self.inner.config.relay_connections())
            .await?)
    }

    /// Create the record; on failure release the relay allocated for it.
    async fn publish(&self, request: CreateSessionRequest) -> Result<SessionRecord, LobbyError> {
        match self.inner.directory.create_session(request).await {
            Ok(record) => Ok(record),
            Err(e) => {
                error!("Session creation failed: {}", e);
                self.inner.transport.disconnect();
                Err(e.into())
            }
        }
    }

    async fn with_retries<F, Fut>(&self, what: &str, mut attempt_once: F) -> Result<SessionRecord, LobbyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<SessionRecord, DirectoryError>>,
    {
        let attempts = self.inner.config.join_attempts.max(1);
        let mut attempt = 1;

        loop {
            match attempt_once().await {
                Ok(record) => return Ok(record),
                Err(e) if attempt >= attempts => {
                    error!("{} failed on attempt {}/{}: {}", what, attempt, attempts, e);
                    return Err(LobbyError::JoinFailed { attempts: attempt, last: e });
                }
                Err(e) => {
                    let failure = if e.is_join_rejection() { "rejected" } else { "failed" };
                    warn!("{} attempt {}/{} {}: {}; retrying", what, attempt, attempts, failure, e);
                    attempt += 1;
                    tokio::time::sleep(self.inner.config.join_retry_delay).await;
                }
            }
        }
    }

    async fn enter_session(&self, record: SessionRecord) {
        let role = record.role_of(&self.inner.player);
        {
            let mut state = self.inner.state.write().await;
            state.joined = Some(record.clone());
            state.game_started = false;
            state.polling = !role.is_host();
        }
        let _ = self.inner.events.send(LobbyEvent::Joined(record));

        match role {
            Role::Host => self.start_task(PING_TASK, self.inner.config.directory_ping_interval, |lobby| async move {
                lobby.directory_ping_tick().await
            }),
            Role::Client => self.start_task(POLL_TASK, self.inner.config.poll_interval, |lobby| async move {
                lobby.poll_tick().await
            }),
        }
    }

    async fn store_record(&self, record: SessionRecord) {
        let mut state = self.inner.state.write().await;
        if state.joined.as_ref().is_some_and(|r| r.id == record.id) {
            state.joined = Some(record);
        }
    }

    async fn reset_local_state(&self, reason: LeaveReason) {
        {
            let mut state = self.inner.state.write().await;
            state.joined = None;
            state.polling = false;
            state.game_started = false;
        }
        self.inner.tasks.lock().cancel_all();
        self.inner.transport.disconnect();
        info!("Local session state reset ({:?})", reason);
        let _ = self.inner.events.send(LobbyEvent::Left(reason));
    }

    fn start_task<F, Fut>(&self, name: &'static str, period: Duration, job: F)
    where
        F: Fn(LobbyCoordinator) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskControl> + Send + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        let job = Arc::new(job);
        let task = PeriodicTask::spawn(name, period, None, move || {
            let weak = weak.clone();
            let job = job.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => job(LobbyCoordinator { inner }).await,
                    None => TaskControl::Stop,
                }
            }
        });
        self.inner.tasks.lock().start(task);
    }
}
