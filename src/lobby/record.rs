//! Session Records
//!
//! The directory entry describing one forming or running match, plus the
//! naming conventions used to find it again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::network::protocol::Role;

/// Directory-assigned session identifier.
pub type SessionId = String;

/// Data key holding the relay join code.
pub const KEY_RELAY_CODE: &str = "RelayCode";
/// Data key holding the mode tag.
pub const KEY_GAME_TYPE: &str = "GameType";
/// Data key holding the human-readable room name.
pub const KEY_DISPLAY_NAME: &str = "DisplayName";
/// Relay code value meaning "not allocated yet".
pub const RELAY_CODE_UNSET: &str = "0";
/// Name a public session carries until it has been renamed.
pub const PENDING_SESSION_NAME: &str = "Creating Session...";

/// Stable player identity in the directory.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Create from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a fresh random identity.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lobby-side game type tag (e.g. `Hiragana`), used for filtering.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModeTag(pub String);

impl ModeTag {
    /// Create a tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Borrow the raw tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substring that identifies public sessions of this mode by name.
    pub fn name_filter(&self) -> String {
        format!("[{}]", self.0)
    }

    /// Final name of a public session.
    pub fn public_session_name(&self, short_id: &str) -> String {
        format!("[{}]- Room [{}]", self.0, short_id)
    }

    /// Name of a private session.
    pub fn private_session_name(&self, display_name: &str) -> String {
        format!("{}-{}", self.0, display_name)
    }
}

impl fmt::Display for ModeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Display name shown for a public session.
pub fn public_display_name(short_id: &str) -> String {
    format!("Room [ {} ]", short_id)
}

/// Who may read a data entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Anyone querying the directory.
    Public,
    /// Players inside the session.
    Member,
}

/// A value in the record's data bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEntry {
    /// Read visibility.
    pub visibility: Visibility,
    /// Value.
    pub value: String,
}

impl DataEntry {
    /// Public entry.
    pub fn public(value: impl Into<String>) -> Self {
        Self { visibility: Visibility::Public, value: value.into() }
    }

    /// Member-only entry.
    pub fn member(value: impl Into<String>) -> Self {
        Self { visibility: Visibility::Member, value: value.into() }
    }
}

/// A session as stored in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Directory id.
    pub id: SessionId,
    /// Searchable name.
    pub name: String,
    /// Owner.
    pub host_id: PlayerId,
    /// Maximum players.
    pub capacity: usize,
    /// Players inside, host first.
    pub players: Vec<PlayerId>,
    /// Hidden from queries, joinable by code.
    pub is_private: bool,
    /// Closed to new joins.
    pub is_locked: bool,
    /// Join code (private sessions).
    pub join_code: Option<String>,
    /// String-keyed data bag.
    pub data: BTreeMap<String, DataEntry>,
    /// Last write or liveness ping.
    pub last_updated: DateTime<Utc>,
}

impl SessionRecord {
    /// Free player slots.
    pub fn available_slots(&self) -> usize {
        self.capacity.saturating_sub(self.players.len())
    }

    /// Look up a data value.
    pub fn data_value(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(|e| e.value.as_str())
    }

    /// Relay join code, if one has been published.
    pub fn relay_code(&self) -> Option<&str> {
        self.data_value(KEY_RELAY_CODE)
            .filter(|code| !code.is_empty() && *code != RELAY_CODE_UNSET)
    }

    /// Mode tag.
    pub fn mode_tag(&self) -> Option<ModeTag> {
        self.data_value(KEY_GAME_TYPE).map(ModeTag::new)
    }

    /// Human-readable room name.
    pub fn display_name(&self) -> Option<&str> {
        self.data_value(KEY_DISPLAY_NAME)
    }

    /// First four characters of the id.
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(4) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }

    /// Whether `player` is inside.
    pub fn has_player(&self, player: &PlayerId) -> bool {
        self.players.contains(player)
    }

    /// Role of `player` in this session.
    pub fn role_of(&self, player: &PlayerId) -> Role {
        if self.host_id == *player {
            Role::Host
        } else {
            Role::Client
        }
    }
}
