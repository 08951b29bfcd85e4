//! Game Mode Resolution
//!
//! The match layer needs to know whether it runs a two-player session or a
//! local single-player run. The live mode selector may be absent (e.g. when
//! a scene is entered directly), in which case the persisted preference
//! decides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::lobby::record::ModeTag;

/// Play mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Not chosen yet.
    #[default]
    None,
    /// Two-player online match.
    Multiplayer,
    /// Local run, no networking.
    SinglePlayer,
}

/// Live source of the current mode.
pub trait ModeSelector: Send + Sync {
    /// Currently selected mode, if the selector has one.
    fn selected_mode(&self) -> Option<GameMode>;
}

/// Persisted local preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Last chosen play mode.
    #[serde(default)]
    pub game_mode: GameMode,
    /// Last chosen lobby mode tag.
    #[serde(default)]
    pub mode_tag: Option<ModeTag>,
}

/// Preference persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    /// File could not be written.
    #[error("Preference file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Preferences could not be encoded.
    #[error("Preference encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// JSON file holding [`Preferences`].
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    /// Store backed by `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    /// Load preferences. Missing or unreadable files yield defaults.
    pub fn load(&self) -> Preferences {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("No preferences at {} ({}); using defaults", self.path.display(), e);
                return Preferences::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Corrupt preferences at {}: {}; using defaults", self.path.display(), e);
            Preferences::default()
        })
    }

    /// Persist preferences.
    pub fn save(&self, preferences: &Preferences) -> Result<(), PreferenceError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(preferences)?)?;
        Ok(())
    }
}

/// Live selector first, then the stored preference.
pub fn resolve_game_mode(selector: Option<&dyn ModeSelector>, store: &PreferenceStore) -> GameMode {
    match selector.and_then(|s| s.selected_mode()) {
        Some(mode) => mode,
        None => store.load().game_mode,
    }
}
