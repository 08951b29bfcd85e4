//! Core session primitives.
//!
//! Configuration, single-writer replicated values and the timer
//! abstractions shared by the lobby and match layers.

pub mod config;
pub mod periodic;
pub mod replicated;

// Re-export core types
pub use config::{LobbyConfig, SessionConfig};
pub use periodic::{Cadence, Deadline, PeriodicTask, TaskControl, TaskSet};
pub use replicated::{Authority, Change, Replicated, ReplicationError};
