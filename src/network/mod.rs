//! Network Layer
//!
//! Peer messages and the relay transport seam. Everything above this layer
//! talks to the other player through [`SessionTransport`].

pub mod local;
pub mod protocol;
pub mod transport;

pub use local::{LocalRelay, LocalTransport};
pub use protocol::{
    FinalOutcome, GameOverReason, MatchResult, PeerId, PeerMessage, PeriodicState, Role, Target,
};
pub use transport::{SessionTransport, Transport, TransportError, TransportEvent};
