//! Replicated State
//!
//! Single-writer values shared between the host and its client.
//!
//! The host holds the [`Authority::Owner`] side and is the only one allowed
//! to call [`Replicated::set`]. The client holds an [`Authority::Mirror`]
//! and only accepts pushes from the wire through [`Replicated::apply_remote`].
//! Both sides report a [`Change`] when the value actually moved, which is
//! where on-changed reactions hook in. Local observers can also follow the
//! value through a `watch` channel.

use tokio::sync::watch;

/// Which side of the replication this handle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Writes locally and pushes to mirrors.
    Owner,
    /// Only applies values pushed by the owner.
    Mirror,
}

/// A value transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change<T> {
    /// Value before the write.
    pub old: T,
    /// Value after the write.
    pub new: T,
}

/// Replication errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicationError {
    /// A mirror tried to write.
    #[error("Only the owner may write a replicated value")]
    NotOwner,

    /// The owner tried to apply a remote push.
    #[error("The owner does not accept remote pushes")]
    NotMirror,
}

/// A single-writer replicated value.
#[derive(Debug)]
pub struct Replicated<T> {
    value: T,
    authority: Authority,
    watch_tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Replicated<T> {
    /// Create the writable side.
    pub fn owned(initial: T) -> Self {
        Self::with_authority(Authority::Owner, initial)
    }

    /// Create the read-only side.
    pub fn mirrored(initial: T) -> Self {
        Self::with_authority(Authority::Mirror, initial)
    }

    /// Create with an explicit authority.
    pub fn with_authority(authority: Authority, initial: T) -> Self {
        let (watch_tx, _) = watch::channel(initial.clone());
        Self {
            value: initial,
            authority,
            watch_tx,
        }
    }

    /// Current value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// This handle's authority.
    pub fn authority(&self) -> Authority {
        self.authority
    }

    /// Write a new value (owner only).
    pub fn set(&mut self, value: T) -> Result<Option<Change<T>>, ReplicationError> {
        if self.authority != Authority::Owner {
            return Err(ReplicationError::NotOwner);
        }
        Ok(self.store(value))
    }

    /// Apply a value pushed by the owner (mirror only).
    ///
    /// Duplicate pushes are absorbed and report no change.
    pub fn apply_remote(&mut self, value: T) -> Result<Option<Change<T>>, ReplicationError> {
        if self.authority != Authority::Mirror {
            return Err(ReplicationError::NotMirror);
        }
        Ok(self.store(value))
    }

    /// Reset to a value regardless of authority, without reporting a change.
    ///
    /// Only for tearing a session down locally.
    pub fn reset(&mut self, value: T) {
        self.value = value.clone();
        self.watch_tx.send_replace(value);
    }

    /// Follow the value.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.watch_tx.subscribe()
    }

    fn store(&mut self, value: T) -> Option<Change<T>> {
        if self.value == value {
            return None;
        }
        let old = std::mem::replace(&mut self.value, value.clone());
        self.watch_tx.send_replace(value.clone());
        Some(Change { old, new: value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_set_reports_change() {
        let mut flag = Replicated::owned(false);
        let change = flag.set(true).unwrap();
        assert_eq!(change, Some(Change { old: false, new: true }));
        assert!(*flag.get());

        // Same value again is not a change.
        assert_eq!(flag.set(true).unwrap(), None);
    }

    #[test]
    fn test_mirror_cannot_set() {
        let mut flag = Replicated::mirrored(false);
        assert_eq!(flag.set(true), Err(ReplicationError::NotOwner));
        assert!(!*flag.get());
    }

    #[test]
    fn test_owner_rejects_remote() {
        let mut count = Replicated::owned(0usize);
        assert_eq!(count.apply_remote(2), Err(ReplicationError::NotMirror));
    }

    #[test]
    fn test_mirror_absorbs_duplicates() {
        let mut count = Replicated::mirrored(0usize);
        assert!(count.apply_remote(2).unwrap().is_some());
        assert!(count.apply_remote(2).unwrap().is_none());
        assert_eq!(*count.get(), 2);
    }

    #[tokio::test]
    async fn test_watch_follows_value() {
        let mut flag = Replicated::owned(false);
        let mut rx = flag.subscribe();
        flag.set(true).unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        flag.reset(false);
        assert!(!*rx.borrow_and_update());
    }
}
