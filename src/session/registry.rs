//! Process-wide session id → subscription set mapping.

use crate::error::SessionError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// One successful mutation of a subscription set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionChange {
    Added(String),
    Removed(String),
}

/// Ordered stream of changes to one session's subscription set.
pub type ChangeStream = mpsc::UnboundedReceiver<SubscriptionChange>;

struct SessionEntry {
    generation: u64,
    topics: BTreeSet<String>,
    changes: mpsc::UnboundedSender<SubscriptionChange>,
}

/// Registry of active sessions.
///
/// Mutations for one id happen under that id's shard guard, so they are
/// linearizable and their change events are queued in the same order.
/// Ids in different shards never contend.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `id` with an empty subscription set.
    ///
    /// Fails with `DuplicateSession` if `id` is already active; the existing
    /// entry is left untouched.
    pub fn register(self: &Arc<Self>, id: &str) -> Result<SessionRegistration, SessionError> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(_) => return Err(SessionError::DuplicateSession(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(SessionEntry {
                    generation,
                    topics: BTreeSet::new(),
                    changes: tx,
                });
            }
        }
        debug!(session_id = %id, "Session registered");
        Ok(SessionRegistration {
            registry: Arc::clone(self),
            id: id.to_string(),
            generation,
            changes: Some(rx),
            released: false,
        })
    }

    /// Remove `id` and its subscription set. Returns `false` if it was not active.
    ///
    /// Dropping the entry closes its change stream.
    pub fn deregister(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session_id = %id, "Session deregistered");
        }
        removed
    }

    fn deregister_generation(&self, id: &str, generation: u64) -> bool {
        let removed = self
            .sessions
            .remove_if(id, |_, entry| entry.generation == generation)
            .is_some();
        if removed {
            debug!(session_id = %id, "Session deregistered");
        }
        removed
    }

    /// Snapshot of the topics `id` is subscribed to.
    pub fn topics_for(&self, id: &str) -> Result<BTreeSet<String>, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| entry.topics.clone())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Add `topic` to the set of `id`. Returns `false` if it was already there.
    pub fn subscribe(&self, id: &str, topic: &str) -> Result<bool, SessionError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let added = entry.topics.insert(topic.to_string());
        if added {
            // Receiver gone means the notifier already stopped.
            let _ = entry
                .changes
                .send(SubscriptionChange::Added(topic.to_string()));
        }
        Ok(added)
    }

    /// Remove `topic` from the set of `id`. Returns `false` if it was not there.
    pub fn unsubscribe(&self, id: &str, topic: &str) -> Result<bool, SessionError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let removed = entry.topics.remove(topic);
        if removed {
            let _ = entry
                .changes
                .send(SubscriptionChange::Removed(topic.to_string()));
        }
        Ok(removed)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

/// Registration handle; deregisters its session exactly once when released
/// or dropped.
///
/// Only the entry this handle created is removed, so a stale handle can never
/// tear down a later session that reused the id.
pub struct SessionRegistration {
    registry: Arc<SessionRegistry>,
    id: String,
    generation: u64,
    changes: Option<ChangeStream>,
    released: bool,
}

impl SessionRegistration {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Take the change stream for this session. Yields it once.
    pub fn take_changes(&mut self) -> Option<ChangeStream> {
        self.changes.take()
    }

    /// Deregister now. Returns `false` if the entry was already gone.
    pub fn release(mut self) -> bool {
        self.release_inner()
    }

    fn release_inner(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.registry.deregister_generation(&self.id, self.generation)
    }
}

impl Drop for SessionRegistration {
    fn drop(&mut self) {
        self.release_inner();
    }
}
