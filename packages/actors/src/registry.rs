//! Arena of per-key accumulator actors.

use std::collections::HashMap;

use batchalier_core::BatchKey;
use ractor::{ActorId, ActorRef};

use crate::messages::KeyMessage;

struct ArenaEntry {
    actor: ActorRef<KeyMessage>,
    /// Jobs sent to the actor so far.
    routed: u64,
}

/// Key actors by batch key, created on first use and evicted when idle.
///
/// Owned by the submitter actor; not shared.
pub(crate) struct KeyArena {
    entries: HashMap<BatchKey, ArenaEntry>,
    max_keys: Option<usize>,
}

impl KeyArena {
    pub fn new(max_keys: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            max_keys,
        }
    }

    pub fn get(&self, key: &BatchKey) -> Option<ActorRef<KeyMessage>> {
        self.entries.get(key).map(|entry| entry.actor.clone())
    }

    /// Whether a new key would exceed the configured bound.
    pub fn is_full(&self) -> bool {
        self.max_keys.is_some_and(|max| self.entries.len() >= max)
    }

    pub fn max_keys(&self) -> Option<usize> {
        self.max_keys
    }

    pub fn insert(&mut self, key: BatchKey, actor: ActorRef<KeyMessage>) {
        self.entries.insert(key, ArenaEntry { actor, routed: 0 });
    }

    /// Record that one more job was sent to `key`'s actor.
    pub fn note_routed(&mut self, key: &BatchKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.routed += 1;
        }
    }

    /// Remove `key` if its actor has processed every job routed to it.
    ///
    /// A mismatch means adds are still in the actor's mailbox, so the key
    /// is kept.
    pub fn remove_if_idle(
        &mut self,
        key: &BatchKey,
        accepted: u64,
    ) -> Option<ActorRef<KeyMessage>> {
        match self.entries.get(key) {
            Some(entry) if entry.routed == accepted => {
                self.entries.remove(key).map(|entry| entry.actor)
            }
            _ => None,
        }
    }

    /// Remove whichever key is served by the actor `id`.
    pub fn remove_by_actor(&mut self, id: ActorId) -> Option<BatchKey> {
        let key = self
            .entries
            .iter()
            .find(|(_, entry)| entry.actor.get_id() == id)
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&key);
        Some(key)
    }

    /// Remove every key, returning their actors.
    pub fn drain(&mut self) -> Vec<(BatchKey, ActorRef<KeyMessage>)> {
        self.entries
            .drain()
            .map(|(key, entry)| (key, entry.actor))
            .collect()
    }

    pub fn actors(&self) -> Vec<ActorRef<KeyMessage>> {
        self.entries.values().map(|entry| entry.actor.clone()).collect()
    }

    pub fn keys(&self) -> Vec<BatchKey> {
        self.entries.keys().cloned().collect()
    }
}
