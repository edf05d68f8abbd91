//! Keyed stores behind the lifecycle coordinator.
//!
//! Both stores are plain maps with explicit insert/remove points. Callers hold
//! the swarm's [`KeyedLocks`] guard around every mutation touching that swarm.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use swarmhive_shared::SwarmPlan;

use super::state::{SwarmRecord, SwarmState};

/// One async mutex per key, created on first use and dropped again once the
/// last guard for the key is released with nobody waiting.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyGuard {
            guard: Some(mutex.lock_owned().await),
            key: key.to_string(),
            locks: self.locks.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one key of a [`KeyedLocks`]
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        // The map's own reference is the only one left when nobody waits
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// A plan waiting for its controller's ready event
#[derive(Debug, Clone)]
pub struct PendingSwarm {
    pub swarm_id: String,
    pub plan: SwarmPlan,
}

/// Controller instance (provisioning handle) -> plan awaiting start.
#[derive(Default)]
pub struct PendingSwarms {
    entries: DashMap<String, PendingSwarm>,
}

impl PendingSwarms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, controller_instance: &str, pending: PendingSwarm) {
        self.entries.insert(controller_instance.to_string(), pending);
    }

    pub fn get(&self, controller_instance: &str) -> Option<PendingSwarm> {
        self.entries
            .get(controller_instance)
            .map(|entry| entry.value().clone())
    }

    /// Swarm a handle belongs to, without cloning the plan
    pub fn swarm_of(&self, controller_instance: &str) -> Option<String> {
        self.entries
            .get(controller_instance)
            .map(|entry| entry.swarm_id.clone())
    }

    pub fn remove(&self, controller_instance: &str) -> Option<PendingSwarm> {
        self.entries
            .remove(controller_instance)
            .map(|(_, pending)| pending)
    }

    pub fn contains(&self, controller_instance: &str) -> bool {
        self.entries.contains_key(controller_instance)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Swarm id -> record.
#[derive(Default)]
pub struct SwarmRegistry {
    records: DashMap<String, SwarmRecord>,
}

impl SwarmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the id is taken. Returns whether it was inserted.
    pub fn try_insert(&self, record: SwarmRecord) -> bool {
        match self.records.entry(record.swarm_id.clone()) {
            dashmap::Entry::Occupied(_) => false,
            dashmap::Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    pub fn get(&self, swarm_id: &str) -> Option<SwarmRecord> {
        self.records.get(swarm_id).map(|entry| entry.value().clone())
    }

    /// Apply `f` to the record in place. Returns `None` if it does not exist.
    pub fn update<R>(&self, swarm_id: &str, f: impl FnOnce(&mut SwarmRecord) -> R) -> Option<R> {
        self.records
            .get_mut(swarm_id)
            .map(|mut entry| f(entry.value_mut()))
    }

    pub fn set_state(&self, swarm_id: &str, state: SwarmState) -> bool {
        self.update(swarm_id, |record| record.transition(state))
            .is_some()
    }

    pub fn remove(&self, swarm_id: &str) -> Option<SwarmRecord> {
        self.records.remove(swarm_id).map(|(_, record)| record)
    }

    pub fn contains(&self, swarm_id: &str) -> bool {
        self.records.contains_key(swarm_id)
    }

    /// Snapshot of every record, sorted by swarm id
    pub fn list(&self) -> Vec<SwarmRecord> {
        let mut records: Vec<SwarmRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.swarm_id.cmp(&b.swarm_id));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
