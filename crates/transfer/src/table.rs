use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::TransferError;
use crate::types::TransferId;

/// Active transfer records for one role, keyed by transfer id.
///
/// Retired ids leave a tombstone for `grace` so late retransmissions can be
/// recognised and dropped quietly; once it expires the id is simply unknown.
pub struct TransferTable<R> {
    active: HashMap<TransferId, R>,
    retired: HashMap<TransferId, Instant>,
    grace: Duration,
}

impl<R> TransferTable<R> {
    pub fn new(grace: Duration) -> Self {
        Self {
            active: HashMap::new(),
            retired: HashMap::new(),
            grace,
        }
    }

    /// Fails with [`TransferError::Capacity`] if `id` is active or still in grace.
    pub fn check_available(&self, id: &str, now: Instant) -> Result<(), TransferError> {
        if self.active.contains_key(id) {
            return Err(TransferError::Capacity(id.to_string()));
        }
        if self.is_retired(id, now) {
            return Err(TransferError::Capacity(format!("{id} (recently finished)")));
        }
        Ok(())
    }

    /// Adds a record; the existing record for `id`, if any, is left untouched.
    pub fn insert(&mut self, id: TransferId, record: R, now: Instant) -> Result<(), TransferError> {
        self.check_available(id.as_str(), now)?;
        self.retired.remove(id.as_str());
        self.active.insert(id, record);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&R> {
        self.active.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut R> {
        self.active.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    /// Removes the record and starts its grace window.
    pub fn retire(&mut self, id: &str, now: Instant) -> Option<R> {
        let (key, record) = self.active.remove_entry(id)?;
        self.retired.insert(key, now + self.grace);
        Some(record)
    }

    /// Starts a grace window for an id that never got a record.
    pub fn mark_retired(&mut self, id: TransferId, now: Instant) {
        self.active.remove(id.as_str());
        self.retired.insert(id, now + self.grace);
    }

    pub fn is_retired(&self, id: &str, now: Instant) -> bool {
        self.retired.get(id).is_some_and(|until| now < *until)
    }

    /// Drops expired tombstones, returning how many were removed.
    pub fn purge(&mut self, now: Instant) -> usize {
        let before = self.retired.len();
        self.retired.retain(|_, until| now < *until);
        before - self.retired.len()
    }

    pub fn ids(&self) -> Vec<TransferId> {
        self.active.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
