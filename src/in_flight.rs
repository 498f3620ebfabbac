use crate::errors::{AppError, AppResult};
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// Set of keys with work running; a key is held until its guard drops.
#[derive(Debug)]
pub(crate) struct InFlight<K> {
    keys: Arc<Mutex<HashSet<K>>>,
}

pub(crate) struct InFlightGuard<K: Eq + Hash> {
    keys: Arc<Mutex<HashSet<K>>>,
    key: K,
}

impl<K> Default for InFlight<K> {
    fn default() -> Self {
        Self {
            keys: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl<K> Clone for InFlight<K> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
        }
    }
}

impl<K: Eq + Hash + Clone> InFlight<K> {
    /// `Ok(None)` when the key is already held.
    pub(crate) fn try_acquire(&self, key: K) -> AppResult<Option<InFlightGuard<K>>> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| AppError::Internal("in-flight gate poisoned".to_string()))?;
        if !keys.insert(key.clone()) {
            return Ok(None);
        }
        Ok(Some(InFlightGuard {
            keys: self.keys.clone(),
            key,
        }))
    }
}

impl<K: Eq + Hash> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.remove(&self.key);
        }
    }
}
