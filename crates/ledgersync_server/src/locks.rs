//! Per-user mutual exclusion.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A set of mutexes keyed by user identity.
///
/// Every read → modify → write of a stored dataset runs inside
/// [`KeyedLocks::with_lock`] for its user, so two pushes (or a push and a
/// sweep) for the same user never interleave. Different users proceed in
/// parallel. Entries are dropped once no caller holds or waits on them.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    /// Creates an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `key`.
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.release(key);
        result
    }

    fn release(&self, key: &str) {
        let mut locks = self.locks.lock();
        // The map's own reference is the last one: nobody holds or waits.
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    /// Returns the number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Returns true if no key is held or waited on.
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
