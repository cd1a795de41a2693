//! Identity cache: one live wrapper per foreign object address.
//!
//! Entries are weak, so the cache never keeps a Python object alive. A dead entry is removed
//! the next time its address is looked up, and by the wrapper's destructor through [`forget`].
//!
//! The table lock is only held for map operations. Wrappers are built and dropped outside of it,
//! because dropping a wrapper re-enters the cache and may need the interpreter lock.
//!
//! [`forget`]: IdentityCache::forget

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use ahash::AHashMap;

/// Address-keyed table of weak references.
#[derive(Debug)]
pub(crate) struct IdentityCache<T> {
    entries: Mutex<AHashMap<usize, Weak<T>>>,
}

impl<T> Default for IdentityCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IdentityCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(AHashMap::new()),
        }
    }

    /// Returns the live value registered for `address`, or builds one with `factory` and
    /// registers it.
    ///
    /// When two threads race on the same address, both may run their factory but only the
    /// first insertion wins; the loser's value is dropped and the winner returned.
    pub fn intern(&self, address: usize, factory: impl FnOnce() -> T) -> Arc<T> {
        if let Some(live) = self.lookup(address) {
            tracing::trace!(address, "identity cache hit");
            return live;
        }

        let fresh = Arc::new(factory());
        let mut entries = self.lock();
        if let Some(existing) = entries.get(&address).and_then(Weak::upgrade) {
            drop(entries);
            return existing;
        }
        entries.insert(address, Arc::downgrade(&fresh));
        drop(entries);
        tracing::trace!(address, "identity cache insert");
        fresh
    }

    /// Returns the live value for `address`, evicting the entry if its value is gone.
    pub fn lookup(&self, address: usize) -> Option<Arc<T>> {
        let mut entries = self.lock();
        let live = entries.get(&address)?.upgrade();
        if live.is_none() {
            entries.remove(&address);
            tracing::debug!(address, "evicted stale identity cache entry");
        }
        live
    }

    /// Removes the entry for `address` if it no longer points at a live value.
    ///
    /// Called from the wrapper destructor. An entry already replaced by a newer wrapper at a
    /// reused address is left untouched.
    pub fn forget(&self, address: usize) {
        let mut entries = self.lock();
        if entries.get(&address).is_some_and(|weak| weak.strong_count() == 0) {
            entries.remove(&address);
        }
    }

    /// Removes every dead entry, returning how many were dropped.
    pub fn evict_dead(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, weak| weak.strong_count() > 0);
        before - entries.len()
    }

    /// Number of entries, including dead ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Number of entries whose value is still alive.
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.lock().values().filter(|weak| weak.strong_count() > 0).count()
    }

    /// Locks the table, recovering it if a previous holder panicked.
    ///
    /// Every critical section leaves the map consistent, so a poisoned lock carries no
    /// half-applied update.
    fn lock(&self) -> MutexGuard<'_, AHashMap<usize, Weak<T>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
