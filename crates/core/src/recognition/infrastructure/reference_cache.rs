use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::recognition::domain::reference_set::{ReferenceError, ReferenceSet, ReferenceSource};

/// Process-wide, lazily loaded reference set shared read-only by sessions.
///
/// Sessions receive an `Arc<ReferenceSet>` snapshot; a `reload` swaps the
/// snapshot for later sessions without disturbing running ones. Empty
/// sets are handed out but not retained, so photos enrolled later are
/// picked up by the next session.
pub struct ReferenceCache {
    source: Box<dyn ReferenceSource>,
    slot: RwLock<Option<Arc<ReferenceSet>>>,
    load_lock: Mutex<()>,
}

impl ReferenceCache {
    pub fn new(source: Box<dyn ReferenceSource>) -> Self {
        Self {
            source,
            slot: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    /// Returns the cached set, loading it on first use.
    pub fn get_or_load(&self) -> Result<Arc<ReferenceSet>, ReferenceError> {
        if let Some(set) = self.cached() {
            return Ok(set);
        }
        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Another session may have finished loading while we waited.
        if let Some(set) = self.cached() {
            return Ok(set);
        }
        self.load_locked()
    }

    /// Discards the cached set and loads a fresh one from the source.
    pub fn reload(&self) -> Result<Arc<ReferenceSet>, ReferenceError> {
        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store(None);
        self.load_locked()
    }

    pub fn invalidate(&self) {
        self.store(None);
    }

    pub fn cached(&self) -> Option<Arc<ReferenceSet>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn load_locked(&self) -> Result<Arc<ReferenceSet>, ReferenceError> {
        let set = Arc::new(ReferenceSet::load(self.source.as_ref())?);
        if !set.is_empty() {
            self.store(Some(set.clone()));
        }
        Ok(set)
    }

    fn store(&self, value: Option<Arc<ReferenceSet>>) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = value;
    }
}
