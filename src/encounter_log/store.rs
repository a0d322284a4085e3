use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::EncounterLog;

/// Registry of every encounter log seen this session.
///
/// The lock guards only the list and its id index; record contents have their
/// own locks.
#[derive(Debug, Default)]
pub struct LogStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    logs: Vec<Arc<EncounterLog>>,
    index: HashMap<String, usize>,
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends the log unless one with the same id is already stored.
    pub fn insert(&self, encounter_log: Arc<EncounterLog>) -> bool {
        let mut inner = self.write();
        if inner.index.contains_key(encounter_log.id()) {
            return false;
        }
        let position = inner.logs.len();
        inner.index.insert(encounter_log.id().to_string(), position);
        inner.logs.push(encounter_log);
        true
    }

    /// Newest first, the order the log table shows them in.
    pub fn snapshot(&self) -> Vec<Arc<EncounterLog>> {
        self.read().logs.iter().rev().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<EncounterLog>> {
        let inner = self.read();
        inner
            .index
            .get(id)
            .and_then(|&position| inner.logs.get(position))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.read().logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops the store's references. Records still held by a worker live until it lets go.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.write());
        drop(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::LogStore;
    use crate::encounter_log::tests::evtc_data;
    use crate::encounter_log::EncounterLog;
    use std::sync::Arc;

    #[test]
    fn keeps_insertion_order_and_snapshots_newest_first() {
        let store = LogStore::new();
        store.insert(Arc::new(EncounterLog::new(evtc_data("/l/arcdps.cbtlogs/a.zevtc", 1))));
        store.insert(Arc::new(EncounterLog::new(evtc_data("/l/arcdps.cbtlogs/b.zevtc", 1))));
        store.insert(Arc::new(EncounterLog::new(evtc_data("/l/arcdps.cbtlogs/c.zevtc", 1))));

        let ids: Vec<String> = store
            .snapshot()
            .iter()
            .map(|encounter_log| encounter_log.id().to_string())
            .collect();
        assert_eq!(ids, vec!["c.zevtc", "b.zevtc", "a.zevtc"]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn looks_up_logs_by_id_and_clears() {
        let store = LogStore::new();
        store.insert(Arc::new(EncounterLog::new(evtc_data("/l/arcdps.cbtlogs/a.zevtc", 1))));

        assert!(store.get("a.zevtc").is_some());
        assert!(store.get("missing.zevtc").is_none());

        store.clear();
        assert!(store.is_empty());
        assert!(store.get("a.zevtc").is_none());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let store = LogStore::new();
        let first = Arc::new(EncounterLog::new(evtc_data("/l/arcdps.cbtlogs/a.zevtc", 1)));
        assert!(store.insert(Arc::clone(&first)));
        assert!(!store.insert(Arc::new(EncounterLog::new(evtc_data(
            "/l/arcdps.cbtlogs/a.zevtc",
            2
        )))));

        assert_eq!(store.len(), 1);
        let stored = store.get("a.zevtc").expect("stored log");
        assert!(Arc::ptr_eq(&stored, &first));
    }
}
