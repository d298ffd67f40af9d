//! Bounded conflict history

use crate::ConflictRecord;
use fleetsync_core::{ConflictId, FleetError, FleetResult, StorageError};
use std::collections::VecDeque;
use std::sync::{RwLockReadGuard, RwLockWriteGuard, RwLock};

/// FIFO-bounded log of conflict records, oldest evicted first.
///
/// Readers take a shared lock and copy out what they need, so stats and
/// history queries never hold up detection for long.
#[derive(Debug)]
pub struct ConflictLog {
    entries: RwLock<VecDeque<ConflictRecord>>,
    capacity: usize,
}

impl ConflictLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self) -> FleetResult<RwLockReadGuard<'_, VecDeque<ConflictRecord>>> {
        self.entries.read().map_err(|_| poisoned())
    }

    fn write(&self) -> FleetResult<RwLockWriteGuard<'_, VecDeque<ConflictRecord>>> {
        self.entries.write().map_err(|_| poisoned())
    }

    /// Append a record, returning the evicted record if the log was full.
    pub fn push(&self, record: ConflictRecord) -> FleetResult<Option<ConflictRecord>> {
        let mut entries = self.write()?;
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(record);
        if let Some(old) = &evicted {
            tracing::debug!(conflict_id = %old.id, "Evicted oldest conflict record");
        }
        Ok(evicted)
    }

    /// Replace the stored copy of a record. Returns false when the record
    /// is no longer (or never was) in the log.
    pub fn update(&self, record: &ConflictRecord) -> FleetResult<bool> {
        let mut entries = self.write()?;
        match entries.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get(&self, conflict_id: ConflictId) -> FleetResult<Option<ConflictRecord>> {
        Ok(self.read()?.iter().find(|r| r.id == conflict_id).cloned())
    }

    /// Up to `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> FleetResult<Vec<ConflictRecord>> {
        Ok(self.read()?.iter().rev().take(limit).cloned().collect())
    }

    /// Records that have not been resolved, oldest first.
    pub fn unresolved(&self) -> FleetResult<Vec<ConflictRecord>> {
        Ok(self
            .read()?
            .iter()
            .filter(|r| !r.is_resolved())
            .cloned()
            .collect())
    }

    /// Run `f` over the records without copying them.
    pub fn with_entries<T>(&self, f: impl FnOnce(&VecDeque<ConflictRecord>) -> T) -> FleetResult<T> {
        let entries = self.read()?;
        Ok(f(&entries))
    }

    pub fn len(&self) -> FleetResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> FleetResult<bool> {
        Ok(self.read()?.is_empty())
    }
}

fn poisoned() -> FleetError {
    FleetError::Storage(StorageError::LockPoisoned {
        resource: "conflict_log".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConflictSource;
    use chrono::Utc;
    use fleetsync_core::ConflictType;
    use serde_json::json;

    fn record(n: u64) -> ConflictRecord {
        let now = Utc::now();
        ConflictRecord::new(
            format!("sites.s{n}"),
            ConflictType::VersionConflict,
            vec![
                ConflictSource::center(json!(n), n + 1, now),
                ConflictSource::edge("e", json!(n), n, now),
            ],
        )
        .expect("two sources")
    }

    #[test]
    fn test_cap_plus_one_evicts_oldest() {
        let log = ConflictLog::new(3);
        let records: Vec<_> = (0..4).map(record).collect();
        for r in &records[..3] {
            assert_eq!(log.push(r.clone()).unwrap(), None);
        }
        let evicted = log.push(records[3].clone()).unwrap();
        assert_eq!(evicted.map(|r| r.id), Some(records[0].id));
        assert_eq!(log.len().unwrap(), 3);
        assert_eq!(log.get(records[0].id).unwrap(), None);

        let newest_first: Vec<_> = log.recent(10).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(newest_first, vec![records[3].id, records[2].id, records[1].id]);
    }

    #[test]
    fn test_with_entries_sees_records_in_order() {
        let log = ConflictLog::new(5);
        assert_eq!(log.with_entries(|e| e.len()).unwrap(), 0);
        let records: Vec<_> = (0..3).map(record).collect();
        for r in &records {
            log.push(r.clone()).unwrap();
        }
        let paths = log
            .with_entries(|e| e.iter().map(|r| r.path.clone()).collect::<Vec<_>>())
            .unwrap();
        assert_eq!(paths, vec!["sites.s0", "sites.s1", "sites.s2"]);
    }

    #[test]
    fn test_update_replaces_stored_copy() {
        let log = ConflictLog::new(10);
        let mut r = record(1);
        log.push(r.clone()).unwrap();
        r.resolved_by = Some("ops".to_string());
        r.resolved_at = Some(Utc::now());

        assert!(log.update(&r).unwrap());
        assert!(log.unresolved().unwrap().is_empty());
        assert!(!log.update(&record(2)).unwrap());
    }
}
