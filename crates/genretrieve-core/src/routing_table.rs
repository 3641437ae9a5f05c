//! Durable `doc_id -> {tier, file_id, created_at}` mapping.
//!
//! The routing table is the linearisation point (spec.md §4.3): a `doc_id`
//! is defined to exist iff it has a routing record here. ANN presence is
//! an optimisation layered on top, and may lag briefly during migration.
//! Every mutation is appended to [`RoutingLogWriter`] before the in-memory
//! maps are updated.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{StoreError, StoreResult};
use crate::persistence::{Directory, RoutingLogEntry, RoutingLogReader, RoutingLogWriter, Tier};
use crate::DocId;

/// A single routing record.
#[derive(Debug, Clone)]
pub struct RoutingRecord {
    pub tier: Tier,
    pub file_id: String,
    pub created_at: i64,
}

/// Aggregate counts returned by [`RoutingTable::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingStats {
    pub total: usize,
    pub hot: usize,
    pub cold: usize,
}

struct Inner {
    records: HashMap<DocId, RoutingRecord>,
    by_file_id: HashMap<String, Vec<DocId>>,
}

/// Durable `doc_id -> RoutingRecord` store with a secondary index on
/// `file_id`. Individual writes are atomic; `put_many`/`set_tier_many`
/// batch several mutations into a single log append so migration is
/// observable as one transition per batch.
pub struct RoutingTable {
    inner: RwLock<Inner>,
    log: RoutingLogWriter,
}

impl RoutingTable {
    /// Open (or create) the routing table at `path` under `directory`,
    /// replaying any existing log into memory first.
    pub fn open(directory: Arc<dyn Directory>, path: impl Into<String>) -> StoreResult<Self> {
        let path = path.into();
        let reader = RoutingLogReader::new(directory.clone(), path.clone());
        let entries = reader.replay()?;

        let mut records = HashMap::new();
        let mut by_file_id: HashMap<String, Vec<DocId>> = HashMap::new();
        for entry in entries {
            match entry {
                RoutingLogEntry::Put {
                    doc_id,
                    tier,
                    file_id,
                    created_at,
                } => {
                    by_file_id.entry(file_id.clone()).or_default().push(doc_id);
                    records.insert(
                        doc_id,
                        RoutingRecord {
                            tier,
                            file_id,
                            created_at,
                        },
                    );
                }
                RoutingLogEntry::Delete { doc_id } => {
                    if let Some(rec) = records.remove(&doc_id) {
                        if let Some(ids) = by_file_id.get_mut(&rec.file_id) {
                            ids.retain(|id| *id != doc_id);
                        }
                    }
                }
                RoutingLogEntry::SetTier { doc_id, tier } => {
                    if let Some(rec) = records.get_mut(&doc_id) {
                        rec.tier = tier;
                    }
                }
                RoutingLogEntry::BackendType { .. } => {}
            }
        }

        Ok(Self {
            inner: RwLock::new(Inner { records, by_file_id }),
            log: RoutingLogWriter::new(directory, path),
        })
    }

    pub fn put(&self, doc_id: DocId, tier: Tier, file_id: String, created_at: i64) -> StoreResult<()> {
        self.log
            .append(&RoutingLogEntry::Put {
                doc_id,
                tier,
                file_id: file_id.clone(),
                created_at,
            })
            .map_err(StoreError::from)?;

        let mut inner = self.inner.write().unwrap();
        inner.by_file_id.entry(file_id.clone()).or_default().push(doc_id);
        inner.records.insert(
            doc_id,
            RoutingRecord {
                tier,
                file_id,
                created_at,
            },
        );
        Ok(())
    }

    /// Atomic as a group: all records land in the log before any are
    /// applied in memory, so migration is observable as a single batch.
    pub fn put_many(&self, records: Vec<(DocId, Tier, String, i64)>) -> StoreResult<()> {
        let entries: Vec<RoutingLogEntry> = records
            .iter()
            .map(|(doc_id, tier, file_id, created_at)| RoutingLogEntry::Put {
                doc_id: *doc_id,
                tier: *tier,
                file_id: file_id.clone(),
                created_at: *created_at,
            })
            .collect();
        self.log.append_batch(&entries).map_err(StoreError::from)?;

        let mut inner = self.inner.write().unwrap();
        for (doc_id, tier, file_id, created_at) in records {
            inner.by_file_id.entry(file_id.clone()).or_default().push(doc_id);
            inner.records.insert(
                doc_id,
                RoutingRecord {
                    tier,
                    file_id,
                    created_at,
                },
            );
        }
        Ok(())
    }

    pub fn get(&self, doc_id: DocId) -> Option<RoutingRecord> {
        self.inner.read().unwrap().records.get(&doc_id).cloned()
    }

    pub fn delete(&self, doc_id: DocId) -> StoreResult<()> {
        self.log
            .append(&RoutingLogEntry::Delete { doc_id })
            .map_err(StoreError::from)?;
        let mut inner = self.inner.write().unwrap();
        if let Some(rec) = inner.records.remove(&doc_id) {
            if let Some(ids) = inner.by_file_id.get_mut(&rec.file_id) {
                ids.retain(|id| *id != doc_id);
            }
        }
        Ok(())
    }

    pub fn set_tier(&self, doc_id: DocId, tier: Tier) -> StoreResult<()> {
        self.log
            .append(&RoutingLogEntry::SetTier { doc_id, tier })
            .map_err(StoreError::from)?;
        let mut inner = self.inner.write().unwrap();
        if let Some(rec) = inner.records.get_mut(&doc_id) {
            rec.tier = tier;
        }
        Ok(())
    }

    /// Atomic as a group: used by the archive flow and the migrator so a
    /// reader never observes half a batch moved to the new tier.
    pub fn set_tier_many(&self, doc_ids: &[DocId], tier: Tier) -> StoreResult<()> {
        let entries: Vec<RoutingLogEntry> = doc_ids
            .iter()
            .map(|&doc_id| RoutingLogEntry::SetTier { doc_id, tier })
            .collect();
        self.log.append_batch(&entries).map_err(StoreError::from)?;
        let mut inner = self.inner.write().unwrap();
        for &doc_id in doc_ids {
            if let Some(rec) = inner.records.get_mut(&doc_id) {
                rec.tier = tier;
            }
        }
        Ok(())
    }

    pub fn by_file_id(&self, file_id: &str) -> Vec<DocId> {
        self.inner
            .read()
            .unwrap()
            .by_file_id
            .get(file_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn iter_by_tier(&self, tier: Tier) -> Vec<DocId> {
        self.inner
            .read()
            .unwrap()
            .records
            .iter()
            .filter(|(_, rec)| rec.tier == tier)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn stats(&self) -> RoutingStats {
        let inner = self.inner.read().unwrap();
        let mut stats = RoutingStats {
            total: inner.records.len(),
            ..Default::default()
        };
        for rec in inner.records.values() {
            match rec.tier {
                Tier::Hot => stats.hot += 1,
                Tier::Cold => stats.cold += 1,
            }
        }
        stats
    }

    /// Compact the log into a fresh baseline after all in-memory state has
    /// been durably snapshotted elsewhere (called post-migration cleanup).
    pub fn compact_log(&self) -> StoreResult<()> {
        self.log.compact().map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryDirectory;

    fn open_table() -> RoutingTable {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        RoutingTable::open(dir, "routing.log").unwrap()
    }

    #[test]
    fn put_then_get() {
        let table = open_table();
        table.put(1, Tier::Hot, "file-a".into(), 100).unwrap();
        let rec = table.get(1).unwrap();
        assert_eq!(rec.tier, Tier::Hot);
        assert_eq!(rec.file_id, "file-a");
    }

    #[test]
    fn delete_removes_from_both_indexes() {
        let table = open_table();
        table.put(1, Tier::Hot, "file-a".into(), 100).unwrap();
        table.delete(1).unwrap();
        assert!(table.get(1).is_none());
        assert!(table.by_file_id("file-a").is_empty());
    }

    #[test]
    fn set_tier_many_moves_a_batch_atomically_in_memory() {
        let table = open_table();
        table.put(1, Tier::Hot, "a".into(), 1).unwrap();
        table.put(2, Tier::Hot, "b".into(), 1).unwrap();
        table.set_tier_many(&[1, 2], Tier::Cold).unwrap();
        assert_eq!(table.get(1).unwrap().tier, Tier::Cold);
        assert_eq!(table.get(2).unwrap().tier, Tier::Cold);
        let stats = table.stats();
        assert_eq!(stats.cold, 2);
        assert_eq!(stats.hot, 0);
    }

    #[test]
    fn reopen_replays_log() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        {
            let table = RoutingTable::open(dir.clone(), "routing.log").unwrap();
            table.put(1, Tier::Hot, "a".into(), 1).unwrap();
        }
        let reopened = RoutingTable::open(dir, "routing.log").unwrap();
        assert_eq!(reopened.get(1).unwrap().file_id, "a");
    }
}
