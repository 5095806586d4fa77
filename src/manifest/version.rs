use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::sstable::{SSTable, SSTableMeta};
use crate::types::{LookupResult, user_key_of};

/// Number of levels in the tree. L0 is the flush landing zone; each level
/// below holds roughly ten times the previous one.
pub const NUM_LEVELS: usize = 7;

/// A live SSTable plus the bookkeeping to delete its file at the right
/// moment.
///
/// Versions share handles through `Arc`. When a compaction replaces a
/// table, the new version simply doesn't reference its handle; the file
/// itself must survive until the last old version (or long-running
/// iterator) lets go. `mark_evicted` arms the handle, and Drop of the
/// final Arc does the unlink. No reference counting beyond what Arc
/// already does.
pub struct TableHandle {
    pub meta: SSTableMeta,
    pub table: Arc<SSTable>,
    path: PathBuf,
    evicted: AtomicBool,
}

impl TableHandle {
    pub fn new(meta: SSTableMeta, table: Arc<SSTable>, path: PathBuf) -> Self {
        TableHandle {
            meta,
            table,
            path,
            evicted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    /// Arm deferred deletion: once every reference is gone, the file goes
    /// with it.
    pub fn mark_evicted(&self) {
        self.evicted.store(true, Ordering::Release);
    }
}

impl Drop for TableHandle {
    fn drop(&mut self) {
        if self.evicted.load(Ordering::Acquire) {
            self.table.evict_cached_blocks();
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("failed to delete table {}: {e}", self.path.display());
            } else {
                log::debug!("deleted table {}", self.path.display());
            }
        }
    }
}

/// An immutable snapshot of which tables make up the database.
///
/// Levels:
/// - `levels[0]`: freshly flushed tables, newest first. Ranges overlap, so
///   reads must consult every L0 table in order.
/// - `levels[1..]`: sorted by smallest key with disjoint ranges; a key
///   lives in at most one table per level.
///
/// Versions are copy-on-write: applying an edit builds a new Version that
/// shares unchanged handles with the old one. Readers pin whichever
/// version was current when they started and are never disturbed.
pub struct Version {
    pub levels: Vec<Vec<Arc<TableHandle>>>,
}

impl Version {
    pub fn empty() -> Version {
        Version {
            levels: (0..NUM_LEVELS).map(|_| Vec::new()).collect(),
        }
    }

    /// Point lookup across all levels, newest data first.
    pub fn get(&self, user_key: &[u8], snapshot: u64) -> Result<LookupResult> {
        // L0: overlapping ranges, walk newest to oldest.
        for handle in &self.levels[0] {
            match handle.table.get(user_key, snapshot)? {
                LookupResult::Missing => {}
                hit => return Ok(hit),
            }
        }

        // Deeper levels: at most one candidate table per level.
        for level in &self.levels[1..] {
            let idx = level.partition_point(|h| user_key_of(&h.meta.max_key) < user_key);
            if idx >= level.len() {
                continue;
            }
            let handle = &level[idx];
            if user_key < user_key_of(&handle.meta.min_key) {
                continue;
            }
            match handle.table.get(user_key, snapshot)? {
                LookupResult::Missing => {}
                hit => return Ok(hit),
            }
        }

        Ok(LookupResult::Missing)
    }

    /// Tables in `level` whose user-key range intersects
    /// [`smallest`, `largest`] (inclusive bounds).
    pub fn overlapping_tables(
        &self,
        level: usize,
        smallest: &[u8],
        largest: &[u8],
    ) -> Vec<Arc<TableHandle>> {
        self.levels[level]
            .iter()
            .filter(|h| {
                let table_min = user_key_of(&h.meta.min_key);
                let table_max = user_key_of(&h.meta.max_key);
                table_max >= smallest && table_min <= largest
            })
            .cloned()
            .collect()
    }

    /// Whether any table at `level` or below could contain `user_key`.
    /// Compaction uses this to decide if a tombstone still shadows data.
    pub fn key_may_exist_below(&self, level: usize, user_key: &[u8]) -> bool {
        for deeper in &self.levels[level + 1..] {
            for handle in deeper {
                if user_key >= user_key_of(&handle.meta.min_key)
                    && user_key <= user_key_of(&handle.meta.max_key)
                {
                    return true;
                }
            }
        }
        false
    }

    pub fn table_count(&self, level: usize) -> usize {
        self.levels[level].len()
    }

    /// Total bytes of table files at `level`.
    pub fn level_size(&self, level: usize) -> u64 {
        self.levels[level].iter().map(|h| h.meta.file_size).sum()
    }

    /// Total live tables across all levels.
    pub fn total_tables(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }

    /// Ids of every table referenced by this version.
    pub fn live_table_ids(&self) -> Vec<u64> {
        self.levels
            .iter()
            .flat_map(|level| level.iter().map(|h| h.id()))
            .collect()
    }
}
