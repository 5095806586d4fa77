pub mod skiplist;

use std::sync::Arc;

use parking_lot::RwLock;

use skiplist::SkipList;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{InternalKey, LookupResult, ValueType, internal_key_order, user_key_of, tag_of};

/// In-memory sorted buffer for writes. Wraps a SkipList of encoded
/// internal keys.
///
/// Every write goes here first. When size exceeds the threshold,
/// the memtable is frozen (becomes immutable) and flushed to an SSTable.
///
/// Deletes are handled via tombstones — a `ValueType::Delete` entry that
/// means "this key is deleted as of this sequence number." You can't just
/// remove the key because older versions may exist in SSTables on disk.
pub struct MemTable {
    data: RwLock<SkipList>,
    size_limit: usize,
    /// WAL segment holding this memtable's writes. Once the memtable is
    /// flushed, segments up to and including this number are obsolete.
    wal_number: u64,
}

impl MemTable {
    /// Create a new empty memtable with given size limit, backed by WAL
    /// segment `wal_number`.
    pub fn new(size_limit: usize, wal_number: u64) -> Self {
        MemTable {
            data: RwLock::new(SkipList::new(internal_key_order)),
            size_limit,
            wal_number,
        }
    }

    pub fn wal_number(&self) -> u64 {
        self.wal_number
    }

    /// Insert a value for `key` at `sequence`.
    pub fn put(&self, key: &[u8], sequence: u64, value: &[u8]) {
        let ikey = InternalKey::new(key.to_vec(), sequence, ValueType::Put);
        self.data.write().insert(ikey.encode(), value.to_vec());
    }

    /// Mark a key as deleted at `sequence` by writing a tombstone.
    pub fn delete(&self, key: &[u8], sequence: u64) {
        let ikey = InternalKey::new(key.to_vec(), sequence, ValueType::Delete);
        self.data.write().insert(ikey.encode(), Vec::new());
    }

    /// Look up the newest entry for `key` visible at `snapshot`.
    ///
    /// Seeks to the first internal key at or after `(key, snapshot)`; thanks
    /// to the descending trailer order that skips every newer-than-snapshot
    /// entry, so the landing point (if it still has our user key) is the one
    /// that decides the lookup.
    pub fn get(&self, key: &[u8], snapshot: u64) -> LookupResult {
        let seek = InternalKey::for_seek(key.to_vec(), snapshot).encode();
        let guard = self.data.read();
        match guard.first_at_or_after(&seek) {
            Some((ikey, value)) if user_key_of(ikey) == key => {
                if (tag_of(ikey) & 0xff) as u8 == ValueType::Delete as u8 {
                    LookupResult::Deleted
                } else {
                    LookupResult::Found(value.to_vec())
                }
            }
            _ => LookupResult::Missing,
        }
    }

    /// Current memory usage in bytes.
    pub fn size(&self) -> usize {
        self.data.read().size_bytes()
    }

    /// Number of entries (tombstones included).
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Check if memtable has reached the flush threshold.
    pub fn is_full(&self) -> bool {
        self.size() >= self.size_limit
    }
}

/// Owning iterator over one memtable, in internal-key order.
///
/// Holds an `Arc` to the memtable and re-seeks on every step instead of
/// borrowing through the lock: each operation takes the read lock, finds
/// the position from the saved key, and copies the entry out. Costs
/// O(log n) per step but never blocks writers and has no lifetime tie to
/// the table. Safe under concurrent inserts because the skip list only
/// grows and internal keys are never removed.
pub struct MemTableIterator {
    mem: Arc<MemTable>,
    key: Vec<u8>,
    value: Vec<u8>,
    valid: bool,
}

impl MemTableIterator {
    pub fn new(mem: Arc<MemTable>) -> Self {
        let mut iter = MemTableIterator {
            mem,
            key: Vec::new(),
            value: Vec::new(),
            valid: false,
        };
        iter.position_first();
        iter
    }

    fn position_first(&mut self) {
        let mem = Arc::clone(&self.mem);
        let guard = mem.data.read();
        self.capture(guard.first());
    }

    fn capture(&mut self, entry: Option<(&[u8], &[u8])>) {
        match entry {
            Some((key, value)) => {
                self.key.clear();
                self.key.extend_from_slice(key);
                self.value.clear();
                self.value.extend_from_slice(value);
                self.valid = true;
            }
            None => self.valid = false,
        }
    }
}

impl StorageIterator for MemTableIterator {
    fn key(&self) -> &[u8] {
        if self.valid { &self.key } else { &[] }
    }

    fn value(&self) -> &[u8] {
        if self.valid { &self.value } else { &[] }
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn next(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        let current = std::mem::take(&mut self.key);
        let mem = Arc::clone(&self.mem);
        let guard = mem.data.read();
        self.capture(guard.first_after(&current));
        drop(guard);
        if !self.valid {
            self.key = current;
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        let current = std::mem::take(&mut self.key);
        let mem = Arc::clone(&self.mem);
        let guard = mem.data.read();
        self.capture(guard.last_before(&current));
        drop(guard);
        if !self.valid {
            self.key = current;
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let mem = Arc::clone(&self.mem);
        let guard = mem.data.read();
        self.capture(guard.first_at_or_after(key));
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.position_first();
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let mem = Arc::clone(&self.mem);
        let guard = mem.data.read();
        self.capture(guard.last());
        Ok(())
    }
}

/// Owns the active memtable and the queue of frozen ones awaiting flush.
///
/// Writes land in the active table. When the engine decides to freeze
/// (table full, or WAL replayed on recovery), the active table moves to
/// the back of the frozen queue and a fresh one takes its place. The
/// flush worker drains the queue oldest-first so WAL segments can be
/// retired in order.
pub struct MemTableManager {
    capacity: usize,
    active: RwLock<Arc<MemTable>>,
    /// Oldest first.
    frozen: RwLock<Vec<Arc<MemTable>>>,
}

impl MemTableManager {
    pub fn new(capacity: usize, wal_number: u64) -> Self {
        MemTableManager {
            capacity,
            active: RwLock::new(Arc::new(MemTable::new(capacity, wal_number))),
            frozen: RwLock::new(Vec::new()),
        }
    }

    pub fn put(&self, key: &[u8], sequence: u64, value: &[u8]) {
        self.active.read().put(key, sequence, value);
    }

    pub fn delete(&self, key: &[u8], sequence: u64) {
        self.active.read().delete(key, sequence);
    }

    /// Look up `key` at `snapshot`: active table first, then frozen tables
    /// newest-first. The first table that knows the key decides.
    pub fn get(&self, key: &[u8], snapshot: u64) -> LookupResult {
        match self.active.read().get(key, snapshot) {
            LookupResult::Missing => {}
            hit => return hit,
        }
        for mem in self.frozen.read().iter().rev() {
            match mem.get(key, snapshot) {
                LookupResult::Missing => {}
                hit => return hit,
            }
        }
        LookupResult::Missing
    }

    /// Freeze the active memtable and start a fresh one backed by WAL
    /// segment `new_wal_number`. Returns the frozen table.
    pub fn freeze(&self, new_wal_number: u64) -> Arc<MemTable> {
        let mut active = self.active.write();
        let frozen = std::mem::replace(
            &mut *active,
            Arc::new(MemTable::new(self.capacity, new_wal_number)),
        );
        self.frozen.write().push(frozen.clone());
        frozen
    }

    pub fn has_immutable(&self) -> bool {
        !self.frozen.read().is_empty()
    }

    pub fn immutable_count(&self) -> usize {
        self.frozen.read().len()
    }

    pub fn oldest_immutable(&self) -> Option<Arc<MemTable>> {
        self.frozen.read().first().cloned()
    }

    /// Drop the oldest frozen memtable after its flush has been published.
    pub fn remove_oldest_immutable(&self) {
        let mut frozen = self.frozen.write();
        if !frozen.is_empty() {
            frozen.remove(0);
        }
    }

    pub fn active(&self) -> Arc<MemTable> {
        self.active.read().clone()
    }

    pub fn active_size(&self) -> usize {
        self.active.read().size()
    }

    pub fn is_active_full(&self) -> bool {
        self.active.read().is_full()
    }

    /// Every live memtable, newest first (active, then frozen back to
    /// front). Read paths walk this order so newer writes win.
    pub fn all(&self) -> Vec<Arc<MemTable>> {
        let mut tables = vec![self.active.read().clone()];
        let frozen = self.frozen.read();
        tables.extend(frozen.iter().rev().cloned());
        tables
    }
}
