use std::sync::Arc;

use crate::db::DbInner;
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::iterator::concat::ConcatIterator;
use crate::iterator::merge::MergeIterator;
use crate::manifest::Version;
use crate::memtable::MemTableIterator;
use crate::types::{InternalKey, MAX_SEQUENCE, ValueType, sequence_of, tag_of, user_key_of};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Ordered cursor over the user-visible contents of the store.
///
/// Internally a merge over every live source: the memtables, each L0
/// table, and one concatenated run per deeper level. The merge yields raw
/// internal entries; this cursor resolves them against the snapshot taken
/// at creation, newest visible version wins, tombstones hide what they
/// shadow. The snapshot stays pinned (and the sources alive) until the
/// cursor is dropped, so long scans are never disturbed by flushes or
/// compactions.
///
/// Reverse iteration flips the merge around: walking backward shows a
/// key's versions oldest first, so the reverse scan keeps the last state
/// seen before each key change.
pub struct DbIterator {
    inner: Arc<DbInner>,
    iter: MergeIterator,
    snapshot: u64,
    /// Inclusive lower user-key bound.
    lower: Option<Vec<u8>>,
    /// Exclusive upper user-key bound.
    upper: Option<Vec<u8>>,
    direction: Direction,
    /// Direction the `Iterator` impl walks. The cursor methods are
    /// absolute and ignore it.
    reverse: bool,
    /// Set once the `Iterator` impl has yielded the current entry;
    /// cleared by every repositioning call.
    consumed: bool,
    key: Vec<u8>,
    value: Vec<u8>,
    valid: bool,
    /// Keeps every table the merge reads alive for the cursor's lifetime.
    _version: Arc<Version>,
}

impl DbIterator {
    /// Builds an unpositioned cursor. Memtables are captured before the
    /// version: a flush racing this constructor then shows its data twice
    /// (harmless, the visibility walk dedups by user key) instead of not
    /// at all.
    pub(crate) fn new(
        inner: Arc<DbInner>,
        lower: Option<Vec<u8>>,
        upper: Option<Vec<u8>>,
        reverse: bool,
    ) -> DbIterator {
        let snapshot = inner.pin_read_snapshot();
        let memtables = inner.memtables.all();
        let version = inner.versions.lock().current();

        let mut children: Vec<Box<dyn StorageIterator>> = Vec::new();
        for mem in memtables {
            children.push(Box::new(MemTableIterator::new(mem)));
        }
        for handle in &version.levels[0] {
            children.push(Box::new(handle.table.iter()));
        }
        for level in &version.levels[1..] {
            if !level.is_empty() {
                let tables = level.iter().map(|h| h.table.clone()).collect();
                children.push(Box::new(ConcatIterator::new(tables)));
            }
        }

        DbIterator {
            inner,
            iter: MergeIterator::new(children),
            snapshot,
            lower,
            upper,
            direction: Direction::Forward,
            reverse,
            consumed: false,
            key: Vec::new(),
            value: Vec::new(),
            valid: false,
            _version: version,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Current user key. Only valid while `is_valid()`.
    pub fn key(&self) -> &[u8] {
        if self.valid { &self.key } else { &[] }
    }

    /// Current value. Only valid while `is_valid()`.
    pub fn value(&self) -> &[u8] {
        if self.valid { &self.value } else { &[] }
    }

    /// Positions at the first key in range.
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.consumed = false;
        self.direction = Direction::Forward;
        match self.lower.clone() {
            Some(lower) => {
                let target = InternalKey::for_seek(lower, self.snapshot).encode();
                self.iter.seek(&target)?;
            }
            None => self.iter.seek_to_first()?,
        }
        self.find_next_visible(None)
    }

    /// Positions at the last key in range.
    pub fn seek_to_last(&mut self) -> Result<()> {
        self.consumed = false;
        self.direction = Direction::Reverse;
        match self.upper.clone() {
            Some(upper) => {
                // Land on the first entry at or past the excluded bound,
                // then step just below it.
                let target = InternalKey::for_seek(upper, MAX_SEQUENCE).encode();
                self.iter.seek(&target)?;
                if self.iter.is_valid() {
                    self.iter.prev()?;
                } else {
                    self.iter.seek_to_last()?;
                }
            }
            None => self.iter.seek_to_last()?,
        }
        self.find_prev_visible()
    }

    /// Positions at the first key in range at or after `key`.
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.consumed = false;
        self.direction = Direction::Forward;
        let from = match &self.lower {
            Some(lower) if key < lower.as_slice() => lower.clone(),
            _ => key.to_vec(),
        };
        let target = InternalKey::for_seek(from, self.snapshot).encode();
        self.iter.seek(&target)?;
        self.find_next_visible(None)
    }

    /// Advances to the next live key. No-op when already exhausted.
    pub fn next(&mut self) -> Result<()> {
        self.consumed = false;
        if !self.valid {
            return Ok(());
        }
        if self.direction == Direction::Reverse {
            // The merge cursor sits just before the current key's entries;
            // hop back over them and resume the forward walk.
            self.direction = Direction::Forward;
            if self.iter.is_valid() {
                self.iter.next()?;
            } else {
                self.iter.seek_to_first()?;
            }
        } else {
            self.iter.next()?;
        }
        let skip = std::mem::take(&mut self.key);
        self.find_next_visible(Some(skip))
    }

    /// Steps back to the previous live key. No-op when already exhausted.
    pub fn prev(&mut self) -> Result<()> {
        self.consumed = false;
        if !self.valid {
            return Ok(());
        }
        if self.direction == Direction::Forward {
            // Walk the merge cursor to just before the current key's
            // entries so the reverse scan starts clean.
            loop {
                self.iter.prev()?;
                if !self.iter.is_valid() {
                    break;
                }
                if user_key_of(self.iter.key()) < self.key.as_slice() {
                    break;
                }
            }
            self.direction = Direction::Reverse;
            if !self.iter.is_valid() {
                self.valid = false;
                self.key.clear();
                self.value.clear();
                return Ok(());
            }
        }
        self.find_prev_visible()
    }

    /// Forward walk to the newest visible version of the next live user
    /// key. Keys at or below `skip` are passed over, as are versions newer
    /// than the snapshot and anything a tombstone shadows.
    fn find_next_visible(&mut self, mut skip: Option<Vec<u8>>) -> Result<()> {
        loop {
            if !self.iter.is_valid() {
                self.valid = false;
                return Ok(());
            }
            let ikey = self.iter.key();
            let user_key = user_key_of(ikey);
            if let Some(upper) = &self.upper {
                if user_key >= upper.as_slice() {
                    self.valid = false;
                    return Ok(());
                }
            }
            if sequence_of(ikey) <= self.snapshot
                && !skip.as_deref().is_some_and(|s| user_key <= s)
            {
                if (tag_of(ikey) & 0xff) as u8 == ValueType::Delete as u8 {
                    // Tombstone: every older version of this key is dead.
                    skip = Some(user_key.to_vec());
                } else {
                    self.key.clear();
                    self.key.extend_from_slice(user_key);
                    self.value.clear();
                    self.value.extend_from_slice(self.iter.value());
                    self.valid = true;
                    return Ok(());
                }
            }
            self.iter.next()?;
        }
    }

    /// Reverse walk to the newest visible version of the previous live
    /// user key. Leaves the merge cursor just before that key's entries.
    fn find_prev_visible(&mut self) -> Result<()> {
        // Backward order shows each key's versions oldest first, so keep
        // overwriting; the state held when the key changes is the newest
        // visible version.
        let mut found_put = false;
        self.key.clear();
        self.value.clear();
        while self.iter.is_valid() {
            let ikey = self.iter.key();
            if sequence_of(ikey) <= self.snapshot {
                let user_key = user_key_of(ikey);
                if found_put && user_key < self.key.as_slice() {
                    break;
                }
                if (tag_of(ikey) & 0xff) as u8 == ValueType::Delete as u8 {
                    found_put = false;
                    self.key.clear();
                    self.value.clear();
                } else {
                    found_put = true;
                    self.key.clear();
                    self.key.extend_from_slice(user_key);
                    self.value.clear();
                    self.value.extend_from_slice(self.iter.value());
                }
            }
            self.iter.prev()?;
        }
        if !found_put {
            self.valid = false;
            self.direction = Direction::Forward;
            return Ok(());
        }
        if let Some(lower) = &self.lower {
            if self.key.as_slice() < lower.as_slice() {
                self.valid = false;
                return Ok(());
            }
        }
        self.valid = true;
        Ok(())
    }
}

/// Lazy sequence view of the cursor, stepping in the direction the scan
/// was opened with. The current entry is yielded before the cursor moves,
/// so cursor calls and iterator consumption can be mixed freely.
impl Iterator for DbIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.consumed {
            let step = if self.reverse {
                self.prev()
            } else {
                DbIterator::next(self)
            };
            if let Err(e) = step {
                self.valid = false;
                return Some(Err(e));
            }
        }
        if !self.valid {
            return None;
        }
        self.consumed = true;
        Some(Ok((self.key.clone(), self.value.clone())))
    }
}

impl Drop for DbIterator {
    fn drop(&mut self) {
        self.inner.unpin_snapshot(self.snapshot);
    }
}
