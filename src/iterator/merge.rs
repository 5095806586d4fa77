use std::cmp::Ordering;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::internal_key_order;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used for:
/// - Range scans across memtables + all SSTable levels
/// - Compaction (merging SSTables)
///
/// Yields every entry from every source in (user_key ASC, sequence DESC)
/// order; it does NOT collapse versions or drop tombstones. Readers need
/// snapshot filtering and compaction needs every version, so both layers
/// above do their own winnowing.
///
/// When two sources hold byte-identical internal keys the lower child
/// index wins first, so callers put newer sources before older ones.
///
/// Selection is a linear scan over the children rather than a heap: a
/// direction change has to reposition every child anyway, and the child
/// count (a few memtables, the L0 files, one iterator per deeper level)
/// stays small enough that O(k) selection beats heap bookkeeping.
pub struct MergeIterator {
    children: Vec<Box<dyn StorageIterator>>,
    current: Option<usize>,
    direction: Direction,
}

impl MergeIterator {
    /// Create a MergeIterator from sources already positioned at their
    /// first entry. Sources are ordered by priority: index 0 = newest
    /// (memtable), higher indices = older (deeper SSTable levels).
    pub fn new(children: Vec<Box<dyn StorageIterator>>) -> Self {
        let mut iter = MergeIterator {
            children,
            current: None,
            direction: Direction::Forward,
        };
        iter.find_smallest();
        iter
    }

    /// Pick the child with the smallest current key; ties go to the
    /// earlier (newer) child.
    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (idx, child) in self.children.iter().enumerate() {
            if !child.is_valid() {
                continue;
            }
            match smallest {
                None => smallest = Some(idx),
                Some(best) => {
                    if internal_key_order(child.key(), self.children[best].key())
                        == Ordering::Less
                    {
                        smallest = Some(idx);
                    }
                }
            }
        }
        self.current = smallest;
    }

    /// Pick the child with the largest current key; ties go to the later
    /// (older) child, which is the entry reverse order visits first.
    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (idx, child) in self.children.iter().enumerate().rev() {
            if !child.is_valid() {
                continue;
            }
            match largest {
                None => largest = Some(idx),
                Some(best) => {
                    if internal_key_order(child.key(), self.children[best].key())
                        == Ordering::Greater
                    {
                        largest = Some(idx);
                    }
                }
            }
        }
        self.current = largest;
    }
}

impl StorageIterator for MergeIterator {
    fn key(&self) -> &[u8] {
        match self.current {
            Some(idx) => self.children[idx].key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(idx) => self.children[idx].value(),
            None => &[],
        }
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        let Some(current) = self.current else {
            return Ok(());
        };

        // After reverse iteration the non-current children sit BEFORE the
        // current key. Bring every child to the first entry after it, then
        // advance the current child itself.
        if self.direction == Direction::Reverse {
            let key = self.children[current].key().to_vec();
            for (idx, child) in self.children.iter_mut().enumerate() {
                if idx == current {
                    continue;
                }
                child.seek(&key)?;
                if child.is_valid() && child.key() == key.as_slice() {
                    child.next()?;
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next()?;
        self.find_smallest();
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let Some(current) = self.current else {
            return Ok(());
        };

        // Mirror of next(): park every other child on the last entry
        // before the current key.
        if self.direction == Direction::Forward {
            let key = self.children[current].key().to_vec();
            for (idx, child) in self.children.iter_mut().enumerate() {
                if idx == current {
                    continue;
                }
                child.seek(&key)?;
                if child.is_valid() {
                    child.prev()?;
                } else {
                    // Every entry in this child is before the key.
                    child.seek_to_last()?;
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current].prev()?;
        self.find_largest();
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        for child in &mut self.children {
            child.seek(key)?;
        }
        self.direction = Direction::Forward;
        self.find_smallest();
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_first()?;
        }
        self.direction = Direction::Forward;
        self.find_smallest();
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_last()?;
        }
        self.direction = Direction::Reverse;
        self.find_largest();
        Ok(())
    }
}
