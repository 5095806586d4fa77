use std::sync::Arc;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::{SSTable, SSTableIterator};
use crate::types::internal_key_order;

/// Iterates one level's tables as a single sorted stream.
///
/// Levels below L0 hold tables with disjoint key ranges, sorted by
/// smallest key, so the level reads like one big sorted file: binary
/// search picks the table, and only one table iterator is open at a
/// time. Feeding a level through this instead of handing every table to
/// the merge iterator keeps the merge width at one per level.
pub struct ConcatIterator {
    tables: Vec<Arc<SSTable>>,
    table_idx: usize,
    current: Option<SSTableIterator>,
}

impl ConcatIterator {
    /// Create an iterator over `tables` (sorted, non-overlapping),
    /// positioned at the first entry.
    pub fn new(tables: Vec<Arc<SSTable>>) -> Self {
        let mut iter = ConcatIterator {
            tables,
            table_idx: 0,
            current: None,
        };
        let _ = iter.seek_to_first();
        iter
    }

    fn open_table(&mut self, table_idx: usize) -> Result<()> {
        self.table_idx = table_idx;
        self.current = Some(self.tables[table_idx].iter());
        Ok(())
    }
}

impl StorageIterator for ConcatIterator {
    fn key(&self) -> &[u8] {
        match &self.current {
            Some(iter) => iter.key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match &self.current {
            Some(iter) => iter.value(),
            None => &[],
        }
    }

    fn is_valid(&self) -> bool {
        self.current.as_ref().is_some_and(|iter| iter.is_valid())
    }

    fn next(&mut self) -> Result<()> {
        let Some(iter) = &mut self.current else {
            return Ok(());
        };
        if !iter.is_valid() {
            return Ok(());
        }
        iter.next()?;
        if !iter.is_valid() && self.table_idx + 1 < self.tables.len() {
            let next_idx = self.table_idx + 1;
            self.open_table(next_idx)?;
            if let Some(iter) = &mut self.current {
                iter.seek_to_first()?;
            }
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let Some(iter) = &mut self.current else {
            return Ok(());
        };
        if !iter.is_valid() {
            return Ok(());
        }
        iter.prev()?;
        if !iter.is_valid() {
            if self.table_idx == 0 {
                return Ok(());
            }
            let prev_idx = self.table_idx - 1;
            self.open_table(prev_idx)?;
            if let Some(iter) = &mut self.current {
                iter.seek_to_last()?;
            }
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        // First table whose largest key is >= target can hold the landing
        // entry; earlier tables are entirely smaller.
        let table_idx = self
            .tables
            .partition_point(|t| internal_key_order(&t.meta().max_key, key).is_lt());
        if table_idx >= self.tables.len() {
            self.current = None;
            self.table_idx = self.tables.len();
            return Ok(());
        }
        self.open_table(table_idx)?;
        if let Some(iter) = &mut self.current {
            iter.seek(key)?;
        }
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        if self.tables.is_empty() {
            self.current = None;
            return Ok(());
        }
        self.open_table(0)?;
        if let Some(iter) = &mut self.current {
            iter.seek_to_first()?;
        }
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        if self.tables.is_empty() {
            self.current = None;
            return Ok(());
        }
        let last_idx = self.tables.len() - 1;
        self.open_table(last_idx)?;
        if let Some(iter) = &mut self.current {
            iter.seek_to_last()?;
        }
        Ok(())
    }
}
