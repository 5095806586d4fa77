use std::sync::Arc;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::block::reader::BlockIterator;
use crate::sstable::reader::SSTable;
use crate::types::internal_key_order;

/// Iterator over every entry of one SSTable, in internal-key order.
///
/// Holds one decoded block at a time and moves block to block through the
/// index. Owns an `Arc` to the table so it can outlive the version that
/// handed it out (compactions and long scans keep tables alive this way).
pub struct SSTableIterator {
    table: Arc<SSTable>,
    block_idx: usize,
    block_iter: Option<BlockIterator>,
}

impl SSTableIterator {
    /// Create an iterator positioned at the table's first entry.
    pub fn new(table: Arc<SSTable>) -> Self {
        let mut iter = SSTableIterator {
            table,
            block_idx: 0,
            block_iter: None,
        };
        // Position errors surface on the first seek/next call.
        let _ = iter.seek_to_first();
        iter
    }

    fn load_block(&mut self, block_idx: usize) -> Result<()> {
        self.block_idx = block_idx;
        let block = self.table.read_block(block_idx)?;
        self.block_iter = Some(block.iter());
        Ok(())
    }
}

impl StorageIterator for SSTableIterator {
    fn key(&self) -> &[u8] {
        match &self.block_iter {
            Some(iter) => iter.key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match &self.block_iter {
            Some(iter) => iter.value(),
            None => &[],
        }
    }

    fn is_valid(&self) -> bool {
        self.block_iter.as_ref().is_some_and(|iter| iter.is_valid())
    }

    fn next(&mut self) -> Result<()> {
        let Some(iter) = &mut self.block_iter else {
            return Ok(());
        };
        if !iter.is_valid() {
            return Ok(());
        }
        iter.next()?;
        if !iter.is_valid() && self.block_idx + 1 < self.table.block_count() {
            let next_idx = self.block_idx + 1;
            self.load_block(next_idx)?;
            if let Some(iter) = &mut self.block_iter {
                iter.seek_to_first()?;
            }
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let Some(iter) = &mut self.block_iter else {
            return Ok(());
        };
        if !iter.is_valid() {
            return Ok(());
        }
        iter.prev()?;
        if !iter.is_valid() {
            if self.block_idx == 0 {
                return Ok(());
            }
            let prev_idx = self.block_idx - 1;
            self.load_block(prev_idx)?;
            if let Some(iter) = &mut self.block_iter {
                iter.seek_to_last()?;
            }
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        // First block whose last key is >= target holds the landing entry.
        let block_idx = match self
            .table
            .index_search(|last_key| internal_key_order(last_key, key))
        {
            Some(idx) => idx,
            None => {
                // Past every block: leave the iterator invalid at the end.
                if self.table.block_count() > 0 {
                    let last_idx = self.table.block_count() - 1;
                    self.load_block(last_idx)?;
                    if let Some(iter) = &mut self.block_iter {
                        iter.seek(key)?;
                    }
                } else {
                    self.block_iter = None;
                }
                return Ok(());
            }
        };

        self.load_block(block_idx)?;
        if let Some(iter) = &mut self.block_iter {
            iter.seek(key)?;
        }
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        if self.table.block_count() == 0 {
            self.block_iter = None;
            return Ok(());
        }
        self.load_block(0)?;
        if let Some(iter) = &mut self.block_iter {
            iter.seek_to_first()?;
        }
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        if self.table.block_count() == 0 {
            self.block_iter = None;
            return Ok(());
        }
        let last_idx = self.table.block_count() - 1;
        self.load_block(last_idx)?;
        if let Some(iter) = &mut self.block_iter {
            iter.seek_to_last()?;
        }
        Ok(())
    }
}
