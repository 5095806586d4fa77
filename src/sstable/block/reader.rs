use std::cmp::Ordering;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::types::Comparator;

/// A decoded block: sorted entries plus the restart array that indexes them.
///
/// The raw bytes stay in one refcounted buffer (`Bytes`), so cloning a
/// Block is cheap and iterators can own their block without copying it.
///
/// Seeks binary search the restart points (each stores an uncompressed
/// key), then scan forward through at most RESTART_INTERVAL entries,
/// reassembling prefix-compressed keys along the way.
#[derive(Clone)]
pub struct Block {
    data: Bytes,
    /// Byte offset where the restart array begins (end of entry data).
    restarts_offset: usize,
    num_restarts: usize,
    comparator: Comparator,
}

impl Block {
    /// Decode a block from its serialized form (without the CRC trailer;
    /// the table layer verifies and strips that).
    pub fn decode(data: Vec<u8>, comparator: Comparator) -> Result<Block> {
        if data.len() < 8 {
            return Err(Error::corruption("block too short"));
        }
        let num_restarts =
            u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap()) as usize;
        if num_restarts == 0 {
            return Err(Error::corruption("block has no restart points"));
        }
        let restarts_len = num_restarts
            .checked_mul(4)
            .and_then(|n| n.checked_add(4))
            .ok_or_else(|| Error::corruption("restart count overflow"))?;
        if restarts_len > data.len() {
            return Err(Error::corruption("restart array exceeds block"));
        }
        let restarts_offset = data.len() - restarts_len;

        Ok(Block {
            data: Bytes::from(data),
            restarts_offset,
            num_restarts,
            comparator,
        })
    }

    /// Approximate in-memory footprint, used for cache accounting.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, index: usize) -> usize {
        let at = self.restarts_offset + index * 4;
        u32::from_le_bytes(self.data[at..at + 4].try_into().unwrap()) as usize
    }

    /// Exact-match lookup. Returns the value if the key is present.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let mut iter = self.iter();
        iter.seek(key).ok()?;
        if iter.is_valid() && (self.comparator)(iter.key(), key) == Ordering::Equal {
            let (start, end) = iter.value_range;
            Some(&self.data[start..end])
        } else {
            None
        }
    }

    /// Iterator over the block, positioned at the first entry.
    pub fn iter(&self) -> BlockIterator {
        let mut iter = BlockIterator {
            block: self.clone(),
            current_offset: 0,
            restart_index: 0,
            key: Vec::new(),
            value_range: (0, 0),
            valid: false,
        };
        // Decode errors surface on the next seek/next call.
        let _ = iter.seek_to_restart(0);
        iter
    }

    /// Decode the full (uncompressed) key stored at a restart point.
    fn key_at_restart(&self, index: usize) -> Result<&[u8]> {
        let offset = self.restart_point(index);
        let entry = self.parse_entry(offset)?;
        if entry.shared != 0 {
            return Err(Error::corruption("restart entry has shared prefix"));
        }
        Ok(&self.data[entry.suffix_start..entry.suffix_start + entry.unshared])
    }

    fn parse_entry(&self, offset: usize) -> Result<ParsedEntry> {
        if offset + 8 > self.restarts_offset {
            return Err(Error::corruption("block entry header out of bounds"));
        }
        let shared = u16::from_le_bytes(self.data[offset..offset + 2].try_into().unwrap()) as usize;
        let unshared =
            u16::from_le_bytes(self.data[offset + 2..offset + 4].try_into().unwrap()) as usize;
        let value_len =
            u32::from_le_bytes(self.data[offset + 4..offset + 8].try_into().unwrap()) as usize;

        let suffix_start = offset + 8;
        let value_start = suffix_start + unshared;
        let next_offset = value_start + value_len;
        if next_offset > self.restarts_offset {
            return Err(Error::corruption("block entry body out of bounds"));
        }

        Ok(ParsedEntry {
            shared,
            unshared,
            suffix_start,
            value_start,
            value_len,
            next_offset,
        })
    }
}

struct ParsedEntry {
    shared: usize,
    unshared: usize,
    suffix_start: usize,
    value_start: usize,
    value_len: usize,
    next_offset: usize,
}

/// Iterator over one block's entries.
///
/// Keeps the current key materialized in `key`: prefix compression means
/// an entry only makes sense relative to its predecessor, so the iterator
/// rebuilds keys as it walks a restart run.
pub struct BlockIterator {
    block: Block,
    /// Offset of the current entry within the block data.
    current_offset: usize,
    restart_index: usize,
    key: Vec<u8>,
    value_range: (usize, usize),
    valid: bool,
}

impl BlockIterator {
    /// Position at the first entry of restart run `index`.
    fn seek_to_restart(&mut self, index: usize) -> Result<()> {
        self.restart_index = index;
        self.current_offset = self.block.restart_point(index);
        self.key.clear();
        self.load_entry()
    }

    /// Decode the entry at `current_offset`, extending the key from the
    /// shared prefix already in `self.key`.
    fn load_entry(&mut self) -> Result<()> {
        if self.current_offset >= self.block.restarts_offset {
            self.valid = false;
            return Ok(());
        }
        let entry = match self.block.parse_entry(self.current_offset) {
            Ok(entry) => entry,
            Err(e) => {
                self.valid = false;
                return Err(e);
            }
        };
        if entry.shared > self.key.len() {
            self.valid = false;
            return Err(Error::corruption("shared prefix longer than previous key"));
        }

        self.key.truncate(entry.shared);
        self.key
            .extend_from_slice(&self.block.data[entry.suffix_start..entry.suffix_start + entry.unshared]);
        self.value_range = (entry.value_start, entry.value_start + entry.value_len);
        self.valid = true;
        Ok(())
    }

    /// Step to the entry after the current one.
    fn step(&mut self) -> Result<()> {
        let entry = self.block.parse_entry(self.current_offset)?;
        self.current_offset = entry.next_offset;
        // Track which restart run we are in so prev() can rewind.
        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) <= self.current_offset
        {
            self.restart_index += 1;
        }
        self.load_entry()
    }
}

impl StorageIterator for BlockIterator {
    fn key(&self) -> &[u8] {
        if self.valid { &self.key } else { &[] }
    }

    fn value(&self) -> &[u8] {
        if self.valid {
            &self.block.data[self.value_range.0..self.value_range.1]
        } else {
            &[]
        }
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn next(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        self.step()
    }

    fn prev(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        let original = self.current_offset;

        // Find the restart run that starts strictly before the current
        // entry, then walk forward to the entry just before it.
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                // Already at the first entry.
                self.valid = false;
                return Ok(());
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart(self.restart_index)?;
        loop {
            let entry = self.block.parse_entry(self.current_offset)?;
            if entry.next_offset >= original {
                return Ok(());
            }
            self.current_offset = entry.next_offset;
            self.load_entry()?;
        }
    }

    /// Binary search the restart points for the last one with key <= target,
    /// then scan forward within the run.
    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let mut left = 0;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let restart_key = self.block.key_at_restart(mid)?;
            if (self.block.comparator)(restart_key, target) == Ordering::Greater {
                right = mid - 1;
            } else {
                left = mid;
            }
        }

        self.seek_to_restart(left)?;
        while self.valid && (self.block.comparator)(&self.key, target) == Ordering::Less {
            self.step()?;
        }
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.seek_to_restart(0)
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.seek_to_restart(self.block.num_restarts - 1)?;
        while self.valid {
            let entry = self.block.parse_entry(self.current_offset)?;
            if entry.next_offset >= self.block.restarts_offset {
                return Ok(());
            }
            self.current_offset = entry.next_offset;
            self.load_entry()?;
        }
        Ok(())
    }
}
