use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bloom::BloomFilter;
use crate::cache::BlockCache;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::sstable::block::reader::Block;
use crate::sstable::footer::{Footer, IndexEntry, SSTableMeta};
use crate::sstable::iterator::SSTableIterator;
use crate::types::{InternalKey, LookupResult, ValueType, internal_key_order, tag_of, user_key_of};

/// An opened SSTable file. Supports point lookups and range scans.
///
/// On open:
/// 1. Read footer (last 40 bytes) → find index and filter block positions
/// 2. Read and parse index block → Vec<IndexEntry>
/// 3. Read and deserialize the bloom filter
/// 4. Ready for queries (data blocks read on demand, via the cache if one
///    is attached)
///
/// The authoritative `SSTableMeta` comes from the manifest, not the file:
/// the manifest decided this file is part of the database, so its record
/// of id, level and key range is what the rest of the engine trusts.
pub struct SSTable {
    /// Path to the SSTable file (for debugging/error messages).
    path: PathBuf,
    /// Open file handle for reading data blocks. Tables are shared across
    /// reader threads and the compaction worker, hence the mutex.
    file: Mutex<File>,
    /// Index entries parsed from the index block.
    /// Each entry maps a block's last key to its file location.
    index: Vec<IndexEntry>,
    /// Bloom filter over user keys; lets miss-heavy lookups skip the file.
    filter: Option<BloomFilter>,
    /// Metadata about this SSTable (min/max keys, entry count, etc.).
    meta: SSTableMeta,
    /// Shared block cache, if the engine has one.
    cache: Option<Arc<BlockCache>>,
}

impl SSTable {
    /// Open an SSTable file described by a manifest record.
    ///
    /// Reads the footer from the end of the file, then uses footer
    /// offsets to read the index block and bloom filter into memory.
    pub fn open(path: &Path, meta: SSTableMeta, cache: Option<Arc<BlockCache>>) -> Result<Self> {
        let mut file = File::open(path)?;

        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(Error::Corruption("file too short to contain footer".into()));
        }
        if file_size != meta.file_size {
            return Err(Error::Corruption(format!(
                "table {} is {} bytes, manifest says {}",
                meta.id, file_size, meta.file_size
            )));
        }

        // Read footer (last 40 bytes)
        let footer_offset = file_size - Footer::SIZE as u64;
        file.seek(SeekFrom::Start(footer_offset))?;
        let mut footer_buf = vec![0u8; Footer::SIZE];
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        // Read and parse the index block
        let index_buf = read_checked(
            &mut file,
            path,
            footer.index_block_offset,
            footer.index_block_size as usize,
        )?;
        let mut index = Vec::new();
        let mut offset = 0usize;
        while offset < index_buf.len() {
            let (entry, consumed) = IndexEntry::decode(&index_buf[offset..])?;
            index.push(entry);
            offset += consumed;
        }

        // Read the bloom filter
        let filter = if footer.filter_block_size > 0 {
            let filter_buf = read_checked(
                &mut file,
                path,
                footer.filter_block_offset,
                footer.filter_block_size as usize,
            )?;
            Some(BloomFilter::deserialize(&filter_buf)?)
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
            filter,
            meta,
            cache,
        })
    }

    /// Point lookup: newest entry for `user_key` visible at `snapshot`.
    ///
    /// Algorithm:
    /// 1. Check if the key is outside [min_key, max_key] → Missing
    /// 2. Ask the bloom filter → Missing without touching disk
    /// 3. Binary search index → find the right data block
    /// 4. Seek within that block; the landing entry decides
    pub fn get(&self, user_key: &[u8], snapshot: u64) -> Result<LookupResult> {
        // Step 1: Range check using manifest metadata
        if self.index.is_empty()
            || user_key < user_key_of(&self.meta.min_key)
            || user_key > user_key_of(&self.meta.max_key)
        {
            return Ok(LookupResult::Missing);
        }

        // Step 2: Bloom filter — a false here is definitive
        if let Some(filter) = &self.filter {
            if !filter.may_contain(user_key) {
                return Ok(LookupResult::Missing);
            }
        }

        // Step 3: Binary search the index to find the right block.
        // Index is sorted by last_key, so we find the first block where
        // last_key >= seek key (lower_bound)
        let seek_key = InternalKey::for_seek(user_key.to_vec(), snapshot).encode();
        let block_idx = match self
            .index
            .binary_search_by(|entry| internal_key_order(&entry.last_key, &seek_key))
        {
            Ok(idx) => idx,
            Err(idx) => {
                if idx >= self.index.len() {
                    // Every entry is newer than the snapshot allows.
                    return Ok(LookupResult::Missing);
                }
                idx
            }
        };

        // Step 4: Read the block and seek within it. The landing entry is
        // the first one at or below the snapshot; if it still carries our
        // user key, it decides the lookup.
        let block = self.read_block(block_idx)?;
        let mut iter = block.iter();
        iter.seek(&seek_key)?;
        if iter.is_valid() && user_key_of(iter.key()) == user_key {
            if (tag_of(iter.key()) & 0xff) as u8 == ValueType::Delete as u8 {
                Ok(LookupResult::Deleted)
            } else {
                Ok(LookupResult::Found(iter.value().to_vec()))
            }
        } else {
            Ok(LookupResult::Missing)
        }
    }

    /// Fetch a data block by index position, consulting the cache first.
    pub(crate) fn read_block(&self, block_idx: usize) -> Result<Block> {
        let entry = &self.index[block_idx];

        if let Some(cache) = &self.cache {
            if let Some(block) = cache.get(self.meta.id, entry.offset) {
                return Ok(block);
            }
        }

        let data = {
            let mut file = self.file.lock();
            read_checked(&mut file, &self.path, entry.offset, entry.size as usize)?
        };
        let block = Block::decode(data, internal_key_order)?;

        if let Some(cache) = &self.cache {
            cache.insert(self.meta.id, entry.offset, block.clone());
        }
        Ok(block)
    }

    /// Create an iterator over all entries, positioned at the first.
    pub fn iter(self: &Arc<Self>) -> SSTableIterator {
        SSTableIterator::new(self.clone())
    }

    /// Get metadata about this SSTable.
    pub fn meta(&self) -> &SSTableMeta {
        &self.meta
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    /// Number of data blocks.
    pub(crate) fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Position of the first block whose last key is not Less per `cmp`.
    /// None when every block falls before the target.
    pub(crate) fn index_search(
        &self,
        mut cmp: impl FnMut(&[u8]) -> std::cmp::Ordering,
    ) -> Option<usize> {
        let idx = self
            .index
            .partition_point(|entry| cmp(&entry.last_key) == std::cmp::Ordering::Less);
        (idx < self.index.len()).then_some(idx)
    }

    /// Drop this table's blocks from the shared cache. Called when the
    /// file is about to be deleted.
    pub(crate) fn evict_cached_blocks(&self) {
        if let Some(cache) = &self.cache {
            cache.evict_table(self.meta.id);
        }
    }
}

/// Read `size` bytes at `offset` plus the 4-byte CRC trailer that follows,
/// and verify them.
fn read_checked(file: &mut File, path: &Path, offset: u64, size: usize) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size + 4];
    file.read_exact(&mut buf)?;

    let stored_crc = u32::from_le_bytes(buf[size..].try_into().unwrap());
    buf.truncate(size);
    let computed_crc = crc32fast::hash(&buf);
    if stored_crc != computed_crc {
        return Err(Error::Corruption(format!(
            "block CRC mismatch at offset {offset} in {}",
            path.display()
        )));
    }
    Ok(buf)
}
