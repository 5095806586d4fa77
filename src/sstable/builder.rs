use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::bloom::builder::BloomFilterBuilder;
use crate::error::Result;
use crate::sstable::block::builder::BlockBuilder;
use crate::sstable::footer::{Footer, IndexEntry, SSTABLE_MAGIC, SSTableMeta};
use crate::types::user_key_of;

/// False positive rate for the per-table bloom filter. ~10 bits per key.
const BLOOM_FPR: f64 = 0.01;

/// Builds an SSTable file from a sorted stream of internal key-value pairs.
///
/// Used during:
/// - Memtable flush (sorted memtable → SSTable)
/// - Compaction (merged iterators → new SSTables)
///
/// Build process:
/// 1. Add entries one by one (must be in internal-key order)
/// 2. Entries fill up blocks; when a block is full it's written to disk
///    followed by a 4-byte CRC of its contents
/// 3. finish() flushes the last block, writes the bloom filter, the index,
///    the footer, then fsyncs
pub struct SSTableBuilder {
    /// Current block being filled with entries.
    block_builder: BlockBuilder,
    /// Index entries: one per flushed data block.
    index_entries: Vec<IndexEntry>,
    /// Bloom filter over the user keys of every entry.
    filter_builder: BloomFilterBuilder,
    /// Tracks current write position in the file.
    data_offset: u64,
    /// Buffered file writer.
    writer: BufWriter<File>,
    /// Unique SSTable identifier.
    sst_id: u64,
    /// Target block size.
    block_size: usize,
    /// Smallest internal key added (first key, since entries are sorted).
    min_key: Option<Vec<u8>>,
    /// Largest internal key added (updated on every add).
    max_key: Option<Vec<u8>>,
    /// Total entries added.
    entry_count: u64,
    /// Last key added to the current block (needed for index entry).
    last_key_in_block: Option<Vec<u8>>,
}

impl SSTableBuilder {
    /// Create a new SSTable builder that writes to the given path.
    /// An existing file at that path is truncated; leftovers from a build
    /// that crashed before its manifest entry was written die here.
    pub fn new(path: &Path, sst_id: u64, block_size: usize) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(SSTableBuilder {
            block_builder: BlockBuilder::new(block_size),
            index_entries: Vec::new(),
            filter_builder: BloomFilterBuilder::new(1024, BLOOM_FPR),
            data_offset: 0,
            writer,
            sst_id,
            block_size,
            min_key: None,
            max_key: None,
            entry_count: 0,
            last_key_in_block: None,
        })
    }

    /// Add an internal key-value pair. MUST be called in sorted order.
    ///
    /// Internally:
    /// 1. Try adding to the current block
    /// 2. If block is full: flush block to file, record index entry, start new block
    /// 3. Add the entry to the new block
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        // Track min/max keys
        if self.min_key.is_none() {
            self.min_key = Some(key.to_vec());
        }
        self.max_key = Some(key.to_vec());
        self.entry_count += 1;
        self.filter_builder.add_key(user_key_of(key));

        // Try adding to current block
        if self.block_builder.add(key, value) {
            self.last_key_in_block = Some(key.to_vec());
            return Ok(());
        }

        // Block is full — flush it, then add to a fresh block
        self.flush_block()?;

        // Add to the new block (guaranteed to succeed — first entry always accepted)
        assert!(self.block_builder.add(key, value));
        self.last_key_in_block = Some(key.to_vec());

        Ok(())
    }

    /// Flush the current block to disk and record an index entry.
    fn flush_block(&mut self) -> Result<()> {
        if self.block_builder.is_empty() {
            return Ok(());
        }

        // Take the current block builder, replace with a fresh one
        let old_builder =
            std::mem::replace(&mut self.block_builder, BlockBuilder::new(self.block_size));
        let block_data = old_builder.build();
        let block_size = self.write_block(&block_data)?;

        // Record where this block landed
        self.index_entries.push(IndexEntry {
            last_key: self.last_key_in_block.take().unwrap(),
            offset: self.data_offset,
            size: block_size,
        });

        self.data_offset += block_size + 4;
        Ok(())
    }

    /// Write a block followed by the CRC of its contents. Returns the block
    /// length excluding the trailer.
    fn write_block(&mut self, data: &[u8]) -> Result<u64> {
        self.writer.write_all(data)?;
        self.writer
            .write_all(&crc32fast::hash(data).to_le_bytes())?;
        Ok(data.len() as u64)
    }

    /// Bytes written so far plus the partially filled block. Compaction
    /// uses this to split its output at the target file size.
    pub fn estimated_size(&self) -> u64 {
        self.data_offset + self.block_builder.estimated_size() as u64
    }

    /// Entries added so far.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Smallest internal key added so far.
    pub fn min_key(&self) -> Option<&[u8]> {
        self.min_key.as_deref()
    }

    /// Finalize the SSTable: flush last block, write filter and index
    /// blocks, footer, fsync.
    pub fn finish(mut self) -> Result<SSTableMeta> {
        // 1. Flush the last data block
        self.flush_block()?;

        // 2. Write the bloom filter
        let filter_block_offset = self.data_offset;
        let filter_builder =
            std::mem::replace(&mut self.filter_builder, BloomFilterBuilder::new(0, BLOOM_FPR));
        let filter_data = filter_builder.build().serialize();
        let filter_block_size = self.write_block(&filter_data)?;
        self.data_offset += filter_block_size + 4;

        // 3. Write index block: serialize all index entries sequentially
        let index_block_offset = self.data_offset;
        let mut index_data = Vec::new();
        for entry in &self.index_entries {
            index_data.extend_from_slice(&entry.encode());
        }
        let index_block_size = self.write_block(&index_data)?;
        self.data_offset += index_block_size + 4;

        // 4. Write footer
        let footer = Footer {
            index_block_offset,
            index_block_size,
            filter_block_offset,
            filter_block_size,
            magic: SSTABLE_MAGIC,
        };
        self.writer.write_all(&footer.encode())?;

        // 5. Flush buffer + fsync to guarantee durability
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        let file_size = self.data_offset + Footer::SIZE as u64;

        Ok(SSTableMeta {
            id: self.sst_id,
            level: 0,
            min_key: self.min_key.unwrap_or_default(),
            max_key: self.max_key.unwrap_or_default(),
            file_size,
            entry_count: self.entry_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::footer::Footer;
    use crate::types::{InternalKey, ValueType};
    use std::io::Read;
    use tempfile::tempdir;

    fn ikey(user_key: &str, seq: u64) -> Vec<u8> {
        InternalKey::new(user_key.as_bytes().to_vec(), seq, ValueType::Put).encode()
    }

    #[test]
    fn build_sstable_from_sorted_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");

        let mut builder = SSTableBuilder::new(&path, 1, 4096).unwrap();
        for i in 0..100u32 {
            let key = ikey(&format!("key_{:05}", i), 1);
            let val = format!("val_{:05}", i);
            builder.add(&key, val.as_bytes()).unwrap();
        }
        let meta = builder.finish().unwrap();

        assert_eq!(meta.id, 1);
        assert_eq!(meta.entry_count, 100);
        assert_eq!(meta.min_key, ikey("key_00000", 1));
        assert_eq!(meta.max_key, ikey("key_00099", 1));
        assert!(meta.file_size > 0);
        assert!(path.exists());
    }

    #[test]
    fn finish_returns_correct_meta() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");

        let mut builder = SSTableBuilder::new(&path, 42, 4096).unwrap();
        builder.add(&ikey("alpha", 2), b"first").unwrap();
        builder.add(&ikey("omega", 1), b"last").unwrap();
        let meta = builder.finish().unwrap();

        assert_eq!(meta.id, 42);
        assert_eq!(meta.level, 0);
        assert_eq!(meta.min_key, ikey("alpha", 2));
        assert_eq!(meta.max_key, ikey("omega", 1));
        assert_eq!(meta.entry_count, 2);
    }

    #[test]
    fn file_ends_with_valid_footer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");

        let mut builder = SSTableBuilder::new(&path, 1, 4096).unwrap();
        for i in 0..50u32 {
            builder.add(&ikey(&format!("k{:04}", i), 1), b"v").unwrap();
        }
        builder.finish().unwrap();

        // Read last 40 bytes = footer
        let mut file = File::open(&path).unwrap();
        let file_len = file.metadata().unwrap().len();
        let mut buf = vec![0u8; file_len as usize];
        file.read_exact(&mut buf).unwrap();

        let footer_bytes = &buf[buf.len() - Footer::SIZE..];
        let footer = Footer::decode(footer_bytes).unwrap();
        assert_eq!(footer.magic, SSTABLE_MAGIC);
        assert!(footer.index_block_offset > 0);
        assert!(footer.index_block_size > 0);
        assert!(footer.filter_block_size > 0);
    }

    #[test]
    fn multiple_blocks_produced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");

        // Use tiny block size to force multiple blocks
        let mut builder = SSTableBuilder::new(&path, 1, 64).unwrap();
        for i in 0..20u32 {
            let key = ikey(&format!("key_{:05}", i), 1);
            let val = format!("value_{:05}", i);
            builder.add(&key, val.as_bytes()).unwrap();
        }
        let meta = builder.finish().unwrap();

        assert_eq!(meta.entry_count, 20);
        // With 64-byte blocks and ~30 byte entries, we should have many blocks
        // File should be larger than a single block
        assert!(meta.file_size > 64);
    }

    #[test]
    fn block_crc_trails_each_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");

        let mut builder = SSTableBuilder::new(&path, 1, 4096).unwrap();
        builder.add(&ikey("a", 1), b"1").unwrap();
        builder.finish().unwrap();

        let mut buf = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut buf).unwrap();
        let footer = Footer::decode(&buf[buf.len() - Footer::SIZE..]).unwrap();

        // First data block starts at 0; its extent is recorded in the index.
        let index_start = footer.index_block_offset as usize;
        let index_end = index_start + footer.index_block_size as usize;
        let (entry, _) = IndexEntry::decode(&buf[index_start..index_end]).unwrap();

        let block = &buf[entry.offset as usize..(entry.offset + entry.size) as usize];
        let stored_crc = u32::from_le_bytes(
            buf[(entry.offset + entry.size) as usize..(entry.offset + entry.size) as usize + 4]
                .try_into()
                .unwrap(),
        );
        assert_eq!(stored_crc, crc32fast::hash(block));
    }
}
