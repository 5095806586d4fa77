use crate::error::{Error, Result};

/// Magic number to identify SSTable files.
pub const SSTABLE_MAGIC: u64 = 0x4C534D5F53535400; // "LSM_SST\0"

/// Metadata about an SSTable file, stored in the manifest.
///
/// `min_key` and `max_key` are encoded internal keys: the manifest needs
/// them with their sequence trailers so overlap checks and iterator
/// placement agree with the file contents exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTableMeta {
    /// Unique SSTable identifier (also the file name stem).
    pub id: u64,
    /// Level this SSTable belongs to (0 = freshly flushed).
    pub level: u32,
    /// Smallest internal key in the SSTable.
    pub min_key: Vec<u8>,
    /// Largest internal key in the SSTable.
    pub max_key: Vec<u8>,
    /// File size in bytes.
    pub file_size: u64,
    /// Number of entries (including tombstones).
    pub entry_count: u64,
}

impl SSTableMeta {
    /// Encode for a manifest record.
    /// Format: [id(8B)][level(4B)][file_size(8B)][entry_count(8B)]
    ///         [min_len(2B)][min_key][max_len(2B)][max_key]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + self.min_key.len() + self.max_key.len());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.level.to_le_bytes());
        buf.extend_from_slice(&self.file_size.to_le_bytes());
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        buf.extend_from_slice(&(self.min_key.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.min_key);
        buf.extend_from_slice(&(self.max_key.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.max_key);
        buf
    }

    /// Decode from a manifest record, returning (meta, bytes_consumed).
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 30 {
            return Err(Error::corruption("table meta too short"));
        }
        let id = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let level = u32::from_le_bytes(data[8..12].try_into().unwrap());
        let file_size = u64::from_le_bytes(data[12..20].try_into().unwrap());
        let entry_count = u64::from_le_bytes(data[20..28].try_into().unwrap());

        let mut offset = 28;
        let min_len = u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap()) as usize;
        offset += 2;
        if data.len() < offset + min_len + 2 {
            return Err(Error::corruption("table meta min key truncated"));
        }
        let min_key = data[offset..offset + min_len].to_vec();
        offset += min_len;

        let max_len = u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap()) as usize;
        offset += 2;
        if data.len() < offset + max_len {
            return Err(Error::corruption("table meta max key truncated"));
        }
        let max_key = data[offset..offset + max_len].to_vec();
        offset += max_len;

        Ok((
            SSTableMeta {
                id,
                level,
                min_key,
                max_key,
                file_size,
                entry_count,
            },
            offset,
        ))
    }
}

/// An entry in the SSTable's index block.
/// Maps a block's last key to its location in the file.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Last (largest) key in the block.
    pub last_key: Vec<u8>,
    /// Byte offset of the block in the file.
    pub offset: u64,
    /// Size of the block in bytes, excluding its 4-byte CRC trailer.
    pub size: u64,
}

impl IndexEntry {
    /// Encode this index entry to bytes.
    /// Format: [key_len(2B)][key][offset(8B)][size(8B)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.last_key.len() + 16);
        buf.extend_from_slice(&(self.last_key.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.last_key);
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Decode an index entry from bytes, returning (entry, bytes_consumed).
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 2 {
            return Err(Error::Corruption("index entry too short".into()));
        }
        let key_len = u16::from_le_bytes([data[0], data[1]]) as usize;
        let total = 2 + key_len + 16;
        if data.len() < total {
            return Err(Error::Corruption("index entry truncated".into()));
        }
        let last_key = data[2..2 + key_len].to_vec();
        let offset = u64::from_le_bytes(data[2 + key_len..10 + key_len].try_into().unwrap());
        let size = u64::from_le_bytes(data[10 + key_len..18 + key_len].try_into().unwrap());
        Ok((IndexEntry { last_key, offset, size }, total))
    }
}

/// The footer sits at the end of the SSTable file.
/// It tells the reader where to find the index block and the bloom filter.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Index block offset (8B)              │
/// │ Index block size (8B)                │
/// │ Filter block offset (8B)             │
/// │ Filter block size (8B)               │
/// │ Magic number (8B)                    │
/// └──────────────────────────────────────┘
/// ```
///
/// Block sizes exclude the 4-byte CRC trailer that follows each block.
#[derive(Debug, Clone)]
pub struct Footer {
    pub index_block_offset: u64,
    pub index_block_size: u64,
    pub filter_block_offset: u64,
    pub filter_block_size: u64,
    pub magic: u64,
}

impl Footer {
    /// Size of the footer in bytes (fixed).
    pub const SIZE: usize = 8 * 5; // 40 bytes

    /// Encode footer to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.index_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.index_block_size.to_le_bytes());
        buf.extend_from_slice(&self.filter_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.filter_block_size.to_le_bytes());
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf
    }

    /// Decode footer from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("footer too short".into()));
        }
        let index_block_offset = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let index_block_size = u64::from_le_bytes(data[8..16].try_into().unwrap());
        let filter_block_offset = u64::from_le_bytes(data[16..24].try_into().unwrap());
        let filter_block_size = u64::from_le_bytes(data[24..32].try_into().unwrap());
        let magic = u64::from_le_bytes(data[32..40].try_into().unwrap());

        if magic != SSTABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {:#x}, got {:#x}",
                SSTABLE_MAGIC, magic
            )));
        }

        Ok(Footer {
            index_block_offset,
            index_block_size,
            filter_block_offset,
            filter_block_size,
            magic,
        })
    }
}
