/// Entries per restart point. Smaller = faster seeks, larger = better
/// compression. LevelDB uses 16.
pub const RESTART_INTERVAL: usize = 16;

/// Accumulates sorted key-value pairs and serializes them into a block.
///
/// A block is typically 4KB (matching OS page size / SSD block size).
/// Keys are prefix-compressed against their predecessor: each entry stores
/// only the suffix that differs. Every RESTART_INTERVAL entries the full
/// key is stored again (a "restart point") so a reader can binary search
/// restart points and only decompress a short run.
///
/// On-disk layout of a block:
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │ Entry 0: [shared(2B)][unshared(2B)][val_len(4B)][key suffix][value] │
/// │ Entry 1: ...                                                │
/// │ Entry N: ...                                                │
/// ├─────────────────────────────────────────────────────────────┤
/// │ Restart array: [restart_0(4B)]...[restart_K(4B)]            │
/// │ Num restarts (4B)                                           │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// `shared` is the byte count the key has in common with the previous
/// entry's key; restart entries have shared = 0 and carry the whole key.
pub struct BlockBuilder {
    data: Vec<u8>,
    restarts: Vec<u32>,
    /// Entries since the last restart point.
    counter: usize,
    last_key: Vec<u8>,
    num_entries: usize,
    block_size: usize,
}

impl BlockBuilder {
    /// Create a new block builder with target block size.
    pub fn new(block_size: usize) -> Self {
        BlockBuilder {
            data: Vec::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
            num_entries: 0,
            block_size,
        }
    }

    /// Add a key-value pair to the block.
    /// Returns false if the block is full (entry doesn't fit).
    /// First entry is always accepted even if it exceeds block_size.
    /// Entries MUST be added in sorted key order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> bool {
        let entry_size = 2 + 2 + 4 + key.len() + value.len();

        // Check if adding this entry would exceed the target block size.
        // Always accept the first entry so we never produce an empty block.
        if self.num_entries > 0 && self.estimated_size() + entry_size > self.block_size {
            return false;
        }

        let shared = if self.counter < RESTART_INTERVAL {
            shared_prefix_len(&self.last_key, key)
        } else {
            // Start a new restart point: store the full key.
            self.restarts.push(self.data.len() as u32);
            self.counter = 0;
            0
        };
        let unshared = key.len() - shared;

        // Serialize: shared (2B) | unshared (2B) | val_len (4B) | suffix | value
        self.data.extend_from_slice(&(shared as u16).to_le_bytes());
        self.data.extend_from_slice(&(unshared as u16).to_le_bytes());
        self.data.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.data.extend_from_slice(&key[shared..]);
        self.data.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
        self.num_entries += 1;

        true
    }

    /// Finalize the block: append the restart array and restart count.
    pub fn build(self) -> Vec<u8> {
        let mut block = self.data;

        for restart in &self.restarts {
            block.extend_from_slice(&restart.to_le_bytes());
        }
        block.extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());

        block
    }

    /// Current estimated size of the block (data + restart array + count).
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.restarts.len() * 4 + 4
    }

    /// Whether the block is empty (no entries added).
    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.num_entries
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
