use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::sstable::block::Block;

/// Identifies a cached block: (table id, block offset within the file).
type CacheKey = (u64, u64);

/// Shared LRU cache for decoded data blocks, capacity counted in bytes.
///
/// Reading a block means a disk seek plus a CRC check plus restart-array
/// parsing; point lookups on a hot key set hit the same handful of blocks
/// over and over, so caching the decoded form buys the most.
///
/// Blocks are refcounted (`Bytes` inside), so a cache hit is a cheap clone
/// and eviction never invalidates a block an iterator is still reading.
///
/// Nodes live in a slab and link to each other by index, the same layout
/// as the skip list arena: no unsafe, and the recency list is just two
/// integers per entry.
pub struct BlockCache {
    state: Mutex<LruState>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct Slot {
    key: CacheKey,
    block: Option<Block>,
    charge: usize,
    prev: usize,
    next: usize,
}

/// Slots 0 and 1 are the head and tail sentinels of the recency list.
/// head.next is the most recently used entry.
const HEAD: usize = 0;
const TAIL: usize = 1;

struct LruState {
    map: HashMap<CacheKey, usize>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    usage: usize,
}

impl LruState {
    fn detach(&mut self, index: usize) {
        let (prev, next) = (self.slots[index].prev, self.slots[index].next);
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
    }

    fn attach_front(&mut self, index: usize) {
        let first = self.slots[HEAD].next;
        self.slots[index].prev = HEAD;
        self.slots[index].next = first;
        self.slots[first].prev = index;
        self.slots[HEAD].next = index;
    }

    fn release(&mut self, index: usize) {
        self.usage -= self.slots[index].charge;
        self.map.remove(&self.slots[index].key);
        self.slots[index].block = None;
        self.slots[index].charge = 0;
        self.free.push(index);
    }
}

impl BlockCache {
    /// Create a cache that holds roughly `capacity` bytes of block data.
    pub fn new(capacity: usize) -> Self {
        let head = Slot { key: (0, 0), block: None, charge: 0, prev: HEAD, next: TAIL };
        let tail = Slot { key: (0, 0), block: None, charge: 0, prev: HEAD, next: TAIL };
        BlockCache {
            state: Mutex::new(LruState {
                map: HashMap::new(),
                slots: vec![head, tail],
                free: Vec::new(),
                usage: 0,
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a block, marking it most recently used.
    pub fn get(&self, table_id: u64, offset: u64) -> Option<Block> {
        let mut state = self.state.lock();
        match state.map.get(&(table_id, offset)).copied() {
            Some(index) => {
                state.detach(index);
                state.attach_front(index);
                self.hits.fetch_add(1, Ordering::Relaxed);
                state.slots[index].block.clone()
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a block, evicting least recently used entries if the budget
    /// is exceeded.
    pub fn insert(&self, table_id: u64, offset: u64, block: Block) {
        let charge = block.size();
        let key = (table_id, offset);
        let mut state = self.state.lock();

        if let Some(index) = state.map.get(&key).copied() {
            state.usage -= state.slots[index].charge;
            state.slots[index].block = Some(block);
            state.slots[index].charge = charge;
            state.usage += charge;
            state.detach(index);
            state.attach_front(index);
        } else {
            let index = match state.free.pop() {
                Some(index) => {
                    state.slots[index].key = key;
                    state.slots[index].block = Some(block);
                    state.slots[index].charge = charge;
                    index
                }
                None => {
                    state.slots.push(Slot {
                        key,
                        block: Some(block),
                        charge,
                        prev: HEAD,
                        next: TAIL,
                    });
                    state.slots.len() - 1
                }
            };
            state.map.insert(key, index);
            state.attach_front(index);
            state.usage += charge;
        }

        while state.usage > self.capacity {
            let last = state.slots[TAIL].prev;
            if last == HEAD {
                break;
            }
            state.detach(last);
            state.release(last);
        }
    }

    /// Drop every cached block belonging to `table_id`. Called when the
    /// table file is deleted so dead blocks don't squat in the budget.
    pub fn evict_table(&self, table_id: u64) {
        let mut state = self.state.lock();
        let doomed: Vec<usize> = state
            .map
            .iter()
            .filter(|((id, _), _)| *id == table_id)
            .map(|(_, index)| *index)
            .collect();
        for index in doomed {
            state.detach(index);
            state.release(index);
        }
    }

    /// Bytes currently cached.
    pub fn usage(&self) -> usize {
        self.state.lock().usage
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
