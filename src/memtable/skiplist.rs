use std::cmp::Ordering;

use rand::Rng;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::Comparator;

/// Maximum height of the skip list. LevelDB uses 12.
pub const MAX_HEIGHT: usize = 12;

/// Probability of promoting a node one level is 1/BRANCHING.
/// Higher branching factor = shorter skip list = fewer levels = less memory.
const BRANCHING: u32 = 4;

/// A single node in the skip list.
///
/// Each node has `height` forward pointers. Level 0 contains all nodes
/// (a regular linked list). Higher levels skip over nodes, enabling
/// O(log n) average-case search.
///
/// ```text
/// Level 3:  HEAD ──────────────────────────────► 50 ──────────► NIL
/// Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
/// Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
/// Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
/// ```
///
/// Nodes live in an arena (`SkipList::nodes`) and point at each other by
/// index. No unsafe, no reference cycles, and the arena keeps neighboring
/// nodes close in memory.
struct SkipNode {
    key: Vec<u8>,
    value: Vec<u8>,
    forward: Vec<Option<usize>>,
}

/// A probabilistic sorted data structure.
///
/// Why skip list over red-black tree?
///   - Simpler to implement correctly
///   - Better cache locality for iteration (level 0 is a linked list)
///   - Lock-free variants are easier (for future concurrent access)
///   - This is what LevelDB uses
///
/// Average case: O(log n) insert, O(log n) lookup, O(n) iteration.
/// Worst case: O(n) — but astronomically unlikely with random level assignment.
///
/// The ordering is pluggable: the memtable stores encoded internal keys,
/// whose sort order is not bytewise, so the comparator comes from the caller.
pub struct SkipList {
    /// Arena. `nodes[0]` is the head sentinel (empty key, never yielded).
    nodes: Vec<SkipNode>,
    height: usize,
    len: usize,
    size_bytes: usize,
    comparator: Comparator,
}

impl SkipList {
    /// Create a new empty skip list ordered by `comparator`.
    pub fn new(comparator: Comparator) -> Self {
        let head = SkipNode {
            key: Vec::new(),
            value: Vec::new(),
            forward: vec![None; MAX_HEIGHT],
        };
        SkipList {
            nodes: vec![head],
            height: 1,
            len: 0,
            size_bytes: 0,
            comparator,
        }
    }

    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.comparator)(a, b)
    }

    /// Insert a key-value pair. Overwrites if key already exists.
    ///
    /// Algorithm:
    ///   1. Find the insertion point at each level (track predecessors)
    ///   2. Generate a random height for the new node (coin flip per level)
    ///   3. Create node with that height
    ///   4. Splice into the list at each level up to the node's height
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let mut update = [0usize; MAX_HEIGHT];
        let mut current = 0;

        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[current].forward[level] {
                if self.cmp(&self.nodes[next].key, &key) == Ordering::Less {
                    current = next;
                } else {
                    break;
                }
            }
            update[level] = current;
        }

        // Exact match: replace the value in place.
        if let Some(next) = self.nodes[update[0]].forward[0] {
            if self.cmp(&self.nodes[next].key, &key) == Ordering::Equal {
                self.size_bytes += value.len();
                self.size_bytes -= self.nodes[next].value.len();
                self.nodes[next].value = value;
                return;
            }
        }

        let node_height = self.random_height();
        if node_height > self.height {
            for level in self.height..node_height {
                update[level] = 0;
            }
            self.height = node_height;
        }

        self.size_bytes += key.len() + value.len() + node_height * size_of::<Option<usize>>();

        let new_index = self.nodes.len();
        let mut forward = Vec::with_capacity(node_height);
        for (level, item) in update.iter().enumerate().take(node_height) {
            forward.push(self.nodes[*item].forward[level]);
        }
        self.nodes.push(SkipNode { key, value, forward });

        for (level, item) in update.iter().enumerate().take(node_height) {
            self.nodes[*item].forward[level] = Some(new_index);
        }

        self.len += 1;
    }

    /// Look up a key. Returns the value if found.
    ///
    /// Algorithm:
    ///   1. Start at head, highest level
    ///   2. Move forward while next key < target
    ///   3. Drop down one level
    ///   4. Repeat until level 0
    ///   5. Check if the node at level 0 matches
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let index = self.find_greater_or_equal(key)?;
        if self.cmp(&self.nodes[index].key, key) == Ordering::Equal {
            Some(&self.nodes[index].value)
        } else {
            None
        }
    }

    fn entry(&self, index: usize) -> Option<(&[u8], &[u8])> {
        if index == 0 {
            return None;
        }
        let node = &self.nodes[index];
        Some((&node.key, &node.value))
    }

    /// First entry in the list.
    pub fn first(&self) -> Option<(&[u8], &[u8])> {
        self.nodes[0].forward[0].and_then(|index| self.entry(index))
    }

    /// Last entry in the list.
    pub fn last(&self) -> Option<(&[u8], &[u8])> {
        self.entry(self.find_last())
    }

    /// First entry with key >= target.
    pub fn first_at_or_after(&self, key: &[u8]) -> Option<(&[u8], &[u8])> {
        self.find_greater_or_equal(key).and_then(|index| self.entry(index))
    }

    /// First entry with key strictly greater than target.
    pub fn first_after(&self, key: &[u8]) -> Option<(&[u8], &[u8])> {
        let mut index = self.find_greater_or_equal(key)?;
        if self.cmp(&self.nodes[index].key, key) == Ordering::Equal {
            index = self.nodes[index].forward[0]?;
        }
        self.entry(index)
    }

    /// Last entry with key strictly less than target.
    pub fn last_before(&self, key: &[u8]) -> Option<(&[u8], &[u8])> {
        self.entry(self.find_less_than(key))
    }

    /// Index of the first node with key >= target, if any.
    fn find_greater_or_equal(&self, key: &[u8]) -> Option<usize> {
        let mut current = 0;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[current].forward[level] {
                if self.cmp(&self.nodes[next].key, key) == Ordering::Less {
                    current = next;
                } else {
                    break;
                }
            }
        }
        self.nodes[current].forward[0]
    }

    /// Index of the rightmost node with key < target. 0 means the head
    /// sentinel (no such node).
    fn find_less_than(&self, key: &[u8]) -> usize {
        let mut current = 0;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[current].forward[level] {
                if self.cmp(&self.nodes[next].key, key) == Ordering::Less {
                    current = next;
                } else {
                    break;
                }
            }
        }
        current
    }

    /// Index of the last node, or 0 when empty.
    fn find_last(&self) -> usize {
        let mut current = 0;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[current].forward[level] {
                current = next;
            }
        }
        current
    }

    /// Number of entries in the skip list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the skip list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate memory usage in bytes: keys, values, and link storage.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Create an iterator over all entries in sorted order.
    /// Starts positioned at the first entry.
    pub fn iter(&self) -> SkipListIterator<'_> {
        SkipListIterator {
            list: self,
            current: self.nodes[0].forward[0],
        }
    }

    /// Generate a random level for a new node.
    /// Each level has a 1/4 probability (LevelDB uses 1/4, not 1/2).
    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_ratio(1, BRANCHING) {
            height += 1;
        }
        height
    }
}

/// Iterator over skip list entries in sorted order.
///
/// Forward iteration follows level 0 pointers. Backward iteration re-seeks
/// from the top: the list has no back pointers, so `prev` costs O(log n).
pub struct SkipListIterator<'a> {
    list: &'a SkipList,
    current: Option<usize>,
}

impl StorageIterator for SkipListIterator<'_> {
    fn key(&self) -> &[u8] {
        match self.current {
            Some(index) => &self.list.nodes[index].key,
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(index) => &self.list.nodes[index].value,
            None => &[],
        }
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(index) = self.current {
            self.current = self.list.nodes[index].forward[0];
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if let Some(index) = self.current {
            let prev = self.list.find_less_than(&self.list.nodes[index].key);
            self.current = if prev == 0 { None } else { Some(prev) };
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.current = self.list.find_greater_or_equal(key);
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.current = self.list.nodes[0].forward[0];
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let last = self.list.find_last();
        self.current = if last == 0 { None } else { Some(last) };
        Ok(())
    }
}
