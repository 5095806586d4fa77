use crate::bloom::BloomFilter;

/// Convenience builder for constructing a bloom filter during SSTable creation.
///
/// The filter cannot be sized until the final key count is known, so the
/// builder buffers keys and constructs the filter at the end:
/// 1. Create BloomFilterBuilder with estimated key count
/// 2. Call add_key() for every user key written to the SSTable
/// 3. Call build() to get the final BloomFilter for serialization
pub struct BloomFilterBuilder {
    keys: Vec<Vec<u8>>,
    false_positive_rate: f64,
}

impl BloomFilterBuilder {
    /// Create a builder expecting approximately `estimated_keys` keys.
    pub fn new(estimated_keys: usize, false_positive_rate: f64) -> Self {
        BloomFilterBuilder {
            keys: Vec::with_capacity(estimated_keys),
            false_positive_rate,
        }
    }

    /// Add a key to the bloom filter being built.
    ///
    /// Consecutive duplicates collapse into one entry; the SSTable build
    /// path adds user keys in sorted order, so versions of the same key
    /// arrive back to back.
    pub fn add_key(&mut self, key: &[u8]) {
        if self.keys.last().map(|last| last.as_slice()) != Some(key) {
            self.keys.push(key.to_vec());
        }
    }

    /// Number of distinct keys added so far.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Finalize and return the bloom filter, sized for the exact key count.
    pub fn build(self) -> BloomFilter {
        let mut filter = BloomFilter::new(self.keys.len().max(1), self.false_positive_rate);
        for key in &self.keys {
            filter.insert(key);
        }
        filter
    }
}
