pub mod concat;
pub mod merge;

use crate::error::Result;

/// The central iteration abstraction for the storage engine.
///
/// Every sorted data source (skip list, block, SSTable, merged view)
/// implements this trait. This enables composability — MergeIterator
/// takes Vec<Box<dyn StorageIterator>> and merges them.
///
/// All sources iterate over encoded internal keys in internal-key order.
/// Keys and values returned by `key()`/`value()` are only valid until the
/// next call that repositions the iterator.
pub trait StorageIterator {
    /// Returns the current key. Only valid when is_valid() is true.
    fn key(&self) -> &[u8];

    /// Returns the current value. Only valid when is_valid() is true.
    fn value(&self) -> &[u8];

    /// Returns true if the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    /// Advances to the next entry. Returns error on IO failure.
    fn next(&mut self) -> Result<()>;

    /// Moves back to the previous entry. Invalid when already at the first.
    fn prev(&mut self) -> Result<()>;

    /// Positions the iterator at the first entry with key >= target.
    fn seek(&mut self, key: &[u8]) -> Result<()>;

    /// Positions the iterator at the first entry.
    fn seek_to_first(&mut self) -> Result<()>;

    /// Positions the iterator at the last entry.
    fn seek_to_last(&mut self) -> Result<()>;
}
