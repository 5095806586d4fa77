pub mod block;
pub mod builder;
pub mod footer;
pub mod iterator;
pub mod reader;

use std::path::{Path, PathBuf};

pub use builder::SSTableBuilder;
pub use footer::{Footer, IndexEntry, SSTABLE_MAGIC, SSTableMeta};
pub use iterator::SSTableIterator;
pub use reader::SSTable;

/// Path of SSTable `id` inside `dir`.
pub fn sst_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id:06}.sst"))
}

/// Parse an SSTable id out of a file name like `000007.sst`.
pub fn parse_sst_name(name: &str) -> Option<u64> {
    name.strip_suffix(".sst")?.parse().ok()
}
