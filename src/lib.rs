//! silt — an embedded log-structured merge-tree key-value store.
//!
//! Writes land in a WAL-backed memtable and get folded into sorted,
//! immutable table files by a background worker; reads merge the
//! in-memory and on-disk sources into a single ordered view. Random
//! writes become sequential disk writes, which is the whole trick.
//!
//! ## Quick start
//! ```no_run
//! use silt::{DB, Options};
//!
//! # fn main() -> silt::Result<()> {
//! let db = DB::open("/tmp/silt-demo", Options::default())?;
//! db.put(b"name", b"ada")?;
//! assert_eq!(db.get(b"name")?, Some(b"ada".to_vec()));
//!
//! let mut iter = db.iter()?;
//! while iter.is_valid() {
//!     println!("{:?} = {:?}", iter.key(), iter.value());
//!     iter.next()?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout
//! - [`db`] — the engine facade: open/recovery, reads, writes, iterators.
//! - [`memtable`] — skip-list write buffer.
//! - [`wal`] — write-ahead log segments and rotation.
//! - [`sstable`] — immutable sorted tables: blocks, bloom filters, footer.
//! - [`manifest`] — durable level metadata and versioning.
//! - [`compaction`] — background flushes and leveled merges.
//! - [`iterator`] — the iteration abstraction and merge machinery.

pub mod bloom;
pub mod cache;
pub mod compaction;
pub mod db;
pub mod error;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod types;
pub mod wal;

pub use db::{DB, DbIterator, MAX_KEY_SIZE, Options, Stats};
pub use error::{Error, Result};
pub use wal::SyncPolicy;
