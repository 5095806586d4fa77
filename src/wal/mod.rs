pub mod reader;
pub mod record;
pub mod writer;

use std::path::{Path, PathBuf};

pub use reader::{WALIterator, WALReader};
pub use record::{RecordType, WALRecord};
pub use writer::{WALManager, WALWriter};

use crate::error::Result;

/// Controls when the WAL is fsync'd to disk.
///
/// Trade-off: durability vs throughput.
///   - EveryWrite: zero data loss, ~10x slower (each fsync waits for disk)
///   - EveryNWrites: batched durability, lose up to N writes on crash
///   - EveryNMillis: bounded loss window, much higher throughput
///
/// RocksDB defaults to NOT fsync'ing WAL (!), letting the OS decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync after every record. Safest, slowest.
    EveryWrite,
    /// fsync every N records. Batched durability.
    EveryNWrites(usize),
    /// fsync on timer. Bounded data loss window.
    EveryNMillis(u64),
}

/// Path of WAL segment `number` inside `dir`.
pub fn wal_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.wal"))
}

/// Parse a WAL segment number out of a file name like `000004.wal`.
pub fn parse_wal_name(name: &str) -> Option<u64> {
    name.strip_suffix(".wal")?.parse().ok()
}

/// All WAL segments in `dir`, sorted by segment number ascending.
/// Replay must visit segments oldest-first so later writes win.
pub fn list_wals(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if let Some(number) = parse_wal_name(name) {
                segments.push((number, path));
            }
        }
    }
    segments.sort_by_key(|(number, _)| *number);
    Ok(segments)
}
