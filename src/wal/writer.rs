use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::Result;
use crate::wal::record::WALRecord;
use crate::wal::{SyncPolicy, list_wals, wal_path};

/// Writes WAL records to a file on disk.
///
/// Every write must be durable before it's acknowledged to the client.
/// The WAL ensures crash recovery: on restart, replay the WAL to
/// reconstruct the memtable.
///
/// Two layers of buffering:
///   BufWriter.flush()  → Rust buffer → OS page cache
///   file.sync_all()    → OS page cache → physical disk
pub struct WALWriter {
    writer: BufWriter<File>,
    offset: u64,
    sync_policy: SyncPolicy,
    writes_since_sync: usize,
    last_sync: Instant,
}

impl WALWriter {
    /// Create a new WAL writer at the given path.
    pub fn new(path: &Path, sync_policy: SyncPolicy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(WALWriter {
            writer: BufWriter::new(file),
            offset: 0,
            sync_policy,
            writes_since_sync: 0,
            last_sync: Instant::now(),
        })
    }

    /// Append a record to the WAL.
    /// Depending on SyncPolicy, may fsync after this write.
    pub fn append(&mut self, record: &WALRecord) -> Result<()> {
        let encoded = record.encode();

        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        self.offset += encoded.len() as u64;
        self.writes_since_sync += 1;

        // Sync based on policy
        match self.sync_policy {
            SyncPolicy::EveryWrite => {
                self.writer.get_ref().sync_all()?;
                self.writes_since_sync = 0;
            }
            SyncPolicy::EveryNWrites(n) => {
                if self.writes_since_sync >= n {
                    self.writer.get_ref().sync_all()?;
                    self.writes_since_sync = 0;
                }
            }
            SyncPolicy::EveryNMillis(ms) => {
                // Checked on append rather than by a timer thread; an idle
                // writer has nothing unsynced that a timer would help with
                // beyond the last batch, which close()/sync() flushes.
                if self.last_sync.elapsed().as_millis() as u64 >= ms {
                    self.writer.get_ref().sync_all()?;
                    self.writes_since_sync = 0;
                    self.last_sync = Instant::now();
                }
            }
        }

        Ok(())
    }

    /// Force fsync to disk. Ensures all buffered writes are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Current file offset (bytes written so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Records appended since the last fsync.
    pub fn writes_since_sync(&self) -> usize {
        self.writes_since_sync
    }
}

/// Manages WAL file rotation.
///
/// When a memtable is flushed to SSTable:
/// 1. Create new WAL for the new active memtable
/// 2. Keep old WAL until SSTable flush is confirmed (fsync'd)
/// 3. Delete old WAL
///
/// CRITICAL INVARIANT: Old WAL is only deleted AFTER its SSTable is
/// fully written and fsync'd. Violating this loses data.
///
/// Segments are numbered files (`000001.wal`, `000002.wal`, ...). The
/// manifest records the lowest segment number still needed; everything
/// below it is garbage.
pub struct WALManager {
    dir: PathBuf,
    sync_policy: SyncPolicy,
    active: WALWriter,
    active_number: u64,
    active_path: PathBuf,
}

impl WALManager {
    /// Create a WAL manager for the given directory. Numbering resumes
    /// after any segments already on disk.
    pub fn new(dir: &Path, sync_policy: SyncPolicy) -> Result<Self> {
        let next_number = list_wals(dir)?
            .last()
            .map(|(number, _)| number + 1)
            .unwrap_or(1);
        let active_path = wal_path(dir, next_number);
        let active = WALWriter::new(&active_path, sync_policy)?;

        Ok(WALManager {
            dir: dir.to_path_buf(),
            sync_policy,
            active,
            active_number: next_number,
            active_path,
        })
    }

    /// Rotate: freeze current WAL, create a new one.
    /// Returns the path of the old WAL (caller deletes after SSTable flush).
    pub fn rotate(&mut self) -> Result<PathBuf> {
        // Everything in the old segment must be on disk before the new
        // segment takes over.
        self.active.sync()?;

        let new_number = self.active_number + 1;
        let new_path = wal_path(&self.dir, new_number);
        let new_writer = WALWriter::new(&new_path, self.sync_policy)?;

        let old_path = std::mem::replace(&mut self.active_path, new_path);
        self.active = new_writer;
        self.active_number = new_number;

        Ok(old_path)
    }

    /// Writer for the active segment.
    pub fn active_writer(&mut self) -> &mut WALWriter {
        &mut self.active
    }

    /// Path of the active segment.
    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    /// Segment number of the active segment.
    pub fn active_number(&self) -> u64 {
        self.active_number
    }

    /// Delete an old WAL file (safe only after SSTable is fsync'd).
    pub fn delete_wal(path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }
}
