//! The engine facade: a persistent, ordered key-value store.
//!
//! ## Write path
//! `put`/`delete` append to the WAL, then insert into the active
//! memtable. A full memtable is frozen behind a fresh WAL segment and a
//! background worker flushes it to an L0 table. When L0 grows past its
//! trigger the same worker compacts levels downward.
//!
//! ## Read path
//! `get` consults the memtables newest-first, then the current version's
//! tables level by level. Iterators merge every live source into one
//! ordered view and resolve visibility against a pinned snapshot.
//!
//! ## Recovery
//! `open` replays the manifest to rebuild the level structure, then
//! replays every WAL segment the manifest calls unflushed, writing each
//! one out as an L0 table before the engine accepts traffic.

pub mod iter;

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use fs2::FileExt;
use parking_lot::{Condvar, Mutex};

use crate::cache::BlockCache;
use crate::compaction::{self, CompactionTask};
use crate::error::{Error, Result};
use crate::manifest::{
    NUM_LEVELS, Version, VersionEdit, VersionSet, current_path, parse_manifest_name,
};
use crate::memtable::{MemTable, MemTableManager};
use crate::sstable::parse_sst_name;
use crate::types::LookupResult;
use crate::wal::{
    RecordType, SyncPolicy, WALManager, WALReader, WALRecord, list_wals, parse_wal_name, wal_path,
};

pub use iter::DbIterator;

const LOCK_FILE: &str = "LOCK";

/// Frozen memtables allowed to queue before writes stall on the flusher.
const MAX_IMMUTABLE_MEMTABLES: usize = 2;

/// Largest accepted user key. The block format stores unshared key length
/// as a u16 and the internal-key trailer takes 8 bytes of that space.
pub const MAX_KEY_SIZE: usize = u16::MAX as usize - 8;

/// Engine tunables. The defaults suit a small general-purpose store.
#[derive(Debug, Clone)]
pub struct Options {
    /// Initialize a fresh store when the directory holds none.
    pub create_if_missing: bool,
    /// Refuse to open a store that already exists.
    pub error_if_exists: bool,
    /// Bytes a memtable may hold before it is frozen and flushed.
    pub write_buffer_size: usize,
    /// Byte size one uncompressed data block aims for.
    pub block_size: usize,
    /// Byte budget of the shared block cache. Zero disables caching.
    pub block_cache_size: usize,
    /// When WAL appends reach disk.
    pub sync_policy: SyncPolicy,
    /// L0 table count that starts a compaction.
    pub l0_compaction_trigger: usize,
    /// L0 table count where each write is briefly delayed.
    pub l0_slowdown_trigger: usize,
    /// L0 table count where writes stall until compaction catches up.
    pub l0_stop_trigger: usize,
    /// Byte budget of L1. Each deeper level multiplies it.
    pub base_level_size: u64,
    /// Growth factor of the level budgets.
    pub level_size_multiplier: u64,
    /// Compaction splits its output files at this size.
    pub target_file_size: u64,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            create_if_missing: true,
            error_if_exists: false,
            write_buffer_size: 4 << 20,
            block_size: 4 << 10,
            block_cache_size: 32 << 20,
            sync_policy: SyncPolicy::EveryWrite,
            l0_compaction_trigger: 4,
            l0_slowdown_trigger: 8,
            l0_stop_trigger: 12,
            base_level_size: 10 << 20,
            level_size_multiplier: 10,
            target_file_size: 2 << 20,
        }
    }
}

impl Options {
    fn validate(&self) -> Result<()> {
        if self.write_buffer_size == 0 {
            return Err(Error::InvalidArgument(
                "write_buffer_size must be positive".into(),
            ));
        }
        if self.block_size < 64 {
            return Err(Error::InvalidArgument(
                "block_size must be at least 64 bytes".into(),
            ));
        }
        if self.l0_compaction_trigger == 0 {
            return Err(Error::InvalidArgument(
                "l0_compaction_trigger must be positive".into(),
            ));
        }
        if self.l0_slowdown_trigger < self.l0_compaction_trigger {
            return Err(Error::InvalidArgument(
                "l0_slowdown_trigger must be at least l0_compaction_trigger".into(),
            ));
        }
        if self.l0_stop_trigger <= self.l0_slowdown_trigger {
            return Err(Error::InvalidArgument(
                "l0_stop_trigger must exceed l0_slowdown_trigger".into(),
            ));
        }
        if self.base_level_size == 0 {
            return Err(Error::InvalidArgument(
                "base_level_size must be positive".into(),
            ));
        }
        if self.level_size_multiplier < 2 {
            return Err(Error::InvalidArgument(
                "level_size_multiplier must be at least 2".into(),
            ));
        }
        if self.target_file_size == 0 {
            return Err(Error::InvalidArgument(
                "target_file_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time snapshot of engine counters.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub puts: u64,
    pub deletes: u64,
    pub gets: u64,
    pub flushes: u64,
    pub compactions: u64,
    pub active_memtable_bytes: usize,
    pub immutable_memtables: usize,
    pub tables_per_level: Vec<usize>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub last_sequence: u64,
}

enum Task {
    Work,
    Shutdown,
}

pub(crate) struct DbInner {
    pub(crate) opts: Options,
    pub(crate) dir: PathBuf,
    pub(crate) memtables: MemTableManager,
    wal: Mutex<WALManager>,
    pub(crate) versions: Mutex<VersionSet>,
    /// Serializes writers so sequence assignment, the WAL append and the
    /// memtable insert happen in one order.
    write_lock: Mutex<()>,
    work_tx: Sender<Task>,
    closed: AtomicBool,
    /// First error the background worker hit. Writes refuse to proceed
    /// until the engine is reopened.
    background_error: Mutex<Option<Error>>,
    /// Signaled after each flush or compaction so stalled writers recheck.
    work_done_lock: Mutex<()>,
    work_done: Condvar,
    cache: Option<Arc<BlockCache>>,
    /// Snapshots pinned by open iterators: sequence -> refcount. The
    /// oldest pin bounds what compaction may drop.
    pinned: Mutex<BTreeMap<u64, usize>>,
    /// Held for the engine's lifetime to keep other processes out.
    _lock_file: File,
    puts: AtomicU64,
    deletes: AtomicU64,
    gets: AtomicU64,
    flushes: AtomicU64,
    compactions: AtomicU64,
}

impl DbInner {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn check_background_error(&self) -> Result<()> {
        match &*self.background_error.lock() {
            Some(e) => Err(Error::Background(e.to_string())),
            None => Ok(()),
        }
    }

    fn schedule_work(&self) {
        // A closed channel just means the worker already shut down.
        let _ = self.work_tx.send(Task::Work);
    }

    /// Sequence number new reads should observe.
    pub(crate) fn read_snapshot(&self) -> u64 {
        self.versions.lock().last_sequence()
    }

    /// Reads and pins the current snapshot in one step, so a concurrent
    /// compaction can never compute its drop horizon in between.
    pub(crate) fn pin_read_snapshot(&self) -> u64 {
        let versions = self.versions.lock();
        let sequence = versions.last_sequence();
        *self.pinned.lock().entry(sequence).or_insert(0) += 1;
        sequence
    }

    pub(crate) fn unpin_snapshot(&self, sequence: u64) {
        let mut pinned = self.pinned.lock();
        if let Some(count) = pinned.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&sequence);
            }
        }
    }

    /// Oldest sequence number any live reader may still ask for. Takes the
    /// versions lock first, same order as `pin_read_snapshot`.
    fn smallest_pinned_snapshot(&self) -> u64 {
        let versions = self.versions.lock();
        let pinned = self.pinned.lock();
        match pinned.keys().next() {
            Some(&sequence) => sequence,
            None => versions.last_sequence(),
        }
    }

    fn write(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        self.check_open()?;
        validate_key(key)?;
        let _guard = self.write_lock.lock();
        self.check_background_error()?;
        self.make_room_for_write()?;

        let sequence = self.versions.lock().last_sequence() + 1;
        let record = match value {
            Some(v) => WALRecord::put(sequence, key.to_vec(), v.to_vec()),
            None => WALRecord::delete(sequence, key.to_vec()),
        };
        self.wal.lock().active_writer().append(&record)?;

        match value {
            Some(v) => {
                self.memtables.put(key, sequence, v);
                self.puts.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.memtables.delete(key, sequence);
                self.deletes.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.versions.lock().set_last_sequence(sequence);
        Ok(())
    }

    /// Ensures the active memtable can take one more write. Called with
    /// the write lock held.
    ///
    /// Backpressure, in escalating order: one short sleep per write while
    /// L0 is crowded, then freeze-and-rotate when the memtable fills, then
    /// stall outright when the flush queue or L0 is at its limit.
    fn make_room_for_write(&self) -> Result<()> {
        let mut allow_delay = true;
        loop {
            self.check_background_error()?;
            let l0_count = self.versions.lock().current().table_count(0);

            if allow_delay
                && l0_count >= self.opts.l0_slowdown_trigger
                && l0_count < self.opts.l0_stop_trigger
            {
                std::thread::sleep(Duration::from_millis(1));
                allow_delay = false;
                continue;
            }
            if !self.memtables.is_active_full() {
                return Ok(());
            }
            if self.memtables.immutable_count() >= MAX_IMMUTABLE_MEMTABLES
                || l0_count >= self.opts.l0_stop_trigger
            {
                log::debug!(
                    "write stalled: {} frozen memtables, {} L0 tables",
                    self.memtables.immutable_count(),
                    l0_count
                );
                let mut guard = self.work_done_lock.lock();
                self.work_done
                    .wait_for(&mut guard, Duration::from_millis(100));
                continue;
            }

            // Freeze the full memtable behind a fresh WAL segment.
            let new_wal_number = {
                let mut wal = self.wal.lock();
                wal.rotate()?;
                wal.active_number()
            };
            self.memtables.freeze(new_wal_number);
            self.schedule_work();
        }
    }

    pub(crate) fn get_at(&self, key: &[u8], snapshot: u64) -> Result<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        match self.memtables.get(key, snapshot) {
            LookupResult::Found(value) => return Ok(Some(value)),
            LookupResult::Deleted => return Ok(None),
            LookupResult::Missing => {}
        }
        let version = self.versions.lock().current();
        match version.get(key, snapshot)? {
            LookupResult::Found(value) => Ok(Some(value)),
            LookupResult::Deleted | LookupResult::Missing => Ok(None),
        }
    }

    /// Flushes the oldest frozen memtable to an L0 table and retires its
    /// WAL segment.
    fn flush_oldest(&self, mem: &Arc<MemTable>) -> Result<()> {
        let mut edit = VersionEdit::default();
        if !mem.is_empty() {
            let table_id = self.versions.lock().new_file_number();
            let meta = compaction::flush_memtable(&self.dir, &self.opts, mem, table_id)?;
            edit.add_table(meta);
        }
        // Rotation numbers segments consecutively and flushes run oldest
        // first, so everything below the successor segment is now on disk.
        edit.log_number = Some(mem.wal_number() + 1);
        self.versions.lock().log_and_apply(&edit)?;
        self.memtables.remove_oldest_immutable();
        self.flushes.fetch_add(1, Ordering::Relaxed);

        let obsolete = wal_path(&self.dir, mem.wal_number());
        if let Err(e) = WALManager::delete_wal(&obsolete) {
            log::warn!("failed to delete wal segment {}: {e}", obsolete.display());
        }
        Ok(())
    }

    fn run_compaction(&self, version: &Arc<Version>, task: &CompactionTask) -> Result<()> {
        let smallest_snapshot = self.smallest_pinned_snapshot();
        let outputs = compaction::compact(
            &self.dir,
            &self.opts,
            version,
            task,
            smallest_snapshot,
            || self.versions.lock().new_file_number(),
        )?;
        let edit = task.into_edit(outputs);
        self.versions.lock().log_and_apply(&edit)?;
        self.compactions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A handle to an open storage engine. Cloneable operations all take
/// `&self`; the handle is `Send + Sync` and meant to be shared.
pub struct DB {
    inner: Arc<DbInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB").finish_non_exhaustive()
    }
}

impl DB {
    /// Opens (creating if needed) the engine in `dir`.
    ///
    /// Only one process may hold a directory at a time; a second open
    /// fails with [`Error::DirectoryLocked`].
    pub fn open(dir: impl AsRef<Path>, opts: Options) -> Result<DB> {
        opts.validate()?;
        let dir = dir.as_ref().to_path_buf();

        // A store exists once a CURRENT file names its manifest. Checked
        // before anything touches the directory so a refused open leaves
        // no trace behind.
        let store_exists = current_path(&dir).exists();
        if store_exists && opts.error_if_exists {
            return Err(Error::InvalidArgument(format!(
                "store already exists at {}",
                dir.display()
            )));
        }
        if !store_exists && !opts.create_if_missing {
            return Err(Error::InvalidArgument(format!(
                "no store at {} and create_if_missing is off",
                dir.display()
            )));
        }

        fs::create_dir_all(&dir)?;

        let lock_file = File::create(dir.join(LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| Error::DirectoryLocked(dir.clone()))?;

        let cache = if opts.block_cache_size > 0 {
            Some(Arc::new(BlockCache::new(opts.block_cache_size)))
        } else {
            None
        };
        let mut versions = VersionSet::open(&dir, cache.clone())?;

        // Replay WAL segments the manifest calls unflushed, oldest first.
        // Each non-empty segment becomes an L0 table before the engine
        // accepts traffic.
        let mut recovered = VersionEdit::default();
        let mut max_sequence = versions.last_sequence();
        for (number, path) in list_wals(&dir)? {
            if number < versions.log_number() {
                continue;
            }
            let reader = WALReader::new(&path)?;
            let mem = Arc::new(MemTable::new(opts.write_buffer_size, number));
            let mut records = reader.iter();
            for record in records.by_ref() {
                let record = record?;
                max_sequence = max_sequence.max(record.sequence);
                match record.record_type {
                    RecordType::Put => mem.put(&record.key, record.sequence, &record.value),
                    RecordType::Delete => mem.delete(&record.key, record.sequence),
                }
            }
            if records.offset() < reader.len() {
                log::warn!(
                    "wal segment {number:06} torn at offset {} of {} bytes, tail dropped",
                    records.offset(),
                    reader.len()
                );
            }
            if !mem.is_empty() {
                let table_id = versions.new_file_number();
                let meta = compaction::flush_memtable(&dir, &opts, &mem, table_id)?;
                log::info!(
                    "replayed wal segment {number:06} into table {table_id} ({} entries)",
                    meta.entry_count
                );
                recovered.add_table(meta);
            }
        }

        // Fresh active segment; everything below its number is flushed.
        let wal = WALManager::new(&dir, opts.sync_policy)?;
        recovered.log_number = Some(wal.active_number());
        if max_sequence > versions.last_sequence() {
            recovered.last_sequence = Some(max_sequence);
        }
        versions.log_and_apply(&recovered)?;

        delete_obsolete_files(&dir, &versions)?;

        let memtables = MemTableManager::new(opts.write_buffer_size, wal.active_number());
        let (work_tx, work_rx) = crossbeam_channel::unbounded();

        let inner = Arc::new(DbInner {
            opts,
            dir,
            memtables,
            wal: Mutex::new(wal),
            versions: Mutex::new(versions),
            write_lock: Mutex::new(()),
            work_tx,
            closed: AtomicBool::new(false),
            background_error: Mutex::new(None),
            work_done_lock: Mutex::new(()),
            work_done: Condvar::new(),
            cache,
            pinned: Mutex::new(BTreeMap::new()),
            _lock_file: lock_file,
            puts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
        });

        let worker = spawn_worker(inner.clone(), work_rx)?;
        let db = DB {
            inner,
            worker: Mutex::new(Some(worker)),
        };
        // Recovery may have left L0 over its trigger.
        db.inner.schedule_work();
        Ok(db)
    }

    /// Stores `value` under `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.write(key, Some(value))
    }

    /// Removes `key` by writing a tombstone.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.write(key, None)
    }

    /// Returns the newest value stored under `key`, or `None` if the key
    /// is absent or deleted.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.check_open()?;
        let snapshot = self.inner.read_snapshot();
        self.inner.get_at(key, snapshot)
    }

    /// Iterator over the whole store, positioned at the first key.
    pub fn iter(&self) -> Result<DbIterator> {
        self.range(None, None, false)
    }

    /// Iterator over user keys in `[lower, upper)`. `None` leaves that
    /// end unbounded. Starts at the first key in range, or at the last
    /// when `reverse` is set, in which case consuming it walks backward.
    pub fn range(
        &self,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        reverse: bool,
    ) -> Result<DbIterator> {
        self.inner.check_open()?;
        let mut iter = DbIterator::new(
            self.inner.clone(),
            lower.map(|b| b.to_vec()),
            upper.map(|b| b.to_vec()),
            reverse,
        );
        if reverse {
            iter.seek_to_last()?;
        } else {
            iter.seek_to_first()?;
        }
        Ok(iter)
    }

    /// Forces the active memtable out to an L0 table and waits for the
    /// flush queue to drain.
    pub fn flush(&self) -> Result<()> {
        self.inner.check_open()?;
        {
            let _guard = self.inner.write_lock.lock();
            if !self.inner.memtables.active().is_empty() {
                let new_wal_number = {
                    let mut wal = self.inner.wal.lock();
                    wal.rotate()?;
                    wal.active_number()
                };
                self.inner.memtables.freeze(new_wal_number);
                self.inner.schedule_work();
            }
        }
        while self.inner.memtables.has_immutable() {
            self.inner.check_background_error()?;
            let mut guard = self.inner.work_done_lock.lock();
            self.inner
                .work_done
                .wait_for(&mut guard, Duration::from_millis(50));
        }
        self.inner.check_background_error()
    }

    pub fn stats(&self) -> Stats {
        let inner = &self.inner;
        let version = inner.versions.lock().current();
        Stats {
            puts: inner.puts.load(Ordering::Relaxed),
            deletes: inner.deletes.load(Ordering::Relaxed),
            gets: inner.gets.load(Ordering::Relaxed),
            flushes: inner.flushes.load(Ordering::Relaxed),
            compactions: inner.compactions.load(Ordering::Relaxed),
            active_memtable_bytes: inner.memtables.active_size(),
            immutable_memtables: inner.memtables.immutable_count(),
            tables_per_level: (0..NUM_LEVELS).map(|l| version.table_count(l)).collect(),
            cache_hits: inner.cache.as_ref().map_or(0, |c| c.hit_count()),
            cache_misses: inner.cache.as_ref().map_or(0, |c| c.miss_count()),
            last_sequence: inner.versions.lock().last_sequence(),
        }
    }

    /// Shuts the engine down: stops the worker and syncs the WAL.
    /// Unflushed memtables are recovered from the WAL on the next open.
    /// Idempotent; also runs on drop.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.inner.work_tx.send(Task::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        self.inner.wal.lock().active_writer().sync()?;
        // A failed flush or compaction must not vanish silently at
        // shutdown; the WAL above is already synced regardless.
        self.inner.check_background_error()?;
        log::info!("closed storage engine at {}", self.inner.dir.display());
        Ok(())
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("error closing storage engine: {e}");
        }
    }
}

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(Error::InvalidArgument(format!(
            "key length {} exceeds maximum {MAX_KEY_SIZE}",
            key.len()
        )));
    }
    Ok(())
}

/// Removes files no live state references: orphaned tables from crashed
/// compactions, fully flushed WAL segments, superseded manifests.
fn delete_obsolete_files(dir: &Path, versions: &VersionSet) -> Result<()> {
    let live: HashSet<u64> = versions.live_table_ids().into_iter().collect();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let doomed = if let Some(id) = parse_sst_name(name) {
            !live.contains(&id)
        } else if let Some(number) = parse_wal_name(name) {
            number < versions.log_number()
        } else if let Some(number) = parse_manifest_name(name) {
            number != versions.manifest_number()
        } else {
            name == "CURRENT.tmp"
        };
        if doomed {
            log::info!("removing obsolete file {name}");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn spawn_worker(inner: Arc<DbInner>, rx: Receiver<Task>) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("silt-background".into())
        .spawn(move || worker_loop(inner, rx))?;
    Ok(handle)
}

fn worker_loop(inner: Arc<DbInner>, rx: Receiver<Task>) {
    while let Ok(task) = rx.recv() {
        match task {
            Task::Shutdown => break,
            Task::Work => {
                if let Err(e) = do_background_work(&inner) {
                    log::error!("background work failed: {e}");
                    *inner.background_error.lock() = Some(e);
                }
                // Wake stalled writers even on failure so they can see the
                // error instead of timing out.
                inner.work_done.notify_all();
            }
        }
    }
}

/// Drains the flush queue, then compacts until every level is within
/// budget.
fn do_background_work(inner: &Arc<DbInner>) -> Result<()> {
    loop {
        if inner.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(mem) = inner.memtables.oldest_immutable() {
            inner.flush_oldest(&mem)?;
            inner.work_done.notify_all();
            continue;
        }
        let version = inner.versions.lock().current();
        let Some(task) = compaction::pick_compaction(&version, &inner.opts) else {
            return Ok(());
        };
        inner.run_compaction(&version, &task)?;
        inner.work_done.notify_all();
    }
}
