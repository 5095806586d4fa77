//! Manifest: the durable record of which SSTables exist at which level.
//!
//! Every structural change (flush, compaction) is a [`VersionEdit`]
//! appended to the current `MANIFEST-NNNNNN` file; the `CURRENT` file
//! names the manifest that is authoritative. Recovery replays the edits
//! in order to rebuild the level layout and the counters. After enough
//! edits pile up the set is rewritten as a single snapshot edit in a
//! fresh manifest, and `CURRENT` is swung over atomically.
//!
//! Records share the WAL's framing discipline:
//!
//! ```text
//! ┌─────────┬─────────┬──────────────┐
//! │ crc (4) │ len (4) │ edit payload │
//! └─────────┴─────────┴──────────────┘
//! ```
//!
//! A torn final record means the process died mid-append; recovery keeps
//! everything before it. A checksum mismatch elsewhere is real corruption
//! and fails the open.

pub mod edit;
pub mod version;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::BlockCache;
use crate::error::{Error, Result};
use crate::sstable::{SSTable, SSTableMeta, sst_path};
use crate::types::internal_key_order;

pub use edit::VersionEdit;
pub use version::{NUM_LEVELS, TableHandle, Version};

const MANIFEST_PREFIX: &str = "MANIFEST-";
const CURRENT_FILE: &str = "CURRENT";
const RECORD_HEADER_SIZE: usize = 8;

/// Edits appended to one manifest before it is rewritten as a snapshot.
const REWRITE_THRESHOLD: usize = 128;

pub fn manifest_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{MANIFEST_PREFIX}{number:06}"))
}

pub fn current_path(dir: &Path) -> PathBuf {
    dir.join(CURRENT_FILE)
}

/// Parses `MANIFEST-NNNNNN` into its number.
pub fn parse_manifest_name(name: &str) -> Option<u64> {
    name.strip_prefix(MANIFEST_PREFIX)?.parse().ok()
}

/// Appends framed [`VersionEdit`] records to a manifest file.
struct ManifestWriter {
    writer: BufWriter<File>,
}

impl ManifestWriter {
    fn create(path: &Path) -> Result<ManifestWriter> {
        let file = File::create(path)?;
        Ok(ManifestWriter {
            writer: BufWriter::new(file),
        })
    }

    fn append(&mut self, edit: &VersionEdit) -> Result<()> {
        let payload = edit.encode();
        let crc = crc32fast::hash(&payload);
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Reads every intact edit out of a manifest file.
///
/// Stops quietly at a torn tail; a checksum failure before the tail is an
/// error.
fn read_manifest(path: &Path) -> Result<Vec<VersionEdit>> {
    let data = std::fs::read(path)?;
    let mut edits = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        if data.len() - offset < RECORD_HEADER_SIZE {
            log::warn!(
                "manifest {} has a torn record header at offset {offset}, ignoring tail",
                path.display()
            );
            break;
        }
        let crc = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
        let len = u32::from_le_bytes(data[offset + 4..offset + 8].try_into().unwrap()) as usize;
        let payload_start = offset + RECORD_HEADER_SIZE;
        if data.len() - payload_start < len {
            log::warn!(
                "manifest {} has a torn record at offset {offset}, ignoring tail",
                path.display()
            );
            break;
        }
        let payload = &data[payload_start..payload_start + len];
        if crc32fast::hash(payload) != crc {
            return Err(Error::corruption(format!(
                "manifest {} checksum mismatch at offset {offset}",
                path.display()
            )));
        }
        edits.push(VersionEdit::decode(payload)?);
        offset = payload_start + len;
    }

    Ok(edits)
}

/// Points `CURRENT` at the given manifest: write a temp file, fsync it,
/// rename over `CURRENT`, fsync the directory.
fn set_current(dir: &Path, manifest_number: u64) -> Result<()> {
    let tmp_path = dir.join("CURRENT.tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(format!("{MANIFEST_PREFIX}{manifest_number:06}\n").as_bytes())?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, current_path(dir))?;
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Returns the manifest named by `CURRENT`, or `None` for a brand-new
/// directory.
fn read_current(dir: &Path) -> Result<Option<(PathBuf, u64)>> {
    let path = current_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let name = std::fs::read_to_string(&path)?;
    let name = name.trim();
    let number = parse_manifest_name(name)
        .ok_or_else(|| Error::corruption(format!("CURRENT names an invalid manifest: {name:?}")))?;
    let manifest = dir.join(name);
    if !manifest.exists() {
        return Err(Error::corruption(format!(
            "CURRENT names a missing manifest: {name}"
        )));
    }
    Ok(Some((manifest, number)))
}

fn sort_level(level: usize, handles: &mut [Arc<TableHandle>]) {
    if level == 0 {
        // Newest flush first; ids only grow.
        handles.sort_by(|a, b| b.id().cmp(&a.id()));
    } else {
        handles.sort_by(|a, b| internal_key_order(&a.meta.min_key, &b.meta.min_key));
    }
}

/// Owns the current [`Version`] and the counters that survive restarts.
pub struct VersionSet {
    dir: PathBuf,
    current: Arc<Version>,
    /// Hands out SSTable ids and manifest numbers. WAL segments number
    /// themselves separately.
    next_file_number: u64,
    /// Newest sequence number ever assigned to a write.
    last_sequence: u64,
    /// WAL segments numbered below this are fully flushed.
    log_number: u64,
    manifest_number: u64,
    writer: ManifestWriter,
    edits_since_rewrite: usize,
    cache: Option<Arc<BlockCache>>,
}

impl VersionSet {
    /// Recovers (or initializes) the version state in `dir`.
    ///
    /// Always starts a fresh manifest holding one snapshot edit and swings
    /// `CURRENT` to it, so a crash loop cannot grow the old manifest
    /// without bound.
    pub fn open(dir: &Path, cache: Option<Arc<BlockCache>>) -> Result<VersionSet> {
        let mut next_file_number = 1;
        let mut last_sequence = 0;
        let mut log_number = 0;
        let mut meta_levels: Vec<Vec<SSTableMeta>> = (0..NUM_LEVELS).map(|_| Vec::new()).collect();

        let old_manifest = read_current(dir)?;
        if let Some((manifest, number)) = &old_manifest {
            let edits = read_manifest(manifest)?;
            log::info!(
                "recovering manifest {} ({} edits)",
                manifest.display(),
                edits.len()
            );
            for edit in &edits {
                apply_to_metas(&mut meta_levels, edit)?;
                if let Some(n) = edit.next_file_number {
                    next_file_number = next_file_number.max(n);
                }
                if let Some(n) = edit.last_sequence {
                    last_sequence = last_sequence.max(n);
                }
                if let Some(n) = edit.log_number {
                    log_number = log_number.max(n);
                }
            }
            next_file_number = next_file_number.max(number + 1);
        }

        // Open every surviving table. A table the manifest promises but the
        // directory lacks is unrecoverable.
        let mut levels: Vec<Vec<Arc<TableHandle>>> = Vec::with_capacity(NUM_LEVELS);
        for (level, metas) in meta_levels.into_iter().enumerate() {
            let mut handles = Vec::with_capacity(metas.len());
            for meta in metas {
                next_file_number = next_file_number.max(meta.id + 1);
                let path = sst_path(dir, meta.id);
                let table = Arc::new(SSTable::open(&path, meta.clone(), cache.clone())?);
                handles.push(Arc::new(TableHandle::new(meta, table, path)));
            }
            sort_level(level, &mut handles);
            levels.push(handles);
        }

        let manifest_number = next_file_number;
        next_file_number += 1;

        let mut set = VersionSet {
            dir: dir.to_path_buf(),
            current: Arc::new(Version { levels }),
            next_file_number,
            last_sequence,
            log_number,
            manifest_number,
            writer: ManifestWriter::create(&manifest_path(dir, manifest_number))?,
            edits_since_rewrite: 0,
            cache,
        };
        let snapshot = set.snapshot_edit();
        set.writer.append(&snapshot)?;
        set.writer.sync()?;
        set_current(dir, manifest_number)?;

        if let Some((old_path, _)) = old_manifest {
            if let Err(e) = std::fs::remove_file(&old_path) {
                log::warn!(
                    "failed to delete old manifest {}: {e}",
                    old_path.display()
                );
            }
        }

        Ok(set)
    }

    /// Persists `edit`, then installs the resulting version.
    ///
    /// Added tables are opened before anything is written: if one of them
    /// is unreadable the manifest must not start referencing it. Deleted
    /// tables are marked for unlink once their last reader drops.
    pub fn log_and_apply(&mut self, edit: &VersionEdit) -> Result<()> {
        let mut opened = Vec::with_capacity(edit.added.len());
        for meta in &edit.added {
            let level = meta.level as usize;
            if level >= NUM_LEVELS {
                return Err(Error::InvalidArgument(format!(
                    "edit adds table {} to level {level}, max is {}",
                    meta.id,
                    NUM_LEVELS - 1
                )));
            }
            if self.current.levels[level].iter().any(|h| h.id() == meta.id) {
                continue;
            }
            let path = sst_path(&self.dir, meta.id);
            let table = Arc::new(SSTable::open(&path, meta.clone(), self.cache.clone())?);
            opened.push(Arc::new(TableHandle::new(meta.clone(), table, path)));
        }

        // Stamp the watermarks the edit doesn't carry itself. Every logged
        // record then restores the counters on replay, even when the edit
        // came from a flush or compaction that only moved tables around.
        let mut record = edit.clone();
        if record.next_file_number.is_none() {
            record.next_file_number = Some(self.next_file_number);
        }
        if record.last_sequence.is_none() {
            record.last_sequence = Some(self.last_sequence);
        }
        self.writer.append(&record)?;
        self.writer.sync()?;

        let mut levels = self.current.levels.clone();
        for &(level, id) in &edit.deleted {
            let level_tables = &mut levels[level as usize];
            if let Some(pos) = level_tables.iter().position(|h| h.id() == id) {
                let handle = level_tables.remove(pos);
                handle.mark_evicted();
            }
        }
        for handle in opened {
            let level = handle.meta.level as usize;
            levels[level].push(handle);
            sort_level(level, &mut levels[level]);
        }
        self.current = Arc::new(Version { levels });

        if let Some(n) = edit.next_file_number {
            self.next_file_number = self.next_file_number.max(n);
        }
        if let Some(n) = edit.last_sequence {
            self.last_sequence = self.last_sequence.max(n);
        }
        if let Some(n) = edit.log_number {
            self.log_number = self.log_number.max(n);
        }

        self.edits_since_rewrite += 1;
        if self.edits_since_rewrite >= REWRITE_THRESHOLD {
            self.rewrite_manifest()?;
        }
        Ok(())
    }

    /// One edit capturing the entire current state.
    fn snapshot_edit(&self) -> VersionEdit {
        let mut edit = VersionEdit {
            log_number: Some(self.log_number),
            next_file_number: Some(self.next_file_number),
            last_sequence: Some(self.last_sequence),
            ..VersionEdit::default()
        };
        for level in &self.current.levels {
            for handle in level {
                edit.add_table(handle.meta.clone());
            }
        }
        edit
    }

    /// Replaces the growing manifest with a fresh one holding a single
    /// snapshot edit.
    fn rewrite_manifest(&mut self) -> Result<()> {
        let new_number = self.next_file_number;
        self.next_file_number += 1;

        let mut writer = ManifestWriter::create(&manifest_path(&self.dir, new_number))?;
        let snapshot = self.snapshot_edit();
        writer.append(&snapshot)?;
        writer.sync()?;
        set_current(&self.dir, new_number)?;

        let old_path = manifest_path(&self.dir, self.manifest_number);
        if let Err(e) = std::fs::remove_file(&old_path) {
            log::warn!("failed to delete old manifest {}: {e}", old_path.display());
        }
        log::info!(
            "rewrote manifest {} -> {} ({} live tables)",
            self.manifest_number,
            new_number,
            self.current.total_tables()
        );

        self.manifest_number = new_number;
        self.writer = writer;
        self.edits_since_rewrite = 0;
        Ok(())
    }

    pub fn current(&self) -> Arc<Version> {
        self.current.clone()
    }

    /// Claims the next file number (SSTable id or manifest number).
    pub fn new_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, seq: u64) {
        debug_assert!(seq >= self.last_sequence);
        self.last_sequence = seq;
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn manifest_number(&self) -> u64 {
        self.manifest_number
    }

    pub fn live_table_ids(&self) -> Vec<u64> {
        self.current.live_table_ids()
    }
}

/// Replays one edit onto plain metadata during recovery. Tables are not
/// opened yet at this stage.
fn apply_to_metas(levels: &mut [Vec<SSTableMeta>], edit: &VersionEdit) -> Result<()> {
    for &(level, id) in &edit.deleted {
        let level = level as usize;
        if level >= NUM_LEVELS {
            return Err(Error::corruption(format!("edit deletes from level {level}")));
        }
        levels[level].retain(|m| m.id != id);
    }
    for meta in &edit.added {
        let level = meta.level as usize;
        if level >= NUM_LEVELS {
            return Err(Error::corruption(format!(
                "edit adds table {} to level {level}",
                meta.id
            )));
        }
        if !levels[level].iter().any(|m| m.id == meta.id) {
            levels[level].push(meta.clone());
        }
    }
    Ok(())
}
