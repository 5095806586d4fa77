//! Background compaction: keeps the level structure shallow and throws
//! away data nothing can read anymore.
//!
//! ## Policy
//! Each level has a budget. L0 is scored by table count (its tables
//! overlap, so every one taxes reads); deeper levels are scored by total
//! bytes against an exponentially growing limit. The level with the
//! highest score at or past its budget compacts next:
//!
//! - L0: every L0 table plus the overlapping part of L1, merged into L1.
//! - L1+: the oldest table at the level plus the overlapping part of the
//!   level below, merged one level down.
//!
//! ## What gets dropped
//! The merge sees every version of a key, newest first. A version is
//! dead once a newer version of the same key is visible to the oldest
//! live snapshot. A tombstone additionally needs the levels below the
//! output to be clear of its key, otherwise it still has something to
//! shadow and must survive the merge.

use std::path::Path;
use std::sync::Arc;

use crate::db::Options;
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::iterator::concat::ConcatIterator;
use crate::iterator::merge::MergeIterator;
use crate::manifest::{NUM_LEVELS, TableHandle, Version, VersionEdit};
use crate::memtable::{MemTable, MemTableIterator};
use crate::sstable::{SSTableBuilder, SSTableMeta, sst_path};
use crate::types::{MAX_SEQUENCE, ValueType, sequence_of, tag_of, user_key_of};

/// The inputs of one compaction, pinned so the files outlive the merge
/// even if a concurrent edit drops them from the live version.
pub struct CompactionTask {
    /// Level the compaction drains.
    pub level: usize,
    /// Tables at `level` being compacted.
    pub inputs: Vec<Arc<TableHandle>>,
    /// Tables at `level + 1` overlapping the inputs' key range.
    pub next_level_inputs: Vec<Arc<TableHandle>>,
}

impl CompactionTask {
    pub fn output_level(&self) -> usize {
        self.level + 1
    }

    /// Total bytes this compaction will read.
    pub fn input_size(&self) -> u64 {
        self.inputs
            .iter()
            .chain(&self.next_level_inputs)
            .map(|h| h.meta.file_size)
            .sum()
    }

    /// The manifest edit describing this compaction's effect: every input
    /// deleted, every output added.
    pub fn into_edit(&self, outputs: Vec<SSTableMeta>) -> VersionEdit {
        let mut edit = VersionEdit::default();
        for handle in &self.inputs {
            edit.delete_table(self.level as u32, handle.id());
        }
        for handle in &self.next_level_inputs {
            edit.delete_table(self.output_level() as u32, handle.id());
        }
        for meta in outputs {
            edit.add_table(meta);
        }
        edit
    }
}

/// Byte budget for a level. Grows by `level_size_multiplier` per level
/// starting from `base_level_size` at L1.
pub fn max_bytes_for_level(opts: &Options, level: usize) -> u64 {
    debug_assert!(level >= 1);
    let mut max = opts.base_level_size;
    for _ in 1..level {
        max = max.saturating_mul(opts.level_size_multiplier);
    }
    max
}

fn level_score(version: &Version, opts: &Options, level: usize) -> f64 {
    if level == 0 {
        version.table_count(0) as f64 / opts.l0_compaction_trigger as f64
    } else {
        version.level_size(level) as f64 / max_bytes_for_level(opts, level) as f64
    }
}

/// Picks the most urgent compaction, or `None` when every level is within
/// budget. The bottom level never compacts further down.
pub fn pick_compaction(version: &Version, opts: &Options) -> Option<CompactionTask> {
    let mut best_level = 0;
    let mut best_score = 0.0_f64;
    for level in 0..NUM_LEVELS - 1 {
        let score = level_score(version, opts, level);
        if score > best_score {
            best_score = score;
            best_level = level;
        }
    }
    if best_score < 1.0 {
        return None;
    }

    let inputs: Vec<Arc<TableHandle>> = if best_level == 0 {
        // L0 tables overlap each other, take them all.
        version.levels[0].clone()
    } else {
        // Oldest table first keeps the level draining fairly.
        let oldest = version.levels[best_level].iter().min_by_key(|h| h.id())?;
        vec![oldest.clone()]
    };
    if inputs.is_empty() {
        return None;
    }

    let mut smallest = user_key_of(&inputs[0].meta.min_key).to_vec();
    let mut largest = user_key_of(&inputs[0].meta.max_key).to_vec();
    for handle in &inputs[1..] {
        let min = user_key_of(&handle.meta.min_key);
        let max = user_key_of(&handle.meta.max_key);
        if min < smallest.as_slice() {
            smallest = min.to_vec();
        }
        if max > largest.as_slice() {
            largest = max.to_vec();
        }
    }
    let next_level_inputs = version.overlapping_tables(best_level + 1, &smallest, &largest);

    Some(CompactionTask {
        level: best_level,
        inputs,
        next_level_inputs,
    })
}

/// Merges the task's inputs into new tables at the output level.
///
/// `smallest_snapshot` is the oldest sequence number any reader may still
/// ask for; versions only visible above it are fair game. `alloc_table_id`
/// hands out file numbers for outputs. Returns the output metas with
/// their level already set; the caller turns them into an edit and
/// applies it. On failure every file the merge created is unlinked, so
/// a retried compaction starts from a clean slate.
pub fn compact(
    dir: &Path,
    opts: &Options,
    version: &Version,
    task: &CompactionTask,
    smallest_snapshot: u64,
    mut alloc_table_id: impl FnMut() -> u64,
) -> Result<Vec<SSTableMeta>> {
    let mut created: Vec<u64> = Vec::new();
    let result = merge_inputs(
        dir,
        opts,
        version,
        task,
        smallest_snapshot,
        &mut alloc_table_id,
        &mut created,
    );
    if result.is_err() {
        // The manifest never saw these files.
        for id in &created {
            let _ = std::fs::remove_file(sst_path(dir, *id));
        }
    }
    result
}

fn merge_inputs(
    dir: &Path,
    opts: &Options,
    version: &Version,
    task: &CompactionTask,
    smallest_snapshot: u64,
    alloc_table_id: &mut dyn FnMut() -> u64,
    created: &mut Vec<u64>,
) -> Result<Vec<SSTableMeta>> {
    let output_level = task.output_level();

    let mut children: Vec<Box<dyn StorageIterator>> = Vec::new();
    if task.level == 0 {
        // Overlapping tables each need their own cursor in the merge.
        for handle in &task.inputs {
            children.push(Box::new(handle.table.iter()));
        }
    } else {
        let tables = task.inputs.iter().map(|h| h.table.clone()).collect();
        children.push(Box::new(ConcatIterator::new(tables)));
    }
    if !task.next_level_inputs.is_empty() {
        let tables = task
            .next_level_inputs
            .iter()
            .map(|h| h.table.clone())
            .collect();
        children.push(Box::new(ConcatIterator::new(tables)));
    }
    let mut iter = MergeIterator::new(children);
    // Constructors defer IO errors; an explicit seek surfaces them before
    // the merge starts instead of treating a broken table as empty.
    iter.seek_to_first()?;

    let mut outputs: Vec<SSTableMeta> = Vec::new();
    let mut builder: Option<SSTableBuilder> = None;
    let mut last_user_key: Option<Vec<u8>> = None;
    // Sequence of the previous (newer) version of the current user key.
    let mut last_seq_for_key = MAX_SEQUENCE;

    while iter.is_valid() {
        let key = iter.key();
        let user_key = user_key_of(key);
        let sequence = sequence_of(key);

        if last_user_key.as_deref() != Some(user_key) {
            last_user_key = Some(user_key.to_vec());
            last_seq_for_key = MAX_SEQUENCE;

            // Outputs split only between user keys. Point lookups consult
            // a single table per deep level, so a key's versions must
            // never straddle two tables.
            let split = builder
                .as_ref()
                .is_some_and(|out| out.estimated_size() >= opts.target_file_size);
            if split {
                if let Some(out) = builder.take() {
                    let mut meta = out.finish()?;
                    meta.level = output_level as u32;
                    outputs.push(meta);
                }
            }
        }

        let mut dead = false;
        if last_seq_for_key <= smallest_snapshot {
            // A newer version of this key is visible to every snapshot;
            // nothing can ever read this one again.
            dead = true;
        } else if (tag_of(key) & 0xff) as u8 == ValueType::Delete as u8
            && sequence <= smallest_snapshot
            && !version.key_may_exist_below(output_level, user_key)
        {
            // Tombstone with nothing left to shadow below the output.
            dead = true;
        }
        last_seq_for_key = sequence;

        if !dead {
            let mut out = match builder.take() {
                Some(b) => b,
                None => {
                    let id = alloc_table_id();
                    created.push(id);
                    SSTableBuilder::new(&sst_path(dir, id), id, opts.block_size)?
                }
            };
            out.add(key, iter.value())?;
            builder = Some(out);
        }
        iter.next()?;
    }

    if let Some(out) = builder {
        let mut meta = out.finish()?;
        meta.level = output_level as u32;
        outputs.push(meta);
    }

    log::info!(
        "compacted L{}: {} + {} tables ({} bytes) -> {} tables at L{}",
        task.level,
        task.inputs.len(),
        task.next_level_inputs.len(),
        task.input_size(),
        outputs.len(),
        output_level
    );
    Ok(outputs)
}

/// Writes a frozen memtable out as one L0 table. A failed build unlinks
/// the partial file; nothing references it yet.
pub fn flush_memtable(
    dir: &Path,
    opts: &Options,
    memtable: &Arc<MemTable>,
    table_id: u64,
) -> Result<SSTableMeta> {
    debug_assert!(!memtable.is_empty());
    let result = write_level0_table(dir, opts, memtable, table_id);
    if result.is_err() {
        let _ = std::fs::remove_file(sst_path(dir, table_id));
    }
    result
}

fn write_level0_table(
    dir: &Path,
    opts: &Options,
    memtable: &Arc<MemTable>,
    table_id: u64,
) -> Result<SSTableMeta> {
    let mut builder = SSTableBuilder::new(&sst_path(dir, table_id), table_id, opts.block_size)?;
    let mut iter = MemTableIterator::new(memtable.clone());
    while iter.is_valid() {
        builder.add(iter.key(), iter.value())?;
        iter.next()?;
    }
    let meta = builder.finish()?;
    log::info!(
        "flushed memtable (wal {}) to table {} ({} entries, {} bytes)",
        memtable.wal_number(),
        table_id,
        meta.entry_count,
        meta.file_size
    );
    Ok(meta)
}
