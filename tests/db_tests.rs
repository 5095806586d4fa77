// Engine facade tests.
// The public surface: writes, point reads, scans, flushes, stats,
// locking, argument validation, shutdown.

use silt::{DB, Error, MAX_KEY_SIZE, Options};
use tempfile::tempdir;

fn open_default(path: &std::path::Path) -> DB {
    DB::open(path, Options::default()).unwrap()
}

// =============================================================================
// Test 1: Put then get returns the value
// =============================================================================
#[test]
fn put_get_roundtrip() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"apple", b"red").unwrap();
    db.put(b"banana", b"yellow").unwrap();

    assert_eq!(db.get(b"apple").unwrap(), Some(b"red".to_vec()));
    assert_eq!(db.get(b"banana").unwrap(), Some(b"yellow".to_vec()));
}

// =============================================================================
// Test 2: Absent keys come back as None
// =============================================================================
#[test]
fn get_missing_returns_none() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"here", b"v").unwrap();
    assert_eq!(db.get(b"not_here").unwrap(), None);
}

// =============================================================================
// Test 3: Overwrites return the newest value
// =============================================================================
#[test]
fn overwrite_returns_latest() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"counter", b"1").unwrap();
    db.put(b"counter", b"2").unwrap();
    db.put(b"counter", b"3").unwrap();

    assert_eq!(db.get(b"counter").unwrap(), Some(b"3".to_vec()));
}

// =============================================================================
// Test 4: Delete hides the value; deleting nothing is fine
// =============================================================================
#[test]
fn delete_hides_value() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"doomed", b"v").unwrap();
    db.delete(b"doomed").unwrap();
    assert_eq!(db.get(b"doomed").unwrap(), None);

    // Deleting an absent key succeeds.
    db.delete(b"never_existed").unwrap();
    assert_eq!(db.get(b"never_existed").unwrap(), None);

    // A later put resurrects the key.
    db.put(b"doomed", b"back").unwrap();
    assert_eq!(db.get(b"doomed").unwrap(), Some(b"back".to_vec()));
}

// =============================================================================
// Test 5: Empty values are legal and round-trip
// =============================================================================
#[test]
fn empty_value_roundtrips() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"flag", b"").unwrap();
    assert_eq!(db.get(b"flag").unwrap(), Some(Vec::new()));
}

// =============================================================================
// Test 6: Key limits are enforced
// =============================================================================
#[test]
fn key_limits_enforced() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    assert!(matches!(
        db.put(b"", b"v"),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        db.delete(b""),
        Err(Error::InvalidArgument(_))
    ));

    let too_long = vec![b'k'; MAX_KEY_SIZE + 1];
    assert!(matches!(
        db.put(&too_long, b"v"),
        Err(Error::InvalidArgument(_))
    ));

    // Exactly at the limit is accepted.
    let at_limit = vec![b'k'; MAX_KEY_SIZE];
    db.put(&at_limit, b"v").unwrap();
    assert_eq!(db.get(&at_limit).unwrap(), Some(b"v".to_vec()));
}

// =============================================================================
// Test 7: A second open of the same directory is refused
// =============================================================================
#[test]
fn second_open_is_locked() {
    let dir = tempdir().unwrap();
    let _db = open_default(dir.path());

    match DB::open(dir.path(), Options::default()) {
        Err(Error::DirectoryLocked(path)) => assert_eq!(path, dir.path()),
        other => panic!("expected DirectoryLocked, got {other:?}"),
    }
}

// =============================================================================
// Test 8: Flush moves data to tables and reads still work
// =============================================================================
#[test]
fn reads_after_flush_hit_tables() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    for i in 0..100 {
        let key = format!("key_{:04}", i);
        let value = format!("value_{}", i);
        db.put(key.as_bytes(), value.as_bytes()).unwrap();
    }
    db.delete(b"key_0042").unwrap();
    db.flush().unwrap();

    let stats = db.stats();
    assert!(stats.flushes >= 1);
    assert!(stats.tables_per_level[0] >= 1);
    assert_eq!(stats.active_memtable_bytes, 0);
    assert_eq!(stats.immutable_memtables, 0);

    assert_eq!(db.get(b"key_0007").unwrap(), Some(b"value_7".to_vec()));
    assert_eq!(db.get(b"key_0042").unwrap(), None);

    // Writes keep flowing after a flush.
    db.put(b"key_9999", b"late").unwrap();
    assert_eq!(db.get(b"key_9999").unwrap(), Some(b"late".to_vec()));
}

// =============================================================================
// Test 9: Scans see one version per key, without tombstones
// =============================================================================
#[test]
fn scan_is_sorted_and_deduped() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"banana", b"old").unwrap();
    db.put(b"apple", b"red").unwrap();
    db.flush().unwrap();
    // Newer state: one overwrite, one delete, one insert.
    db.put(b"banana", b"new").unwrap();
    db.delete(b"apple").unwrap();
    db.put(b"cherry", b"dark").unwrap();

    let mut iter = db.iter().unwrap();
    let mut entries = Vec::new();
    while iter.is_valid() {
        entries.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next().unwrap();
    }

    assert_eq!(
        entries,
        vec![
            (b"banana".to_vec(), b"new".to_vec()),
            (b"cherry".to_vec(), b"dark".to_vec()),
        ]
    );
}

// =============================================================================
// Test 10: Range bounds are half-open
// =============================================================================
#[test]
fn range_bounds_are_half_open() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    for key in [b"a", b"b", b"c", b"d", b"e"] {
        db.put(key, b"v").unwrap();
    }

    let mut iter = db.range(Some(b"b"), Some(b"e"), false).unwrap();
    let mut keys = Vec::new();
    while iter.is_valid() {
        keys.push(iter.key().to_vec());
        iter.next().unwrap();
    }
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

    // Unbounded below, bounded above.
    let mut iter = db.range(None, Some(b"c"), false).unwrap();
    let mut keys = Vec::new();
    while iter.is_valid() {
        keys.push(iter.key().to_vec());
        iter.next().unwrap();
    }
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
}

// =============================================================================
// Test 11: Reverse scans walk the range backward
// =============================================================================
#[test]
fn reverse_scan_walks_backward() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    for key in [b"a", b"b", b"c", b"d"] {
        db.put(key, b"v").unwrap();
    }
    db.delete(b"c").unwrap();

    let mut iter = db.iter().unwrap();
    iter.seek_to_last().unwrap();

    let mut keys = Vec::new();
    while iter.is_valid() {
        keys.push(iter.key().to_vec());
        iter.prev().unwrap();
    }
    assert_eq!(keys, vec![b"d".to_vec(), b"b".to_vec(), b"a".to_vec()]);

    // A reverse range starts below its upper bound.
    let iter = db.range(Some(b"a"), Some(b"d"), true).unwrap();
    assert!(iter.is_valid());
    assert_eq!(iter.key(), b"b");
}

// =============================================================================
// Test 12: Seek inside a scan
// =============================================================================
#[test]
fn seek_positions_scan() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    for key in [b"aa", b"cc", b"ee"] {
        db.put(key, b"v").unwrap();
    }

    let mut iter = db.iter().unwrap();
    iter.seek(b"cc").unwrap();
    assert_eq!(iter.key(), b"cc");

    iter.seek(b"dd").unwrap();
    assert_eq!(iter.key(), b"ee");

    iter.seek(b"zz").unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 13: An open scan does not see later writes
// =============================================================================
#[test]
fn scan_is_snapshot_isolated() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"stable", b"before").unwrap();
    let mut iter = db.iter().unwrap();

    db.put(b"stable", b"after").unwrap();
    db.put(b"brand_new", b"x").unwrap();

    let mut entries = Vec::new();
    while iter.is_valid() {
        entries.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next().unwrap();
    }
    assert_eq!(entries, vec![(b"stable".to_vec(), b"before".to_vec())]);
    drop(iter);

    // A fresh scan sees the new state.
    let iter = db.iter().unwrap();
    assert_eq!(iter.key(), b"brand_new");
    assert_eq!(db.get(b"stable").unwrap(), Some(b"after".to_vec()));
}

// =============================================================================
// Test 14: Stats reflect activity
// =============================================================================
#[test]
fn stats_reflect_activity() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"a", b"1").unwrap();
    db.put(b"b", b"2").unwrap();
    db.delete(b"a").unwrap();
    db.get(b"a").unwrap();
    db.get(b"b").unwrap();

    let stats = db.stats();
    assert_eq!(stats.puts, 2);
    assert_eq!(stats.deletes, 1);
    assert_eq!(stats.gets, 2);
    assert_eq!(stats.last_sequence, 3);
    assert!(stats.active_memtable_bytes > 0);
    assert_eq!(stats.tables_per_level.len(), 7);
}

// =============================================================================
// Test 15: Operations on a closed engine fail fast
// =============================================================================
#[test]
fn closed_engine_rejects_operations() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());
    db.put(b"k", b"v").unwrap();

    db.close().unwrap();
    db.close().unwrap(); // idempotent

    assert!(matches!(db.put(b"k", b"v2"), Err(Error::Closed)));
    assert!(matches!(db.delete(b"k"), Err(Error::Closed)));
    assert!(matches!(db.get(b"k"), Err(Error::Closed)));
    assert!(matches!(db.iter(), Err(Error::Closed)));
    assert!(matches!(db.flush(), Err(Error::Closed)));
}

// =============================================================================
// Test 16: A tiny write buffer exercises the whole flush pipeline
// =============================================================================
#[test]
fn small_write_buffer_flushes_in_background() {
    let dir = tempdir().unwrap();
    let opts = Options {
        write_buffer_size: 4 << 10,
        sync_policy: silt::SyncPolicy::EveryNWrites(100),
        ..Options::default()
    };
    let db = DB::open(dir.path(), opts).unwrap();

    for i in 0..500 {
        let key = format!("key_{:05}", i);
        let value = format!("value_{:05}", i);
        db.put(key.as_bytes(), value.as_bytes()).unwrap();
    }
    db.flush().unwrap();

    let stats = db.stats();
    assert!(stats.flushes >= 1, "expected background flushes");
    let total_tables: usize = stats.tables_per_level.iter().sum();
    assert!(total_tables >= 1);

    for i in (0..500).step_by(77) {
        let key = format!("key_{:05}", i);
        let value = format!("value_{:05}", i);
        assert_eq!(db.get(key.as_bytes()).unwrap(), Some(value.into_bytes()));
    }
}

// =============================================================================
// Test 17: Bad options are rejected before anything touches disk
// =============================================================================
#[test]
fn invalid_options_rejected() {
    let dir = tempdir().unwrap();

    let cases = [
        Options {
            write_buffer_size: 0,
            ..Options::default()
        },
        Options {
            block_size: 16,
            ..Options::default()
        },
        Options {
            l0_compaction_trigger: 0,
            ..Options::default()
        },
        Options {
            l0_compaction_trigger: 8,
            l0_slowdown_trigger: 4,
            ..Options::default()
        },
        Options {
            l0_slowdown_trigger: 12,
            l0_stop_trigger: 12,
            ..Options::default()
        },
        Options {
            base_level_size: 0,
            ..Options::default()
        },
        Options {
            level_size_multiplier: 1,
            ..Options::default()
        },
        Options {
            target_file_size: 0,
            ..Options::default()
        },
    ];
    for opts in cases {
        assert!(matches!(
            DB::open(dir.path(), opts),
            Err(Error::InvalidArgument(_))
        ));
    }
    assert!(!dir.path().join("LOCK").exists());
}

// =============================================================================
// Test 18: An empty range scan is simply invalid
// =============================================================================
#[test]
fn empty_range_is_invalid() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"m", b"v").unwrap();

    let iter = db.range(Some(b"x"), Some(b"z"), false).unwrap();
    assert!(!iter.is_valid());
    assert_eq!(iter.key(), b"");
    assert_eq!(iter.value(), b"");
}

// =============================================================================
// Test 19: create_if_missing and error_if_exists gate store creation
// =============================================================================
#[test]
fn open_existence_flags() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store");

    // Nothing there yet and creation is off: refused, directory untouched.
    let opts = Options {
        create_if_missing: false,
        ..Options::default()
    };
    assert!(matches!(
        DB::open(&path, opts),
        Err(Error::InvalidArgument(_))
    ));
    assert!(!path.exists());

    // A default open creates the store.
    {
        let db = open_default(&path);
        db.put(b"k", b"v").unwrap();
    }

    // Now that it exists, error_if_exists refuses it.
    let opts = Options {
        error_if_exists: true,
        ..Options::default()
    };
    assert!(matches!(
        DB::open(&path, opts),
        Err(Error::InvalidArgument(_))
    ));

    // A reopen with creation off finds the existing store.
    let opts = Options {
        create_if_missing: false,
        ..Options::default()
    };
    let db = DB::open(&path, opts).unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
}

// =============================================================================
// Test 20: Scans consume like plain iterators, in either direction
// =============================================================================
#[test]
fn scan_collects_as_iterator() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"a", b"1").unwrap();
    db.put(b"b", b"2").unwrap();
    db.put(b"c", b"3").unwrap();
    db.delete(b"b").unwrap();

    let forward: Vec<(Vec<u8>, Vec<u8>)> = db.iter().unwrap().map(|kv| kv.unwrap()).collect();
    assert_eq!(
        forward,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]
    );

    let backward: Vec<Vec<u8>> = db
        .range(None, None, true)
        .unwrap()
        .map(|kv| kv.unwrap().0)
        .collect();
    assert_eq!(backward, vec![b"c".to_vec(), b"a".to_vec()]);

    // Cursor steps and iterator consumption interleave without skipping.
    let mut iter = db.iter().unwrap();
    assert_eq!(iter.key(), b"a");
    iter.next().unwrap();
    let rest: Vec<Vec<u8>> = iter.map(|kv| kv.unwrap().0).collect();
    assert_eq!(rest, vec![b"c".to_vec()]);
}

// =============================================================================
// Test 21: Two stores in one process stay independent
// =============================================================================
#[test]
fn independent_stores_coexist() {
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let a = open_default(dir_a.path());
    let b = open_default(dir_b.path());

    a.put(b"k", b"from_a").unwrap();
    b.put(b"k", b"from_b").unwrap();

    assert_eq!(a.get(b"k").unwrap(), Some(b"from_a".to_vec()));
    assert_eq!(b.get(b"k").unwrap(), Some(b"from_b".to_vec()));

    a.close().unwrap();
    assert_eq!(b.get(b"k").unwrap(), Some(b"from_b".to_vec()));
    b.close().unwrap();
}

// =============================================================================
// Test 22: Overwrite, delete, flush, and a final scan agree end to end
// =============================================================================
#[test]
fn write_delete_flush_scan_sequence() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"a", b"1").unwrap();
    db.put(b"a", b"2").unwrap();
    assert_eq!(db.get(b"a").unwrap(), Some(b"2".to_vec()));

    db.delete(b"a").unwrap();
    assert_eq!(db.get(b"a").unwrap(), None);

    db.put(b"b", b"x").unwrap();
    db.flush().unwrap();

    let entries: Vec<(Vec<u8>, Vec<u8>)> = db.iter().unwrap().map(|kv| kv.unwrap()).collect();
    assert_eq!(entries, vec![(b"b".to_vec(), b"x".to_vec())]);
    db.close().unwrap();
}
