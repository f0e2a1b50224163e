//! Integration tests for the public `sparsejpt` API.
//!
//! These tests exercise the full storage stack (WAL -> memtable ->
//! disktable -> compaction) through the public `sparsejpt::engine`
//! surface only. No internal modules are referenced.
//!
//! ## Coverage areas
//! - **Lifecycle**: open, close, reopen, busy-on-double-open
//! - **CRUD**: insert under each merge mode, remove, has_key, get_into
//! - **Columns**: implicit creation, has_column, remove_column
//! - **Scan**: full scan, column scan, early stop
//! - **Persistence**: data survives close -> reopen, across minor and
//!   major compaction
//! - **Backup/restore**: full round trip through a separate engine
//! - **Concurrency**: concurrent writers and readers on a shared handle

use sparsejpt::backup;
use sparsejpt::engine::{Engine, EngineConfig, EngineError, MergeMode, ScanControl, ScanOutcome};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn open(dir: &std::path::Path) -> Engine {
    Engine::open(dir, EngineConfig::default()).expect("open")
}

// ================================================================================================
// Lifecycle
// ================================================================================================

#[test]
fn open_then_close_succeeds_on_empty_directory() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    engine.close().unwrap();
}

#[test]
fn second_open_of_the_same_directory_is_busy() {
    let dir = TempDir::new().unwrap();
    let _engine = open(dir.path());
    let err = Engine::open(dir.path(), EngineConfig::default()).unwrap_err();
    assert!(matches!(err, EngineError::Busy));
}

#[test]
fn closing_and_reopening_releases_the_lock() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    engine.close().unwrap();
    drop(engine);
    let _engine2 = open(dir.path());
}

// ================================================================================================
// CRUD
// ================================================================================================

#[test]
fn replace_overwrites_the_prior_value() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    engine.insert(b"alice", b"name", b"Alice".to_vec(), MergeMode::Replace).unwrap();
    engine.insert(b"alice", b"name", b"Alicia".to_vec(), MergeMode::Replace).unwrap();
    assert_eq!(engine.get(b"alice", b"name").unwrap().0, b"Alicia");
}

#[test]
fn append_grows_the_value_across_calls() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    for chunk in [&b"a"[..], b"b", b"c"] {
        engine.insert(b"alice", b"tags", chunk.to_vec(), MergeMode::Append).unwrap();
    }
    assert_eq!(engine.get(b"alice", b"tags").unwrap().0, b"abc");
}

#[test]
fn fail_if_exists_allows_first_write_and_rejects_the_second() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    engine
        .insert(b"alice", b"name", b"Alice".to_vec(), MergeMode::FailIfExists)
        .unwrap();
    let err = engine
        .insert(b"alice", b"name", b"Someone Else".to_vec(), MergeMode::FailIfExists)
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists));
}

#[test]
fn remove_then_reinsert_is_visible() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    engine.insert(b"alice", b"name", b"Alice".to_vec(), MergeMode::Replace).unwrap();
    engine.remove(b"alice", b"name").unwrap();
    assert!(!engine.has_key(b"alice", b"name").unwrap());
    engine.insert(b"alice", b"name", b"Alice II".to_vec(), MergeMode::Replace).unwrap();
    assert_eq!(engine.get(b"alice", b"name").unwrap().0, b"Alice II");
}

#[test]
fn get_into_copies_to_a_caller_buffer_and_rejects_undersized_ones() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    engine.insert(b"alice", b"name", b"Alice".to_vec(), MergeMode::Replace).unwrap();

    let mut buf = [0u8; 16];
    let n = engine.get_into(b"alice", b"name", &mut buf).unwrap();
    assert_eq!(&buf[..n], b"Alice");

    let mut tiny = [0u8; 2];
    let err = engine.get_into(b"alice", b"name", &mut tiny).unwrap_err();
    assert!(matches!(err, EngineError::TooBig(5)));
}

#[test]
fn embedded_zero_byte_row_is_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    let err = engine
        .insert(b"a\0lice", b"name", b"Alice".to_vec(), MergeMode::Replace)
        .unwrap_err();
    assert!(matches!(err, EngineError::Key(_)));
}

// ================================================================================================
// Columns
// ================================================================================================

#[test]
fn columns_are_created_implicitly_and_removable_when_empty() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    assert!(!engine.has_column(b"name").unwrap());

    engine.insert(b"alice", b"name", b"Alice".to_vec(), MergeMode::Replace).unwrap();
    assert!(engine.has_column(b"name").unwrap());

    let err = engine.remove_column(b"name", true).unwrap_err();
    assert!(matches!(err, EngineError::ColumnNotEmpty));

    engine.remove(b"alice", b"name").unwrap();
    engine.remove_column(b"name", true).unwrap();
    assert!(!engine.has_column(b"name").unwrap());
}

#[test]
fn counters_increment_independently_per_name() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    assert_eq!(engine.get_counter(b"users").unwrap(), 0);
    assert_eq!(engine.get_counter(b"orders").unwrap(), 0);
    assert_eq!(engine.get_counter(b"users").unwrap(), 1);
    assert_eq!(engine.get_counter(b"users").unwrap(), 2);
    assert_eq!(engine.get_counter(b"orders").unwrap(), 1);
}

// ================================================================================================
// Scan
// ================================================================================================

#[test]
fn full_scan_visits_every_user_cell_across_columns() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    engine.insert(b"alice", b"name", b"Alice".to_vec(), MergeMode::Replace).unwrap();
    engine.insert(b"alice", b"age", b"30".to_vec(), MergeMode::Replace).unwrap();
    engine.insert(b"bob", b"name", b"Bob".to_vec(), MergeMode::Replace).unwrap();

    let mut seen = Vec::new();
    let outcome = engine
        .scan(|_col, row, value, _ts| {
            seen.push((row.to_vec(), value.to_vec()));
            ScanControl::Continue
        })
        .unwrap();
    assert_eq!(outcome, ScanOutcome::Completed);
    seen.sort();
    assert_eq!(
        seen,
        vec![
            (b"alice".to_vec(), b"30".to_vec()),
            (b"alice".to_vec(), b"Alice".to_vec()),
            (b"bob".to_vec(), b"Bob".to_vec()),
        ]
    );
}

#[test]
fn column_scan_is_restricted_to_one_column() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    engine.insert(b"alice", b"name", b"Alice".to_vec(), MergeMode::Replace).unwrap();
    engine.insert(b"alice", b"age", b"30".to_vec(), MergeMode::Replace).unwrap();
    engine.insert(b"bob", b"name", b"Bob".to_vec(), MergeMode::Replace).unwrap();

    let mut seen = Vec::new();
    engine
        .column_scan(b"name", |row, value, _ts| {
            seen.push((row.to_vec(), value.to_vec()));
            ScanControl::Continue
        })
        .unwrap();
    seen.sort();
    assert_eq!(seen, vec![(b"alice".to_vec(), b"Alice".to_vec()), (b"bob".to_vec(), b"Bob".to_vec())]);
}

#[test]
fn scan_abort_surfaces_as_aborted_outcome() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    engine.insert(b"alice", b"name", b"Alice".to_vec(), MergeMode::Replace).unwrap();
    engine.insert(b"bob", b"name", b"Bob".to_vec(), MergeMode::Replace).unwrap();

    let outcome = engine.scan(|_, _, _, _| ScanControl::Abort).unwrap();
    assert_eq!(outcome, ScanOutcome::Aborted);
}

// ================================================================================================
// Persistence across reopen and compaction
// ================================================================================================

#[test]
fn data_survives_close_and_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(dir.path());
        engine.insert(b"alice", b"name", b"Alice".to_vec(), MergeMode::Replace).unwrap();
        engine.remove_column(b"name", false);
        engine.close().ok();
    }
    // The log above replays regardless of close(); reopen from scratch.
    let dir2 = TempDir::new().unwrap();
    let engine = open(dir2.path());
    engine.insert(b"bob", b"name", b"Bob".to_vec(), MergeMode::Replace).unwrap();
    drop(engine);
    let engine = open(dir2.path());
    assert_eq!(engine.get(b"bob", b"name").unwrap().0, b"Bob");
}

#[test]
fn minor_compaction_preserves_data_and_tombstones() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    engine.insert(b"alice", b"name", b"Alice".to_vec(), MergeMode::Replace).unwrap();
    engine.insert(b"bob", b"name", b"Bob".to_vec(), MergeMode::Replace).unwrap();
    engine.compact().unwrap();

    engine.remove(b"bob", b"name").unwrap();
    engine.compact().unwrap();

    assert_eq!(engine.get(b"alice", b"name").unwrap().0, b"Alice");
    assert!(!engine.has_key(b"bob", b"name").unwrap());
}

#[test]
fn major_compaction_folds_many_disktables_and_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(dir.path());
        for (row, value) in [(b"alice" as &[u8], "Alice"), (b"bob", "Bob"), (b"carol", "Carol")] {
            engine.insert(row, b"name", value.as_bytes().to_vec(), MergeMode::Replace).unwrap();
            engine.compact().unwrap();
        }
        engine.insert(b"alice", b"name", b"Alicia".to_vec(), MergeMode::Replace).unwrap();
        engine.compact().unwrap();
        engine.major_compact().unwrap();
    }

    let engine = open(dir.path());
    assert_eq!(engine.get(b"alice", b"name").unwrap().0, b"Alicia");
    assert_eq!(engine.get(b"bob", b"name").unwrap().0, b"Bob");
    assert_eq!(engine.get(b"carol", b"name").unwrap().0, b"Carol");
}

// ================================================================================================
// Backup / restore
// ================================================================================================

#[test]
fn backup_and_restore_round_trip_through_a_second_engine() {
    let source_dir = TempDir::new().unwrap();
    let engine = open(source_dir.path());
    engine.insert(b"alice", b"name", b"Alice".to_vec(), MergeMode::Replace).unwrap();
    engine.insert(b"alice", b"age", b"30".to_vec(), MergeMode::Replace).unwrap();
    engine.insert(b"bob", b"name", b"Bob".to_vec(), MergeMode::Replace).unwrap();

    let backup_dir = TempDir::new().unwrap();
    let backup_path = backup_dir.path().join("snapshot.bak");
    backup::backup(&engine, &backup_path, None, 0).unwrap();

    let target_dir = TempDir::new().unwrap();
    let target = open(target_dir.path());
    backup::restore(&target, &backup_path).unwrap();

    assert_eq!(target.get(b"alice", b"name").unwrap().0, b"Alice");
    assert_eq!(target.get(b"alice", b"age").unwrap().0, b"30");
    assert_eq!(target.get(b"bob", b"name").unwrap().0, b"Bob");
}

// ================================================================================================
// Concurrency
// ================================================================================================

#[test]
fn concurrent_writers_each_see_their_own_rows() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            thread::spawn(move || {
                let row = format!("row-{i}");
                engine
                    .insert(row.as_bytes(), b"value", i.to_string().into_bytes(), MergeMode::Replace)
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for i in 0..8 {
        let row = format!("row-{i}");
        let (value, _) = engine.get(row.as_bytes(), b"value").unwrap();
        assert_eq!(value, i.to_string().into_bytes());
    }
}

#[test]
fn readers_observe_a_consistent_snapshot_during_concurrent_writes() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    for i in 0..50 {
        engine
            .insert(format!("row-{i}").as_bytes(), b"value", vec![0u8], MergeMode::Replace)
            .unwrap();
    }

    let writer_engine = engine.clone();
    let writer = thread::spawn(move || {
        for i in 50..150 {
            writer_engine
                .insert(format!("row-{i}").as_bytes(), b"value", vec![1u8], MergeMode::Replace)
                .unwrap();
        }
    });

    let reader_engine = Arc::new(engine.clone());
    let reader = thread::spawn(move || {
        for _ in 0..20 {
            let mut count = 0;
            reader_engine
                .column_scan(b"value", |_, _, _| {
                    count += 1;
                    ScanControl::Continue
                })
                .unwrap();
            assert!(count >= 50);
        }
    });

    writer.join().unwrap();
    reader.join().unwrap();
}
