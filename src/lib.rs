//! # sparsejpt
//!
//! An embeddable, persistent sparse-table store. Cells are addressed by
//! `(row, column)`, where both row and column are caller-chosen byte
//! strings; columns are interned to dense 32-bit ids behind the scenes.
//! Built on a **Log-Structured Merge** architecture: writes land in an
//! in-memory memtable and a write-ahead log, and are folded into
//! immutable, sorted, on-disk **disktables** by minor compaction; major
//! compaction later folds every disktable into one.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Engine                          │
//! │  ┌────────────┐   ┌─────────────────────────────┐   │
//! │  │  Memtable   │   │   Disktable chain (on disk)  │   │
//! │  │  + op log   │   │   oldest ────────► newest    │   │
//! │  └─────┬───────┘   └──────────────┬───────────────┘   │
//! │        │ minor compaction          │ major compaction │
//! │        └──────────────►            └──────────►       │
//! │                                                       │
//! │  ┌─────────────────────────────────────────────────┐  │
//! │  │     Manifest (disktable chain metadata)         │  │
//! │  └─────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`key`] | Order-preserving `(column, row)` key codec |
//! | [`trie`] | PATRICIA trie used as a disktable's in-memory index |
//! | [`bloom`] | Four-way bloom filter used for negative disktable lookups |
//! | [`memtable`] | In-memory sorted map of recent mutations |
//! | [`wal`] | Generic, CRC-protected write-ahead log |
//! | [`disktable`] | Immutable, sorted, on-disk runs with bloom filter + trie index |
//! | [`compaction`] | Minor (memtable flush) and major (full merge) compaction |
//! | [`manifest`] | Persistent metadata for the disktable chain |
//! | [`engine`] | The public storage engine: open, insert, remove, get, scan |
//! | [`lock`] | Writer-preferring reader/writer scheduling gate |
//! | [`backup`] | Framed backup/restore over the engine's scan and insert operations |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sparsejpt::engine::{Engine, EngineConfig, MergeMode};
//!
//! let engine = Engine::open("/tmp/my_db", EngineConfig::default()).unwrap();
//!
//! engine.insert(b"alice", b"name", b"Alice".to_vec(), MergeMode::Replace).unwrap();
//! let (value, _ts) = engine.get(b"alice", b"name").unwrap();
//! assert_eq!(value, b"Alice");
//!
//! engine.remove(b"alice", b"name").unwrap();
//! assert!(!engine.has_key(b"alice", b"name").unwrap());
//!
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod backup;
pub mod bloom;
pub mod compaction;
pub mod disktable;
pub mod encoding;
pub mod engine;
pub mod key;
pub mod lock;
pub mod manifest;
pub mod memtable;
pub mod trie;
pub mod wal;
