//! Column catalog: name↔id resolution backed by ordinary cells.
//!
//! The catalog lives at four reserved internal column ids rather than
//! in the manifest, so it travels with the data through backup/restore
//! and scans like any other cell:
//!
//! - `COLUMN_META` / `NEXT_COLUMN_KEY` — the next column id to allocate.
//! - `COLUMN_COLUMNS` (row = name, value = id) — forward lookup.
//! - `COLUMN_REV_COLUMNS` (row = id) — reverse lookup, used by
//!   `has_column` and to recover a column's name on removal.
//! - `COLUMN_COUNTERS` (row = counter name, value = u64) — named
//!   counters exposed through `get_counter`.
//!
//! Column creation is implicit: the first insert into a previously
//! unseen name allocates its id. All of this runs inside the engine's
//! writer-critical section, since allocating a new id and writing both
//! directions of the mapping must be atomic with respect to other
//! writers.

use std::sync::{Arc, RwLock};

use crate::disktable::Disktable;
use crate::key::{self, FIRST_USER_COLUMN};
use crate::memtable::{Memtable, MemtableError, MergeMode};

use super::scan;

const NEXT_COLUMN_KEY: &[u8] = b"next_column";

fn decode_u32(bytes: &[u8]) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

/// Look up an existing column id by name, without creating one.
pub(crate) fn resolve_column(
    disktables: &[Arc<RwLock<Disktable>>],
    memtable: &Memtable,
    name: &[u8],
) -> Option<u32> {
    scan::point_lookup(disktables, memtable, key::COLUMN_COLUMNS, name)
        .and_then(|(value, _)| decode_u32(&value))
}

/// Resolve `name` to a column id, allocating and persisting a new one
/// (both the forward and reverse mapping, plus the advanced counter)
/// if this is the first time it's been seen. Caller must already hold
/// the engine's writer-critical section.
pub(crate) fn resolve_or_create_column(
    disktables: &[Arc<RwLock<Disktable>>],
    memtable: &mut Memtable,
    name: &[u8],
    timestamp: u64,
) -> Result<u32, MemtableError> {
    if let Some(id) = resolve_column(disktables, memtable, name) {
        return Ok(id);
    }

    let next = scan::point_lookup(disktables, memtable, key::COLUMN_META, NEXT_COLUMN_KEY)
        .and_then(|(value, _)| decode_u32(&value))
        .unwrap_or(FIRST_USER_COLUMN);

    memtable.insert(
        key::COLUMN_META,
        NEXT_COLUMN_KEY,
        (next + 1).to_le_bytes().to_vec(),
        timestamp,
        MergeMode::Replace,
    )?;
    memtable.insert(
        key::COLUMN_COLUMNS,
        name,
        next.to_le_bytes().to_vec(),
        timestamp,
        MergeMode::Replace,
    )?;
    memtable.insert(
        key::COLUMN_REV_COLUMNS,
        &next.to_le_bytes(),
        name.to_vec(),
        timestamp,
        MergeMode::Replace,
    )?;
    Ok(next)
}

/// Reapply a previously logged column creation during write-ahead log
/// replay, without re-deriving the id (it was already decided and
/// logged at the time the column was first created).
pub(crate) fn replay_create_column(
    memtable: &mut Memtable,
    id: u32,
    name: &[u8],
    timestamp: u64,
) -> Result<(), MemtableError> {
    memtable.insert(
        key::COLUMN_META,
        NEXT_COLUMN_KEY,
        (id + 1).to_le_bytes().to_vec(),
        timestamp,
        MergeMode::Replace,
    )?;
    memtable.insert(
        key::COLUMN_COLUMNS,
        name,
        id.to_le_bytes().to_vec(),
        timestamp,
        MergeMode::Replace,
    )?;
    memtable.insert(
        key::COLUMN_REV_COLUMNS,
        &id.to_le_bytes(),
        name.to_vec(),
        timestamp,
        MergeMode::Replace,
    )?;
    Ok(())
}

/// True for the four fixed ids, or any user column resolvable via the
/// reverse mapping.
pub(crate) fn has_column(disktables: &[Arc<RwLock<Disktable>>], memtable: &Memtable, id: u32) -> bool {
    if id < FIRST_USER_COLUMN {
        return true;
    }
    scan::point_lookup(disktables, memtable, key::COLUMN_REV_COLUMNS, &id.to_le_bytes()).is_some()
}

/// Remove both directions of a column's mapping, returning its name if
/// it was known. Does not check for emptiness — that's the caller's
/// `NOT_EMPTY` check against a column scan.
pub(crate) fn forget_column(
    disktables: &[Arc<RwLock<Disktable>>],
    memtable: &mut Memtable,
    id: u32,
) -> Option<Vec<u8>> {
    let (name, _) = scan::point_lookup(disktables, memtable, key::COLUMN_REV_COLUMNS, &id.to_le_bytes())?;
    memtable.remove(key::COLUMN_REV_COLUMNS, &id.to_le_bytes());
    memtable.remove(key::COLUMN_COLUMNS, &name);
    Some(name)
}

/// Read a named counter's current value and persist it incremented by
/// one. Returns the value observed *before* the increment.
pub(crate) fn get_and_increment_counter(
    disktables: &[Arc<RwLock<Disktable>>],
    memtable: &mut Memtable,
    name: &[u8],
    timestamp: u64,
) -> Result<u64, MemtableError> {
    let current = scan::point_lookup(disktables, memtable, key::COLUMN_COUNTERS, name)
        .and_then(|(value, _)| decode_u64(&value))
        .unwrap_or(0);
    memtable.insert(
        key::COLUMN_COUNTERS,
        name,
        (current + 1).to_le_bytes().to_vec(),
        timestamp,
        MergeMode::Replace,
    )?;
    Ok(current)
}
