//! Scan and point-lookup merge across the memtable and disktable chain.
//!
//! Both [`point_lookup`] (used by `Engine::get`/`has_key`) and
//! [`merge_rows`] (used by `Engine::scan`/`column_scan`) implement the
//! same merge rule: visit every source oldest-first — the disktable
//! chain in its stored order, then the memtable, which is always the
//! newest layer — and concatenate the segments that land on a given
//! key via [`crate::compaction::merge_cell_segments`]. This replaces
//! the teacher's separate `MergeIterator` + `VisibilityFilter` pair
//! (range-tombstone bookkeeping that this data model has no use for)
//! with one merge pass shared by both callers.

use std::sync::{Arc, RwLock};

use crate::compaction::merge_cell_segments;
use crate::disktable::Disktable;
use crate::key::{self, FIRST_USER_COLUMN};
use crate::memtable::Memtable;

/// One fully-resolved row produced by [`merge_rows`].
#[derive(Debug, Clone)]
pub struct ScanRow {
    pub column: u32,
    pub row: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: u64,
}

/// Resolve a single `(column, row)` cell across every disktable (oldest
/// first, as stored in the chain) and finally the memtable.
pub(crate) fn point_lookup(
    disktables: &[Arc<RwLock<Disktable>>],
    memtable: &Memtable,
    column: u32,
    row: &[u8],
) -> Option<(Vec<u8>, u64)> {
    let mut segments = Vec::new();
    let mut timestamp = 0u64;

    for table in disktables {
        let table = table.read().unwrap_or_else(|e| e.into_inner());
        if let Some((removed, value, ts)) = table.raw_get(column, row) {
            segments.push((removed, value));
            timestamp = ts;
        }
    }
    if let Some((removed, value, ts)) = memtable.get_raw(column, row) {
        segments.push((removed, value));
        timestamp = ts;
    }

    merge_cell_segments(segments).map(|value| (value, timestamp))
}

/// Merge every disktable in chain order plus the memtable into one
/// sorted run of live cells.
///
/// `only_column`, when set, seeks each disktable cursor to its first
/// candidate via [`Disktable::lookup_prefix`] and stops as soon as the
/// globally smallest remaining key falls outside that column — correct
/// because encoded keys sort by column first, so nothing smaller can
/// still belong to it. When unset, internal bookkeeping columns
/// (id < [`FIRST_USER_COLUMN`]) are skipped, matching a full-table
/// scan's contract.
pub(crate) fn merge_rows(
    disktables: &[Arc<RwLock<Disktable>>],
    memtable: &Memtable,
    only_column: Option<u32>,
) -> Vec<ScanRow> {
    let guards: Vec<_> = disktables
        .iter()
        .map(|t| t.read().unwrap_or_else(|e| e.into_inner()))
        .collect();
    let mut cursors: Vec<_> = guards
        .iter()
        .map(|t| match only_column {
            Some(col) => t.cursor_from(t.lookup_prefix(&key::column_prefix(col))),
            None => t.cursor(),
        })
        .collect();
    let mut heads: Vec<_> = cursors.iter_mut().map(Iterator::next).collect();

    let mem_rows: Vec<_> = match only_column {
        Some(col) => memtable.iter_column(col).collect(),
        None => memtable.iter_all().collect(),
    };
    let mut mem_iter = mem_rows.into_iter().peekable();

    let mut out = Vec::new();
    loop {
        let disk_min = heads
            .iter()
            .flatten()
            .map(|e| key::encode(e.column, &e.row))
            .min();
        let mem_min = mem_iter.peek().map(|r| key::encode(r.column, &r.row));
        let min_encoded = match (&disk_min, &mem_min) {
            (Some(a), Some(b)) => Some(a.min(b).clone()),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        };
        let Some(min_encoded) = min_encoded else {
            break;
        };

        if let Some(col) = only_column
            && key::decode_column(&min_encoded).ok() != Some(col)
        {
            break;
        }

        let mut column = 0u32;
        let mut row_bytes = Vec::new();
        let mut timestamp = 0u64;
        let mut segments: Vec<(bool, Vec<u8>)> = Vec::new();

        for i in 0..heads.len() {
            let is_match = heads[i]
                .as_ref()
                .is_some_and(|e| key::encode(e.column, &e.row) == min_encoded);
            if !is_match {
                continue;
            }
            let entry = heads[i].take().expect("checked Some above");
            column = entry.column;
            row_bytes = entry.row.clone();
            timestamp = entry.timestamp;
            segments.push((entry.removed, entry.value));
            heads[i] = cursors[i].next();
        }

        if mem_min.as_ref() == Some(&min_encoded) {
            let rec = mem_iter.next().expect("peeked Some above");
            column = rec.column;
            row_bytes = rec.row;
            timestamp = rec.timestamp;
            match rec.value {
                Some(v) => segments.push((false, v)),
                None => segments.push((true, Vec::new())),
            }
        }

        if only_column.is_none() && column < FIRST_USER_COLUMN {
            continue;
        }

        if let Some(value) = merge_cell_segments(segments) {
            out.push(ScanRow {
                column,
                row: row_bytes,
                value,
                timestamp,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disktable::{Disktable, DisktableBuilder, DisktableRow};
    use crate::memtable::MergeMode;
    use tempfile::tempdir;

    fn open_table(
        dir: &std::path::Path,
        name: &str,
        rows: Vec<DisktableRow>,
    ) -> Arc<RwLock<Disktable>> {
        let path = dir.join(name);
        DisktableBuilder::new(&path, true).write(&rows).unwrap();
        Arc::new(RwLock::new(Disktable::open(&path).unwrap()))
    }

    fn row(col: u32, row: &[u8], value: Option<&[u8]>, ts: u64) -> DisktableRow {
        DisktableRow {
            key: key::encode(col, row),
            value: value.map(|v| v.to_vec()),
            timestamp: ts,
            new_column: false,
        }
    }

    #[test]
    fn point_lookup_prefers_newest_layer() {
        let dir = tempdir().unwrap();
        let table = open_table(dir.path(), "a.dtb", vec![row(100, b"alice", Some(b"old"), 1)]);
        let mut memtable = Memtable::new();
        memtable
            .insert(100, b"alice", b"new".to_vec(), 2, MergeMode::Replace)
            .unwrap();

        let (value, ts) = point_lookup(&[table], &memtable, 100, b"alice").unwrap();
        assert_eq!(value, b"new");
        assert_eq!(ts, 2);
    }

    #[test]
    fn point_lookup_honors_memtable_tombstone() {
        let dir = tempdir().unwrap();
        let table = open_table(dir.path(), "a.dtb", vec![row(100, b"alice", Some(b"old"), 1)]);
        let mut memtable = Memtable::new();
        memtable.remove(100, b"alice");

        assert!(point_lookup(&[table], &memtable, 100, b"alice").is_none());
    }

    #[test]
    fn merge_rows_skips_internal_columns_on_full_scan() {
        let dir = tempdir().unwrap();
        let table = open_table(
            dir.path(),
            "a.dtb",
            vec![
                row(crate::key::COLUMN_COLUMNS, b"name", Some(b"1"), 1),
                row(100, b"alice", Some(b"1111"), 1),
            ],
        );
        let memtable = Memtable::new();
        let rows = merge_rows(&[table], &memtable, None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].column, 100);
    }

    #[test]
    fn merge_rows_column_scan_stops_at_next_column() {
        let dir = tempdir().unwrap();
        let table = open_table(
            dir.path(),
            "a.dtb",
            vec![
                row(100, b"alice", Some(b"a"), 1),
                row(101, b"bob", Some(b"b"), 1),
            ],
        );
        let memtable = Memtable::new();
        let rows = merge_rows(&[table], &memtable, Some(100));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row, b"alice");
    }
}
