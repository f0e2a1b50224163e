//! Major compaction: merge every disktable in the chain into one.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::disktable::{self, Disktable, DisktableRow};
use crate::key;
use crate::manifest::{Manifest, ManifestDisktableEntry};

use super::{build_disktable, merge_cell_segments, CompactionError};

/// Outcome of a major compaction that actually ran (as opposed to
/// [`major_compact`] returning `None` because there was nothing to
/// merge).
pub struct MajorCompactionResult {
    /// Ids of every disktable folded into the merge, now gone from the
    /// manifest's chain.
    pub removed_ids: Vec<u64>,
    /// The single disktable that replaces them, or `None` if every key
    /// in the merged set resolved to a tombstone and nothing survived.
    pub new_entry: Option<ManifestDisktableEntry>,
}

/// Merges every entry in `tables` (manifest chain order, oldest first,
/// each paired with its already-open [`Disktable`] handle) into one new
/// disktable, atomically swapping the manifest's chain to hold just
/// that entry. Returns `None` without touching anything if there are
/// fewer than two disktables to merge.
///
/// Tables are held as `Arc<RwLock<Disktable>>` because the engine
/// keeps the same handles reachable by in-flight scans and by the
/// REPLACE in-place overwrite path; major compaction only ever needs
/// read access, taken for the whole merge so the chain can't shift
/// underneath it.
pub fn major_compact(
    tables: &[(ManifestDisktableEntry, Arc<RwLock<Disktable>>)],
    manifest: &Manifest,
    data_dir: &Path,
    sync: bool,
) -> Result<Option<MajorCompactionResult>, CompactionError> {
    if tables.len() < 2 {
        return Ok(None);
    }

    let guards: Vec<_> = tables
        .iter()
        .map(|(_, t)| t.read().unwrap_or_else(|e| e.into_inner()))
        .collect();
    let mut cursors: Vec<_> = guards.iter().map(|g| g.cursor()).collect();
    let mut heads: Vec<_> = cursors.iter_mut().map(Iterator::next).collect();

    let mut rows: Vec<DisktableRow> = Vec::new();
    let mut seen_columns: HashSet<u32> = HashSet::new();
    let mut dropped = 0usize;

    loop {
        let min_encoded = heads
            .iter()
            .flatten()
            .map(|e| key::encode(e.column, &e.row))
            .min();
        let Some(min_encoded) = min_encoded else {
            break;
        };

        let mut column = 0u32;
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
            timestamp = entry.timestamp;
            segments.push((entry.removed, entry.value));
            heads[i] = cursors[i].next();
        }

        let new_column = seen_columns.insert(column);
        match merge_cell_segments(segments) {
            Some(value) => rows.push(DisktableRow {
                key: min_encoded,
                value: Some(value),
                timestamp,
                new_column,
            }),
            None => dropped += 1,
        }
    }

    drop(heads);
    drop(cursors);
    drop(guards);

    let removed_ids: Vec<u64> = tables.iter().map(|(entry, _)| entry.id).collect();
    let row_count = rows.len();
    debug!(
        row_count,
        dropped, tables = tables.len(), "major compaction: merged cursors"
    );

    let new_entry = if rows.is_empty() {
        None
    } else {
        Some(build_disktable(manifest, data_dir, sync, &rows)?)
    };

    manifest.apply_compaction(new_entry.clone().into_iter().collect(), removed_ids.clone())?;

    for (entry, _) in tables {
        disktable::warn_if_cleanup_fails(&entry.path, std::fs::remove_file(&entry.path));
    }

    info!(
        removed = removed_ids.len(),
        row_count, dropped, "major compaction complete"
    );

    Ok(Some(MajorCompactionResult {
        removed_ids,
        new_entry,
    }))
}
