//! Minor compaction: flush the memtable into one new disktable.

use std::path::Path;

use tracing::{debug, info};

use crate::disktable::DisktableRow;
use crate::key;
use crate::manifest::{Manifest, ManifestDisktableEntry};
use crate::memtable::Memtable;

use super::{build_disktable, CompactionError};

/// Flushes every row currently in `memtable` — live cells and
/// tombstones alike, since a tombstone must keep shadowing whatever
/// older disktables still hold for that key — into one freshly built
/// disktable appended to the end of the manifest's chain, then clears
/// `memtable`.
///
/// Returns `None` (touching neither the memtable nor the manifest) if
/// the memtable is empty. Does not reset the engine's write-ahead log;
/// that belongs to the caller once this returns successfully, since the
/// log's record type is an engine-layer concern, not a compaction one.
pub fn minor_compact(
    memtable: &mut Memtable,
    manifest: &Manifest,
    data_dir: &Path,
    sync: bool,
) -> Result<Option<ManifestDisktableEntry>, CompactionError> {
    if memtable.is_empty() {
        return Ok(None);
    }

    let mut seen_columns = std::collections::HashSet::new();
    let rows: Vec<DisktableRow> = memtable
        .iter_all()
        .map(|record| {
            let new_column = seen_columns.insert(record.column);
            DisktableRow {
                key: key::encode(record.column, &record.row),
                value: record.value,
                timestamp: record.timestamp,
                new_column,
            }
        })
        .collect();
    let row_count = rows.len();

    debug!(row_count, "minor compaction: building disktable");
    let entry = build_disktable(manifest, data_dir, sync, &rows)?;
    manifest.add_disktable(entry.clone())?;
    memtable.clear();

    info!(id = entry.id, row_count, "minor compaction complete");
    Ok(Some(entry))
}
