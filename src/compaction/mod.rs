//! Compaction: folding the memtable and the disktable chain back down
//! to a small number of sorted runs.
//!
//! Two kinds, both writer-exclusive:
//!
//! - **Minor compaction** ([`minor_compact`]) serializes the memtable
//!   into one new disktable, appended to the end of the chain. Forced
//!   whenever an insert would exceed the memtable's configured budget.
//! - **Major compaction** ([`major_compact`]) merges every disktable in
//!   the chain into a single new one. User-triggered only. This is the
//!   one point where tombstones are actually dropped: once every layer
//!   is folded into one run, a key whose most recent contribution is a
//!   removal has nothing left to shadow.
//!
//! Both share the low-level "allocate an id, build the file, hand back
//! the manifest entry" tail below.

mod major;
mod minor;

pub use major::{major_compact, MajorCompactionResult};
pub use minor::minor_compact;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::disktable::{DisktableBuilder, DisktableError, DisktableRow};
use crate::manifest::{ManifestDisktableEntry, ManifestError};

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("disktable error: {0}")]
    Disktable(#[from] DisktableError),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Path for a disktable given its allocated id. Ten-digit, zero-padded,
/// matching the manifest's own entries so directory listings sort the
/// same way the chain does.
pub(crate) fn disktable_path(data_dir: &Path, id: u64) -> PathBuf {
    data_dir.join(format!("{id:010}.dtb"))
}

/// Builds a brand-new disktable from pre-sorted `rows` under a freshly
/// allocated id, returning the entry the caller registers with the
/// manifest (via [`crate::manifest::Manifest::add_disktable`] for a
/// minor compaction, or
/// [`crate::manifest::Manifest::apply_compaction`] for a major one).
pub(crate) fn build_disktable(
    manifest: &crate::manifest::Manifest,
    data_dir: &Path,
    sync: bool,
    rows: &[DisktableRow],
) -> Result<ManifestDisktableEntry, CompactionError> {
    let id = manifest.allocate_disktable_id()?;
    let path = disktable_path(data_dir, id);
    DisktableBuilder::new(&path, sync).write(rows)?;
    Ok(ManifestDisktableEntry { id, path })
}

/// Resolves one key's segments, gathered oldest-source-first, into the
/// value now visible for that key — or `None` if the most recent
/// contribution is a tombstone.
///
/// A tombstone discards everything accumulated before it; a live
/// segment appearing after a tombstone starts a fresh accumulation,
/// extending across layers the same "resurrected on insert" convention
/// the memtable already applies within a single layer.
pub(crate) fn merge_cell_segments(segments: Vec<(bool, Vec<u8>)>) -> Option<Vec<u8>> {
    let mut acc: Option<Vec<u8>> = None;
    for (removed, value) in segments {
        if removed {
            acc = None;
        } else {
            acc.get_or_insert_with(Vec::new).extend_from_slice(&value);
        }
    }
    acc
}
