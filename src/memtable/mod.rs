//! In-memory sorted map of recently written cells.
//!
//! Ordered by `(column id, row)`. Values are stored as a chain of
//! segments rather than one contiguous buffer so that an `APPEND`
//! write never has to copy the bytes already present. A deletion is
//! represented as a tombstone variant rather than removing the map
//! entry outright — the entry has to survive until the next minor
//! compaction so that it can shadow an older value still sitting in a
//! disktable.
//!
//! The ordered container itself is a `BTreeMap` rather than the
//! splay tree + slab arena of the reference engine; per design note,
//! any O(log n) comparison-based container is an acceptable substitute
//! for the ordered map, and `BTreeMap` needs no custom rotation code.


use std::collections::BTreeMap;

use thiserror::Error;

use crate::encoding::{self, EncodingError};

#[derive(Debug, Error)]
pub enum MemtableError {
    #[error("cell already exists")]
    AlreadyExists,
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

/// How a write should combine with an existing live value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Append a new value segment after any existing ones.
    Append,
    /// Discard existing segments and store only the new value.
    Replace,
    /// Fail with [`MemtableError::AlreadyExists`] if a live cell is present.
    FailIfExists,
}

#[derive(Debug, Clone)]
enum CellState {
    Live(Vec<Vec<u8>>),
    Tombstone,
}

#[derive(Debug, Clone)]
struct CellEntry {
    timestamp: u64,
    state: CellState,
}

/// One fully-materialized memtable record, used by compaction and scans.
#[derive(Debug, Clone)]
pub struct MemtableRecord {
    pub column: u32,
    pub row: Vec<u8>,
    pub timestamp: u64,
    /// `None` marks a tombstone.
    pub value: Option<Vec<u8>>,
}

type Key = (u32, Vec<u8>);

#[derive(Debug, Default)]
pub struct Memtable {
    map: BTreeMap<Key, CellEntry>,
    /// Running total of row + value bytes, used for capacity checks.
    byte_size: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn live_count(&self) -> usize {
        self.map
            .values()
            .filter(|e| matches!(e.state, CellState::Live(_)))
            .count()
    }

    /// Insert or merge a value into a cell, per `mode`.
    pub fn insert(
        &mut self,
        column: u32,
        row: &[u8],
        value: Vec<u8>,
        timestamp: u64,
        mode: MergeMode,
    ) -> Result<(), MemtableError> {
        let key = (column, row.to_vec());
        self.byte_size += value.len();

        match self.map.get_mut(&key) {
            Some(entry) => match &mut entry.state {
                CellState::Live(segments) => match mode {
                    MergeMode::Append => {
                        segments.push(value);
                        entry.timestamp = timestamp;
                    }
                    MergeMode::Replace => {
                        self.byte_size -= segments.iter().map(Vec::len).sum::<usize>();
                        *segments = vec![value];
                        entry.timestamp = timestamp;
                    }
                    MergeMode::FailIfExists => {
                        self.byte_size -= value.len();
                        return Err(MemtableError::AlreadyExists);
                    }
                },
                CellState::Tombstone => {
                    self.byte_size += row.len();
                    entry.state = CellState::Live(vec![value]);
                    entry.timestamp = timestamp;
                }
            },
            None => {
                self.byte_size += row.len();
                self.map.insert(
                    key,
                    CellEntry {
                        timestamp,
                        state: CellState::Live(vec![value]),
                    },
                );
            }
        }
        Ok(())
    }

    /// Mark a cell as deleted. Returns `true` if a live cell was
    /// actually present (for caller-side `NOT_FOUND` bookkeeping —
    /// the memtable alone cannot tell whether an older disktable
    /// version exists, so this is advisory, not authoritative).
    pub fn remove(&mut self, column: u32, row: &[u8]) -> bool {
        let key = (column, row.to_vec());
        match self.map.get_mut(&key) {
            Some(entry) => {
                let was_live = matches!(entry.state, CellState::Live(_));
                if let CellState::Live(segments) = &entry.state {
                    self.byte_size -= segments.iter().map(Vec::len).sum::<usize>();
                }
                entry.state = CellState::Tombstone;
                was_live
            }
            None => {
                self.byte_size += row.len();
                self.map.insert(
                    key,
                    CellEntry {
                        timestamp: 0,
                        state: CellState::Tombstone,
                    },
                );
                false
            }
        }
    }

    /// Concatenated value and timestamp for a live cell.
    pub fn get(&self, column: u32, row: &[u8]) -> Option<(Vec<u8>, u64)> {
        let entry = self.map.get(&(column, row.to_vec()))?;
        match &entry.state {
            CellState::Live(segments) => Some((segments.concat(), entry.timestamp)),
            CellState::Tombstone => None,
        }
    }

    /// Like [`Self::get`], but surfaces a tombstone as `(true, ..)`
    /// rather than collapsing it to `None` — needed by the engine's
    /// cross-layer merge to distinguish "no entry here" from "a
    /// removal recorded here".
    pub fn get_raw(&self, column: u32, row: &[u8]) -> Option<(bool, Vec<u8>, u64)> {
        let entry = self.map.get(&(column, row.to_vec()))?;
        match &entry.state {
            CellState::Live(segments) => Some((false, segments.concat(), entry.timestamp)),
            CellState::Tombstone => Some((true, Vec::new(), entry.timestamp)),
        }
    }

    /// Erase a cell's map entry outright, rather than leaving a
    /// tombstone — used when a REPLACE write's bytes landed entirely in
    /// an older disktable via shrinking in-place overwrite, so nothing
    /// should remain here to precede (and shadow) that disktable entry.
    pub fn forget(&mut self, column: u32, row: &[u8]) {
        let key = (column, row.to_vec());
        if let Some(entry) = self.map.remove(&key) {
            if let CellState::Live(segments) = &entry.state {
                self.byte_size -= segments.iter().map(Vec::len).sum::<usize>();
            }
            self.byte_size -= row.len();
        }
    }

    pub fn has_live(&self, column: u32, row: &[u8]) -> bool {
        matches!(
            self.map.get(&(column, row.to_vec())).map(|e| &e.state),
            Some(CellState::Live(_))
        )
    }

    /// All records in `(column, row)` order, including tombstones —
    /// used by compaction, which must preserve tombstones so they can
    /// still shadow older disktable entries.
    pub fn iter_all(&self) -> impl Iterator<Item = MemtableRecord> + '_ {
        self.map.iter().map(|((column, row), entry)| MemtableRecord {
            column: *column,
            row: row.clone(),
            timestamp: entry.timestamp,
            value: match &entry.state {
                CellState::Live(segments) => Some(segments.concat()),
                CellState::Tombstone => None,
            },
        })
    }

    /// Records restricted to one column, in row order, including
    /// tombstones so scan-merge can suppress shadowed disktable rows.
    pub fn iter_column(&self, column: u32) -> impl Iterator<Item = MemtableRecord> + '_ {
        self.map
            .range((column, Vec::new())..(column + 1, Vec::new()))
            .map(move |((c, row), entry)| MemtableRecord {
                column: *c,
                row: row.clone(),
                timestamp: entry.timestamp,
                value: match &entry.state {
                    CellState::Live(segments) => Some(segments.concat()),
                    CellState::Tombstone => None,
                },
            })
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.byte_size = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// Encoding (used to persist a memtable record while writing a disktable)
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for MemtableRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.column, buf)?;
        encoding::Encode::encode_to(&self.row, buf)?;
        encoding::Encode::encode_to(&self.timestamp, buf)?;
        encoding::Encode::encode_to(&self.value, buf)?;
        Ok(())
    }
}

impl encoding::Decode for MemtableRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (column, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (row, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (timestamp, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (value, n) = Option::<Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                column,
                row,
                timestamp,
                value,
            },
            off,
        ))
    }
}
