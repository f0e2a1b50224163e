//! The public storage engine.
//!
//! Ties together the memtable, the disktable chain, the manifest, and
//! the per-mutation write-ahead log behind one handle. A single
//! [`WriterPreferringLock`] enforces single-writer/multiple-reader
//! scheduling on top of the `RwLock<EngineInner>` that actually guards
//! the state, so writers can never be starved by a steady stream of
//! readers.

mod catalog;
mod log;
mod scan;

pub use log::LogOp;
pub use scan::ScanRow;

pub use crate::memtable::MergeMode;

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{info, warn};

use crate::compaction::{self, CompactionError, MajorCompactionResult};
use crate::disktable::{Disktable, DisktableError};
use crate::key::{self, KeyError};
use crate::lock::WriterPreferringLock;
use crate::manifest::{Manifest, ManifestDisktableEntry, ManifestError};
use crate::memtable::{Memtable, MemtableError};
use crate::wal::{Wal, WalError};

const MANIFEST_DIR: &str = "manifest";
const DISKTABLE_DIR: &str = "disktables";
const WAL_DIR: &str = "wal";
const LOCK_FILENAME: &str = ".lock";
const OP_LOG_FILENAME: &str = "wal-0.log";
const DISKTABLE_EXTENSION: &str = "dtb";

/// Errors surfaced by [`Engine`] operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),
    #[error("disktable error: {0}")]
    Disktable(#[from] DisktableError),
    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),
    #[error("write-ahead log error: {0}")]
    Wal(#[from] WalError),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("cell already exists")]
    AlreadyExists,
    #[error("key not found")]
    NotFound,
    #[error("column not found")]
    ColumnNotFound,
    #[error("column is not empty")]
    ColumnNotEmpty,
    #[error("value is {0} bytes, which does not fit the caller's buffer")]
    TooBig(usize),
    #[error("another process already has this engine open")]
    Busy,
}

/// Tunables for an open [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memtable byte budget; exceeding it forces a minor compaction.
    pub memtable_budget_bytes: usize,
    /// Whether disktable writes and log appends fsync before returning.
    pub sync: bool,
    /// Tolerate a partially-written (uncommitted) disktable found on
    /// open by dropping it from the manifest instead of failing.
    pub recover: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memtable_budget_bytes: 4 * 1024 * 1024,
            sync: true,
            recover: false,
        }
    }
}

/// Outcome of an [`Engine::scan`] or [`Engine::column_scan`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Every matching cell was visited.
    Completed,
    /// The callback requested an early, orderly stop.
    Stopped,
    /// The callback requested an abort.
    Aborted,
}

/// What a scan callback asks the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
    Abort,
}

type DisktableHandle = Arc<RwLock<Disktable>>;

struct EngineInner {
    manifest: Manifest,
    memtable: Memtable,
    disktables: Vec<(ManifestDisktableEntry, DisktableHandle)>,
    op_log: Wal<LogOp>,
    data_dir: PathBuf,
    config: EngineConfig,
    major_compact_count: u64,
}

/// A zero-byte sibling lock file that gates exclusive access to an
/// engine directory. Held for as long as any [`Engine`] clone referring
/// to it is alive; removed on last drop.
struct ProcessLock {
    path: PathBuf,
    _file: fs::File,
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// A handle to an open sparse-table engine. Cheap to clone: every clone
/// shares the same underlying state and scheduling lock.
pub struct Engine {
    inner: Arc<RwLock<EngineInner>>,
    sched: Arc<WriterPreferringLock>,
    name_cache: Arc<Mutex<HashMap<Vec<u8>, u32>>>,
    lock: Arc<ProcessLock>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            sched: Arc::clone(&self.sched),
            name_cache: Arc::clone(&self.name_cache),
            lock: Arc::clone(&self.lock),
        }
    }
}

fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

fn apply_log_op(
    disktables: &[DisktableHandle],
    memtable: &mut Memtable,
    op: LogOp,
) -> Result<(), EngineError> {
    match op {
        LogOp::Insert {
            column,
            row,
            value,
            timestamp,
            mode,
        } => {
            memtable.insert(column, &row, value, timestamp, mode)?;
        }
        LogOp::Remove { column, row } => {
            memtable.remove(column, &row);
        }
        LogOp::CreateColumn { id, name, timestamp } => {
            catalog::replay_create_column(memtable, id, &name, timestamp)?;
        }
        LogOp::RemoveColumn { id } => {
            catalog::forget_column(disktables, memtable, id);
        }
    }
    Ok(())
}

/// Applies one mutation's value against the disktable chain per the
/// REPLACE/FAIL-IF-EXISTS/APPEND admission rules, returning whatever
/// portion (if any) must still be applied to the memtable.
///
/// REPLACE walks the *entire* chain oldest-to-newest, shrinking-overwriting as
/// many bytes in place as each disktable's stored slot allows; `None`
/// means the whole value landed on disk and nothing remains. Once the new
/// value is fully consumed, any disktable still holding a fragment of the
/// old value is left with unreachable leftover bytes unless it is also
/// visited, so the walk continues and tombstones the key in every
/// remaining disktable instead of stopping early. APPEND never touches a
/// disktable (a new segment always lands in the memtable). FAIL-IF-EXISTS
/// checks for a live key without writing anything.
fn apply_to_disktables(
    disktables: &[(ManifestDisktableEntry, DisktableHandle)],
    column: u32,
    row: &[u8],
    value: &[u8],
    mode: MergeMode,
) -> Result<Option<Vec<u8>>, EngineError> {
    match mode {
        MergeMode::Replace => {
            let mut consumed = 0usize;
            for (_, table) in disktables {
                let mut table = table.write().unwrap_or_else(|e| e.into_inner());
                if consumed < value.len() {
                    consumed += table.overwrite(column, row, &value[consumed..])?;
                } else {
                    table.remove(column, row)?;
                }
            }
            if consumed >= value.len() {
                Ok(None)
            } else {
                Ok(Some(value[consumed..].to_vec()))
            }
        }
        MergeMode::FailIfExists => {
            for (_, table) in disktables {
                let table = table.read().unwrap_or_else(|e| e.into_inner());
                if table.has_key(column, row) {
                    return Err(EngineError::AlreadyExists);
                }
            }
            Ok(Some(value.to_vec()))
        }
        MergeMode::Append => Ok(Some(value.to_vec())),
    }
}

impl Engine {
    /// Opens (creating if necessary) the engine directory at `path`,
    /// replaying its op log against a fresh memtable. Fails with
    /// [`EngineError::Busy`] if another handle already holds the
    /// directory's exclusive lock file.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let data_dir = path.as_ref().to_path_buf();
        let manifest_dir = data_dir.join(MANIFEST_DIR);
        let disktable_dir = data_dir.join(DISKTABLE_DIR);
        let wal_dir = data_dir.join(WAL_DIR);
        fs::create_dir_all(&disktable_dir)?;
        fs::create_dir_all(&wal_dir)?;

        let lock_path = data_dir.join(LOCK_FILENAME);
        let lock_file = match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(EngineError::Busy),
            Err(e) => return Err(e.into()),
        };

        let manifest = Manifest::open(&manifest_dir)?;

        let mut disktables = Vec::new();
        for entry in manifest.disktables()? {
            match Disktable::open(&entry.path) {
                Ok(table) => disktables.push((entry, Arc::new(RwLock::new(table)))),
                Err(DisktableError::BadMagic) if config.recover => {
                    warn!(
                        path = %entry.path.display(),
                        "dropping uncommitted disktable found during recovery"
                    );
                    manifest.remove_disktable(entry.id)?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if disktable_dir.is_dir() {
            for entry in fs::read_dir(&disktable_dir)? {
                let file_path = entry?.path();
                let is_disktable = file_path.extension().and_then(|e| e.to_str()) == Some(DISKTABLE_EXTENSION);
                if is_disktable && !disktables.iter().any(|(e, _)| e.path == file_path) {
                    warn!(path = %file_path.display(), "removing orphan disktable file");
                    let _ = fs::remove_file(&file_path);
                }
            }
        }

        let op_log_path = wal_dir.join(OP_LOG_FILENAME);
        let op_log = Wal::<LogOp>::open(&op_log_path, None)?;

        let mut memtable = Memtable::new();
        let handles: Vec<_> = disktables.iter().map(|(_, t)| Arc::clone(t)).collect();
        for record in op_log.replay_iter()? {
            apply_log_op(&handles, &mut memtable, record?)?;
        }

        info!(path = %data_dir.display(), disktables = disktables.len(), "engine opened");

        let inner = EngineInner {
            manifest,
            memtable,
            disktables,
            op_log,
            data_dir,
            config,
            major_compact_count: 0,
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            sched: Arc::new(WriterPreferringLock::new()),
            name_cache: Arc::new(Mutex::new(HashMap::new())),
            lock: Arc::new(ProcessLock {
                path: lock_path,
                _file: lock_file,
            }),
        })
    }

    /// Checkpoints the manifest. The exclusive lock file is released
    /// when the last clone of this handle is dropped, not here.
    pub fn close(&self) -> Result<(), EngineError> {
        let _sched = self.sched.write();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.manifest.checkpoint()?;
        Ok(())
    }

    fn disktable_handles(inner: &EngineInner) -> Vec<DisktableHandle> {
        inner.disktables.iter().map(|(_, t)| Arc::clone(t)).collect()
    }

    fn resolve_column(&self, inner: &EngineInner, column_name: &[u8]) -> Option<u32> {
        if let Some(id) = self
            .name_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(column_name)
            .copied()
        {
            return Some(id);
        }
        let disktables = Self::disktable_handles(inner);
        let id = catalog::resolve_column(&disktables, &inner.memtable, column_name)?;
        self.name_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(column_name.to_vec(), id);
        Some(id)
    }

    /// Inserts `value` at `(row, column_name)`, stamping it with the
    /// current time. The column is created implicitly on first use.
    pub fn insert(&self, row: &[u8], column_name: &[u8], value: Vec<u8>, mode: MergeMode) -> Result<(), EngineError> {
        self.insert_with_ts(row, column_name, value, now_ts(), mode)
    }

    /// Like [`Self::insert`], but with a caller-supplied timestamp.
    pub fn insert_with_ts(
        &self,
        row: &[u8],
        column_name: &[u8],
        value: Vec<u8>,
        timestamp: u64,
        mode: MergeMode,
    ) -> Result<(), EngineError> {
        key::validate_row(row)?;

        let _sched = self.sched.write();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let disktables = Self::disktable_handles(&inner);
        let column = match self.resolve_column(&inner, column_name) {
            Some(id) => id,
            None => {
                let id = catalog::resolve_or_create_column(&disktables, &mut inner.memtable, column_name, timestamp)?;
                inner.op_log.append(&LogOp::CreateColumn {
                    id,
                    name: column_name.to_vec(),
                    timestamp,
                })?;
                self.name_cache
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(column_name.to_vec(), id);
                id
            }
        };

        match apply_to_disktables(&inner.disktables, column, row, &value, mode)? {
            None => {
                if mode == MergeMode::Replace {
                    inner.memtable.forget(column, row);
                }
            }
            Some(remaining) => {
                inner.memtable.insert(column, row, remaining.clone(), timestamp, mode)?;
                inner.op_log.append(&LogOp::Insert {
                    column,
                    row: row.to_vec(),
                    value: remaining,
                    timestamp,
                    mode,
                })?;
                if inner.memtable.byte_size() >= inner.config.memtable_budget_bytes {
                    Self::run_minor_compact(&mut inner)?;
                }
            }
        }

        Ok(())
    }

    /// Removes `(row, column_name)`. Fails with [`EngineError::NotFound`]
    /// if the cell isn't currently visible.
    pub fn remove(&self, row: &[u8], column_name: &[u8]) -> Result<(), EngineError> {
        let _sched = self.sched.write();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let column = self.resolve_column(&inner, column_name).ok_or(EngineError::NotFound)?;
        let disktables = Self::disktable_handles(&inner);
        if scan::point_lookup(&disktables, &inner.memtable, column, row).is_none() {
            return Err(EngineError::NotFound);
        }

        inner.memtable.remove(column, row);
        inner.op_log.append(&LogOp::Remove {
            column,
            row: row.to_vec(),
        })?;
        if inner.memtable.byte_size() >= inner.config.memtable_budget_bytes {
            Self::run_minor_compact(&mut inner)?;
        }
        Ok(())
    }

    pub fn has_key(&self, row: &[u8], column_name: &[u8]) -> Result<bool, EngineError> {
        let _sched = self.sched.read();
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let Some(column) = self.resolve_column(&inner, column_name) else {
            return Ok(false);
        };
        let disktables = Self::disktable_handles(&inner);
        Ok(scan::point_lookup(&disktables, &inner.memtable, column, row).is_some())
    }

    pub fn has_column(&self, column_name: &[u8]) -> Result<bool, EngineError> {
        let _sched = self.sched.read();
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(self.resolve_column(&inner, column_name).is_some())
    }

    /// Reverse-resolves a column id to its name, if still registered.
    /// Used by [`crate::backup::backup`], which deals in column names
    /// but scans yield bare ids.
    pub fn column_name(&self, column: u32) -> Result<Option<Vec<u8>>, EngineError> {
        let _sched = self.sched.read();
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let disktables = Self::disktable_handles(&inner);
        Ok(
            scan::point_lookup(&disktables, &inner.memtable, key::COLUMN_REV_COLUMNS, &column.to_le_bytes())
                .map(|(name, _)| name),
        )
    }

    /// Returns the merged value and the timestamp of its most recent
    /// contributing write.
    pub fn get(&self, row: &[u8], column_name: &[u8]) -> Result<(Vec<u8>, u64), EngineError> {
        let _sched = self.sched.read();
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let column = self.resolve_column(&inner, column_name).ok_or(EngineError::NotFound)?;
        let disktables = Self::disktable_handles(&inner);
        scan::point_lookup(&disktables, &inner.memtable, column, row).ok_or(EngineError::NotFound)
    }

    /// Like [`Self::get`], but copies into a caller-owned buffer.
    /// Returns [`EngineError::TooBig`] if the value doesn't fit.
    pub fn get_into(&self, row: &[u8], column_name: &[u8], buf: &mut [u8]) -> Result<usize, EngineError> {
        let (value, _) = self.get(row, column_name)?;
        if value.len() > buf.len() {
            return Err(EngineError::TooBig(value.len()));
        }
        buf[..value.len()].copy_from_slice(&value);
        Ok(value.len())
    }

    /// Reads and increments a named counter, returning the value
    /// observed before the increment.
    pub fn get_counter(&self, name: &[u8]) -> Result<u64, EngineError> {
        let _sched = self.sched.write();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let disktables = Self::disktable_handles(&inner);
        let timestamp = now_ts();
        let value = catalog::get_and_increment_counter(&disktables, &mut inner.memtable, name, timestamp)?;
        inner.op_log.append(&LogOp::Insert {
            column: key::COLUMN_COUNTERS,
            row: name.to_vec(),
            value: (value + 1).to_le_bytes().to_vec(),
            timestamp,
            mode: MergeMode::Replace,
        })?;
        Ok(value)
    }

    /// Drops a column's name↔id mapping. With `empty_only`, fails with
    /// [`EngineError::ColumnNotEmpty`] if the column still has live
    /// cells.
    pub fn remove_column(&self, column_name: &[u8], empty_only: bool) -> Result<(), EngineError> {
        let _sched = self.sched.write();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let column = self.resolve_column(&inner, column_name).ok_or(EngineError::ColumnNotFound)?;
        if empty_only {
            let disktables = Self::disktable_handles(&inner);
            if !scan::merge_rows(&disktables, &inner.memtable, Some(column)).is_empty() {
                return Err(EngineError::ColumnNotEmpty);
            }
        }

        inner.op_log.append(&LogOp::RemoveColumn { id: column })?;
        let disktables = Self::disktable_handles(&inner);
        catalog::forget_column(&disktables, &mut inner.memtable, column);
        self.name_cache.lock().unwrap_or_else(|e| e.into_inner()).remove(column_name);
        Ok(())
    }

    /// Visits every user-column cell in `(column, row)` order.
    pub fn scan(&self, callback: impl FnMut(u32, &[u8], &[u8], u64) -> ScanControl) -> Result<ScanOutcome, EngineError> {
        self.run_scan(None, callback)
    }

    /// Visits every cell in one column, in row order.
    pub fn column_scan(
        &self,
        column_name: &[u8],
        mut callback: impl FnMut(&[u8], &[u8], u64) -> ScanControl,
    ) -> Result<ScanOutcome, EngineError> {
        let column = {
            let _sched = self.sched.read();
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            self.resolve_column(&inner, column_name).ok_or(EngineError::ColumnNotFound)?
        };
        self.run_scan(Some(column), move |_column, row, value, ts| callback(row, value, ts))
    }

    /// Forces a minor compaction (memtable flush), independent of the
    /// memtable's capacity threshold.
    pub fn compact(&self) -> Result<(), EngineError> {
        let _sched = self.sched.write();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        Self::run_minor_compact(&mut inner)
    }

    /// Forces a major compaction: flushes the memtable, then folds the
    /// entire disktable chain into one new disktable.
    pub fn major_compact(&self) -> Result<(), EngineError> {
        let _sched = self.sched.write();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        Self::run_minor_compact(&mut inner)?;

        let disktable_dir = inner.data_dir.join(DISKTABLE_DIR);
        let sync = inner.config.sync;
        let result = compaction::major_compact(&inner.disktables, &inner.manifest, &disktable_dir, sync)?;
        if let Some(MajorCompactionResult { removed_ids, new_entry }) = result {
            inner.disktables.retain(|(entry, _)| !removed_ids.contains(&entry.id));
            if let Some(entry) = new_entry {
                let table = Disktable::open(&entry.path)?;
                inner.disktables.push((entry, Arc::new(RwLock::new(table))));
            }
            inner.major_compact_count += 1;
        }
        Ok(())
    }

    fn run_minor_compact(inner: &mut EngineInner) -> Result<(), EngineError> {
        let disktable_dir = inner.data_dir.join(DISKTABLE_DIR);
        let entry = compaction::minor_compact(&mut inner.memtable, &inner.manifest, &disktable_dir, inner.config.sync)?;
        if let Some(entry) = entry {
            let table = Disktable::open(&entry.path)?;
            inner.disktables.push((entry, Arc::new(RwLock::new(table))));
            inner.op_log.truncate()?;
        }
        Ok(())
    }

    /// Shared engine for [`Self::scan`]/[`Self::column_scan`]: snapshots
    /// the merge under a brief reader-lock hold, releases the lock for
    /// every callback invocation, and restarts the snapshot (resuming
    /// just past the last emitted row) if the disktable chain's shape
    /// changed while the callback ran.
    fn run_scan(
        &self,
        only_column: Option<u32>,
        mut callback: impl FnMut(u32, &[u8], &[u8], u64) -> ScanControl,
    ) -> Result<ScanOutcome, EngineError> {
        let mut resume_after: Option<(u32, Vec<u8>)> = None;

        loop {
            let (rows, structure) = {
                let _sched = self.sched.read();
                let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
                let disktables = Self::disktable_handles(&inner);
                let mut rows = scan::merge_rows(&disktables, &inner.memtable, only_column);
                if let Some((col, row)) = &resume_after {
                    if let Some(pos) = rows.iter().position(|r| r.column == *col && &r.row == row) {
                        rows.drain(..=pos);
                    }
                }
                (rows, (inner.disktables.len(), inner.major_compact_count))
            };

            if rows.is_empty() {
                return Ok(ScanOutcome::Completed);
            }

            let mut restart = false;
            for row in rows {
                match callback(row.column, &row.row, &row.value, row.timestamp) {
                    ScanControl::Continue => {}
                    ScanControl::Stop => return Ok(ScanOutcome::Stopped),
                    ScanControl::Abort => return Ok(ScanOutcome::Aborted),
                }
                resume_after = Some((row.column, row.row));

                let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
                if (inner.disktables.len(), inner.major_compact_count) != structure {
                    restart = true;
                    break;
                }
            }
            if !restart {
                return Ok(ScanOutcome::Completed);
            }
        }
    }
}
