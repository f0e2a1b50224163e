//! # Manifest Component
//!
//! The **Manifest** is the metadata authority for the storage engine's
//! ambient bookkeeping: it tracks which disktable files currently make
//! up the chain (in compaction order) and the next disktable id to
//! allocate. It does *not* track the column catalog — that lives as
//! ordinary cells in the table itself (see `engine::catalog`), so it
//! survives backup/restore and scans along with user data.
//!
//! ## Data durability strategy
//!
//! Manifest metadata is persisted using a **WAL + periodic snapshot**
//! model, unchanged from the original engine this module was adapted
//! from:
//!
//! 1. **Manifest WAL** (`wal-0.log`) records mutation operations:
//!    adding/removing disktables, allocating the next disktable id.
//!
//! 2. **Manifest snapshot** (`MANIFEST-000001`) is a compact encoded
//!    dump of the whole metadata structure. Checksum ensures corruption
//!    detection.
//!
//! 3. On startup:
//!    - If a valid snapshot exists → load snapshot, replay WAL.
//!    - If snapshot corrupted → fall back to full WAL replay.
//!
//! ## Thread safety
//!
//! - **WAL** is internally synchronized — no external lock is required.
//! - **ManifestData** is wrapped in a `Mutex` to coordinate concurrent
//!   metadata operations.

#[cfg(test)]
mod tests;

use crate::encoding::{self, EncodingError};
use crate::wal::{Wal, WalError};
use crc32fast::Hasher as Crc32;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use thiserror::Error;
use tracing::{error, info, warn};

const SNAPSHOT_TMP_SUFFIX: &str = ".tmp";
const SNAPSHOT_FILENAME: &str = "MANIFEST-000001";
/// Manifest WAL filename. Fixed, single-segment, never rotates;
/// truncated to header-only on each checkpoint. Named to satisfy
/// `Wal::open`'s `wal-<seq>.log` naming convention at sequence 0.
const WAL_FILENAME: &str = "wal-0.log";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("Snapshot checksum mismatch")]
    SnapshotChecksumMismatch,
    #[error("Internal error: {0}")]
    Internal(String),
}

/// In-memory representation of the manifest durable state.
#[derive(Debug, PartialEq, Clone)]
pub(crate) struct ManifestData {
    version: u64,
    /// Disktable chain, in compaction order (oldest first).
    disktables: Vec<ManifestDisktableEntry>,
    /// Next disktable id to allocate. Monotonically increasing.
    next_disktable_id: u64,
    /// Runtime-only flag: true when in-memory state diverges from the
    /// last persisted snapshot. Not serialized.
    dirty: bool,
}

/// Entry describing one disktable file known to the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestDisktableEntry {
    /// Globally unique disktable id.
    pub id: u64,
    /// Filesystem path to the disktable file.
    pub path: PathBuf,
}

impl encoding::Encode for ManifestDisktableEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.id, buf)?;
        encoding::Encode::encode_to(&self.path, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ManifestDisktableEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (path, n) = PathBuf::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Self { id, path }, offset))
    }
}

impl encoding::Encode for ManifestData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::encode_vec(&self.disktables, buf)?;
        encoding::Encode::encode_to(&self.next_disktable_id, buf)?;
        // `dirty` is a runtime-only flag — always written as `false` for
        // wire compatibility, but never read back.
        encoding::Encode::encode_to(&false, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ManifestData {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (version, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (disktables, n) = encoding::decode_vec::<ManifestDisktableEntry>(&buf[offset..])?;
        offset += n;
        let (next_disktable_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (_dirty, n) = bool::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                version,
                disktables,
                next_disktable_id,
                dirty: false,
            },
            offset,
        ))
    }
}

impl encoding::Encode for ManifestEvent {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            ManifestEvent::Version { version } => {
                encoding::Encode::encode_to(&0u32, buf)?;
                encoding::Encode::encode_to(version, buf)?;
            }
            ManifestEvent::AddDisktable { entry } => {
                encoding::Encode::encode_to(&1u32, buf)?;
                encoding::Encode::encode_to(entry, buf)?;
            }
            ManifestEvent::RemoveDisktable { id } => {
                encoding::Encode::encode_to(&2u32, buf)?;
                encoding::Encode::encode_to(id, buf)?;
            }
            ManifestEvent::AllocateDisktableId { id } => {
                encoding::Encode::encode_to(&3u32, buf)?;
                encoding::Encode::encode_to(id, buf)?;
            }
            ManifestEvent::Compaction { added, removed } => {
                encoding::Encode::encode_to(&4u32, buf)?;
                encoding::encode_vec(added, buf)?;
                encoding::encode_vec(removed, buf)?;
            }
        }
        Ok(())
    }
}

impl encoding::Decode for ManifestEvent {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (tag, n) = u32::decode_from(buf)?;
        offset += n;
        match tag {
            0 => {
                let (version, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::Version { version }, offset))
            }
            1 => {
                let (entry, n) = ManifestDisktableEntry::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::AddDisktable { entry }, offset))
            }
            2 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::RemoveDisktable { id }, offset))
            }
            3 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::AllocateDisktableId { id }, offset))
            }
            4 => {
                let (added, n) = encoding::decode_vec::<ManifestDisktableEntry>(&buf[offset..])?;
                offset += n;
                let (removed, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::Compaction { added, removed }, offset))
            }
            _ => Err(EncodingError::InvalidTag {
                tag,
                type_name: "ManifestEvent",
            }),
        }
    }
}

impl encoding::Encode for ManifestSnapshot {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::Encode::encode_to(&self.manifest_data, buf)?;
        encoding::Encode::encode_to(&self.checksum, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ManifestSnapshot {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (version, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (manifest_data, n) = ManifestData::decode_from(&buf[offset..])?;
        offset += n;
        let (checksum, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                version,
                manifest_data,
                checksum,
            },
            offset,
        ))
    }
}

impl Default for ManifestData {
    fn default() -> Self {
        Self {
            version: 1,
            disktables: Vec::new(),
            next_disktable_id: 1,
            dirty: false,
        }
    }
}

/// Record stored in the manifest WAL. Each variant describes a single
/// metadata mutation applied to [`ManifestData`].
#[derive(Debug)]
pub enum ManifestEvent {
    Version { version: u64 },
    AddDisktable { entry: ManifestDisktableEntry },
    RemoveDisktable { id: u64 },
    /// Allocates the next disktable id (persists the counter increment).
    AllocateDisktableId { id: u64 },
    /// Atomic compaction transition: adds new disktables and removes old
    /// ones in a single WAL entry.
    Compaction {
        added: Vec<ManifestDisktableEntry>,
        removed: Vec<u64>,
    },
}

/// Serialized snapshot stored in `MANIFEST-000001`.
#[derive(Debug)]
struct ManifestSnapshot {
    version: u64,
    manifest_data: ManifestData,
    checksum: u32,
}

/// Persistent metadata manager for the engine's disktable chain.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    wal: Wal<ManifestEvent>,
    data: Mutex<ManifestData>,
}

impl Manifest {
    /// Opens the manifest from the given engine directory, loading the
    /// snapshot (if present) and replaying the WAL on top of it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let snapshot_path = path.join(SNAPSHOT_FILENAME);
        let mut data = ManifestData::default();

        if snapshot_path.exists() {
            match Self::read_snapshot(&snapshot_path) {
                Ok(snap) => {
                    data = snap;
                    info!(path = %snapshot_path.display(), "loaded manifest snapshot");
                }
                Err(e) => {
                    warn!(
                        path = %snapshot_path.display(),
                        error = %e,
                        "failed to read manifest snapshot; falling back to full WAL replay"
                    );
                    data = ManifestData::default();
                }
            }
        }

        let wal_path = path.join(WAL_FILENAME);
        let wal = Wal::<ManifestEvent>::open(&wal_path, None)?;

        let mut manifest = Manifest {
            path,
            wal,
            data: Mutex::new(data),
        };

        manifest.replay_wal()?;

        Ok(manifest)
    }

    fn lock_data(&self) -> Result<std::sync::MutexGuard<'_, ManifestData>, ManifestError> {
        self.data.lock().map_err(|_| {
            error!("manifest mutex poisoned");
            ManifestError::Internal("mutex poisoned".into())
        })
    }

    /// Disktable chain, oldest first.
    pub fn disktables(&self) -> Result<Vec<ManifestDisktableEntry>, ManifestError> {
        Ok(self.lock_data()?.disktables.clone())
    }

    pub fn is_dirty(&self) -> Result<bool, ManifestError> {
        Ok(self.lock_data()?.dirty)
    }

    /// Appends a disktable to the end of the chain (used after minor
    /// compaction, where exactly one new disktable is created).
    pub fn add_disktable(&self, entry: ManifestDisktableEntry) -> Result<(), ManifestError> {
        let rec = ManifestEvent::AddDisktable {
            entry: entry.clone(),
        };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    pub fn remove_disktable(&self, id: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::RemoveDisktable { id };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Atomically allocates the next disktable id. The data lock is
    /// held across the read-and-increment so two concurrent callers
    /// never receive the same id.
    pub fn allocate_disktable_id(&self) -> Result<u64, ManifestError> {
        let mut data = self.lock_data()?;
        let id = data.next_disktable_id;
        let rec = ManifestEvent::AllocateDisktableId { id };
        self.wal.append(&rec)?;
        data.next_disktable_id = id + 1;
        data.dirty = true;
        Ok(id)
    }

    pub fn peek_next_disktable_id(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.next_disktable_id)
    }

    /// Records a major compaction: the whole prior chain collapses
    /// into the single disktable named in `added`, in one WAL entry so
    /// a crash mid-compaction cannot leave the chain half-updated.
    pub fn apply_compaction(
        &self,
        added: Vec<ManifestDisktableEntry>,
        removed: Vec<u64>,
    ) -> Result<(), ManifestError> {
        let rec = ManifestEvent::Compaction { added, removed };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Serializes current state to `MANIFEST-000001` and truncates the
    /// WAL. Requires `&mut self` so no concurrent mutation can race the
    /// truncation step.
    pub fn checkpoint(&mut self) -> Result<(), ManifestError> {
        let snapshot = {
            let data = self.lock_data()?.clone();
            ManifestSnapshot {
                version: data.version,
                manifest_data: data,
                checksum: 0,
            }
        };

        let mut snapshot_bytes = encoding::encode_to_vec(&snapshot)?;
        let mut hasher = Crc32::new();
        hasher.update(&snapshot_bytes);
        let checksum = hasher.finalize();
        let len = snapshot_bytes.len();
        snapshot_bytes[len - 4..].copy_from_slice(&checksum.to_le_bytes());

        let tmp_name = format!("{SNAPSHOT_FILENAME}{SNAPSHOT_TMP_SUFFIX}");
        let tmp_path = self.path.join(&tmp_name);
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(&snapshot_bytes)?;
            f.sync_all()?;
        }

        let final_path = self.path.join(SNAPSHOT_FILENAME);
        fs::rename(&tmp_path, &final_path)?;
        Self::fsync_dir(&self.path)?;

        info!(path = %final_path.display(), "manifest snapshot written");

        self.wal.truncate()?;
        self.lock_data()?.dirty = false;

        Ok(())
    }

    fn fsync_dir(dir: &Path) -> Result<(), ManifestError> {
        let dir_file = File::open(dir)?;
        dir_file.sync_all()?;
        Ok(())
    }

    fn read_snapshot(p: &Path) -> Result<ManifestData, ManifestError> {
        let mut f = File::open(p)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;

        let (snap, _) = encoding::decode_from_slice::<ManifestSnapshot>(buf.as_slice())?;

        let verify = ManifestSnapshot {
            checksum: 0,
            version: snap.version,
            manifest_data: snap.manifest_data.clone(),
        };
        let verify_bytes = encoding::encode_to_vec(&verify)?;

        let mut hasher = Crc32::new();
        hasher.update(&verify_bytes);
        let computed_checksum = hasher.finalize();

        if snap.checksum != computed_checksum {
            return Err(ManifestError::SnapshotChecksumMismatch);
        }

        Ok(snap.manifest_data)
    }

    fn replay_wal(&mut self) -> Result<(), ManifestError> {
        let iter = self.wal.replay_iter()?;

        let mut count: u64 = 0;
        for item in iter {
            match item {
                Ok(rec) => {
                    self.apply_record(&rec)?;
                    count += 1;
                }
                Err(e) => {
                    warn!(error = %e, "manifest WAL replay stopped due to WAL error");
                    break;
                }
            }
        }

        info!(entries = count, "manifest WAL replay complete");
        Ok(())
    }

    fn apply_record(&self, rec: &ManifestEvent) -> Result<(), ManifestError> {
        let mut data = self.lock_data()?;

        match rec {
            ManifestEvent::Version { version } => {
                data.version = *version;
                data.dirty = true;
            }
            ManifestEvent::AddDisktable { entry } => {
                if !data.disktables.iter().any(|e| e.id == entry.id) {
                    data.disktables.push(entry.clone());
                }
                data.dirty = true;
            }
            ManifestEvent::RemoveDisktable { id } => {
                data.disktables.retain(|e| e.id != *id);
                data.dirty = true;
            }
            ManifestEvent::AllocateDisktableId { id } => {
                if *id >= data.next_disktable_id {
                    data.next_disktable_id = *id + 1;
                }
                data.dirty = true;
            }
            ManifestEvent::Compaction { added, removed } => {
                for id in removed {
                    data.disktables.retain(|e| e.id != *id);
                }
                for entry in added {
                    if !data.disktables.iter().any(|e| e.id == entry.id) {
                        data.disktables.push(entry.clone());
                    }
                    if entry.id >= data.next_disktable_id {
                        data.next_disktable_id = entry.id + 1;
                    }
                }
                data.dirty = true;
            }
        }

        Ok(())
    }
}
