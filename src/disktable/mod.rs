//! Immutable, sorted, on-disk runs ("disktables").
//!
//! Each disktable lives in its own file: a magic/version/counts header,
//! a bloom filter, a persisted PATRICIA trie, a `key_info` array, and a
//! data region of concatenated `encoded_key || value` records (one
//! disktable per file rather than many concatenated into a single data
//! file — see the manifest's per-entry path tracking, which this mirrors
//! from the reference engine's SSTable-per-file layout).
//!
//! A disktable is nominally immutable once committed, but two narrow
//! in-place edits are part of the contract: flipping the `REMOVED` flag
//! on an existing key, and shrinking-only overwrite of a value in place.
//! Both are implemented through a mutable memory map.


mod builder;
mod cursor;
mod encoding_impls;

pub use builder::DisktableBuilder;
pub use cursor::{DisktableCursor, DisktableCursorEntry};

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use thiserror::Error;
use tracing::{debug, warn};

use crate::bloom::BloomFilter;
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::key;
use crate::trie::{Trie, TrieError};

/// Current disktable format version.
pub const DISKTABLE_VERSION: u32 = 9;

pub const MAGIC_COMMITTED: [u8; 4] = *b"LBAT";
pub const MAGIC_PENDING: [u8; 4] = *b"LBA_";

pub const FLAG_REMOVED: u32 = 0x0001;
pub const FLAG_NEW_COLUMN: u32 = 0x0002;

const HEADER_FIXED_LEN: usize = 4 + 4 + 4 + 4; // magic + version + row_count + data_size

#[derive(Debug, Error)]
pub enum DisktableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("trie error: {0}")]
    Trie(#[from] TrieError),
    #[error("key error: {0}")]
    Key(#[from] key::KeyError),
    #[error("bad magic: disktable is uncommitted or corrupt")]
    BadMagic,
    #[error("unsupported disktable version {0}")]
    VersionMismatch(u32),
    #[error("corrupt disktable: {0}")]
    Corrupt(String),
}

/// Fixed-size per-key metadata record.
#[derive(Debug, Clone, Copy)]
pub struct KeyInfo {
    pub timestamp: u64,
    pub offset: u64,
    pub size: u32,
    pub flags: u32,
}

impl KeyInfo {
    pub fn is_removed(&self) -> bool {
        self.flags & FLAG_REMOVED != 0
    }

    pub fn is_new_column(&self) -> bool {
        self.flags & FLAG_NEW_COLUMN != 0
    }
}

/// A single prepared row handed to [`DisktableBuilder`]; `value` is
/// `None` for a tombstone, which is still written out (with
/// `FLAG_REMOVED` set) so it continues to shadow older disktable
/// entries for the same key until the next major compaction.
#[derive(Debug, Clone)]
pub struct DisktableRow {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub timestamp: u64,
    pub new_column: bool,
}

/// An immutable sorted run, opened read/write for the two narrow
/// in-place edits the format allows.
pub struct Disktable {
    path: PathBuf,
    mmap: MmapMut,
    row_count: u32,
    bloom: BloomFilter,
    trie: Trie,
    key_info: Vec<KeyInfo>,
    data_offset: usize,
}

impl std::fmt::Debug for Disktable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disktable")
            .field("path", &self.path)
            .field("row_count", &self.row_count)
            .finish_non_exhaustive()
    }
}

impl Disktable {
    /// Open a committed disktable file for reading (and the two
    /// allowed in-place edits). Returns [`DisktableError::BadMagic`] if
    /// the file's leading magic is not `LBAT` — recovery from a
    /// `LBA_` (in-progress) tail is handled by the caller (the manifest
    /// layer), since it owns the decision of whether to truncate or
    /// reject such a file under `RECOVER`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DisktableError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        if mmap.len() < HEADER_FIXED_LEN {
            return Err(DisktableError::Corrupt("file shorter than header".into()));
        }

        let magic: [u8; 4] = mmap[0..4].try_into().expect("checked length");
        if magic != MAGIC_COMMITTED {
            return Err(DisktableError::BadMagic);
        }

        let mut off = 4;
        let (version, n) = u32::decode_from(&mmap[off..])?;
        off += n;
        if version != DISKTABLE_VERSION {
            return Err(DisktableError::VersionMismatch(version));
        }
        let (row_count, n) = u32::decode_from(&mmap[off..])?;
        off += n;
        let (data_size, n) = u32::decode_from(&mmap[off..])?;
        off += n;

        let (bloom, n) = BloomFilter::decode_from(&mmap[off..])?;
        off += n;

        let (persisted_trie, n) = crate::trie::PersistedTrie::decode_from(&mmap[off..])?;
        off += n;

        let (key_info_raw, n) = encoding::decode_vec::<KeyInfo>(&mmap[off..])?;
        off += n;

        let data_offset = off;
        if mmap.len() < data_offset + data_size as usize {
            return Err(DisktableError::Corrupt("data region truncated".into()));
        }

        let mut keys = Vec::with_capacity(key_info_raw.len());
        for info in &key_info_raw {
            let start = data_offset + info.offset as usize;
            let key_len = key_len_at(&mmap[start..])?;
            keys.push(mmap[start..start + key_len].to_vec());
        }
        let trie = Trie::from_persisted(&persisted_trie, keys);

        debug!(path = %path.display(), rows = row_count, "disktable opened");

        Ok(Self {
            path,
            mmap,
            row_count,
            bloom,
            trie,
            key_info: key_info_raw,
            data_offset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Read a record's key and value bytes straight out of the data region.
    fn record_bytes(&self, info: &KeyInfo) -> (&[u8], &[u8]) {
        let start = self.data_offset + info.offset as usize;
        let end = start + info.size as usize;
        let bytes = &self.mmap[start..end];
        let key_len = key_len_at(bytes).unwrap_or(bytes.len());
        (&bytes[..key_len], &bytes[key_len..])
    }

    /// Bloom-probe, trie-lookup, verify. Returns the dense position of
    /// a *verified* match, or `None`.
    fn find(&self, column: u32, row: &[u8]) -> Option<u32> {
        let encoded = key::encode(column, row);
        if !self.bloom.maybe_contains(&encoded) {
            return None;
        }
        let candidate = self.trie.lookup(&encoded)?;
        let info = self.key_info.get(candidate as usize)?;
        let (stored_key, _) = self.record_bytes(info);
        if stored_key == encoded.as_slice() {
            Some(candidate)
        } else {
            None
        }
    }

    pub fn get(&self, column: u32, row: &[u8]) -> Option<(Vec<u8>, u64)> {
        let pos = self.find(column, row)?;
        let info = self.key_info[pos as usize];
        if info.is_removed() {
            return None;
        }
        let (_, value) = self.record_bytes(&info);
        Some((value.to_vec(), info.timestamp))
    }

    /// Like [`Self::get`], but surfaces a tombstone as `(true, ..)`
    /// instead of collapsing it to `None` — needed by the engine's
    /// cross-layer merge, which must tell "no record here" apart from
    /// "a removal recorded here" to decide whether an older layer's
    /// contribution is shadowed.
    pub fn raw_get(&self, column: u32, row: &[u8]) -> Option<(bool, Vec<u8>, u64)> {
        let pos = self.find(column, row)?;
        let info = self.key_info[pos as usize];
        let (_, value) = self.record_bytes(&info);
        Some((info.is_removed(), value.to_vec(), info.timestamp))
    }

    pub fn has_key(&self, column: u32, row: &[u8]) -> bool {
        match self.find(column, row) {
            Some(pos) => !self.key_info[pos as usize].is_removed(),
            None => false,
        }
    }

    /// Flip the `REMOVED` flag for an existing key. Returns whether a
    /// matching (possibly already-removed) key was found.
    pub fn remove(&mut self, column: u32, row: &[u8]) -> Result<bool, DisktableError> {
        let Some(pos) = self.find(column, row) else {
            return Ok(false);
        };
        self.key_info[pos as usize].flags |= FLAG_REMOVED;
        self.write_back_key_info(pos)?;
        Ok(true)
    }

    /// Shrinking-only in-place overwrite: writes at most
    /// `size - key_len` bytes of `new_value` over the stored value,
    /// truncating `size` to match, and clears `REMOVED`. Returns the
    /// number of bytes actually written; the caller applies any
    /// remaining `new_value[written..]` elsewhere (an older disktable,
    /// or ultimately the memtable).
    pub fn overwrite(
        &mut self,
        column: u32,
        row: &[u8],
        new_value: &[u8],
    ) -> Result<usize, DisktableError> {
        let Some(pos) = self.find(column, row) else {
            return Ok(0);
        };
        let info = self.key_info[pos as usize];
        let encoded = key::encode(column, row);
        let key_len = encoded.len();
        let available = info.size as usize - key_len;
        let written = available.min(new_value.len());

        let start = self.data_offset + info.offset as usize + key_len;
        self.mmap[start..start + written].copy_from_slice(&new_value[..written]);

        let entry = &mut self.key_info[pos as usize];
        entry.size = (key_len + written) as u32;
        entry.flags &= !FLAG_REMOVED;
        self.write_back_key_info(pos)?;
        Ok(written)
    }

    /// Re-serialize one key_info entry into its fixed-width slot. The
    /// key_info block was encoded with `encoding::encode_vec`, i.e. a
    /// leading `u32` count followed by fixed-width entries, so each
    /// entry's offset within the mmap is deterministic once the block's
    /// start is known.
    fn write_back_key_info(&mut self, pos: u32) -> Result<(), DisktableError> {
        let entry = self.key_info[pos as usize];
        let bytes = encoding::encode_to_vec(&entry)?;
        let start = self.key_info_block_start() + 4 + pos as usize * bytes.len();
        self.mmap[start..start + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    fn key_info_block_start(&self) -> usize {
        // data_offset is exactly the end of the key_info block.
        let entry_len = encoding::encode_to_vec(&self.key_info[0]).map(|b| b.len()).unwrap_or(24);
        self.data_offset - 4 - self.key_info.len() * entry_len
    }

    pub fn sync(&self) -> Result<(), DisktableError> {
        self.mmap.flush()?;
        Ok(())
    }

    /// A forward cursor over every row in trie-defined (i.e. sorted
    /// encoded-key) order, optionally starting at a dense position
    /// computed via [`Trie::lookup_prefix`].
    pub fn cursor(&self) -> DisktableCursor<'_> {
        DisktableCursor::new(self, 0)
    }

    pub fn cursor_from(&self, start: u32) -> DisktableCursor<'_> {
        DisktableCursor::new(self, start)
    }

    pub fn lookup_prefix(&self, column_prefix: &[u8]) -> u32 {
        self.trie.lookup_prefix(column_prefix)
    }

    pub(crate) fn entry_at(&self, pos: u32) -> Option<DisktableCursorEntry> {
        let info = self.key_info.get(pos as usize)?;
        let (stored_key, value) = self.record_bytes(info);
        let (column, row) = key::decode(stored_key).ok()?;
        Some(DisktableCursorEntry {
            column,
            row: row.to_vec(),
            timestamp: info.timestamp,
            value: value.to_vec(),
            removed: info.is_removed(),
        })
    }
}

/// Find the length of an encoded key at the start of `bytes`: the
/// 4-byte column prefix plus row bytes up to and including the
/// terminating zero (rows never contain an embedded zero byte, so the
/// first zero after the prefix unambiguously ends the key).
fn key_len_at(bytes: &[u8]) -> Result<usize, DisktableError> {
    if bytes.len() < key::COLUMN_PREFIX_SIZE {
        return Err(DisktableError::Corrupt("record shorter than key prefix".into()));
    }
    let rest = &bytes[key::COLUMN_PREFIX_SIZE..];
    match rest.iter().position(|&b| b == 0) {
        Some(idx) => Ok(key::COLUMN_PREFIX_SIZE + idx + 1),
        None => Err(DisktableError::Corrupt("key terminator not found".into())),
    }
}

pub(crate) fn warn_if_cleanup_fails(path: &Path, result: std::io::Result<()>) {
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to remove old disktable file");
    }
}
