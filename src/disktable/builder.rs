//! Writes a brand-new disktable file using the two-phase magic commit:
//! the file is written in full under the `LBA_` ("pending") magic, then
//! `fsync`ed, then its leading 4 bytes are rewritten to `LBAT`
//! ("committed") and `fsync`ed again. A crash between these steps
//! leaves a `LBA_`-tagged file on disk that the opening code recognizes
//! as incomplete and discards, rather than a file that is mistaken for
//! committed but is actually truncated.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::bloom::BloomFilter;
use crate::encoding::{self, Encode};
use crate::trie::Trie;

use super::{DisktableError, DisktableRow, KeyInfo, DISKTABLE_VERSION, FLAG_NEW_COLUMN, FLAG_REMOVED, MAGIC_COMMITTED, MAGIC_PENDING};

pub struct DisktableBuilder {
    path: PathBuf,
    sync: bool,
}

impl DisktableBuilder {
    pub fn new(path: impl Into<PathBuf>, sync: bool) -> Self {
        Self {
            path: path.into(),
            sync,
        }
    }

    /// Write `rows`, which must already be in ascending encoded-key
    /// order (the order a `BTreeMap` keyed by `(column, row)` or a
    /// disktable cursor naturally produces), to a fresh file at
    /// `self.path`.
    pub fn write(&self, rows: &[DisktableRow]) -> Result<(), DisktableError> {
        let mut trie = Trie::new();
        let mut bloom = BloomFilter::new();
        let mut key_info = Vec::with_capacity(rows.len());
        let mut data = Vec::new();

        for row in rows {
            let position = trie.define(&row.key)?;
            debug_assert_eq!(position as usize, key_info.len(), "rows must be pre-sorted");
            bloom.insert(&row.key);

            let offset = data.len() as u64;
            data.extend_from_slice(&row.key);
            let value_len = row.value.as_deref().map(<[u8]>::len).unwrap_or(0);
            if let Some(value) = &row.value {
                data.extend_from_slice(value);
            }

            let mut flags = 0u32;
            if row.value.is_none() {
                flags |= FLAG_REMOVED;
            }
            if row.new_column {
                flags |= FLAG_NEW_COLUMN;
            }

            key_info.push(KeyInfo {
                timestamp: row.timestamp,
                offset,
                size: (row.key.len() + value_len) as u32,
                flags,
            });
        }

        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC_PENDING);
        DISKTABLE_VERSION.encode_to(&mut buf)?;
        (rows.len() as u32).encode_to(&mut buf)?;
        (data.len() as u32).encode_to(&mut buf)?;
        bloom.encode_to(&mut buf)?;
        trie.to_persisted().encode_to(&mut buf)?;
        encoding::encode_vec(&key_info, &mut buf)?;
        buf.extend_from_slice(&data);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(&buf)?;
        if self.sync {
            file.sync_all()?;
        } else {
            file.flush()?;
        }

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&MAGIC_COMMITTED)?;
        if self.sync {
            file.sync_all()?;
        } else {
            file.flush()?;
        }

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Discard a file left behind with the `LBA_` ("pending") magic, as
/// seen on recovery after a crash partway through [`DisktableBuilder::write`].
pub fn is_pending(path: impl AsRef<Path>) -> std::io::Result<bool> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut magic = [0u8; 4];
    if file.read(&mut magic)? < 4 {
        return Ok(true);
    }
    Ok(magic == MAGIC_PENDING)
}
