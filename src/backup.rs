//! Framed backup/restore over the engine's public operations.
//!
//! An external collaborator, not a method on [`Engine`]: it holds no
//! engine-internal state and talks to the engine purely through
//! `scan`/`column_scan`/`insert_with_ts`, so it could just as easily
//! live in a separate crate built on top of this one.
//!
//! A backup file opens with an 11-byte magic header, then a sequence of
//! framed records: varint `rowlen`, varint `collen`, varint `vallen`, an
//! 8-byte big-endian timestamp, then `row`, `col`, `val` in that order.
//! There is no length-prefixed record wrapper — each field's length is
//! exactly enough to read the next.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::engine::{Engine, EngineError, MergeMode, ScanControl};

const MAGIC: [u8; 11] = *b"\0\0\0JPTB0000";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("backup file ends mid-record")]
    Truncated,
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Reads one varint. `Ok(None)` means the stream ended cleanly before
/// the first byte of a new record — the normal end-of-backup case.
fn read_varint(reader: &mut impl Read) -> Result<Option<u64>, BackupError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        let read = reader.read(&mut byte)?;
        if read == 0 {
            return if shift == 0 { Ok(None) } else { Err(BackupError::Truncated) };
        }
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
        shift += 7;
    }
}

fn read_exact_vec(reader: &mut impl Read, len: usize) -> Result<Vec<u8>, BackupError> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_record(writer: &mut impl Write, row: &[u8], col: &[u8], value: &[u8], timestamp: u64) -> io::Result<()> {
    let mut header = Vec::new();
    write_varint(&mut header, row.len() as u64);
    write_varint(&mut header, col.len() as u64);
    write_varint(&mut header, value.len() as u64);
    writer.write_all(&header)?;
    writer.write_all(&timestamp.to_be_bytes())?;
    writer.write_all(row)?;
    writer.write_all(col)?;
    writer.write_all(value)?;
    Ok(())
}

/// Writes every cell visible through `engine` to a framed backup file at
/// `path`, restricted to `column` if given and skipping any cell older
/// than `min_ts`.
pub fn backup(engine: &Engine, path: impl AsRef<Path>, column: Option<&[u8]>, min_ts: u64) -> Result<(), BackupError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&MAGIC)?;

    let mut names: HashMap<u32, Vec<u8>> = HashMap::new();
    let mut failure: Option<BackupError> = None;

    if let Some(col_name) = column {
        engine.column_scan(col_name, |row, value, ts| {
            if ts < min_ts {
                return ScanControl::Continue;
            }
            match write_record(&mut writer, row, col_name, value, ts) {
                Ok(()) => ScanControl::Continue,
                Err(e) => {
                    failure = Some(e.into());
                    ScanControl::Abort
                }
            }
        })?;
    } else {
        engine.scan(|col, row, value, ts| {
            if ts < min_ts {
                return ScanControl::Continue;
            }
            let name = if let Some(name) = names.get(&col) {
                name.clone()
            } else {
                match engine.column_name(col) {
                    Ok(Some(name)) => {
                        names.insert(col, name.clone());
                        name
                    }
                    Ok(None) => return ScanControl::Continue,
                    Err(e) => {
                        failure = Some(e.into());
                        return ScanControl::Abort;
                    }
                }
            };
            match write_record(&mut writer, row, &name, value, ts) {
                Ok(()) => ScanControl::Continue,
                Err(e) => {
                    failure = Some(e.into());
                    ScanControl::Abort
                }
            }
        })?;
    }

    if let Some(e) = failure {
        return Err(e);
    }
    writer.flush()?;
    Ok(())
}

/// Replays a backup file written by [`backup`] into `engine` via
/// `insert_with_ts`. Accepts the legacy, magic-less, timestamp-less
/// format too (every restored cell gets timestamp 0 in that case).
pub fn restore(engine: &Engine, path: impl AsRef<Path>) -> Result<(), BackupError> {
    let mut file = BufReader::new(File::open(path)?);

    let mut peek = [0u8; MAGIC.len()];
    let peeked = file.read(&mut peek)?;
    let has_magic = peeked == MAGIC.len() && peek == MAGIC;

    let mut reader: Box<dyn Read> = if has_magic {
        Box::new(file)
    } else {
        Box::new(Cursor::new(peek[..peeked].to_vec()).chain(file))
    };

    loop {
        let Some(rowlen) = read_varint(&mut reader)? else {
            break;
        };
        let collen = read_varint(&mut reader)?.ok_or(BackupError::Truncated)?;
        let vallen = read_varint(&mut reader)?.ok_or(BackupError::Truncated)?;

        let timestamp = if has_magic {
            let mut ts_bytes = [0u8; 8];
            reader.read_exact(&mut ts_bytes)?;
            u64::from_be_bytes(ts_bytes)
        } else {
            0
        };

        let row = read_exact_vec(&mut reader, rowlen as usize)?;
        let col = read_exact_vec(&mut reader, collen as usize)?;
        let value = read_exact_vec(&mut reader, vallen as usize)?;
        engine.insert_with_ts(&row, &col, value, timestamp, MergeMode::Replace)?;
    }
    Ok(())
}
