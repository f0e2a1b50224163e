//! Encoded key codec.
//!
//! A cell is addressed by `(column id, row)`. Callers never see raw
//! column ids on disk — every encoded key carries a 4-byte,
//! order-preserving prefix derived from the column id, followed by the
//! row bytes and a terminating zero byte.
//!
//! No prefix byte is ever zero, and **row must not contain an embedded
//! zero byte either** — a disktable record stores only the combined
//! `key_len + value_len` in its `key_info` entry, not `key_len` alone,
//! so the key/value boundary is recovered by scanning forward from the
//! prefix for the first zero byte. An embedded zero in row would be
//! mistaken for that terminator and silently truncate the row.

use thiserror::Error;

/// Width of the column-id prefix in an encoded key.
pub const COLUMN_PREFIX_SIZE: usize = 4;

/// Column ids below this value are reserved for internal bookkeeping
/// (`META`, `COLUMNS`, `REV_COLUMNS`, `COUNTERS`).
pub const FIRST_USER_COLUMN: u32 = 100;

/// Internal column ids.
pub const COLUMN_META: u32 = 0;
pub const COLUMN_COLUMNS: u32 = 1;
pub const COLUMN_REV_COLUMNS: u32 = 2;
pub const COLUMN_COUNTERS: u32 = 3;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("row length {0} exceeds the trie's maximum key length")]
    RowTooLong(usize),
    #[error("encoded key shorter than the column prefix ({0} bytes)")]
    Truncated(usize),
    #[error("row contains an embedded zero byte at offset {0}")]
    EmbeddedZero(usize),
}

/// Reject rows containing an embedded zero byte, which would be
/// mistaken for the disktable record terminator.
pub fn validate_row(row: &[u8]) -> Result<(), KeyError> {
    match row.iter().position(|&b| b == 0) {
        Some(i) => Err(KeyError::EmbeddedZero(i)),
        None => Ok(()),
    }
}

/// Encode `(column, row)` into an order-preserving byte key.
///
/// The four prefix bytes are each `digit + 1` for a base-255 decomposition
/// of `column`, so no prefix byte is ever zero. A terminating zero byte
/// follows the row so that two keys where one row is a prefix of the
/// other still compare correctly (the shorter row sorts first).
pub fn encode(column: u32, row: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(COLUMN_PREFIX_SIZE + row.len() + 1);
    key.extend_from_slice(&column_prefix(column));
    key.extend_from_slice(row);
    key.push(0);
    key
}

/// Compute just the 4-byte column prefix, without a row.
pub fn column_prefix(column: u32) -> [u8; COLUMN_PREFIX_SIZE] {
    let p3 = (column % 255) as u8 + 1;
    let column = column / 255;
    let p2 = (column % 255) as u8 + 1;
    let column = column / 255;
    let p1 = (column % 255) as u8 + 1;
    let column = column / 255;
    let p0 = (column % 255) as u8 + 1;
    [p0, p1, p2, p3]
}

/// Decode the column id out of an encoded key's leading prefix.
pub fn decode_column(key: &[u8]) -> Result<u32, KeyError> {
    if key.len() < COLUMN_PREFIX_SIZE {
        return Err(KeyError::Truncated(key.len()));
    }
    Ok(decode_column_prefix([key[0], key[1], key[2], key[3]]))
}

/// Decode a column id out of a raw 4-byte prefix.
pub fn decode_column_prefix(prefix: [u8; COLUMN_PREFIX_SIZE]) -> u32 {
    let mut column = 0u32;
    for b in prefix {
        column = column * 255 + (b as u32 - 1);
    }
    column
}

/// Split an encoded key into `(column, row_without_terminator)`.
pub fn decode(key: &[u8]) -> Result<(u32, &[u8]), KeyError> {
    if key.len() < COLUMN_PREFIX_SIZE + 1 {
        return Err(KeyError::Truncated(key.len()));
    }
    let column = decode_column(key)?;
    // Drop the trailing zero terminator written by `encode`.
    let row = &key[COLUMN_PREFIX_SIZE..key.len() - 1];
    Ok((column, row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        for col in [0u32, 1, 99, 100, 255, 65536, u32::MAX - 1] {
            let k = encode(col, b"hello");
            let (decoded_col, row) = decode(&k).unwrap();
            assert_eq!(decoded_col, col);
            assert_eq!(row, b"hello");
        }
    }

    #[test]
    fn no_prefix_byte_is_zero() {
        for col in [0u32, 1, 254, 255, 256, u32::MAX] {
            let prefix = column_prefix(col);
            assert!(prefix.iter().all(|&b| b != 0), "col={col} prefix={prefix:?}");
        }
    }

    #[test]
    fn order_preserving_by_column_then_row() {
        let a = encode(1, b"zzz");
        let b = encode(2, b"aaa");
        assert!(a < b, "lower column must sort first regardless of row");

        let c = encode(5, b"aaa");
        let d = encode(5, b"aab");
        assert!(c < d);
    }

    #[test]
    fn shorter_row_prefix_sorts_first() {
        let short = encode(5, b"ab");
        let long = encode(5, b"abc");
        assert!(short < long);
    }

    #[test]
    fn validate_row_rejects_embedded_zero() {
        assert!(validate_row(b"clean").is_ok());
        let err = validate_row(b"dir\0ty").unwrap_err();
        assert!(matches!(err, KeyError::EmbeddedZero(3)));
    }
}
