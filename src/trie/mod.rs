//! PATRICIA bit-trie: an index from an encoded key to a dense record
//! position.
//!
//! This is a candidate index, not a set: [`Trie::lookup`] returns the
//! position whose stored key is *most likely* to match the query, but
//! callers must always verify equality against the key actually stored
//! at that position before trusting the result (the caller already has
//! to fetch the record to read its value, so the extra comparison is
//! free).
//!
//! Internally this uses the classic upward-linking PATRICIA
//! construction: node 0 is a header that never holds a real key; every
//! subsequent node corresponds 1:1 with a defined key, navigated by
//! testing one bit of the query key per hop until the walk reaches a
//! node whose own bit index is not strictly greater than its parent's
//! (a back-edge, meaning the walk has bottomed out at a leaf).
//!
//! The persisted form packs `(left, right, bit)` into 24/24/16 bits to
//! match the on-disk layout; the in-memory form keeps plain `u32`/`i64`
//! fields since nothing requires the packed width off disk.


use thiserror::Error;

use crate::encoding::{self, EncodingError};

/// Maximum row length accepted by the trie (in bytes): `2^16 / 8 - 1`.
pub const MAX_KEY_LENGTH: usize = (1 << 16) / 8 - 1;

#[derive(Debug, Error)]
pub enum TrieError {
    #[error("key length {0} exceeds the trie's maximum of {MAX_KEY_LENGTH} bytes")]
    KeyTooLong(usize),
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

#[derive(Debug, Clone, Copy)]
struct TrieNode {
    /// Bit index this node branches on. `-1` only for the header.
    bit: i64,
    left: u32,
    right: u32,
}

/// A PATRICIA trie mapping encoded keys to dense `0..n` positions.
#[derive(Debug, Default)]
pub struct Trie {
    /// `nodes[0]` is the header; `nodes[i]` for `i >= 1` corresponds to
    /// the key stored at `keys[i - 1]`, i.e. dense position `i - 1`.
    nodes: Vec<TrieNode>,
    keys: Vec<Vec<u8>>,
}

fn bit_at(key: &[u8], bit: i64) -> u8 {
    if bit < 0 {
        return 0;
    }
    let bit = bit as usize;
    let byte = bit / 8;
    if byte >= key.len() {
        return 0;
    }
    (key[byte] >> (7 - (bit % 8))) & 1
}

/// First bit index at which `a` and `b` differ, scanning up to
/// `max(a.len(), b.len()) * 8` bits. Returns `None` if they are equal
/// over that range.
fn first_diff_bit(a: &[u8], b: &[u8]) -> Option<i64> {
    let len = a.len().max(b.len());
    for byte in 0..len {
        let ab = a.get(byte).copied().unwrap_or(0);
        let bb = b.get(byte).copied().unwrap_or(0);
        if ab != bb {
            let xor = ab ^ bb;
            let bit_in_byte = xor.leading_zeros(); // 0..=7, MSB first
            return Some((byte as i64) * 8 + bit_in_byte as i64);
        }
    }
    None
}

impl Trie {
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode {
                bit: -1,
                left: 0,
                right: 0,
            }],
            keys: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Walk the trie to the leaf a query key would land on. Returns the
    /// 1-based node index (never 0, since node 0 is the header).
    fn search(&self, key: &[u8]) -> u32 {
        let mut p = 0u32;
        let mut q = self.nodes[0].left;
        while self.nodes[q as usize].bit > self.nodes[p as usize].bit {
            p = q;
            q = if bit_at(key, self.nodes[q as usize].bit) == 0 {
                self.nodes[q as usize].left
            } else {
                self.nodes[q as usize].right
            };
        }
        q
    }

    /// Key stored at a dense position, if any.
    pub fn key_at(&self, position: u32) -> Option<&[u8]> {
        self.keys.get(position as usize).map(Vec::as_slice)
    }

    /// Insert `key`, returning its dense position. Re-inserting an
    /// identical key returns the position it already occupies.
    pub fn define(&mut self, key: &[u8]) -> Result<u32, TrieError> {
        if key.len() > MAX_KEY_LENGTH {
            return Err(TrieError::KeyTooLong(key.len()));
        }

        if self.keys.is_empty() {
            let idx = self.nodes.len() as u32;
            self.nodes.push(TrieNode {
                bit: -1,
                left: idx,
                right: idx,
            });
            self.nodes[0].left = idx;
            self.keys.push(key.to_vec());
            return Ok(0);
        }

        let leaf = self.search(key);
        if self.keys[(leaf - 1) as usize] == key {
            return Ok(leaf - 1);
        }

        let diff_bit = match first_diff_bit(&self.keys[(leaf - 1) as usize], key) {
            Some(b) => b,
            None => return Ok(leaf - 1), // identical in practice
        };

        let mut p = 0u32;
        let mut q = self.nodes[0].left;
        while self.nodes[q as usize].bit > self.nodes[p as usize].bit
            && self.nodes[q as usize].bit < diff_bit
        {
            p = q;
            q = if bit_at(key, self.nodes[q as usize].bit) == 0 {
                self.nodes[q as usize].left
            } else {
                self.nodes[q as usize].right
            };
        }

        let new_idx = self.nodes.len() as u32;
        let (new_left, new_right) = if bit_at(key, diff_bit) == 0 {
            (new_idx, q)
        } else {
            (q, new_idx)
        };
        self.nodes.push(TrieNode {
            bit: diff_bit,
            left: new_left,
            right: new_right,
        });
        self.keys.push(key.to_vec());

        if self.nodes[p as usize].left == q {
            self.nodes[p as usize].left = new_idx;
        } else {
            self.nodes[p as usize].right = new_idx;
        }

        Ok(new_idx - 1)
    }

    /// Candidate position for `key`. The caller MUST compare `key`
    /// against [`Trie::key_at`] of the returned position before
    /// trusting the result.
    pub fn lookup(&self, key: &[u8]) -> Option<u32> {
        if self.keys.is_empty() {
            return None;
        }
        Some(self.search(key) - 1)
    }

    /// Candidate position for a column-scan seek: returns 0 if the
    /// trie's first partition clearly lies outside `prefix`, otherwise
    /// the first candidate position a cursor should start verifying
    /// from.
    pub fn lookup_prefix(&self, prefix: &[u8]) -> u32 {
        if self.keys.is_empty() {
            return 0;
        }
        self.search(prefix).saturating_sub(1)
    }

    /// Persist as `(count, nodes)`, skipping the header.
    pub fn to_persisted(&self) -> PersistedTrie {
        let nodes = self.nodes[1..]
            .iter()
            .map(|n| PersistedNode {
                left: n.left,
                right: n.right,
                bit: n.bit.max(0) as u16,
            })
            .collect();
        PersistedTrie { nodes }
    }

    /// Rebuild a lookup-only trie from its persisted form and the
    /// actual key bytes read back from the data region (the persisted
    /// node array alone carries no key bytes, only branch bits).
    pub fn from_persisted(persisted: &PersistedTrie, keys: Vec<Vec<u8>>) -> Self {
        let mut nodes = Vec::with_capacity(persisted.nodes.len() + 1);
        nodes.push(TrieNode {
            bit: -1,
            left: if persisted.nodes.is_empty() { 0 } else { 1 },
            right: 0,
        });
        for n in &persisted.nodes {
            nodes.push(TrieNode {
                bit: n.bit as i64,
                left: n.left,
                right: n.right,
            });
        }
        Self { nodes, keys }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PersistedNode {
    pub left: u32,
    pub right: u32,
    pub bit: u16,
}

#[derive(Debug, Clone, Default)]
pub struct PersistedTrie {
    pub nodes: Vec<PersistedNode>,
}

impl encoding::Encode for PersistedNode {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.left, buf)?;
        encoding::Encode::encode_to(&self.right, buf)?;
        encoding::Encode::encode_to(&self.bit, buf)?;
        Ok(())
    }
}

impl encoding::Decode for PersistedNode {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (left, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (right, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (bit, n) = u16::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { left, right, bit }, off))
    }
}

impl encoding::Encode for PersistedTrie {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::encode_vec(&self.nodes, buf)
    }
}

impl encoding::Decode for PersistedTrie {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (nodes, n) = encoding::decode_vec::<PersistedNode>(buf)?;
        Ok((Self { nodes }, n))
    }
}
