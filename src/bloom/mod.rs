//! Four-way 16-bit bloom filter used for fast negative membership
//! testing against a disktable.
//!
//! Two independent 32-bit hashes of the encoded key are split into
//! four 16-bit indices, each addressing one of four independent
//! 65536-bit (8 KiB) bit-sets. A present key sets all four bits; if
//! any of the four bits is clear for a query key, the key is
//! definitely absent from the disktable.


use crate::encoding::{self, EncodingError};

/// Number of independent bit-sets.
pub const NUM_FILTERS: usize = 4;
/// Bytes per bit-set (65536 bits).
pub const FILTER_BYTES: usize = 8192;

#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: [Vec<u8>; NUM_FILTERS],
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl BloomFilter {
    pub fn new() -> Self {
        Self {
            bits: std::array::from_fn(|_| vec![0u8; FILTER_BYTES]),
        }
    }

    fn indices(key: &[u8]) -> [u16; NUM_FILTERS] {
        let h1 = fnv1a32(key, 0x811c_9dc5);
        let h2 = fnv1a32(key, 0x9e37_79b9);
        [
            (h1 & 0xFFFF) as u16,
            (h1 >> 16) as u16,
            (h2 & 0xFFFF) as u16,
            (h2 >> 16) as u16,
        ]
    }

    pub fn insert(&mut self, key: &[u8]) {
        for (filter, idx) in self.bits.iter_mut().zip(Self::indices(key)) {
            set_bit(filter, idx);
        }
    }

    /// Returns `false` only when the key is definitely absent.
    pub fn maybe_contains(&self, key: &[u8]) -> bool {
        self.bits
            .iter()
            .zip(Self::indices(key))
            .all(|(filter, idx)| get_bit(filter, idx))
    }

    pub fn into_blocks(self) -> [Vec<u8>; NUM_FILTERS] {
        self.bits
    }

    pub fn from_blocks(bits: [Vec<u8>; NUM_FILTERS]) -> Self {
        Self { bits }
    }
}

fn set_bit(filter: &mut [u8], idx: u16) {
    let idx = idx as usize;
    filter[idx / 8] |= 1 << (idx % 8);
}

fn get_bit(filter: &[u8], idx: u16) -> bool {
    let idx = idx as usize;
    (filter[idx / 8] >> (idx % 8)) & 1 == 1
}

/// A small non-cryptographic hash (FNV-1a variant) with a caller-chosen
/// seed, used to derive two independent 32-bit hashes from one key.
fn fnv1a32(data: &[u8], seed: u32) -> u32 {
    let mut hash = seed;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

impl encoding::Encode for BloomFilter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        for filter in &self.bits {
            buf.extend_from_slice(filter);
        }
        Ok(())
    }
}

impl encoding::Decode for BloomFilter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let total = NUM_FILTERS * FILTER_BYTES;
        if buf.len() < total {
            return Err(EncodingError::UnexpectedEof {
                needed: total,
                available: buf.len(),
            });
        }
        let mut bits: [Vec<u8>; NUM_FILTERS] = std::array::from_fn(|_| Vec::new());
        for (i, filter) in bits.iter_mut().enumerate() {
            let start = i * FILTER_BYTES;
            *filter = buf[start..start + FILTER_BYTES].to_vec();
        }
        Ok((Self { bits }, total))
    }
}
