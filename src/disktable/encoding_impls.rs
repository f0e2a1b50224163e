use crate::encoding::{self, Decode, Encode, EncodingError};

use super::KeyInfo;

impl Encode for KeyInfo {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.timestamp, buf)?;
        encoding::Encode::encode_to(&self.offset, buf)?;
        encoding::Encode::encode_to(&self.size, buf)?;
        encoding::Encode::encode_to(&self.flags, buf)?;
        Ok(())
    }
}

impl Decode for KeyInfo {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (timestamp, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (flags, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                timestamp,
                offset,
                size,
                flags,
            },
            off,
        ))
    }
}
