//! Data patterns on the source/sink interface.

use bytes::{BufMut, Bytes, BytesMut};

/// What the device's bulk IN source emits, chosen with the vendor
/// set-pattern request. The discriminant is the request's wValue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Pattern {
    /// Every byte is zero.
    Zeros = 0,
    /// Byte `k` of the stream is `k % 63`.
    Mod63 = 1,
}

impl Pattern {
    pub fn from_value(value: u16) -> Option<Self> {
        match value {
            0 => Some(Pattern::Zeros),
            1 => Some(Pattern::Mod63),
            _ => None,
        }
    }

    pub fn value(self) -> u16 {
        self as u16
    }

    /// Byte at stream offset `index`, counted from the last counter reset.
    pub fn byte_at(self, index: usize) -> u8 {
        match self {
            Pattern::Zeros => 0,
            Pattern::Mod63 => (index % 63) as u8,
        }
    }

    /// The first `len` bytes of the pattern.
    pub fn expected(self, len: usize) -> Bytes {
        let mut buf = BytesMut::with_capacity(len);
        for index in 0..len {
            buf.put_u8(self.byte_at(index));
        }
        buf.freeze()
    }

    /// Checks `data` against the pattern starting at offset zero.
    pub fn verify(self, data: &[u8]) -> Result<(), Mismatch> {
        match data
            .iter()
            .enumerate()
            .find(|&(index, &byte)| byte != self.byte_at(index))
        {
            Some((offset, &actual)) => Err(Mismatch {
                pattern: self,
                offset,
                expected: self.byte_at(offset),
                actual,
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{pattern:?} mismatch at offset {offset}: expected 0x{expected:02x}, got 0x{actual:02x}")]
pub struct Mismatch {
    pub pattern: Pattern,
    pub offset: usize,
    pub expected: u8,
    pub actual: u8,
}

/// Host payload for the sink: an ascending counter masked to a byte.
pub fn counting(len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(len);
    for x in 0..len {
        buf.put_u8((x & 0xff) as u8);
    }
    buf.freeze()
}
