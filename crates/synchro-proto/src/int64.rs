//! The protocol's INT64 field.
//!
//! 64-bit values travel as two consecutive 32-bit words, high word first.
//! The high word is signed and the low word unsigned, so the pair
//! `(hi, lo)` decodes as `(hi << 32) | lo`.

use bytes::BufMut;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::big_endian::{I32, U32},
};

/// Wire representation of a signed 64-bit value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct Int64 {
    hi: I32,
    lo: U32,
}

impl Int64 {
    /// Size on the wire in bytes.
    pub const SIZE: usize = 8;

    /// Split a value into its wire words.
    pub fn new(value: i64) -> Self {
        let (hi, lo) = split(value);
        Self { hi: I32::new(hi), lo: U32::new(lo) }
    }

    /// Combine the wire words into a value.
    pub fn get(self) -> i64 {
        join(self.hi.get(), self.lo.get())
    }

    /// High (signed) word.
    pub fn hi(self) -> i32 {
        self.hi.get()
    }

    /// Low (unsigned) word.
    pub fn lo(self) -> u32 {
        self.lo.get()
    }
}

impl From<i64> for Int64 {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl From<Int64> for i64 {
    fn from(value: Int64) -> Self {
        value.get()
    }
}

/// Combine a high and low word into a 64-bit value.
pub fn join(hi: i32, lo: u32) -> i64 {
    (i64::from(hi) << 32) | i64::from(lo)
}

/// Split a 64-bit value into its high and low words.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn split(value: i64) -> (i32, u32) {
    ((value >> 32) as i32, value as u32)
}

/// Append a value to `buf` as an INT64 field.
pub fn put_int64(buf: &mut impl BufMut, value: i64) {
    let (hi, lo) = split(value);
    buf.put_i32(hi);
    buf.put_u32(lo);
}
