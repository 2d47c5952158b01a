//! Error packet encoding.
//!
//! Core protocol errors use fixed codes; the extension's own "no such
//! object" error is offset from the error base assigned to the extension
//! when it was registered.

use bytes::{BufMut, Bytes, BytesMut};

use crate::PACKET_SIZE;

/// First byte of every error packet.
pub const ERROR_MARKER: u8 = 0;

/// Error kinds the extension reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Enumerated field out of range
    Value,
    /// Client may not modify the object
    Access,
    /// Id already in use
    IdChoice,
    /// Request length mismatch
    Length,
    /// Request not implemented
    Implementation,
    /// Referenced counter or fence does not exist
    Counter,
}

impl ErrorCode {
    /// Wire value of the error code.
    pub fn code(self, error_base: u8) -> u8 {
        match self {
            Self::Value => 2,
            Self::Access => 10,
            Self::IdChoice => 14,
            Self::Length => 16,
            Self::Implementation => 17,
            Self::Counter => error_base,
        }
    }
}

/// A protocol error to be reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorReport {
    /// Error kind
    pub code: ErrorCode,
    /// Major opcode of the failing request
    pub major_opcode: u8,
    /// Minor opcode of the failing request
    pub minor_opcode: u16,
    /// Offending id or value
    pub bad_value: u32,
}

impl ErrorReport {
    /// Encode the error for the request with the given sequence number.
    pub fn encode(&self, error_base: u8, sequence: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_SIZE);
        buf.put_u8(ERROR_MARKER);
        buf.put_u8(self.code.code(error_base));
        buf.put_u16(sequence);
        buf.put_u32(self.bad_value);
        buf.put_u16(self.minor_opcode);
        buf.put_u8(self.major_opcode);
        buf.put_bytes(0, 21);
        buf.freeze()
    }
}
