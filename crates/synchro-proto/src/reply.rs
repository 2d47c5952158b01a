//! Reply encoding.
//!
//! Every reply starts with the generic 8-byte header: the reply marker, the
//! minor opcode, the request sequence number and the number of 4-byte
//! units that follow the fixed 32-byte packet. Fixed-size replies pad their
//! fields out to 32 bytes; the system counter list appends a variable body
//! padded to a multiple of 32 bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{PACKET_SIZE, int64::put_int64, opcode::Opcode};

/// First byte of every reply packet.
pub const REPLY_MARKER: u8 = 1;

/// One entry of the system counter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemCounterInfo {
    /// Counter id
    pub id: u32,
    /// Counter value at the time of listing
    pub value: i64,
    /// Counter name
    pub name: Bytes,
}

impl SystemCounterInfo {
    fn name_len(&self) -> usize {
        self.name.len().min(usize::from(u16::MAX))
    }

    /// Encoded size of this entry including its trailing pad.
    pub fn encoded_len(&self) -> usize {
        let name_len = self.name_len();
        4 + 8 + 2 + name_len + pad4(name_len + 2)
    }
}

/// A successful reply to an extension request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Negotiated extension version.
    Initialize {
        /// Major version
        major: u8,
        /// Minor version
        minor: u8,
    },
    /// All system counters.
    ListSystemCounters(Vec<SystemCounterInfo>),
    /// Final value of a destroyed counter.
    DestroyCounter {
        /// Value at destruction
        value: i64,
    },
    /// Current value of a counter.
    QueryCounter {
        /// Current value
        value: i64,
    },
    /// Current state of a fence.
    QueryFence {
        /// Whether the fence is triggered
        triggered: bool,
    },
}

impl Reply {
    /// Minor opcode of the request this reply answers.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Initialize { .. } => Opcode::Initialize,
            Self::ListSystemCounters(_) => Opcode::ListSystemCounters,
            Self::DestroyCounter { .. } => Opcode::DestroyCounter,
            Self::QueryCounter { .. } => Opcode::QueryCounter,
            Self::QueryFence { .. } => Opcode::QueryFence,
        }
    }

    /// Encode the reply for the request with the given sequence number.
    pub fn encode(&self, sequence: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_SIZE);

        match self {
            Self::Initialize { major, minor } => {
                put_header(&mut buf, self.opcode(), sequence, 0);
                buf.put_u8(*major);
                buf.put_u8(*minor);
                buf.put_bytes(0, 22);
            },
            Self::ListSystemCounters(counters) => {
                let body_len: usize = counters.iter().map(SystemCounterInfo::encoded_len).sum();
                let length = list_reply_length(body_len);
                put_header(&mut buf, self.opcode(), sequence, length);
                buf.put_u32(u32::try_from(counters.len()).unwrap_or(u32::MAX));
                buf.put_bytes(0, 20);

                for counter in counters {
                    let name_len = counter.name_len();
                    buf.put_u32(counter.id);
                    put_int64(&mut buf, counter.value);
                    buf.put_u16(u16::try_from(name_len).unwrap_or(u16::MAX));
                    buf.put_slice(&counter.name[..name_len]);
                    buf.put_bytes(0, pad4(name_len + 2));
                }
                buf.put_bytes(0, pad32(body_len));
            },
            Self::DestroyCounter { value } | Self::QueryCounter { value } => {
                put_header(&mut buf, self.opcode(), sequence, 0);
                put_int64(&mut buf, *value);
                buf.put_bytes(0, 16);
            },
            Self::QueryFence { triggered } => {
                put_header(&mut buf, self.opcode(), sequence, 0);
                buf.put_u8(u8::from(*triggered));
                buf.put_bytes(0, 23);
            },
        }

        buf.freeze()
    }
}

fn put_header(buf: &mut BytesMut, opcode: Opcode, sequence: u16, length: u32) {
    buf.put_u8(REPLY_MARKER);
    buf.put_u8(opcode.to_u8());
    buf.put_u16(sequence);
    buf.put_u32(length);
}

/// Bytes needed to round `len` up to a multiple of 4.
pub fn pad4(len: usize) -> usize {
    (4 - len % 4) % 4
}

fn pad32(len: usize) -> usize {
    (PACKET_SIZE - len % PACKET_SIZE) % PACKET_SIZE
}

/// Reply length field for a list body of `body_len` bytes.
///
/// The body is padded to a multiple of 32 bytes and the length is expressed
/// in 4-byte units.
pub fn list_reply_length(body_len: usize) -> u32 {
    let padded = body_len + pad32(body_len);
    u32::try_from(padded / 4).unwrap_or(u32::MAX)
}
