//! Request framing.
//!
//! Every request starts with a 4-byte header: major opcode, minor opcode
//! and the total request length in 4-byte units, header included. The body
//! that follows is handed to the extension untouched.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, byteorder::big_endian::U16,
};

use crate::error::ServerError;

/// Fixed request header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct RequestHeader {
    /// Major opcode selecting the extension
    pub major_opcode: u8,
    /// Minor opcode selecting the request
    pub minor_opcode: u8,
    /// Request length in 4-byte units, header included
    pub length: U16,
}

impl RequestHeader {
    /// Size of the header on the wire.
    pub const SIZE: usize = 4;

    /// Create a header for a request with a `body_len`-byte body.
    ///
    /// Returns `None` if the body is not a multiple of 4 bytes or too long
    /// to express.
    pub fn new(major_opcode: u8, minor_opcode: u8, body_len: usize) -> Option<Self> {
        if body_len % 4 != 0 {
            return None;
        }
        let units = u16::try_from(body_len / 4 + 1).ok()?;
        Some(Self { major_opcode, minor_opcode, length: U16::new(units) })
    }

    /// Number of body bytes following the header.
    ///
    /// A zero length field cannot frame a request and yields `None`.
    pub fn body_len(&self) -> Option<usize> {
        usize::from(self.length.get()).checked_sub(1).map(|units| units * 4)
    }
}

/// One framed request read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Header and complete body.
    Request {
        /// Major opcode
        major_opcode: u8,
        /// Minor opcode
        minor_opcode: u8,
        /// Bytes after the header
        body: Bytes,
    },
    /// Request whose body exceeded the size limit and was discarded.
    Oversized {
        /// Major opcode
        major_opcode: u8,
        /// Minor opcode
        minor_opcode: u8,
        /// Declared body length
        body_len: usize,
    },
}

/// Read the next request from `reader`.
///
/// Returns `Ok(None)` on a clean end of stream between requests. Bodies
/// longer than `max_body_bytes` are drained and reported as
/// [`Inbound::Oversized`] so the stream stays in sync.
pub async fn read_request<R>(
    reader: &mut R,
    max_body_bytes: usize,
) -> Result<Option<Inbound>, ServerError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; RequestHeader::SIZE];
    match reader.read_exact(&mut raw).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let header = RequestHeader::read_from_bytes(&raw[..])
        .map_err(|_| ServerError::Framing("short request header".to_string()))?;
    let body_len = header
        .body_len()
        .ok_or_else(|| ServerError::Framing("zero request length".to_string()))?;

    if body_len > max_body_bytes {
        let drained =
            tokio::io::copy(&mut (&mut *reader).take(body_len as u64), &mut tokio::io::sink())
                .await?;
        if drained != body_len as u64 {
            return Err(ServerError::Framing("truncated request body".to_string()));
        }

        return Ok(Some(Inbound::Oversized {
            major_opcode: header.major_opcode,
            minor_opcode: header.minor_opcode,
            body_len,
        }));
    }

    let mut body = BytesMut::zeroed(body_len);
    reader.read_exact(&mut body).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            ServerError::Framing("truncated request body".to_string())
        },
        _ => e.into(),
    })?;

    Ok(Some(Inbound::Request {
        major_opcode: header.major_opcode,
        minor_opcode: header.minor_opcode,
        body: body.freeze(),
    }))
}
