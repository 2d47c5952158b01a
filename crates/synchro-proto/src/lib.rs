//! Synchro wire protocol.
//!
//! Byte-level codec for the SYNC extension of the display protocol. Every
//! packet the extension sends (reply, event, error) is a 32-byte aligned
//! big-endian message; requests arrive as a minor opcode plus a body whose
//! length has already been framed by the outer server.
//!
//! # Components
//!
//! - [`Opcode`]: minor opcodes understood by the extension
//! - [`Int64`]: the protocol's two-word 64-bit integer
//! - [`SyncRequest`]: length-validated request decoding
//! - [`Reply`], [`Event`], [`ErrorReport`]: outbound packet encoding
//!
//! This crate performs no I/O and holds no state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod event;
pub mod int64;
pub mod opcode;
pub mod reply;
pub mod request;

pub use error::{ErrorCode, ErrorReport};
pub use event::{AlarmNotify, AlarmState, CounterNotify, Event};
pub use int64::Int64;
pub use opcode::Opcode;
pub use reply::{Reply, SystemCounterInfo, list_reply_length, pad4};
pub use request::{
    DecodeError, SyncRequest, TestType, ValueType, WaitCondition, encode_wait_condition,
};

/// Size of every fixed-size reply, event and error packet.
pub const PACKET_SIZE: usize = 32;

/// Counter id reserved for the SERVERTIME system counter.
pub const SERVERTIME_ID: u32 = 1;

/// Name of the system counter tracking milliseconds since server reset.
pub const SERVERTIME_NAME: &str = "SERVERTIME";
