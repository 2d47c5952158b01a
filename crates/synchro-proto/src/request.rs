//! Request decoding.
//!
//! The outer server frames each request and hands the extension the minor
//! opcode and the bytes that follow the 4-byte request header. Decoding
//! validates the body length before reading any field; a request that
//! fails validation is discarded as a whole.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::big_endian::U32,
};

use crate::{int64::Int64, opcode::Opcode};

/// Errors produced while decoding a request body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Body size does not match the opcode's requirement.
    #[error("invalid length {actual} for {opcode:?}")]
    Length {
        /// Opcode being decoded
        opcode: Opcode,
        /// Body length in bytes
        actual: usize,
    },

    /// Opcode is unknown or not served by this implementation.
    #[error("unsupported minor opcode {0}")]
    Unsupported(u8),

    /// An enumerated field holds a value outside its range.
    #[error("invalid {field}: {value}")]
    Value {
        /// Name of the offending field
        field: &'static str,
        /// Raw value received
        value: u32,
    },
}

/// How a wait condition's wait value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// The wait value is the test value.
    Absolute,
    /// The test value is the counter value at first observation plus the wait value.
    Relative,
}

impl ValueType {
    fn from_wire(value: u32) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(Self::Absolute),
            1 => Ok(Self::Relative),
            _ => Err(DecodeError::Value { field: "value-type", value }),
        }
    }
}

/// Comparison applied between a counter and its test value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestType {
    /// Counter crosses the test value upward.
    PositiveTransition,
    /// Counter crosses the test value downward.
    NegativeTransition,
    /// Counter is at or above the test value.
    PositiveComparison,
    /// Counter is at or below the test value.
    NegativeComparison,
}

impl TestType {
    fn from_wire(value: u32) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(Self::PositiveTransition),
            1 => Ok(Self::NegativeTransition),
            2 => Ok(Self::PositiveComparison),
            3 => Ok(Self::NegativeComparison),
            _ => Err(DecodeError::Value { field: "test-type", value }),
        }
    }

    /// Whether the test looks for values at or above the test value.
    pub fn is_positive(self) -> bool {
        matches!(self, Self::PositiveTransition | Self::PositiveComparison)
    }
}

/// One condition of an `Await` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCondition {
    /// Counter being watched
    pub counter: u32,
    /// Interpretation of `wait_value`
    pub value_type: ValueType,
    /// Absolute or relative target
    pub wait_value: i64,
    /// Test applied against the target
    pub test_type: TestType,
    /// Minimum distance past the target, compared as unsigned
    pub event_threshold: i64,
}

impl WaitCondition {
    /// Size of one condition record on the wire.
    pub const SIZE: usize = 28;
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct WaitConditionWire {
    counter: U32,
    value_type: U32,
    wait_value: Int64,
    test_type: U32,
    event_threshold: Int64,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct IdBody {
    id: U32,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct CounterValueBody {
    id: U32,
    value: Int64,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct CreateFenceBody {
    drawable: U32,
    fence: U32,
    initially_triggered: u8,
    pad: [u8; 3],
}

const _: () = assert!(size_of::<WaitConditionWire>() == WaitCondition::SIZE);
const _: () = assert!(size_of::<CounterValueBody>() == 12);
const _: () = assert!(size_of::<CreateFenceBody>() == 12);

/// A decoded extension request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    /// Negotiate the extension version.
    Initialize {
        /// Client major version
        major: u8,
        /// Client minor version
        minor: u8,
    },
    /// Enumerate system counters.
    ListSystemCounters,
    /// Create a counter.
    CreateCounter {
        /// New counter id
        id: u32,
        /// Initial value
        initial: i64,
    },
    /// Overwrite a counter value.
    SetCounter {
        /// Counter id
        id: u32,
        /// New value
        value: i64,
    },
    /// Add to a counter value.
    ChangeCounter {
        /// Counter id
        id: u32,
        /// Amount added
        delta: i64,
    },
    /// Read a counter value.
    QueryCounter {
        /// Counter id
        id: u32,
    },
    /// Destroy a counter.
    DestroyCounter {
        /// Counter id
        id: u32,
    },
    /// Wait for any of the conditions to hold.
    Await(Vec<WaitCondition>),
    /// Create a fence.
    CreateFence {
        /// Drawable the fence belongs to (not enforced)
        drawable: u32,
        /// New fence id
        id: u32,
        /// Initial state
        initially_triggered: bool,
    },
    /// Trigger a fence.
    TriggerFence {
        /// Fence id
        id: u32,
    },
    /// Reset a fence.
    ResetFence {
        /// Fence id
        id: u32,
    },
    /// Destroy a fence.
    DestroyFence {
        /// Fence id
        id: u32,
    },
    /// Read a fence state.
    QueryFence {
        /// Fence id
        id: u32,
    },
    /// Wait for any of the fences to trigger.
    AwaitFence(Vec<u32>),
}

impl SyncRequest {
    /// Decode a request body for the given minor opcode.
    ///
    /// Length is checked before anything else, so a malformed request never
    /// yields a partially decoded value.
    pub fn decode(minor_opcode: u8, body: &[u8]) -> Result<Self, DecodeError> {
        let opcode = Opcode::from_u8(minor_opcode).ok_or(DecodeError::Unsupported(minor_opcode))?;
        let length_error = || DecodeError::Length { opcode, actual: body.len() };

        let request = match opcode {
            Opcode::Initialize => match body {
                [major, minor, ..] => Self::Initialize { major: *major, minor: *minor },
                _ => return Err(length_error()),
            },
            Opcode::ListSystemCounters => Self::ListSystemCounters,
            Opcode::CreateCounter => {
                let (id, initial) = counter_value(body).ok_or_else(length_error)?;
                Self::CreateCounter { id, initial }
            },
            Opcode::SetCounter => {
                let (id, value) = counter_value(body).ok_or_else(length_error)?;
                Self::SetCounter { id, value }
            },
            Opcode::ChangeCounter => {
                let (id, delta) = counter_value(body).ok_or_else(length_error)?;
                Self::ChangeCounter { id, delta }
            },
            Opcode::QueryCounter => Self::QueryCounter { id: id(body).ok_or_else(length_error)? },
            Opcode::DestroyCounter => {
                Self::DestroyCounter { id: id(body).ok_or_else(length_error)? }
            },
            Opcode::Await => {
                if body.len() % WaitCondition::SIZE != 0 {
                    return Err(length_error());
                }
                let conditions = body
                    .chunks_exact(WaitCondition::SIZE)
                    .map(wait_condition)
                    .collect::<Result<Vec<_>, _>>()?;
                Self::Await(conditions)
            },
            Opcode::CreateFence => {
                let fence = CreateFenceBody::read_from_bytes(body).map_err(|_| length_error())?;
                Self::CreateFence {
                    drawable: fence.drawable.get(),
                    id: fence.fence.get(),
                    initially_triggered: fence.initially_triggered != 0,
                }
            },
            Opcode::TriggerFence => Self::TriggerFence { id: id(body).ok_or_else(length_error)? },
            Opcode::ResetFence => Self::ResetFence { id: id(body).ok_or_else(length_error)? },
            Opcode::DestroyFence => Self::DestroyFence { id: id(body).ok_or_else(length_error)? },
            Opcode::QueryFence => Self::QueryFence { id: id(body).ok_or_else(length_error)? },
            Opcode::AwaitFence => {
                if body.is_empty() || body.len() % 4 != 0 {
                    return Err(length_error());
                }
                let ids = body
                    .chunks_exact(4)
                    .filter_map(|chunk| U32::read_from_bytes(chunk).ok())
                    .map(U32::get)
                    .collect();
                Self::AwaitFence(ids)
            },
            Opcode::CreateAlarm
            | Opcode::ChangeAlarm
            | Opcode::QueryAlarm
            | Opcode::DestroyAlarm
            | Opcode::SetPriority
            | Opcode::GetPriority => return Err(DecodeError::Unsupported(minor_opcode)),
        };

        Ok(request)
    }

    /// Minor opcode this request was decoded from.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Initialize { .. } => Opcode::Initialize,
            Self::ListSystemCounters => Opcode::ListSystemCounters,
            Self::CreateCounter { .. } => Opcode::CreateCounter,
            Self::SetCounter { .. } => Opcode::SetCounter,
            Self::ChangeCounter { .. } => Opcode::ChangeCounter,
            Self::QueryCounter { .. } => Opcode::QueryCounter,
            Self::DestroyCounter { .. } => Opcode::DestroyCounter,
            Self::Await(_) => Opcode::Await,
            Self::CreateFence { .. } => Opcode::CreateFence,
            Self::TriggerFence { .. } => Opcode::TriggerFence,
            Self::ResetFence { .. } => Opcode::ResetFence,
            Self::DestroyFence { .. } => Opcode::DestroyFence,
            Self::QueryFence { .. } => Opcode::QueryFence,
            Self::AwaitFence(_) => Opcode::AwaitFence,
        }
    }
}

fn id(body: &[u8]) -> Option<u32> {
    IdBody::read_from_bytes(body).ok().map(|b| b.id.get())
}

fn counter_value(body: &[u8]) -> Option<(u32, i64)> {
    CounterValueBody::read_from_bytes(body).ok().map(|b| (b.id.get(), b.value.get()))
}

fn wait_condition(chunk: &[u8]) -> Result<WaitCondition, DecodeError> {
    let wire = WaitConditionWire::read_from_bytes(chunk).map_err(|_| DecodeError::Length {
        opcode: Opcode::Await,
        actual: chunk.len(),
    })?;

    Ok(WaitCondition {
        counter: wire.counter.get(),
        value_type: ValueType::from_wire(wire.value_type.get())?,
        wait_value: wire.wait_value.get(),
        test_type: TestType::from_wire(wire.test_type.get())?,
        event_threshold: wire.event_threshold.get(),
    })
}

/// Encode a wait condition into its 28-byte wire record.
///
/// Used by clients and tests; the server only decodes.
pub fn encode_wait_condition(condition: &WaitCondition) -> [u8; WaitCondition::SIZE] {
    let value_type = match condition.value_type {
        ValueType::Absolute => 0,
        ValueType::Relative => 1,
    };
    let test_type = match condition.test_type {
        TestType::PositiveTransition => 0,
        TestType::NegativeTransition => 1,
        TestType::PositiveComparison => 2,
        TestType::NegativeComparison => 3,
    };
    let wire = WaitConditionWire {
        counter: U32::new(condition.counter),
        value_type: U32::new(value_type),
        wait_value: Int64::new(condition.wait_value),
        test_type: U32::new(test_type),
        event_threshold: Int64::new(condition.event_threshold),
    };

    let mut out = [0u8; WaitCondition::SIZE];
    out.copy_from_slice(wire.as_bytes());
    out
}
