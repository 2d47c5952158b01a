//! Minor opcodes of the SYNC extension.

/// Minor opcode carried in the data byte of every extension request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Version negotiation
    Initialize = 0,
    /// Enumerate system counters
    ListSystemCounters = 1,
    /// Create a client counter
    CreateCounter = 2,
    /// Overwrite a counter value
    SetCounter = 3,
    /// Add a delta to a counter value
    ChangeCounter = 4,
    /// Read a counter value
    QueryCounter = 5,
    /// Destroy a client counter
    DestroyCounter = 6,
    /// Block until a counter condition holds
    Await = 7,
    /// Create an alarm
    CreateAlarm = 8,
    /// Change alarm attributes
    ChangeAlarm = 9,
    /// Read alarm attributes
    QueryAlarm = 10,
    /// Destroy an alarm
    DestroyAlarm = 11,
    /// Set client scheduling priority
    SetPriority = 12,
    /// Get client scheduling priority
    GetPriority = 13,
    /// Create a fence
    CreateFence = 14,
    /// Put a fence into the triggered state
    TriggerFence = 15,
    /// Put a fence into the untriggered state
    ResetFence = 16,
    /// Destroy a fence
    DestroyFence = 17,
    /// Read the triggered state of a fence
    QueryFence = 18,
    /// Block until any listed fence is triggered
    AwaitFence = 19,
}

impl Opcode {
    /// Map a raw minor opcode to a known opcode.
    pub fn from_u8(value: u8) -> Option<Self> {
        let opcode = match value {
            0 => Self::Initialize,
            1 => Self::ListSystemCounters,
            2 => Self::CreateCounter,
            3 => Self::SetCounter,
            4 => Self::ChangeCounter,
            5 => Self::QueryCounter,
            6 => Self::DestroyCounter,
            7 => Self::Await,
            8 => Self::CreateAlarm,
            9 => Self::ChangeAlarm,
            10 => Self::QueryAlarm,
            11 => Self::DestroyAlarm,
            12 => Self::SetPriority,
            13 => Self::GetPriority,
            14 => Self::CreateFence,
            15 => Self::TriggerFence,
            16 => Self::ResetFence,
            17 => Self::DestroyFence,
            18 => Self::QueryFence,
            19 => Self::AwaitFence,
            _ => return None,
        };
        Some(opcode)
    }

    /// Raw minor opcode value.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether the request is recognized but intentionally not served.
    ///
    /// Alarms and client priorities are outside the extension's scope.
    pub fn is_unimplemented(self) -> bool {
        matches!(
            self,
            Self::CreateAlarm
                | Self::ChangeAlarm
                | Self::QueryAlarm
                | Self::DestroyAlarm
                | Self::SetPriority
                | Self::GetPriority
        )
    }
}
