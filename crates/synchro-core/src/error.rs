//! Extension error types.

use synchro_proto::{DecodeError, ErrorCode, ErrorReport};

use crate::{
    extension::RequestContext,
    object::{CounterId, FenceId},
};

/// Errors a request can fail with. Every variant is reported to the client
/// and none of them closes the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Request body could not be decoded.
    #[error("malformed request: {0}")]
    Decode(#[from] DecodeError),

    /// Counter does not exist.
    #[error("counter not found: {0:#x}")]
    CounterNotFound(CounterId),

    /// Fence does not exist.
    #[error("fence not found: {0:#x}")]
    FenceNotFound(FenceId),

    /// Client tried to modify a server-maintained counter.
    #[error("system counter {0:#x} is read-only")]
    ReadOnlyCounter(CounterId),

    /// Id already names an object of the same kind.
    #[error("id already in use: {0:#x}")]
    IdInUse(u32),
}

impl SyncError {
    /// Wire error for this failure.
    pub fn to_report(&self, ctx: RequestContext) -> ErrorReport {
        let (code, bad_value) = match self {
            Self::Decode(DecodeError::Length { .. }) => (ErrorCode::Length, 0),
            Self::Decode(DecodeError::Unsupported(_)) => (ErrorCode::Implementation, 0),
            Self::Decode(DecodeError::Value { value, .. }) => (ErrorCode::Value, *value),
            Self::CounterNotFound(id) | Self::FenceNotFound(id) => (ErrorCode::Counter, *id),
            Self::ReadOnlyCounter(id) => (ErrorCode::Access, *id),
            Self::IdInUse(id) => (ErrorCode::IdChoice, *id),
        };

        ErrorReport {
            code,
            major_opcode: ctx.major_opcode,
            minor_opcode: u16::from(ctx.minor_opcode),
            bad_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use synchro_proto::Opcode;

    use super::*;

    fn ctx() -> RequestContext {
        RequestContext { major_opcode: 130, minor_opcode: 5, sequence: 1 }
    }

    #[test]
    fn length_error_has_zero_value() {
        let err = SyncError::from(DecodeError::Length { opcode: Opcode::QueryCounter, actual: 8 });
        let report = err.to_report(ctx());
        assert_eq!(report.code, ErrorCode::Length);
        assert_eq!(report.bad_value, 0);
        assert_eq!(report.major_opcode, 130);
    }

    #[test]
    fn not_found_carries_id() {
        let report = SyncError::FenceNotFound(0x77).to_report(ctx());
        assert_eq!(report.code, ErrorCode::Counter);
        assert_eq!(report.bad_value, 0x77);
        assert_eq!(report.minor_opcode, 5);
    }

    #[test]
    fn read_only_maps_to_access() {
        let report = SyncError::ReadOnlyCounter(1).to_report(ctx());
        assert_eq!(report.code, ErrorCode::Access);
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::CounterNotFound(0x10).to_string(), "counter not found: 0x10");
    }
}
