//! Fuzz target for request body decoding
//!
//! # Strategy
//!
//! - Arbitrary minor opcodes, including unknown and unimplemented ones
//! - Arbitrary body bytes of any length
//!
//! # Invariants
//!
//! - NEVER panic on any opcode/body combination
//! - A decoded request reports the opcode it was decoded from
//! - Fixed-size requests only decode from bodies of their exact size
//! - Await decodes exactly one condition per 28 body bytes

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use synchro_proto::{DecodeError, Opcode, SyncRequest, WaitCondition};

#[derive(Debug, Arbitrary)]
struct Input {
    minor_opcode: u8,
    body: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let result = SyncRequest::decode(input.minor_opcode, &input.body);

    let request = match result {
        Ok(request) => request,
        Err(DecodeError::Unsupported(minor)) => {
            assert_eq!(minor, input.minor_opcode);
            if let Some(opcode) = Opcode::from_u8(minor) {
                assert!(opcode.is_unimplemented());
            }
            return;
        },
        Err(DecodeError::Length { actual, .. }) => {
            assert!(actual == input.body.len() || actual == WaitCondition::SIZE);
            return;
        },
        Err(DecodeError::Value { .. }) => return,
    };

    assert_eq!(request.opcode().to_u8(), input.minor_opcode);

    match request {
        SyncRequest::CreateCounter { .. }
        | SyncRequest::SetCounter { .. }
        | SyncRequest::ChangeCounter { .. } => assert_eq!(input.body.len(), 12),
        SyncRequest::CreateFence { .. } => assert_eq!(input.body.len(), 12),
        SyncRequest::QueryCounter { .. }
        | SyncRequest::DestroyCounter { .. }
        | SyncRequest::TriggerFence { .. }
        | SyncRequest::ResetFence { .. }
        | SyncRequest::DestroyFence { .. }
        | SyncRequest::QueryFence { .. } => assert_eq!(input.body.len(), 4),
        SyncRequest::Await(conditions) => {
            assert_eq!(conditions.len() * WaitCondition::SIZE, input.body.len());
        },
        SyncRequest::AwaitFence(ids) => {
            assert!(!ids.is_empty());
            assert_eq!(ids.len() * 4, input.body.len());
        },
        SyncRequest::Initialize { .. } => assert!(input.body.len() >= 2),
        SyncRequest::ListSystemCounters => {},
    }
});
