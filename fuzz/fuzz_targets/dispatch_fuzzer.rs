//! Fuzz target for the request dispatcher
//!
//! # Strategy
//!
//! - Request sequences: arbitrary opcodes and bodies over a small id space
//!   so creates, mutations and destroys collide
//! - Awaits are polled once; a request that would block is dropped, which
//!   exercises waiter deregistration
//!
//! # Invariants
//!
//! - NEVER panic on any request sequence
//! - Every response encodes to a multiple of 32 bytes
//! - SERVERTIME is never destroyed
//! - No waiter outlives the request that registered it

#![no_main]

use std::{sync::Arc, time::Duration};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use synchro_core::{
    ClientState, Environment, ExtensionConfig, RequestContext, SyncExtension,
};
use synchro_proto::SERVERTIME_ID;

#[derive(Clone)]
struct FuzzEnv {
    epoch: std::time::Instant,
}

impl Environment for FuzzEnv {
    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }

    fn reset_epoch(&self) -> std::time::Instant {
        self.epoch
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[derive(Debug, Arbitrary)]
struct FuzzRequest {
    minor_opcode: u8,
    id: u8,
    body: Vec<u8>,
}

impl FuzzRequest {
    /// Body with the first word replaced by a small id, when long enough.
    fn body(&self) -> Vec<u8> {
        let mut body = self.body.clone();
        if body.len() >= 4 {
            body[..4].copy_from_slice(&u32::from(self.id % 8).to_be_bytes());
        }
        body
    }
}

fuzz_target!(|requests: Vec<FuzzRequest>| {
    let Ok(runtime) = tokio::runtime::Builder::new_current_thread().enable_time().build() else {
        return;
    };
    let config = ExtensionConfig::default();
    let ext = Arc::new(SyncExtension::initialize(
        FuzzEnv { epoch: std::time::Instant::now() },
        config,
    ));
    let mut client = ClientState::new();

    for (sequence, request) in (0u16..).zip(requests.iter().take(256)) {
        let ctx = RequestContext {
            major_opcode: config.major_opcode,
            minor_opcode: request.minor_opcode % 24,
            sequence,
        };
        let body = request.body();

        let response = runtime.block_on(async {
            tokio::time::timeout(Duration::ZERO, ext.dispatch(&mut client, ctx, &body)).await
        });

        if let Ok(Some(response)) = response {
            let bytes = response.encode(&config, sequence);
            assert_eq!(bytes.len() % 32, 0);
        }

        assert!(ext.counters().contains(&SERVERTIME_ID));
        assert_eq!(ext.counters().waiter_count(), 0);
        assert_eq!(ext.fences().waiter_count(), 0);
    }
});
