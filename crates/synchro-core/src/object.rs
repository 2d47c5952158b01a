//! Synchronizable objects.
//!
//! Counters, fences and alarms live in separate registries with
//! independent id spaces. They share only the [`SyncObject`] view: an id and
//! a 64-bit value.

use bytes::Bytes;
use synchro_proto::{AlarmState, TestType, ValueType};

use crate::env::Environment;

/// Counter identifier.
pub type CounterId = u32;

/// Fence identifier.
pub type FenceId = u32;

/// Alarm identifier.
pub type AlarmId = u32;

/// Common view of every synchronizable object.
pub trait SyncObject {
    /// Protocol id of the object.
    fn id(&self) -> u32;

    /// Current value. Fences report `1` when triggered and `0` otherwise.
    fn value(&self) -> i64;
}

/// Who maintains a counter's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterOrigin {
    /// Created by a client; clients may set and change it.
    Client,
    /// Maintained by the server; read-only to clients.
    System {
        /// Counter name, never empty
        name: Bytes,
    },
}

/// A 64-bit counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    id: CounterId,
    value: i64,
    origin: CounterOrigin,
}

impl Counter {
    /// Create a client counter.
    pub fn new(id: CounterId, value: i64) -> Self {
        Self { id, value, origin: CounterOrigin::Client }
    }

    /// Create a server-maintained counter.
    pub fn system(id: CounterId, value: i64, name: Bytes) -> Self {
        Self { id, value, origin: CounterOrigin::System { name } }
    }

    /// Whether the server maintains this counter.
    pub fn is_system(&self) -> bool {
        matches!(self.origin, CounterOrigin::System { .. })
    }

    /// Name of a system counter.
    pub fn name(&self) -> Option<&Bytes> {
        match &self.origin {
            CounterOrigin::System { name } => Some(name),
            CounterOrigin::Client => None,
        }
    }

    /// Origin of the counter.
    pub fn origin(&self) -> &CounterOrigin {
        &self.origin
    }

    /// Overwrite the value.
    pub fn set(&mut self, value: i64) {
        self.value = value;
    }

    /// Add `delta` to the value, wrapping on overflow.
    pub fn change(&mut self, delta: i64) {
        self.value = self.value.wrapping_add(delta);
    }
}

impl SyncObject for Counter {
    fn id(&self) -> u32 {
        self.id
    }

    fn value(&self) -> i64 {
        self.value
    }
}

/// A binary completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fence {
    id: FenceId,
    triggered: bool,
}

impl Fence {
    /// Create a fence in the given state.
    pub fn new(id: FenceId, triggered: bool) -> Self {
        Self { id, triggered }
    }

    /// Whether the fence is triggered.
    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Put the fence into the triggered state.
    pub fn trigger(&mut self) {
        self.triggered = true;
    }

    /// Put the fence into the untriggered state.
    pub fn reset(&mut self) {
        self.triggered = false;
    }
}

impl SyncObject for Fence {
    fn id(&self) -> u32 {
        self.id
    }

    fn value(&self) -> i64 {
        i64::from(self.triggered)
    }
}

/// Where a system counter's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCounterSource {
    /// Milliseconds since the last server reset.
    ServerTime,
}

impl SystemCounterSource {
    /// Current value of the source.
    pub fn sample<E: Environment>(self, env: &E) -> i64 {
        match self {
            Self::ServerTime => env.server_time_ms(),
        }
    }
}

/// Registration record of a server-maintained counter.
///
/// The value itself lives in the counter registry under `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemCounter {
    /// Counter id in the counter registry
    pub id: CounterId,
    /// Counter name
    pub name: Bytes,
    /// Granularity of the underlying source, in counter units
    pub resolution: i64,
    /// Value source
    pub source: SystemCounterSource,
}

/// Condition an alarm watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmTrigger {
    /// Counter being watched
    pub counter: CounterId,
    /// Interpretation of `wait_value`
    pub value_type: ValueType,
    /// Target value
    pub wait_value: i64,
    /// Test applied against the target
    pub test_type: TestType,
}

/// Alarm bookkeeping record.
///
/// Alarms are stored but never armed; no request creates or fires them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alarm {
    /// Alarm id
    pub id: AlarmId,
    /// Watched condition
    pub trigger: AlarmTrigger,
    /// Amount added to the wait value each time the alarm fires
    pub delta: i64,
    /// Whether the owning client wants AlarmNotify events
    pub events: bool,
    /// Current alarm state
    pub state: AlarmState,
}

impl SyncObject for Alarm {
    fn id(&self) -> u32 {
        self.id
    }

    fn value(&self) -> i64 {
        self.trigger.wait_value
    }
}
