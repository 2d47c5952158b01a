//! Await engine.
//!
//! Evaluates the conditions of an `Await` or `AwaitFence` request until one
//! resolves. Between evaluations the calling connection sleeps on a
//! registry subscription covering every id the request references, so only
//! mutations of those ids (or a clock deadline) cause re-evaluation.
//!
//! # Invariants
//!
//! - The subscription is registered before the first evaluation; no
//!   mutation can slip between evaluation and suspension unnoticed.
//! - Conditions are evaluated in the order supplied and the first one that
//!   resolves ends the request.
//! - An id missing on first observation is an error; an id missing (or
//!   replaced) after it was observed counts as destroyed.
//! - No registry lock is held across an await point.

use std::time::Duration;

use synchro_proto::{CounterNotify, TestType, ValueType, WaitCondition};

use crate::{
    env::Environment,
    extension::SyncExtension,
    object::{Counter, CounterId, FenceId, SyncObject},
    registry::Snapshot,
};

/// Result of a counter await.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterAwait {
    /// A condition was satisfied or its counter destroyed.
    Notify(CounterNotify),
    /// A referenced counter did not exist when first evaluated.
    NotFound(CounterId),
}

/// Result of a fence await.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceAwait {
    /// A fence was triggered or destroyed.
    Resolved,
    /// A referenced fence did not exist when first evaluated.
    NotFound(FenceId),
}

/// Whether `value` satisfies a test against `test_value`.
///
/// The distance from the test value is compared against the threshold as
/// an unsigned 64-bit quantity, so a negative distance reads as a very
/// large one.
#[allow(clippy::cast_sign_loss)]
pub fn is_satisfied(test_type: TestType, value: i64, test_value: i64, threshold: i64) -> bool {
    let diff = value.wrapping_sub(test_value) as u64;
    let threshold = threshold as u64;

    if test_type.is_positive() {
        value >= test_value && diff >= threshold
    } else {
        value <= test_value && diff <= threshold
    }
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    generation: u64,
    value: i64,
}

enum Verdict {
    Satisfied { value: i64 },
    Destroyed { last_value: i64 },
    NotFound,
    Pending,
}

struct ConditionState {
    condition: WaitCondition,
    test_value: Option<i64>,
    observed: Option<Observation>,
}

impl ConditionState {
    fn new(condition: WaitCondition) -> Self {
        Self { condition, test_value: None, observed: None }
    }

    fn evaluate(&mut self, current: Option<&Snapshot<Counter>>) -> Verdict {
        let snapshot = match (current, self.observed) {
            (None, None) => return Verdict::NotFound,
            (None, Some(seen)) => return Verdict::Destroyed { last_value: seen.value },
            (Some(snapshot), Some(seen)) if snapshot.generation != seen.generation => {
                return Verdict::Destroyed { last_value: seen.value };
            },
            (Some(snapshot), _) => snapshot,
        };

        let value = snapshot.object.value();
        let condition = &self.condition;
        let test_value = *self.test_value.get_or_insert_with(|| match condition.value_type {
            ValueType::Absolute => condition.wait_value,
            ValueType::Relative => value.wrapping_add(condition.wait_value),
        });
        self.observed = Some(Observation { generation: snapshot.generation, value });

        if is_satisfied(condition.test_type, value, test_value, condition.event_threshold) {
            Verdict::Satisfied { value }
        } else {
            Verdict::Pending
        }
    }

    /// Time until a clock-driven counter satisfies this condition on its own.
    ///
    /// System counters advance one unit per millisecond. A positive test
    /// holds once the counter reaches the test value plus the threshold. A
    /// negative test below its test value holds at the latest when the
    /// counter reaches the test value itself.
    #[allow(clippy::cast_sign_loss)]
    fn clock_deadline(&self) -> Option<Duration> {
        let test_value = self.test_value?;
        let value = self.observed?.value;

        let target = if self.condition.test_type.is_positive() {
            let threshold = i64::try_from(self.condition.event_threshold as u64).ok()?;
            test_value.checked_add(threshold)?
        } else if value < test_value {
            test_value
        } else {
            return None;
        };
        let remaining = u64::try_from(target.checked_sub(value)?).ok()?;
        Some(Duration::from_millis(remaining.max(1)))
    }
}

impl<E: Environment> SyncExtension<E> {
    /// Block until one of `conditions` resolves.
    ///
    /// `conditions` must not be empty.
    pub(crate) async fn await_counters(&self, conditions: &[WaitCondition]) -> CounterAwait {
        let subscription = self.counters.subscribe(conditions.iter().map(|c| c.counter));
        let mut states: Vec<ConditionState> =
            conditions.iter().copied().map(ConditionState::new).collect();

        loop {
            self.refresh_system_counters();
            let mut wake_after: Option<Duration> = None;

            for state in &mut states {
                let counter = state.condition.counter;
                let current = self.counters.lookup(&counter);
                let clock_driven = current.as_ref().is_some_and(|s| s.object.is_system());

                match state.evaluate(current.as_ref()) {
                    Verdict::Satisfied { value } => {
                        tracing::trace!(counter, value, "await condition satisfied");
                        return CounterAwait::Notify(self.counter_notify(state, value, false));
                    },
                    Verdict::Destroyed { last_value } => {
                        tracing::trace!(counter, "awaited counter destroyed");
                        return CounterAwait::Notify(self.counter_notify(state, last_value, true));
                    },
                    Verdict::NotFound => return CounterAwait::NotFound(counter),
                    Verdict::Pending => {
                        if clock_driven {
                            if let Some(deadline) = state.clock_deadline() {
                                wake_after = Some(wake_after.map_or(deadline, |d| d.min(deadline)));
                            }
                        }
                    },
                }
            }

            tracing::trace!(conditions = states.len(), ?wake_after, "await pending");

            match wake_after {
                Some(duration) => {
                    tokio::select! {
                        () = subscription.changed() => {},
                        () = self.env.sleep(duration) => {},
                    }
                },
                None => subscription.changed().await,
            }
        }
    }

    fn counter_notify(&self, state: &ConditionState, value: i64, destroyed: bool) -> CounterNotify {
        CounterNotify {
            counter: state.condition.counter,
            wait_value: state.test_value.unwrap_or(state.condition.wait_value),
            counter_value: value,
            timestamp: self.env.timestamp(),
            count: 0,
            destroyed,
        }
    }

    /// Block until one of `ids` is triggered or destroyed.
    pub(crate) async fn await_fences(&self, ids: &[FenceId]) -> FenceAwait {
        let subscription = self.fences.subscribe(ids.iter().copied());
        let mut observed: Vec<Option<u64>> = vec![None; ids.len()];

        loop {
            self.refresh_system_counters();

            for (id, seen) in ids.iter().zip(observed.iter_mut()) {
                match (self.fences.lookup(id), *seen) {
                    (None, None) => return FenceAwait::NotFound(*id),
                    (None, Some(_)) => {
                        tracing::trace!(fence = id, "awaited fence destroyed");
                        return FenceAwait::Resolved;
                    },
                    (Some(snapshot), Some(generation)) if snapshot.generation != generation => {
                        tracing::trace!(fence = id, "awaited fence replaced");
                        return FenceAwait::Resolved;
                    },
                    (Some(snapshot), _) => {
                        if snapshot.object.is_triggered() {
                            tracing::trace!(fence = id, "awaited fence triggered");
                            return FenceAwait::Resolved;
                        }
                        *seen = Some(snapshot.generation);
                    },
                }
            }

            tracing::trace!(fences = ids.len(), "fence await pending");
            subscription.changed().await;
        }
    }
}
