//! Environment abstraction for the server clock.
//!
//! The `Environment` trait decouples the extension from system time. The
//! SERVERTIME counter, event timestamps and deadline-driven awaits all read
//! time through it, so tests can substitute their own clock.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - The reset epoch never moves forward past `now()`

use std::time::{Duration, Instant};

/// Abstract environment providing the server clock and async sleeping.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: Subsequent calls must return times >= previous calls.
    fn now(&self) -> Instant;

    /// Instant of the last server reset.
    ///
    /// Supplied by the outer server; SERVERTIME counts from here.
    fn reset_epoch(&self) -> Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only the await engine sleeps, and only for conditions on
    /// clock-driven counters.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Milliseconds elapsed since the last server reset.
    fn server_time_ms(&self) -> i64 {
        let elapsed = self.now().saturating_duration_since(self.reset_epoch());
        i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
    }

    /// Event timestamp: server time truncated to 32 bits.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn timestamp(&self) -> u32 {
        self.server_time_ms() as u32
    }
}
