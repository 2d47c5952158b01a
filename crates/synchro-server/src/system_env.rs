//! Production Environment implementation using system time.
//!
//! `SystemEnv` records the server reset as the instant it was created, so
//! SERVERTIME counts milliseconds of server uptime.

use std::time::{Duration, Instant};

use synchro_core::Environment;

/// Production environment using system time.
///
/// This implementation:
/// - Uses `std::time::Instant::now()` for time
/// - Uses `tokio::time::sleep()` for async sleeping
#[derive(Debug, Clone, Copy)]
pub struct SystemEnv {
    epoch: Instant,
}

impl SystemEnv {
    /// Create an environment whose reset epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    /// Create an environment with an explicit reset epoch.
    #[must_use]
    pub fn with_epoch(epoch: Instant) -> Self {
        Self { epoch }
    }
}

impl Default for SystemEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn reset_epoch(&self) -> Instant {
        self.epoch
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
