//! SYNC extension core.
//!
//! Server-side state and request handling for the X SYNC extension,
//! independent of any transport. The host feeds decoded request headers and
//! raw bodies into [`SyncExtension::dispatch`] and writes whatever response
//! comes back.
//!
//! ## Architecture
//!
//! ```text
//! synchro-core
//!   ├─ SyncExtension     (dispatcher, owns the registries)
//!   ├─ Registry          (keyed store with per-key waiters)
//!   ├─ wait              (Await / AwaitFence evaluation)
//!   ├─ Counter, Fence    (synchronizable objects)
//!   └─ Environment       (server clock, injected by the host)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod env;
pub mod error;
pub mod extension;
pub mod object;
pub mod registry;
pub mod wait;

pub use config::ExtensionConfig;
pub use env::Environment;
pub use error::SyncError;
pub use extension::{ClientState, RequestContext, SyncExtension, SyncResponse};
pub use object::{
    Alarm, AlarmId, AlarmTrigger, Counter, CounterId, CounterOrigin, Fence, FenceId, SyncObject,
    SystemCounter, SystemCounterSource,
};
pub use registry::{Registry, RegistryError, Snapshot, Subscription};
pub use wait::{CounterAwait, FenceAwait, is_satisfied};
