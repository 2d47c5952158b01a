//! Request dispatcher.
//!
//! [`SyncExtension`] owns the four registries and serves one request at a
//! time per connection. `dispatch` is the only entry point: it refreshes the
//! system counters, validates and decodes the body, applies the request and
//! returns at most one response for the host to send.
//!
//! ## Design
//!
//! - Explicit instance: created once by `initialize` and shared behind an
//!   `Arc`; there is no process-wide state.
//! - Replyless requests return `None` on success.
//! - The two await requests suspend the calling connection inside
//!   `dispatch` without holding any registry lock.

use bytes::Bytes;
use synchro_proto::{
    ErrorReport, Event, Reply, SERVERTIME_ID, SERVERTIME_NAME, SyncRequest, SystemCounterInfo,
};

use crate::{
    config::ExtensionConfig,
    env::Environment,
    error::SyncError,
    object::{
        Alarm, AlarmId, Counter, CounterId, Fence, FenceId, SyncObject, SystemCounter,
        SystemCounterSource,
    },
    registry::Registry,
    wait::{CounterAwait, FenceAwait},
};

/// Identifies the request being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    /// Major opcode the request arrived with
    pub major_opcode: u8,
    /// Minor opcode selecting the extension request
    pub minor_opcode: u8,
    /// Sequence number assigned by the outer server
    pub sequence: u16,
}

/// Per-connection extension state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientState {
    version: Option<(u8, u8)>,
}

impl ClientState {
    /// Create state for a new connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Version recorded by the last `Initialize` request.
    pub fn negotiated_version(&self) -> Option<(u8, u8)> {
        self.version
    }
}

/// Output of a dispatched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResponse {
    /// Reply to the request
    Reply(Reply),
    /// Event generated by the request
    Event(Event),
    /// Error report for the request
    Error(ErrorReport),
}

impl SyncResponse {
    /// Encode for the connection, using the request's sequence number.
    pub fn encode(&self, config: &ExtensionConfig, sequence: u16) -> Bytes {
        match self {
            Self::Reply(reply) => reply.encode(sequence),
            Self::Event(event) => event.encode(config.event_base, sequence),
            Self::Error(report) => report.encode(config.error_base, sequence),
        }
    }
}

/// The SYNC extension.
pub struct SyncExtension<E: Environment> {
    pub(crate) env: E,
    config: ExtensionConfig,
    pub(crate) counters: Registry<CounterId, Counter>,
    system_counters: Registry<Bytes, SystemCounter>,
    pub(crate) fences: Registry<FenceId, Fence>,
    alarms: Registry<AlarmId, Alarm>,
}

impl<E: Environment> SyncExtension<E> {
    /// Create the extension and install its system counters.
    ///
    /// Must run once at server start, before any request is dispatched.
    pub fn initialize(env: E, config: ExtensionConfig) -> Self {
        let extension = Self {
            env,
            config,
            counters: Registry::new("counters"),
            system_counters: Registry::new("system counters"),
            fences: Registry::new("fences"),
            alarms: Registry::new("alarms"),
        };

        let servertime = SystemCounter {
            id: SERVERTIME_ID,
            name: Bytes::from_static(SERVERTIME_NAME.as_bytes()),
            resolution: 1,
            source: SystemCounterSource::ServerTime,
        };
        extension.install_system_counter(servertime);

        tracing::debug!(
            major_opcode = config.major_opcode,
            event_base = config.event_base,
            error_base = config.error_base,
            "sync extension initialized"
        );

        extension
    }

    fn install_system_counter(&self, counter: SystemCounter) {
        let value = counter.source.sample(&self.env);
        let registered = self
            .counters
            .create(counter.id, Counter::system(counter.id, value, counter.name.clone()))
            .and_then(|_| self.system_counters.create(counter.name.clone(), counter));

        if let Err(e) = registered {
            tracing::error!("Failed to install system counter: {}", e);
        }
    }

    /// Configuration the extension was created with.
    pub fn config(&self) -> &ExtensionConfig {
        &self.config
    }

    /// Clock used for SERVERTIME and event timestamps.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// All counters, system counters included.
    pub fn counters(&self) -> &Registry<CounterId, Counter> {
        &self.counters
    }

    /// System counter registrations, keyed by name.
    pub fn system_counters(&self) -> &Registry<Bytes, SystemCounter> {
        &self.system_counters
    }

    /// All fences.
    pub fn fences(&self) -> &Registry<FenceId, Fence> {
        &self.fences
    }

    /// Alarm bookkeeping.
    pub fn alarms(&self) -> &Registry<AlarmId, Alarm> {
        &self.alarms
    }

    /// Re-sample every system counter from its source.
    ///
    /// Runs before each request and on every await evaluation.
    pub fn refresh_system_counters(&self) {
        for system in self.system_counters.snapshot() {
            let value = system.source.sample(&self.env);
            self.counters.refresh(&system.id, |counter| counter.set(value));
        }
    }

    /// Process one extension request.
    ///
    /// `body` holds the bytes following the 4-byte request header. The
    /// returned response, if any, is the single message the client gets for
    /// this request.
    pub async fn dispatch(
        &self,
        client: &mut ClientState,
        ctx: RequestContext,
        body: &[u8],
    ) -> Option<SyncResponse> {
        self.refresh_system_counters();

        let request = match SyncRequest::decode(ctx.minor_opcode, body) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(
                    minor_opcode = ctx.minor_opcode,
                    sequence = ctx.sequence,
                    "rejecting request: {}",
                    e
                );
                return Some(SyncResponse::Error(SyncError::from(e).to_report(ctx)));
            },
        };

        tracing::debug!(sequence = ctx.sequence, "dispatching {:?}", request.opcode());

        match self.handle(client, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(sequence = ctx.sequence, "request failed: {}", e);
                Some(SyncResponse::Error(e.to_report(ctx)))
            },
        }
    }

    async fn handle(
        &self,
        client: &mut ClientState,
        request: SyncRequest,
    ) -> Result<Option<SyncResponse>, SyncError> {
        let response = match request {
            SyncRequest::Initialize { major, minor } => {
                client.version = Some((major, minor));
                Some(SyncResponse::Reply(Reply::Initialize { major, minor }))
            },
            SyncRequest::ListSystemCounters => {
                Some(SyncResponse::Reply(Reply::ListSystemCounters(self.list_system_counters())))
            },
            SyncRequest::CreateCounter { id, initial } => {
                self.create_counter(id, initial)?;
                None
            },
            SyncRequest::SetCounter { id, value } => {
                self.update_counter(id, |counter| counter.set(value))?;
                None
            },
            SyncRequest::ChangeCounter { id, delta } => {
                self.update_counter(id, |counter| counter.change(delta))?;
                None
            },
            SyncRequest::QueryCounter { id } => {
                let value = self.query_counter(id)?;
                Some(SyncResponse::Reply(Reply::QueryCounter { value }))
            },
            SyncRequest::DestroyCounter { id } => {
                let value = self.destroy_counter(id)?;
                Some(SyncResponse::Reply(Reply::DestroyCounter { value }))
            },
            SyncRequest::Await(conditions) => {
                if conditions.is_empty() {
                    return Ok(None);
                }
                match self.await_counters(&conditions).await {
                    CounterAwait::Notify(notify) => {
                        Some(SyncResponse::Event(Event::CounterNotify(notify)))
                    },
                    CounterAwait::NotFound(id) => return Err(SyncError::CounterNotFound(id)),
                }
            },
            SyncRequest::CreateFence { drawable, id, initially_triggered } => {
                tracing::trace!(drawable, fence = id, "creating fence");
                self.fences
                    .create(id, Fence::new(id, initially_triggered))
                    .map_err(|_| SyncError::IdInUse(id))?;
                None
            },
            SyncRequest::TriggerFence { id } => {
                self.fences.mutate(&id, Fence::trigger).ok_or(SyncError::FenceNotFound(id))?;
                None
            },
            SyncRequest::ResetFence { id } => {
                self.fences.mutate(&id, Fence::reset).ok_or(SyncError::FenceNotFound(id))?;
                None
            },
            SyncRequest::DestroyFence { id } => {
                self.fences.remove(&id).ok_or(SyncError::FenceNotFound(id))?;
                None
            },
            SyncRequest::QueryFence { id } => {
                let fence = self.fences.lookup(&id).ok_or(SyncError::FenceNotFound(id))?;
                Some(SyncResponse::Reply(Reply::QueryFence {
                    triggered: fence.object.is_triggered(),
                }))
            },
            SyncRequest::AwaitFence(ids) => match self.await_fences(&ids).await {
                FenceAwait::Resolved => None,
                FenceAwait::NotFound(id) => return Err(SyncError::FenceNotFound(id)),
            },
        };

        Ok(response)
    }

    fn list_system_counters(&self) -> Vec<SystemCounterInfo> {
        let mut systems = self.system_counters.snapshot();
        systems.sort_by_key(|system| system.id);

        systems
            .into_iter()
            .filter_map(|system| {
                let counter = self.counters.lookup(&system.id)?;
                Some(SystemCounterInfo {
                    id: system.id,
                    value: counter.object.value(),
                    name: system.name,
                })
            })
            .collect()
    }

    fn create_counter(&self, id: CounterId, initial: i64) -> Result<(), SyncError> {
        self.counters.create(id, Counter::new(id, initial)).map_err(|_| SyncError::IdInUse(id))?;
        Ok(())
    }

    fn update_counter(
        &self,
        id: CounterId,
        update: impl FnOnce(&mut Counter),
    ) -> Result<(), SyncError> {
        // The system check and the update happen under one lock so a counter
        // recreated in between cannot slip past the access check.
        let outcome = self.counters.mutate(&id, |counter| {
            if counter.is_system() {
                false
            } else {
                update(counter);
                true
            }
        });

        match outcome {
            Some(true) => Ok(()),
            Some(false) => Err(SyncError::ReadOnlyCounter(id)),
            None => Err(SyncError::CounterNotFound(id)),
        }
    }

    fn query_counter(&self, id: CounterId) -> Result<i64, SyncError> {
        self.counters
            .lookup(&id)
            .map(|snapshot| snapshot.object.value())
            .ok_or(SyncError::CounterNotFound(id))
    }

    fn destroy_counter(&self, id: CounterId) -> Result<i64, SyncError> {
        match self.counters.remove_if(&id, |counter| !counter.is_system()) {
            Some(Ok(counter)) => Ok(counter.value()),
            Some(Err(_)) => Err(SyncError::ReadOnlyCounter(id)),
            None => Err(SyncError::CounterNotFound(id)),
        }
    }
}

impl<E: Environment> std::fmt::Debug for SyncExtension<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncExtension")
            .field("config", &self.config)
            .field("counter_count", &self.counters.len())
            .field("fence_count", &self.fences.len())
            .field("alarm_count", &self.alarms.len())
            .finish()
    }
}
