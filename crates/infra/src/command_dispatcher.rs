//! Command execution pipeline (application-level orchestration).
//!
//! Every store runs its writes through the `CommandDispatcher`:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events (append-only, exact expected version)
//!   ↓
//! 5. Publish committed events on the relay (best-effort)
//! ```
//!
//! A version conflict at step 4 means another writer appended in between. The
//! dispatcher then starts over from step 1, so the command is re-validated
//! against the fresh snapshot: a stale transition fails with the domain error
//! of the current state instead of silently overwriting it.
//!
//! Publishing happens only after a successful append. A relay failure is
//! logged and the committed events stay committed; the caller still gets a
//! success.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use torque_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use torque_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Default number of load-decide-append rounds per command.
pub const DEFAULT_DISPATCH_ATTEMPTS: u32 = 2;

/// Error returned by store operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Deterministic domain failure (validation, invariant, transition...).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The stream kept moving under us for every attempt.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A stored payload could not be decoded into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    /// Persisting to or loading from the event store failed.
    #[error("event store failure: {0}")]
    Store(EventStoreError),

    /// A collaborator needed by the primary operation is unreachable.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl DispatchError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            DispatchError::Domain(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::Domain(DomainError::NotFound))
    }

    /// The target already exists (duplicate create).
    pub fn is_conflict(&self) -> bool {
        matches!(self, DispatchError::Domain(DomainError::Conflict(_)))
    }
}

/// Outcome of a successful dispatch.
#[derive(Debug, Clone)]
pub struct Dispatched<A> {
    /// Aggregate state after the committed events were applied.
    pub aggregate: A,
    /// Events as persisted, with their sequence numbers.
    pub committed: Vec<StoredEvent>,
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the event store `S` and the relay `B`, so tests and the API
/// binary share one implementation with in-memory backends.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    max_attempts: u32,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            max_attempts: DEFAULT_DISPATCH_ATTEMPTS,
        }
    }

    /// Bound the number of attempts per command (at least one).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate without executing a command.
    ///
    /// Returns the `make_aggregate` instance untouched (not created) when the
    /// stream is empty.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full pipeline.
    ///
    /// `make_aggregate` builds the empty instance to rehydrate into; it may be
    /// called once per attempt.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: torque_events::Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 1;
        loop {
            match self.try_dispatch(aggregate_id, aggregate_type, command, &make_aggregate) {
                Err(DispatchError::Concurrency(msg)) if attempt < self.max_attempts => {
                    debug!(
                        aggregate_id = %aggregate_id,
                        aggregate_type,
                        attempt,
                        reason = %msg,
                        "stream moved during dispatch; retrying on a fresh snapshot"
                    );
                    attempt += 1;
                }
                Err(DispatchError::Concurrency(msg)) => {
                    return Err(DispatchError::Domain(DomainError::conflict(format!(
                        "{aggregate_type} {aggregate_id} was modified concurrently: {msg}"
                    ))));
                }
                other => return other,
            }
        }
    }

    fn try_dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: &impl Fn(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: torque_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                aggregate,
                committed: vec![],
            });
        }

        // 4) Persist (append-only, optimistic)
        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;
        for ev in &decided {
            aggregate.apply(ev);
        }

        // 5) Publish committed events (after append, best-effort)
        for stored in &committed {
            if let Err(err) = self.bus.publish(stored.to_envelope()) {
                warn!(
                    topic = %stored.event_type,
                    aggregate_id = %aggregate_id,
                    error = ?err,
                    "relay publish failed; event dropped"
                );
            }
        }

        Ok(Dispatched {
            aggregate,
            committed,
        })
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    // Reject streams a backend mixed up or reordered.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
