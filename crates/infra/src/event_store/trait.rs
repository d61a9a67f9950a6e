use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use archcat_core::{AggregateId, ContextError, ExpectedVersion, RequestContext, TenantId};
use archcat_events::{DomainEvent, EventEnvelope, PublishedEvent};

/// An event ready to be appended to a stream (no version assigned yet).
///
/// ## Event lifecycle
///
/// 1. **Domain event**: raised by an aggregate mutator
/// 2. **UncommittedEvent**: serialized payload plus metadata, built with [`UncommittedEvent::from_domain`]
/// 3. **StoredEvent**: persisted, with its stream `version` and global `id` assigned
/// 4. **EventEnvelope**: published to the event bus for projectors
///
/// The tenant and aggregate are not part of this type: the store takes the tenant
/// from the request context and the aggregate from the `save_events` call, so a batch
/// can never mix streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub event_data: JsonValue,
}

impl UncommittedEvent {
    /// Serialize a typed domain event.
    pub fn from_domain<E: DomainEvent>(event: &E) -> Result<Self, EventStoreError> {
        let event_data = event.event_data().map_err(|e| {
            EventStoreError::Serialization(format!(
                "payload serialization failed for {}: {e}",
                event.event_type()
            ))
        })?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            event_type: event.event_type().to_string(),
            schema_version: event.schema_version(),
            occurred_at: event.occurred_at(),
            event_data,
        })
    }
}

/// A persisted event.
///
/// - `id` is the store-wide insertion position (monotonic, not contiguous per tenant).
///   Replay pages through a tenant's log by `id`.
/// - `version` is the position inside the aggregate stream: 1, 2, 3, ... with no gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: u64,
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,

    pub event_type: String,
    pub schema_version: u32,
    pub version: u64,
    pub occurred_at: DateTime<Utc>,

    pub event_data: JsonValue,
}

impl StoredEvent {
    /// Convert a stored event into the envelope the event bus carries.
    pub fn to_envelope(&self) -> PublishedEvent {
        EventEnvelope::new(
            self.event_id,
            self.tenant_id,
            self.aggregate_id,
            self.event_type.clone(),
            self.schema_version,
            self.version,
            self.occurred_at,
            self.event_data.clone(),
        )
    }
}

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, context) as opposed to
/// domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The request context has no tenant, or its deadline has passed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Optimistic concurrency check failed. Nothing was written.
    #[error(
        "optimistic concurrency check failed for aggregate {aggregate_id}: expected {expected:?}, found {actual}"
    )]
    Concurrency {
        aggregate_id: AggregateId,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The backing storage failed (connection, SQL, runtime).
    #[error("event store unavailable: {0}")]
    Unavailable(String),
}

impl EventStoreError {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, EventStoreError::Concurrency { .. })
    }
}

/// Append-only, tenant-partitioned event store.
///
/// Events are organized in **streams**, one per `(tenant, aggregate)`. Within a stream
/// versions start at 1 and increase by one per event.
///
/// ## Append semantics
///
/// `save_events`:
/// - resolves the tenant from `ctx` (no tenant: [`ContextError::MissingTenant`])
/// - fails before touching storage when the context deadline has passed
/// - compares `expected_version` with the current stream version; a mismatch fails
///   with [`EventStoreError::Concurrency`] and writes nothing
/// - assigns `expected + 1, expected + 2, ...` and persists the batch atomically
/// - an empty batch is a no-op
///
/// ## Load semantics
///
/// `get_events` returns the stream of the context tenant in version order, or an empty
/// vector when the stream does not exist. The same aggregate id under another tenant is
/// a different stream.
pub trait EventStore: Send + Sync {
    fn save_events(
        &self,
        ctx: &RequestContext,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn get_events(
        &self,
        ctx: &RequestContext,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Up to `limit` events of the context tenant with `id > after_id`, in `id` order.
    fn get_tenant_events(
        &self,
        ctx: &RequestContext,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn save_events(
        &self,
        ctx: &RequestContext,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).save_events(ctx, aggregate_id, events, expected_version)
    }

    fn get_events(
        &self,
        ctx: &RequestContext,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).get_events(ctx, aggregate_id)
    }

    fn get_tenant_events(
        &self,
        ctx: &RequestContext,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).get_tenant_events(ctx, after_id, limit)
    }
}
