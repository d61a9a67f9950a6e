use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use archcat_core::{AggregateId, ExpectedVersion, RequestContext, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<StreamKey, Vec<StoredEvent>>,
    /// Every committed event in insertion order (`id` ascending).
    log: Vec<StoredEvent>,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. A single write lock makes each append atomic; concurrent
/// writers to the same stream are serialized and the loser sees a version mismatch.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed events across all tenants.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.log.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.version).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn save_events(
        &self,
        ctx: &RequestContext,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let tenant_id = ctx.tenant()?;
        ctx.check_deadline("save_events")?;

        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;
        let Inner { streams, log } = &mut *inner;

        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };
        let current = streams
            .get(&key)
            .map(|stream| Self::current_version(stream))
            .unwrap_or(0);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency {
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }

        let mut next_id = log.last().map(|e| e.id).unwrap_or(0) + 1;
        let mut next_version = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        let stream = streams.entry(key).or_default();
        for e in events {
            let stored = StoredEvent {
                id: next_id,
                event_id: e.event_id,
                tenant_id,
                aggregate_id,
                event_type: e.event_type,
                schema_version: e.schema_version,
                version: next_version,
                occurred_at: e.occurred_at,
                event_data: e.event_data,
            };
            next_id += 1;
            next_version += 1;
            stream.push(stored.clone());
            log.push(stored.clone());
            committed.push(stored);
        }

        debug!(
            tenant_id = %tenant_id,
            aggregate_id = %aggregate_id,
            new_version = next_version - 1,
            "events appended"
        );
        Ok(committed)
    }

    fn get_events(
        &self,
        ctx: &RequestContext,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let tenant_id = ctx.tenant()?;
        ctx.check_deadline("get_events")?;

        let inner = self
            .inner
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(inner
            .streams
            .get(&StreamKey {
                tenant_id,
                aggregate_id,
            })
            .cloned()
            .unwrap_or_default())
    }

    fn get_tenant_events(
        &self,
        ctx: &RequestContext,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let tenant_id = ctx.tenant()?;
        ctx.check_deadline("get_tenant_events")?;

        let inner = self
            .inner
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        let start = inner.log.partition_point(|e| e.id <= after_id);
        Ok(inner.log[start..]
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
