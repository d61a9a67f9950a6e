//! Append-only event store boundary.
//!
//! The store trait is storage-agnostic; `InMemoryEventStore` backs tests and dev,
//! `PostgresEventStore` production.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

use tracing::error;

use archcat_core::{AggregateId, ExpectedVersion, RequestContext};
use archcat_events::{EventBus, PublishedEvent};

/// Adapter that publishes committed events to an `EventBus` after a successful append.
///
/// Ordering invariant: **publish happens only after the append has committed**.
///
/// Publication is best effort. A bus failure is logged and swallowed: the events are
/// durable and the caller sees success, but the subscribers that did not run stay
/// stale until a replay (see `projections::ProjectionReplayer`). There is no outbox and
/// no retry.
///
/// An append that fails, including one that timed out against the context deadline
/// after the backend committed it, publishes nothing; replay covers that case as well.
pub struct PublishingEventStore<S, B> {
    store: S,
    bus: B,
}

impl<S, B> PublishingEventStore<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> EventStore for PublishingEventStore<S, B>
where
    S: EventStore,
    B: EventBus,
{
    fn save_events(
        &self,
        ctx: &RequestContext,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let committed = self
            .store
            .save_events(ctx, aggregate_id, events, expected_version)?;
        if committed.is_empty() {
            return Ok(committed);
        }

        let envelopes: Vec<PublishedEvent> = committed.iter().map(StoredEvent::to_envelope).collect();
        if let Err(err) = self.bus.publish(ctx, &envelopes) {
            error!(
                error = %err,
                aggregate_id = %aggregate_id,
                correlation_id = %ctx.correlation_id(),
                first_version = committed[0].version,
                event_count = committed.len(),
                "post-commit publish failed; events are stored but projections may be stale"
            );
        }

        Ok(committed)
    }

    fn get_events(
        &self,
        ctx: &RequestContext,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.get_events(ctx, aggregate_id)
    }

    fn get_tenant_events(
        &self,
        ctx: &RequestContext,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.get_tenant_events(ctx, after_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use archcat_core::TenantId;
    use archcat_events::{handler_fn, HandlerError, InMemoryEventBus};

    use super::*;

    fn event(event_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            event_type: event_type.to_string(),
            schema_version: 1,
            occurred_at: Utc::now(),
            event_data: json!({}),
        }
    }

    #[test]
    fn publishes_committed_envelopes_after_append() {
        let bus = Arc::new(InMemoryEventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        bus.subscribe_all(handler_fn("recorder", move |_, ev| {
            log.lock().unwrap().push((ev.event_type().to_string(), ev.version()));
            Ok(())
        }));

        let store = PublishingEventStore::new(InMemoryEventStore::new(), bus);
        let ctx = RequestContext::for_tenant(TenantId::new());
        store
            .save_events(&ctx, AggregateId::new(), vec![event("a"), event("b")], ExpectedVersion::Exact(0))
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a".to_string(), 1), ("b".to_string(), 2)]
        );
    }

    #[test]
    fn rejected_append_publishes_nothing() {
        let bus = Arc::new(InMemoryEventBus::new());
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        bus.subscribe_all(handler_fn("counter", move |_, _| {
            *counter.lock().unwrap() += 1;
            Ok(())
        }));

        let store = PublishingEventStore::new(InMemoryEventStore::new(), bus);
        let ctx = RequestContext::for_tenant(TenantId::new());
        let err = store
            .save_events(&ctx, AggregateId::new(), vec![event("a")], ExpectedVersion::Exact(3))
            .unwrap_err();

        assert!(err.is_concurrency());
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn publish_failure_is_swallowed_after_commit() {
        let bus = Arc::new(InMemoryEventBus::new());
        bus.subscribe(
            "a",
            handler_fn("broken", |_, _| Err(HandlerError::ReadModel("down".to_string()))),
        );

        let store = PublishingEventStore::new(InMemoryEventStore::new(), bus);
        let ctx = RequestContext::for_tenant(TenantId::new());
        let id = AggregateId::new();
        let saved = store
            .save_events(&ctx, id, vec![event("a")], ExpectedVersion::Exact(0))
            .unwrap();

        assert_eq!(saved.len(), 1);
        assert_eq!(store.get_events(&ctx, id).unwrap().len(), 1);
    }
}
