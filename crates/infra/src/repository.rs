//! Event-sourced repository: loads and saves one aggregate type.
//!
//! ```text
//! get_by_id:  EventStore::get_events → EventRegistry::deserialize → AggregateRoot::rehydrate
//! save:       uncommitted_changes → EventStore::save_events(expected = committed version)
//!             → mark_changes_as_committed
//! ```
//!
//! Aggregates are rebuilt on every load; there is no cache and no snapshotting.

use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use archcat_core::{AggregateId, AggregateRoot, ExpectedVersion, RequestContext};
use archcat_events::{DomainEvent, EventRegistry, RegistryError};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("aggregate {0} not found")]
    NotFound(AggregateId),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Deserialize(#[from] RegistryError),

    /// Some stored events could not be applied (no deserializer registered), so the
    /// rebuilt aggregate would be behind its stream.
    #[error(
        "aggregate {aggregate_id} replayed to version {replayed} but its stream is at version {stored}"
    )]
    IncompleteReplay {
        aggregate_id: AggregateId,
        replayed: u64,
        stored: u64,
    },
}

/// Repository for aggregate type `A` on top of an event store `S`.
///
/// The deserializer registry is injected, so two repositories (or two tests) never share
/// mutable registration state.
pub struct EventSourcedRepository<A, S>
where
    A: AggregateRoot,
{
    store: S,
    registry: Arc<EventRegistry<A::Event>>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A, S> EventSourcedRepository<A, S>
where
    A: AggregateRoot,
    A::Event: DomainEvent,
    S: EventStore,
{
    pub fn new(store: S, registry: EventRegistry<A::Event>) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            _aggregate: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &EventRegistry<A::Event> {
        &self.registry
    }

    /// Rebuild the aggregate from its stream (tenant taken from `ctx`).
    pub fn get_by_id(
        &self,
        ctx: &RequestContext,
        aggregate_id: AggregateId,
    ) -> Result<A, RepositoryError> {
        let stored = self.store.get_events(ctx, aggregate_id)?;
        let Some(stored_version) = stored.last().map(|e| e.version) else {
            return Err(RepositoryError::NotFound(aggregate_id));
        };

        let events = self.decode(&stored)?;
        let aggregate = A::rehydrate(aggregate_id, events);

        if aggregate.version() != stored_version {
            return Err(RepositoryError::IncompleteReplay {
                aggregate_id,
                replayed: aggregate.version(),
                stored: stored_version,
            });
        }
        Ok(aggregate)
    }

    /// Persist pending events with an optimistic check against the version the aggregate
    /// was loaded at. A no-op when nothing is pending.
    pub fn save(
        &self,
        ctx: &RequestContext,
        aggregate: &mut A,
    ) -> Result<Vec<StoredEvent>, RepositoryError> {
        let pending = aggregate.uncommitted_changes();
        if pending.is_empty() {
            return Ok(vec![]);
        }

        let events = pending
            .iter()
            .map(UncommittedEvent::from_domain)
            .collect::<Result<Vec<_>, _>>()?;
        let expected = ExpectedVersion::Exact(aggregate.core().committed_version());

        let committed = self
            .store
            .save_events(ctx, aggregate.id(), events, expected)?;
        aggregate.mark_changes_as_committed();

        debug!(
            aggregate_id = %aggregate.id(),
            version = aggregate.version(),
            event_count = committed.len(),
            "aggregate saved"
        );
        Ok(committed)
    }

    fn decode(&self, stored: &[StoredEvent]) -> Result<Vec<A::Event>, RepositoryError> {
        let mut events = Vec::with_capacity(stored.len());
        for e in stored {
            match self
                .registry
                .deserialize(&e.event_type, e.event_data.clone())?
            {
                Some(event) => events.push(event),
                None => warn!(
                    aggregate_id = %e.aggregate_id,
                    event_type = %e.event_type,
                    version = e.version,
                    "no deserializer registered for stored event; skipping"
                ),
            }
        }
        Ok(events)
    }
}
