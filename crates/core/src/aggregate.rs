//! Aggregate root model for event-sourced domain entities.
//!
//! Every aggregate embeds an [`AggregateCore`] that owns the bookkeeping shared by all
//! aggregates (identity, version, pending events, lifecycle). The aggregate itself only
//! supplies `apply`, an exhaustive `match` over its closed event enum.

use crate::error::{DomainError, DomainResult};
use crate::id::AggregateId;

/// Lifecycle tag of an aggregate.
///
/// Once a terminal event has been applied the aggregate is `Deleted` and refuses to
/// raise further events.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Active,
    Deleted,
}

/// Shared aggregate bookkeeping.
///
/// Invariant: `version` equals the number of events ever applied to this instance,
/// committed and pending alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateCore<E> {
    id: AggregateId,
    version: u64,
    uncommitted: Vec<E>,
    lifecycle: Lifecycle,
}

impl<E> AggregateCore<E> {
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            version: 0,
            uncommitted: Vec::new(),
            lifecycle: Lifecycle::Active,
        }
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn uncommitted(&self) -> &[E] {
        &self.uncommitted
    }

    /// Version the stored stream had before the pending events were raised.
    pub fn committed_version(&self) -> u64 {
        self.version - self.uncommitted.len() as u64
    }
}

/// Event-sourced aggregate root.
///
/// - **State mutation**: `apply(&mut self, event)` evolves state. It must be a pure
///   function of the prior state and the event payload so that replaying the same
///   history always yields the same state and version.
/// - **Decisions**: domain mutators validate every invariant first and only then call
///   [`AggregateRoot::raise_event`]. A raised event is never rejected later.
///
/// Aggregates must not perform IO or side effects.
pub trait AggregateRoot {
    type Event: Clone + core::fmt::Debug;

    /// Fresh, not-yet-created instance used as the starting point of a replay.
    fn empty(id: AggregateId) -> Self
    where
        Self: Sized;

    fn core(&self) -> &AggregateCore<Self::Event>;

    fn core_mut(&mut self) -> &mut AggregateCore<Self::Event>;

    /// Evolve in-memory state from a single event.
    ///
    /// Version tracking is handled by the caller ([`AggregateRoot::raise_event`] or
    /// [`AggregateRoot::load_from_history`]); implementations only touch domain state.
    fn apply(&mut self, event: &Self::Event);

    /// Whether the event marks the aggregate as deleted.
    fn is_terminal(_event: &Self::Event) -> bool {
        false
    }

    fn id(&self) -> AggregateId {
        self.core().id()
    }

    fn version(&self) -> u64 {
        self.core().version()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.core().lifecycle()
    }

    fn is_deleted(&self) -> bool {
        self.lifecycle() == Lifecycle::Deleted
    }

    /// Guard for mutators: fails once the aggregate has been deleted.
    fn ensure_active(&self) -> DomainResult<()> {
        if self.is_deleted() {
            return Err(DomainError::invariant(format!(
                "aggregate {} is deleted",
                self.id()
            )));
        }
        Ok(())
    }

    /// Apply a new event and record it as an uncommitted change (version + 1).
    fn raise_event(&mut self, event: Self::Event) -> DomainResult<()> {
        self.ensure_active()?;
        self.apply(&event);
        let terminal = Self::is_terminal(&event);
        let core = self.core_mut();
        core.version += 1;
        if terminal {
            core.lifecycle = Lifecycle::Deleted;
        }
        core.uncommitted.push(event);
        Ok(())
    }

    /// Pending events, in the order they were raised.
    fn uncommitted_changes(&self) -> &[Self::Event] {
        self.core().uncommitted()
    }

    /// Drop the pending events once they are durable. The version is unchanged.
    fn mark_changes_as_committed(&mut self) {
        self.core_mut().uncommitted.clear();
    }

    /// Replay stored history in order. Never records uncommitted changes.
    fn load_from_history<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = Self::Event>,
    {
        for event in events {
            self.apply(&event);
            let terminal = Self::is_terminal(&event);
            let core = self.core_mut();
            core.version += 1;
            if terminal {
                core.lifecycle = Lifecycle::Deleted;
            }
        }
    }

    /// Build an aggregate from its stored history.
    fn rehydrate<I>(id: AggregateId, events: I) -> Self
    where
        Self: Sized,
        I: IntoIterator<Item = Self::Event>,
    {
        let mut aggregate = Self::empty(id);
        aggregate.load_from_history(events);
        aggregate
    }
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (useful for migrations and replays).
    Any,
    /// Require the stream to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}

impl From<u64> for ExpectedVersion {
    fn from(value: u64) -> Self {
        ExpectedVersion::Exact(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum CounterEvent {
        Opened,
        Added(i64),
        Closed,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Counter {
        core: AggregateCore<CounterEvent>,
        total: i64,
    }

    impl AggregateRoot for Counter {
        type Event = CounterEvent;

        fn empty(id: AggregateId) -> Self {
            Self {
                core: AggregateCore::new(id),
                total: 0,
            }
        }

        fn core(&self) -> &AggregateCore<CounterEvent> {
            &self.core
        }

        fn core_mut(&mut self) -> &mut AggregateCore<CounterEvent> {
            &mut self.core
        }

        fn apply(&mut self, event: &CounterEvent) {
            match event {
                CounterEvent::Opened => self.total = 0,
                CounterEvent::Added(n) => self.total += n,
                CounterEvent::Closed => {}
            }
        }

        fn is_terminal(event: &CounterEvent) -> bool {
            matches!(event, CounterEvent::Closed)
        }
    }

    fn opened() -> Counter {
        let mut c = Counter::empty(AggregateId::new());
        c.raise_event(CounterEvent::Opened).unwrap();
        c
    }

    #[test]
    fn raise_event_increments_version_and_records_change() {
        let mut c = opened();
        c.raise_event(CounterEvent::Added(5)).unwrap();

        assert_eq!(c.version(), 2);
        assert_eq!(c.total, 5);
        assert_eq!(
            c.uncommitted_changes(),
            &[CounterEvent::Opened, CounterEvent::Added(5)]
        );
    }

    #[test]
    fn mark_changes_as_committed_keeps_version() {
        let mut c = opened();
        c.mark_changes_as_committed();

        assert!(c.uncommitted_changes().is_empty());
        assert_eq!(c.version(), 1);
        assert_eq!(c.core().committed_version(), 1);
    }

    #[test]
    fn load_from_history_does_not_record_changes() {
        let c = Counter::rehydrate(
            AggregateId::new(),
            vec![CounterEvent::Opened, CounterEvent::Added(2), CounterEvent::Added(3)],
        );

        assert_eq!(c.version(), 3);
        assert_eq!(c.total, 5);
        assert!(c.uncommitted_changes().is_empty());
    }

    #[test]
    fn deleted_aggregate_refuses_new_events() {
        let mut c = opened();
        c.raise_event(CounterEvent::Closed).unwrap();
        assert!(c.is_deleted());

        let err = c.raise_event(CounterEvent::Added(1)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(c.version(), 2);
        assert_eq!(c.uncommitted_changes().len(), 2);
    }

    #[test]
    fn replayed_terminal_event_restores_deleted_lifecycle() {
        let c = Counter::rehydrate(
            AggregateId::new(),
            vec![CounterEvent::Opened, CounterEvent::Closed],
        );
        assert_eq!(c.lifecycle(), Lifecycle::Deleted);
        assert!(c.ensure_active().is_err());
    }

    #[test]
    fn expected_version_matches() {
        assert!(ExpectedVersion::Any.matches(7));
        assert!(ExpectedVersion::Exact(3).matches(3));
        assert!(!ExpectedVersion::Exact(2).matches(3));
        assert_eq!(ExpectedVersion::from(4), ExpectedVersion::Exact(4));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: replaying N events yields version N and the same state as raising them.
            #[test]
            fn replay_matches_raise(deltas in proptest::collection::vec(-1000i64..1000, 0..64)) {
                let mut live = opened();
                for d in &deltas {
                    live.raise_event(CounterEvent::Added(*d)).unwrap();
                }

                let history = live.uncommitted_changes().to_vec();
                let replayed = Counter::rehydrate(live.id(), history.clone());

                prop_assert_eq!(replayed.version(), history.len() as u64);
                prop_assert_eq!(replayed.version(), live.version());
                prop_assert_eq!(replayed.total, live.total);
            }
        }
    }
}
