//! Command handlers for the bounded contexts.
//!
//! Every handler follows the same pipeline:
//!
//! ```text
//! 1. Load the aggregate through the repository (tenant from the context)
//! 2. Call the aggregate mutator (pure decision logic, raises events)
//! 3. Save through the repository (optimistic check on the loaded version)
//! ```
//!
//! Publishing is not a handler concern: the repository's store is expected to be a
//! `PublishingEventStore`, which notifies the bus after each commit.

pub mod capabilities;
pub mod components;

pub use capabilities::register_capability_handlers;
pub use components::register_component_handlers;

use chrono::{DateTime, Utc};

use archcat_core::AggregateRoot;
use archcat_events::CommandResult;

/// Wall clock for handler-raised events.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Result of a save that created `aggregate`.
pub(crate) fn created<A: AggregateRoot>(aggregate: &A) -> CommandResult {
    CommandResult::created(aggregate.id(), aggregate.version())
}

/// Result of a save that changed `aggregate`.
pub(crate) fn updated<A: AggregateRoot>(aggregate: &A) -> CommandResult {
    CommandResult::updated(aggregate.id(), aggregate.version())
}
