//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes **committed** events to in-process subscribers (projectors,
//! policies). It is not storage: the event store is the source of truth and the bus is
//! only called after an append has been committed.
//!
//! ## Delivery
//!
//! - **Synchronous**: `publish` runs every handler on the caller's thread before returning.
//! - **Ordered per publish call**: for each event, global handlers first, then handlers
//!   registered for that event type, each group in registration order.
//! - **Fail fast**: the first handler error aborts the rest of that publish call.
//! - **At-least-once** overall: replays and retries may redeliver an event, so handlers
//!   must be idempotent.
//!
//! ```text
//! Command → Event Store (append, commit) → Event Bus (publish) → Projectors → Read Models
//! ```

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use archcat_core::{ContextError, RequestContext};

use crate::EventEnvelope;

/// What the bus carries: a committed event with a JSON payload.
pub type PublishedEvent = EventEnvelope<JsonValue>;

/// Failure of a single subscriber.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("failed to deserialize {event_type}: {message}")]
    Deserialize { event_type: String, message: String },

    #[error("read model update failed: {0}")]
    ReadModel(String),
}

/// Failure of a publish call.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("handler '{handler}' failed on {event_type} v{version}: {source}")]
    Handler {
        handler: String,
        event_type: String,
        version: u64,
        #[source]
        source: HandlerError,
    },

    #[error("event bus unavailable: {0}")]
    Unavailable(String),
}

/// A subscriber to published events.
pub trait EventHandler: Send + Sync {
    /// Stable name used in logs and errors.
    fn name(&self) -> &str;

    /// Handle one committed event. Must be idempotent.
    fn handle(&self, ctx: &RequestContext, event: &PublishedEvent) -> Result<(), HandlerError>;
}

/// Domain-agnostic event bus.
///
/// Subscriptions are not retroactive: a handler only sees events published after it was
/// registered. Implementations must be safe to share across threads.
pub trait EventBus: Send + Sync {
    fn publish(&self, ctx: &RequestContext, events: &[PublishedEvent]) -> Result<(), BusError>;

    /// Register a handler for one event type.
    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>);

    /// Register a handler for every event type.
    fn subscribe_all(&self, handler: Arc<dyn EventHandler>);
}

impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    fn publish(&self, ctx: &RequestContext, events: &[PublishedEvent]) -> Result<(), BusError> {
        (**self).publish(ctx, events)
    }

    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        (**self).subscribe(event_type, handler)
    }

    fn subscribe_all(&self, handler: Arc<dyn EventHandler>) {
        (**self).subscribe_all(handler)
    }
}

struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&RequestContext, &PublishedEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, ctx: &RequestContext, event: &PublishedEvent) -> Result<(), HandlerError> {
        (self.f)(ctx, event)
    }
}

/// Wrap a closure as a named [`EventHandler`].
pub fn handler_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&RequestContext, &PublishedEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}
