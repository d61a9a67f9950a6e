use std::sync::Arc;

use archcat_core::RequestContext;

use crate::bus::{EventBus, EventHandler, HandlerError, PublishedEvent};

/// A projector turns committed events into queryable read-model rows.
///
/// Projections implement the **CQRS read side**: read models are denormalized, disposable
/// and can be rebuilt from the event log at any time.
///
/// ## Idempotency
///
/// Delivery is at-least-once, so `project` must tolerate redelivery:
/// - "created" events upsert (delete-then-insert or insert-on-conflict-update)
/// - "updated" events are conditional updates of an existing row
/// - "deleted" events set a soft-delete flag
///
/// ## Tenant isolation
///
/// Every read-model mutation is scoped by the tenant resolved from the context, and the
/// envelope's tenant must match it (see [`crate::ensure_tenant`]).
///
/// ## Fan-out
///
/// One event type may update several read models. Those updates are independent; a
/// failure half-way leaves the others applied, and reprocessing corrects the rest.
pub trait Projector: Send + Sync {
    /// Stable name used in logs, errors and replays.
    fn name(&self) -> &'static str;

    /// Event types this projector subscribes to.
    fn event_types(&self) -> &'static [&'static str];

    fn project(&self, ctx: &RequestContext, event: &PublishedEvent) -> Result<(), HandlerError>;

    /// Whether this projector cares about the event.
    fn handles(&self, event_type: &str) -> bool {
        self.event_types().contains(&event_type)
    }
}

struct ProjectorHandler<P: ?Sized> {
    projector: Arc<P>,
}

impl<P> EventHandler for ProjectorHandler<P>
where
    P: Projector + ?Sized,
{
    fn name(&self) -> &str {
        self.projector.name()
    }

    fn handle(&self, ctx: &RequestContext, event: &PublishedEvent) -> Result<(), HandlerError> {
        self.projector.project(ctx, event)
    }
}

/// Subscribe a projector to exactly the event types it declares.
pub fn subscribe_projector<B, P>(bus: &B, projector: Arc<P>)
where
    B: EventBus + ?Sized,
    P: Projector + ?Sized + 'static,
{
    let handler: Arc<dyn EventHandler> = Arc::new(ProjectorHandler {
        projector: projector.clone(),
    });
    for event_type in projector.event_types() {
        bus.subscribe(event_type, handler.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use archcat_core::{AggregateId, TenantId};

    use super::*;
    use crate::{EventEnvelope, InMemoryEventBus};

    #[derive(Default)]
    struct Seen(Mutex<Vec<String>>);

    impl Projector for Seen {
        fn name(&self) -> &'static str {
            "test.seen"
        }

        fn event_types(&self) -> &'static [&'static str] {
            &["x.created", "x.deleted"]
        }

        fn project(&self, _ctx: &RequestContext, event: &PublishedEvent) -> Result<(), HandlerError> {
            self.0.lock().unwrap().push(event.event_type().to_string());
            Ok(())
        }
    }

    fn event(event_type: &str) -> PublishedEvent {
        EventEnvelope::new(
            Uuid::now_v7(),
            TenantId::new(),
            AggregateId::new(),
            event_type,
            1,
            1,
            Utc::now(),
            json!({}),
        )
    }

    #[test]
    fn projector_only_receives_declared_event_types() {
        let bus = InMemoryEventBus::new();
        let projector = Arc::new(Seen::default());
        subscribe_projector(&bus, projector.clone());

        let ctx = RequestContext::for_tenant(TenantId::new());
        bus.publish(
            &ctx,
            &[event("x.created"), event("x.updated"), event("x.deleted")],
        )
        .unwrap();

        assert_eq!(
            *projector.0.lock().unwrap(),
            vec!["x.created".to_string(), "x.deleted".to_string()]
        );
        assert!(projector.handles("x.created"));
        assert!(!projector.handles("x.updated"));
    }
}
