//! In-process synchronous event bus.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use archcat_core::RequestContext;

use crate::bus::{BusError, EventBus, EventHandler, PublishedEvent};

#[derive(Default)]
struct Subscribers {
    global: Vec<Arc<dyn EventHandler>>,
    by_type: HashMap<String, Vec<Arc<dyn EventHandler>>>,
}

/// In-memory pub/sub bus.
///
/// - No IO / no async: handlers run inline on the publishing thread
/// - Subscriber maps are guarded by a lock; handler lists are snapshotted before
///   invocation so a handler may itself subscribe without deadlocking
/// - At-least-once acceptable (subscribers must be idempotent)
#[derive(Default)]
pub struct InMemoryEventBus {
    subscribers: RwLock<Subscribers>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers that would receive an event of this type.
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        let subs = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.global.len() + subs.by_type.get(event_type).map_or(0, Vec::len)
    }

    fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        let subs = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut handlers = subs.global.clone();
        if let Some(typed) = subs.by_type.get(event_type) {
            handlers.extend(typed.iter().cloned());
        }
        handlers
    }
}

impl core::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let subs = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f.debug_struct("InMemoryEventBus")
            .field("global", &subs.global.len())
            .field("event_types", &subs.by_type.len())
            .finish()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, ctx: &RequestContext, events: &[PublishedEvent]) -> Result<(), BusError> {
        for event in events {
            let handlers = self.handlers_for(event.event_type());
            if handlers.is_empty() {
                debug!(event_type = event.event_type(), "no subscribers for event");
                continue;
            }

            for handler in handlers {
                handler
                    .handle(ctx, event)
                    .map_err(|source| BusError::Handler {
                        handler: handler.name().to_string(),
                        event_type: event.event_type().to_string(),
                        version: event.version(),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.by_type
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    fn subscribe_all(&self, handler: Arc<dyn EventHandler>) {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.global.push(handler);
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
    use crate::bus::{handler_fn, HandlerError};
    use crate::EventEnvelope;

    fn event(event_type: &str, version: u64) -> PublishedEvent {
        EventEnvelope::new(
            Uuid::now_v7(),
            TenantId::new(),
            AggregateId::new(),
            event_type,
            1,
            version,
            Utc::now(),
            json!({}),
        )
    }

    fn recorder(
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn EventHandler> {
        handler_fn(name, move |_, ev| {
            log.lock()
                .unwrap()
                .push(format!("{name}:{}:{}", ev.event_type(), ev.version()));
            Ok(())
        })
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let bus = InMemoryEventBus::new();
        let ctx = RequestContext::for_tenant(TenantId::new());
        assert!(bus.publish(&ctx, &[event("nobody.listens", 1)]).is_ok());
        assert_eq!(bus.subscriber_count("nobody.listens"), 0);
    }

    #[test]
    fn global_handlers_run_before_typed_handlers_in_registration_order() {
        let bus = InMemoryEventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("a", recorder("typed1", log.clone()));
        bus.subscribe_all(recorder("global1", log.clone()));
        bus.subscribe("a", recorder("typed2", log.clone()));
        bus.subscribe_all(recorder("global2", log.clone()));
        bus.subscribe("b", recorder("other", log.clone()));

        let ctx = RequestContext::for_tenant(TenantId::new());
        bus.publish(&ctx, &[event("a", 1), event("a", 2)]).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "global1:a:1", "global2:a:1", "typed1:a:1", "typed2:a:1",
                "global1:a:2", "global2:a:2", "typed1:a:2", "typed2:a:2",
            ]
        );
    }

    #[test]
    fn first_handler_error_aborts_remaining_delivery() {
        let bus = InMemoryEventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            "a",
            handler_fn("failing", |_, _| {
                Err(HandlerError::ReadModel("boom".to_string()))
            }),
        );
        bus.subscribe("a", recorder("after", log.clone()));

        let ctx = RequestContext::for_tenant(TenantId::new());
        let err = bus.publish(&ctx, &[event("a", 1), event("a", 2)]).unwrap_err();

        match err {
            BusError::Handler { handler, version, .. } => {
                assert_eq!(handler, "failing");
                assert_eq!(version, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn subscriptions_are_not_retroactive() {
        let bus = InMemoryEventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let ctx = RequestContext::for_tenant(TenantId::new());

        bus.publish(&ctx, &[event("a", 1)]).unwrap();
        bus.subscribe("a", recorder("late", log.clone()));
        bus.publish(&ctx, &[event("a", 2)]).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["late:a:2"]);
    }

    #[test]
    fn handler_may_subscribe_during_publish() {
        let bus = Arc::new(InMemoryEventBus::new());
        let inner = bus.clone();
        bus.subscribe(
            "a",
            handler_fn("registrar", move |_, _| {
                inner.subscribe("b", handler_fn("noop", |_, _| Ok(())));
                Ok(())
            }),
        );

        let ctx = RequestContext::for_tenant(TenantId::new());
        bus.publish(&ctx, &[event("a", 1)]).unwrap();
        assert_eq!(bus.subscriber_count("b"), 1);
    }
}
