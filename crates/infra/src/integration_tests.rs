//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → Repository → EventStore → EventBus → Projection → ReadModel
//!
//! Verifies:
//! - Commands produce events that update read models before dispatch returns
//! - Tenant isolation holds even when aggregate ids collide
//! - Optimistic concurrency conflicts are detected
//! - Publish failures leave the log intact and are repaired by replay
//! - Queued delivery catches up on flush

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use archcat_capabilities::{
    CapabilityId, CapabilityLevel, CreateCapability, UpdateCapability,
};
use archcat_components::{
    ApplicationComponent, ComponentEvent, ComponentId, CreateComponent, DeleteComponent,
    UpdateComponent, COMPONENT_CREATED, COMPONENT_UPDATED,
};
use archcat_core::{AggregateId, AggregateRoot, ContextError, RequestContext, TenantId};
use archcat_events::{handler_fn, EventBus, EventRegistry, HandlerError};

use crate::command_bus::DispatchError;
use crate::config::PublishMode;
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::read_model::{Page, ReadModelError};
use crate::repository::{EventSourcedRepository, RepositoryError};
use crate::runtime::Runtime;

fn setup() -> Runtime {
    archcat_observability::init_for_tests();
    match Runtime::in_memory(PublishMode::Sync, 16) {
        Ok(runtime) => runtime,
        Err(e) => panic!("runtime: {e}"),
    }
}

fn tenant() -> RequestContext {
    RequestContext::for_tenant(TenantId::new())
}

fn create_component(runtime: &Runtime, ctx: &RequestContext, name: &str) -> ComponentId {
    let result = runtime
        .dispatch(
            ctx,
            &CreateComponent {
                name: name.to_string(),
                description: String::new(),
            },
        )
        .unwrap();
    ComponentId::new(result.aggregate_id())
}

fn rename_component(
    runtime: &Runtime,
    ctx: &RequestContext,
    id: ComponentId,
    name: &str,
) -> Result<u64, DispatchError> {
    runtime
        .dispatch(
            ctx,
            &UpdateComponent {
                component_id: id,
                name: name.to_string(),
                description: String::new(),
            },
        )
        .map(|r| r.version())
}

#[test]
fn create_and_update_are_visible_in_the_read_model_before_dispatch_returns() {
    let runtime = setup();
    let ctx = tenant();

    let id = create_component(&runtime, &ctx, "CRM");
    assert_eq!(rename_component(&runtime, &ctx, id, "CRM v2").unwrap(), 2);
    assert_eq!(rename_component(&runtime, &ctx, id, "CRM v3").unwrap(), 3);

    let events = runtime.event_store().get_events(&ctx, id.0).unwrap();
    let versions: Vec<u64> = events.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert_eq!(events[0].event_type, COMPONENT_CREATED);
    assert_eq!(events[2].event_type, COMPONENT_UPDATED);

    let row = runtime
        .component_catalog()
        .get_by_id(&ctx, id)
        .unwrap()
        .unwrap();
    assert_eq!(row.name, "CRM v3");
    assert!(row.updated_at >= row.created_at);
}

#[test]
fn delete_hides_the_row_and_blocks_further_commands() {
    let runtime = setup();
    let ctx = tenant();
    let id = create_component(&runtime, &ctx, "Legacy ERP");

    runtime
        .dispatch(&ctx, &DeleteComponent { component_id: id })
        .unwrap();
    assert_eq!(runtime.component_catalog().get_by_id(&ctx, id).unwrap(), None);

    let err = rename_component(&runtime, &ctx, id, "Zombie").unwrap_err();
    assert!(matches!(err, DispatchError::InvariantViolation(_)));
    assert_eq!(runtime.event_store().get_events(&ctx, id.0).unwrap().len(), 2);
}

#[test]
fn stale_writer_gets_a_concurrency_conflict() {
    let runtime = setup();
    let ctx = tenant();
    let id = create_component(&runtime, &ctx, "Billing");

    let repo = runtime.component_repository();
    let mut first = repo.get_by_id(&ctx, id.0).unwrap();
    let mut second = repo.get_by_id(&ctx, id.0).unwrap();

    first.update("Billing A", "", Utc::now()).unwrap();
    second.update("Billing B", "", Utc::now()).unwrap();

    repo.save(&ctx, &mut first).unwrap();
    let err = repo.save(&ctx, &mut second).unwrap_err();
    assert!(matches!(err, RepositoryError::Store(ref e) if e.is_concurrency()));

    let row = runtime
        .component_catalog()
        .get_by_id(&ctx, id)
        .unwrap()
        .unwrap();
    assert_eq!(row.name, "Billing A");
}

#[test]
fn colliding_ids_stay_isolated_per_tenant() {
    let runtime = setup();
    let (a, b) = (tenant(), tenant());
    let shared = ComponentId::new(AggregateId::new());
    let repo = runtime.component_repository();

    for (ctx, name) in [(&a, "Tenant A app"), (&b, "Tenant B app")] {
        let mut component = ApplicationComponent::create(shared, name, "", Utc::now()).unwrap();
        repo.save(ctx, &mut component).unwrap();
    }
    let mut in_a = repo.get_by_id(&a, shared.0).unwrap();
    in_a.update("Tenant A app v2", "", Utc::now()).unwrap();
    repo.save(&a, &mut in_a).unwrap();

    assert_eq!(repo.get_by_id(&a, shared.0).unwrap().version(), 2);
    assert_eq!(repo.get_by_id(&b, shared.0).unwrap().version(), 1);

    let catalog = runtime.component_catalog();
    assert_eq!(catalog.get_by_id(&a, shared).unwrap().unwrap().name, "Tenant A app v2");
    assert_eq!(catalog.get_by_id(&b, shared).unwrap().unwrap().name, "Tenant B app");

    let other = tenant();
    assert!(matches!(
        repo.get_by_id(&other, shared.0),
        Err(RepositoryError::NotFound(_))
    ));
    assert!(catalog
        .get_all_paginated(&other, &Page::default())
        .unwrap()
        .is_empty());
}

#[test]
fn missing_tenant_fails_closed_everywhere() {
    let runtime = setup();
    let anonymous = RequestContext::without_tenant();

    let err = runtime
        .dispatch(
            &anonymous,
            &CreateComponent {
                name: "Anything".to_string(),
                description: String::new(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::MissingTenant));
    assert!(runtime
        .event_store()
        .get_tenant_events(&anonymous, 0, 10)
        .is_err());
    assert!(runtime
        .component_catalog()
        .get_all_paginated(&anonymous, &Page::default())
        .is_err());
}

#[test]
fn expired_deadline_writes_nothing() {
    let runtime = setup();
    let ctx = tenant();
    let expired = ctx.clone().with_deadline(Instant::now());

    let err = runtime
        .dispatch(
            &expired,
            &CreateComponent {
                name: "Late".to_string(),
                description: String::new(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::Infrastructure(_)));
    assert!(runtime.event_store().get_tenant_events(&ctx, 0, 10).unwrap().is_empty());
}

#[test]
fn expired_deadline_fails_read_model_queries() {
    let runtime = setup();
    let ctx = tenant();
    let id = create_component(&runtime, &ctx, "Payments");
    let expired = ctx.clone().with_deadline(Instant::now());

    let catalog = runtime.component_catalog();
    assert!(matches!(
        catalog.get_all_paginated(&expired, &Page::first(10)),
        Err(ReadModelError::Context(ContextError::DeadlineExceeded(_)))
    ));
    assert!(matches!(
        catalog.get_by_id(&expired, id),
        Err(ReadModelError::Context(ContextError::DeadlineExceeded(_)))
    ));
    assert_eq!(catalog.get_all_paginated(&ctx, &Page::first(10)).unwrap().len(), 1);
}

#[test]
fn unknown_command_is_rejected() {
    #[derive(Debug)]
    struct Unrouted;

    impl archcat_events::Command for Unrouted {
        fn name(&self) -> &'static str {
            "nobody.handles.this"
        }
    }

    let runtime = setup();
    let err = runtime.dispatch(&tenant(), &Unrouted).unwrap_err();
    assert!(matches!(err, DispatchError::HandlerNotFound(name) if name == "nobody.handles.this"));
}

#[test]
fn publish_failure_is_swallowed_and_replay_repairs_the_read_model() {
    let runtime = setup();
    let ctx = tenant();

    // Global handlers run first and abort delivery on error.
    let failing = Arc::new(AtomicBool::new(true));
    let gate = failing.clone();
    runtime.bus().subscribe_all(handler_fn("flaky-gate", move |_, _| {
        if gate.load(Ordering::SeqCst) {
            Err(HandlerError::ReadModel("broker down".to_string()))
        } else {
            Ok(())
        }
    }));

    let id = create_component(&runtime, &ctx, "Payments");
    assert_eq!(runtime.event_store().get_events(&ctx, id.0).unwrap().len(), 1);
    assert_eq!(runtime.component_catalog().get_by_id(&ctx, id).unwrap(), None);

    failing.store(false, Ordering::SeqCst);
    let reports = runtime.rebuild_read_models(&ctx).unwrap();
    assert_eq!(reports[0].applied, 1);

    let row = runtime
        .component_catalog()
        .get_by_id(&ctx, id)
        .unwrap()
        .unwrap();
    assert_eq!(row.name, "Payments");
}

#[test]
fn rebuild_is_deterministic() {
    let runtime = setup();
    let ctx = tenant();
    for name in ["A", "B", "C"] {
        let id = create_component(&runtime, &ctx, name);
        rename_component(&runtime, &ctx, id, &format!("{name}!")).unwrap();
    }
    let before = runtime
        .component_catalog()
        .get_all_paginated(&ctx, &Page::first(10))
        .unwrap();

    runtime.rebuild_read_models(&ctx).unwrap();
    runtime.rebuild_read_models(&ctx).unwrap();

    let after = runtime
        .component_catalog()
        .get_all_paginated(&ctx, &Page::first(10))
        .unwrap();
    assert_eq!(before, after);
    assert_eq!(after.len(), 3);
}

#[test]
fn capability_rename_fans_out_to_children() {
    let runtime = setup();
    let ctx = tenant();

    let root = runtime
        .dispatch(
            &ctx,
            &CreateCapability {
                name: "Customer Management".to_string(),
                description: String::new(),
                parent_id: None,
            },
        )
        .unwrap()
        .aggregate_id();
    let root = CapabilityId::new(root);
    let child = runtime
        .dispatch(
            &ctx,
            &CreateCapability {
                name: "Onboarding".to_string(),
                description: String::new(),
                parent_id: Some(root),
            },
        )
        .unwrap()
        .aggregate_id();

    runtime
        .dispatch(
            &ctx,
            &UpdateCapability {
                capability_id: root,
                name: "Customer Lifecycle".to_string(),
                description: String::new(),
            },
        )
        .unwrap();

    let hierarchy = runtime.capability_hierarchy();
    let children = hierarchy.children(&ctx, root).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, CapabilityId::new(child));
    assert_eq!(children[0].level, CapabilityLevel::L2);
    assert_eq!(children[0].parent_name.as_deref(), Some("Customer Lifecycle"));

    let catalog_row = runtime
        .capability_catalog()
        .get_by_id(&ctx, root)
        .unwrap()
        .unwrap();
    assert_eq!(catalog_row.name, "Customer Lifecycle");
}

#[test]
fn queued_mode_catches_up_on_flush() {
    archcat_observability::init_for_tests();
    let runtime = Runtime::in_memory(PublishMode::Queued, 2).unwrap();
    let ctx = tenant();

    let ids: Vec<ComponentId> = (0..20)
        .map(|i| create_component(&runtime, &ctx, &format!("app-{i:02}")))
        .collect();
    runtime.flush().unwrap();

    let rows = runtime
        .component_catalog()
        .get_all_paginated(&ctx, &Page::first(100))
        .unwrap();
    assert_eq!(rows.len(), ids.len());

    runtime.shutdown();
    let committed = runtime
        .dispatch(
            &ctx,
            &CreateComponent {
                name: "after shutdown".to_string(),
                description: String::new(),
            },
        )
        .unwrap();
    // The commit succeeds; only delivery is lost, and replay recovers it.
    assert_eq!(committed.version(), 1);
    runtime.rebuild_read_models(&ctx).unwrap();
    let row = runtime
        .component_catalog()
        .get_by_id(&ctx, ComponentId::new(committed.aggregate_id()))
        .unwrap();
    assert!(row.is_some());
}

#[test]
fn every_persisted_event_type_has_a_deserializer() {
    assert!(archcat_components::event_registry()
        .missing(archcat_components::EVENT_TYPES)
        .is_empty());
    assert!(archcat_capabilities::event_registry()
        .missing(archcat_capabilities::EVENT_TYPES)
        .is_empty());
}

#[test]
fn incomplete_registry_is_detected_on_load() {
    let store = Arc::new(InMemoryEventStore::new());
    let ctx = tenant();

    let full = EventSourcedRepository::<ApplicationComponent, _>::new(
        store.clone(),
        archcat_components::event_registry(),
    );
    let id = ComponentId::new(AggregateId::new());
    let mut component = ApplicationComponent::create(id, "Portal", "", Utc::now()).unwrap();
    component.update("Portal 2", "", Utc::now()).unwrap();
    full.save(&ctx, &mut component).unwrap();

    let partial = EventSourcedRepository::<ApplicationComponent, _>::new(
        store,
        EventRegistry::<ComponentEvent>::new()
            .register(COMPONENT_CREATED, ComponentEvent::ComponentCreated),
    );
    assert!(!partial
        .registry()
        .missing(archcat_components::EVENT_TYPES)
        .is_empty());
    let err = partial.get_by_id(&ctx, id.0).unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::IncompleteReplay { replayed: 1, stored: 2, .. }
    ));
}
