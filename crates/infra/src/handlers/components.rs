use std::sync::Arc;

use tracing::info;

use archcat_components::{
    ApplicationComponent, ComponentId, CreateComponent, DeleteComponent, UpdateComponent,
};
use archcat_core::{AggregateId, RequestContext};

use crate::command_bus::{typed_handler, CommandBus, DispatchError};
use crate::event_store::EventStore;
use crate::repository::EventSourcedRepository;

use super::{created, now, updated};

pub type ComponentRepository<S> = EventSourcedRepository<ApplicationComponent, S>;

/// Register the create/update/delete handlers for application components.
pub fn register_component_handlers<S>(bus: &CommandBus, repo: Arc<ComponentRepository<S>>)
where
    S: EventStore + 'static,
{
    let r = repo.clone();
    bus.register(
        CreateComponent::NAME,
        typed_handler::<CreateComponent, _>(move |ctx: &RequestContext, cmd: &CreateComponent| {
            let id = ComponentId::new(AggregateId::new());
            let mut component =
                ApplicationComponent::create(id, &cmd.name, &cmd.description, now())?;
            r.save(ctx, &mut component)?;
            info!(component_id = %id, "component created");
            Ok(created(&component))
        }),
    );

    let r = repo.clone();
    bus.register(
        UpdateComponent::NAME,
        typed_handler::<UpdateComponent, _>(move |ctx: &RequestContext, cmd: &UpdateComponent| {
            let mut component = load(&r, ctx, cmd.component_id)?;
            component.update(&cmd.name, &cmd.description, now())?;
            r.save(ctx, &mut component)?;
            Ok(updated(&component))
        }),
    );

    let r = repo;
    bus.register(
        DeleteComponent::NAME,
        typed_handler::<DeleteComponent, _>(move |ctx: &RequestContext, cmd: &DeleteComponent| {
            let mut component = load(&r, ctx, cmd.component_id)?;
            component.delete(now())?;
            r.save(ctx, &mut component)?;
            info!(component_id = %cmd.component_id, "component deleted");
            Ok(updated(&component))
        }),
    );
}

fn load<S: EventStore>(
    repo: &ComponentRepository<S>,
    ctx: &RequestContext,
    id: ComponentId,
) -> Result<ApplicationComponent, DispatchError> {
    Ok(repo.get_by_id(ctx, id.0)?)
}

#[cfg(test)]
mod tests {
    use archcat_components::event_registry;
    use archcat_core::TenantId;

    use super::*;
    use crate::event_store::InMemoryEventStore;

    fn setup() -> (CommandBus, Arc<ComponentRepository<Arc<InMemoryEventStore>>>) {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = Arc::new(EventSourcedRepository::new(store, event_registry()));
        let bus = CommandBus::new();
        register_component_handlers(&bus, repo.clone());
        (bus, repo)
    }

    #[test]
    fn create_update_delete_bumps_versions() {
        let (bus, repo) = setup();
        let ctx = RequestContext::for_tenant(TenantId::new());

        let res = bus
            .dispatch(
                &ctx,
                &CreateComponent {
                    name: "CRM".to_string(),
                    description: "customers".to_string(),
                },
            )
            .unwrap();
        let id = res.created_id().unwrap();
        assert_eq!(res.version(), 1);

        let res = bus
            .dispatch(
                &ctx,
                &UpdateComponent {
                    component_id: ComponentId::new(id),
                    name: "CRM 2".to_string(),
                    description: String::new(),
                },
            )
            .unwrap();
        assert_eq!((res.created_id(), res.version()), (None, 2));

        let res = bus
            .dispatch(&ctx, &DeleteComponent { component_id: ComponentId::new(id) })
            .unwrap();
        assert_eq!(res.version(), 3);

        let component = repo.get_by_id(&ctx, id).unwrap();
        assert_eq!(component.name(), "CRM 2");
    }

    #[test]
    fn invalid_name_writes_nothing() {
        let (bus, repo) = setup();
        let ctx = RequestContext::for_tenant(TenantId::new());

        let err = bus
            .dispatch(
                &ctx,
                &CreateComponent {
                    name: "   ".to_string(),
                    description: String::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert!(repo.store().is_empty());
    }

    #[test]
    fn unknown_component_is_not_found() {
        let (bus, _) = setup();
        let ctx = RequestContext::for_tenant(TenantId::new());
        let err = bus
            .dispatch(
                &ctx,
                &DeleteComponent {
                    component_id: ComponentId::new(AggregateId::new()),
                },
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[test]
    fn deleted_component_rejects_updates() {
        let (bus, _) = setup();
        let ctx = RequestContext::for_tenant(TenantId::new());
        let id = bus
            .dispatch(
                &ctx,
                &CreateComponent {
                    name: "Billing".to_string(),
                    description: String::new(),
                },
            )
            .unwrap()
            .aggregate_id();
        bus.dispatch(&ctx, &DeleteComponent { component_id: ComponentId::new(id) })
            .unwrap();

        let err = bus
            .dispatch(
                &ctx,
                &UpdateComponent {
                    component_id: ComponentId::new(id),
                    name: "Billing".to_string(),
                    description: String::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvariantViolation(_)));
    }

    #[test]
    fn missing_tenant_is_rejected() {
        let (bus, _) = setup();
        let err = bus
            .dispatch(
                &RequestContext::without_tenant(),
                &CreateComponent {
                    name: "CRM".to_string(),
                    description: String::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingTenant));
    }
}
