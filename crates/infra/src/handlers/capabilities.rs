use std::sync::Arc;

use tracing::info;

use archcat_capabilities::{
    Capability, CapabilityId, CapabilityLevel, ChangeCapabilityParent, CreateCapability,
    DeleteCapability, UpdateCapability,
};
use archcat_core::{AggregateId, AggregateRoot, DomainError, RequestContext};

use crate::command_bus::{typed_handler, CommandBus, DispatchError};
use crate::event_store::EventStore;
use crate::repository::EventSourcedRepository;

use super::{created, now, updated};

pub type CapabilityRepository<S> = EventSourcedRepository<Capability, S>;

/// Register the capability command handlers.
///
/// Create and change-parent load the parent capability first: its level decides the
/// level of the child, and a deleted parent is refused.
pub fn register_capability_handlers<S>(bus: &CommandBus, repo: Arc<CapabilityRepository<S>>)
where
    S: EventStore + 'static,
{
    let r = repo.clone();
    bus.register(
        CreateCapability::NAME,
        typed_handler::<CreateCapability, _>(move |ctx: &RequestContext, cmd: &CreateCapability| {
            let level = match cmd.parent_id {
                None => CapabilityLevel::L1,
                Some(parent_id) => {
                    let parent = load(&r, ctx, parent_id)?;
                    parent.ensure_active()?;
                    parent.level().child().ok_or_else(|| {
                        DomainError::validation("L4 capabilities cannot have children")
                    })?
                }
            };

            let id = CapabilityId::new(AggregateId::new());
            let mut capability = Capability::create(
                id,
                &cmd.name,
                &cmd.description,
                level,
                cmd.parent_id,
                now(),
            )?;
            r.save(ctx, &mut capability)?;
            info!(capability_id = %id, level = ?level, "capability created");
            Ok(created(&capability))
        }),
    );

    let r = repo.clone();
    bus.register(
        UpdateCapability::NAME,
        typed_handler::<UpdateCapability, _>(move |ctx: &RequestContext, cmd: &UpdateCapability| {
            let mut capability = load(&r, ctx, cmd.capability_id)?;
            capability.update(&cmd.name, &cmd.description, now())?;
            r.save(ctx, &mut capability)?;
            Ok(updated(&capability))
        }),
    );

    let r = repo.clone();
    bus.register(
        ChangeCapabilityParent::NAME,
        typed_handler::<ChangeCapabilityParent, _>(
            move |ctx: &RequestContext, cmd: &ChangeCapabilityParent| {
                let mut capability = load(&r, ctx, cmd.capability_id)?;
                let parent = cmd
                    .parent_id
                    .map(|parent_id| load(&r, ctx, parent_id))
                    .transpose()?;
                capability.change_parent(parent.as_ref(), now())?;
                r.save(ctx, &mut capability)?;
                info!(
                    capability_id = %cmd.capability_id,
                    level = ?capability.level(),
                    "capability moved"
                );
                Ok(updated(&capability))
            },
        ),
    );

    let r = repo;
    bus.register(
        DeleteCapability::NAME,
        typed_handler::<DeleteCapability, _>(move |ctx: &RequestContext, cmd: &DeleteCapability| {
            let mut capability = load(&r, ctx, cmd.capability_id)?;
            capability.delete(now())?;
            r.save(ctx, &mut capability)?;
            info!(capability_id = %cmd.capability_id, "capability deleted");
            Ok(updated(&capability))
        }),
    );
}

fn load<S: EventStore>(
    repo: &CapabilityRepository<S>,
    ctx: &RequestContext,
    id: CapabilityId,
) -> Result<Capability, DispatchError> {
    Ok(repo.get_by_id(ctx, id.0)?)
}
