use archcat_core::{RequestContext, TenantId};

use crate::bus::HandlerError;
use crate::EventEnvelope;

/// Helper trait for tenant-scoped messages.
///
/// Lets tenant-aware infrastructure (projectors, queued delivery) check which tenant a
/// message belongs to without knowing its payload.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id()
    }
}

/// Resolve the context tenant and check that `message` belongs to it.
pub fn ensure_tenant<M: TenantScoped>(
    ctx: &RequestContext,
    message: &M,
) -> Result<TenantId, HandlerError> {
    let tenant_id = ctx.tenant()?;
    if message.tenant_id() != tenant_id {
        return Err(HandlerError::TenantIsolation(format!(
            "message tenant {} does not match context tenant {}",
            message.tenant_id(),
            tenant_id
        )));
    }
    Ok(tenant_id)
}
