//! Projection implementations (read model builders).
//!
//! Projections consume published events and maintain query-optimized read models.
//! All projections are:
//! - **Rebuildable**: reset plus replay of the tenant log reconstructs them
//! - **Tenant-isolated**: rows are partitioned by the context tenant
//! - **Idempotent**: safe under at-least-once delivery

pub mod capabilities;
pub mod components;
pub mod replay;

pub use capabilities::{
    CapabilityCatalogProjection, CapabilityHierarchyProjection, CapabilityNode,
    CapabilityReadModel,
};
pub use components::{ComponentCatalogProjection, ComponentReadModel};
pub use replay::{ProjectionReplayer, ReplayError, ReplayReport};

use tracing::debug;

use archcat_core::RequestContext;
use archcat_events::{EventRegistry, HandlerError, PublishedEvent};

use crate::read_model::ReadModelError;

/// A projection whose rows for the context tenant can be wiped before a rebuild.
pub trait Resettable {
    fn reset(&self, ctx: &RequestContext) -> Result<(), ReadModelError>;
}

/// Decode a published payload with the bounded context's registry.
///
/// `Ok(None)` for event types the registry does not know.
pub(crate) fn decode<E: 'static>(
    registry: &EventRegistry<E>,
    event: &PublishedEvent,
) -> Result<Option<E>, HandlerError> {
    let decoded = registry
        .deserialize(event.event_type(), event.payload().clone())
        .map_err(|e| HandlerError::Deserialize {
            event_type: e.event_type.clone(),
            message: e.source.to_string(),
        })?;
    if decoded.is_none() {
        debug!(event_type = event.event_type(), "event type not handled by projection");
    }
    Ok(decoded)
}
