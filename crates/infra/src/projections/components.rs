use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use archcat_components::{event_registry, ComponentEvent, ComponentId, EVENT_TYPES};
use archcat_core::{AggregateId, RequestContext};
use archcat_events::{ensure_tenant, EventRegistry, HandlerError, Projector, PublishedEvent};

use crate::projections::{decode, Resettable};
use crate::read_model::{Page, ReadModelError, TenantStore};

/// Queryable application component (catalog row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentReadModel {
    pub id: ComponentId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Component catalog: one row per live component.
pub struct ComponentCatalogProjection<S>
where
    S: TenantStore<AggregateId, ComponentReadModel>,
{
    store: S,
    registry: EventRegistry<ComponentEvent>,
}

impl<S> ComponentCatalogProjection<S>
where
    S: TenantStore<AggregateId, ComponentReadModel>,
{
    pub const NAME: &'static str = "components.catalog";

    pub fn new(store: S) -> Self {
        Self {
            store,
            registry: event_registry(),
        }
    }

    pub fn get_by_id(
        &self,
        ctx: &RequestContext,
        id: ComponentId,
    ) -> Result<Option<ComponentReadModel>, ReadModelError> {
        self.store.read(ctx, &id.0)
    }

    pub fn get_all_paginated(
        &self,
        ctx: &RequestContext,
        page: &Page<AggregateId>,
    ) -> Result<Vec<ComponentReadModel>, ReadModelError> {
        self.store.read_page(ctx, page)
    }
}

impl<S> Projector for ComponentCatalogProjection<S>
where
    S: TenantStore<AggregateId, ComponentReadModel>,
{
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn event_types(&self) -> &'static [&'static str] {
        EVENT_TYPES
    }

    fn project(&self, ctx: &RequestContext, event: &PublishedEvent) -> Result<(), HandlerError> {
        let tenant_id = ensure_tenant(ctx, event)?;
        let Some(ev) = decode(&self.registry, event)? else {
            return Ok(());
        };

        match ev {
            ComponentEvent::ComponentCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    e.component_id.0,
                    ComponentReadModel {
                        id: e.component_id,
                        name: e.name,
                        description: e.description,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                )?;
            }
            ComponentEvent::ComponentUpdated(e) => {
                if let Some(mut row) = self.store.get(tenant_id, &e.component_id.0)? {
                    row.name = e.name;
                    row.description = e.description;
                    row.updated_at = e.occurred_at;
                    self.store.update(tenant_id, &e.component_id.0, row)?;
                }
            }
            ComponentEvent::ComponentDeleted(e) => {
                self.store.mark_deleted(tenant_id, &e.component_id.0)?;
            }
        }
        Ok(())
    }
}

impl<S> Resettable for ComponentCatalogProjection<S>
where
    S: TenantStore<AggregateId, ComponentReadModel>,
{
    fn reset(&self, ctx: &RequestContext) -> Result<(), ReadModelError> {
        self.store.clear_tenant(ctx.tenant()?)
    }
}
