//! Capability read models.
//!
//! A capability rename fans out to two read models maintained by two projectors:
//! the catalog row of the capability itself, and the cached `parent_name` of every
//! child node in the hierarchy. The projectors run independently; if one fails the other
//! may already be applied, and a replay reconciles them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use archcat_capabilities::{
    event_registry, CapabilityEvent, CapabilityId, CapabilityLevel, EVENT_TYPES,
};
use archcat_core::{AggregateId, RequestContext, TenantId};
use archcat_events::{ensure_tenant, EventRegistry, HandlerError, Projector, PublishedEvent};

use crate::projections::{decode, Resettable};
use crate::read_model::{Page, ReadModelError, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityReadModel {
    pub id: CapabilityId,
    pub name: String,
    pub description: String,
    pub level: CapabilityLevel,
    pub parent_id: Option<CapabilityId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Capability catalog: one row per live capability.
pub struct CapabilityCatalogProjection<S>
where
    S: TenantStore<AggregateId, CapabilityReadModel>,
{
    store: S,
    registry: EventRegistry<CapabilityEvent>,
}

impl<S> CapabilityCatalogProjection<S>
where
    S: TenantStore<AggregateId, CapabilityReadModel>,
{
    pub const NAME: &'static str = "capabilities.catalog";

    pub fn new(store: S) -> Self {
        Self {
            store,
            registry: event_registry(),
        }
    }

    pub fn get_by_id(
        &self,
        ctx: &RequestContext,
        id: CapabilityId,
    ) -> Result<Option<CapabilityReadModel>, ReadModelError> {
        self.store.read(ctx, &id.0)
    }

    pub fn get_all_paginated(
        &self,
        ctx: &RequestContext,
        page: &Page<AggregateId>,
    ) -> Result<Vec<CapabilityReadModel>, ReadModelError> {
        self.store.read_page(ctx, page)
    }

    fn modify(
        &self,
        tenant_id: TenantId,
        id: CapabilityId,
        f: impl FnOnce(&mut CapabilityReadModel),
    ) -> Result<(), ReadModelError> {
        if let Some(mut row) = self.store.get(tenant_id, &id.0)? {
            f(&mut row);
            self.store.update(tenant_id, &id.0, row)?;
        }
        Ok(())
    }
}

impl<S> Projector for CapabilityCatalogProjection<S>
where
    S: TenantStore<AggregateId, CapabilityReadModel>,
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
            CapabilityEvent::CapabilityCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    e.capability_id.0,
                    CapabilityReadModel {
                        id: e.capability_id,
                        name: e.name,
                        description: e.description,
                        level: e.level,
                        parent_id: e.parent_id,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                )?;
            }
            CapabilityEvent::CapabilityUpdated(e) => {
                self.modify(tenant_id, e.capability_id, |row| {
                    row.name = e.name;
                    row.description = e.description;
                    row.updated_at = e.occurred_at;
                })?;
            }
            CapabilityEvent::CapabilityParentChanged(e) => {
                self.modify(tenant_id, e.capability_id, |row| {
                    row.parent_id = e.parent_id;
                    row.level = e.level;
                    row.updated_at = e.occurred_at;
                })?;
            }
            CapabilityEvent::CapabilityDeleted(e) => {
                self.store.mark_deleted(tenant_id, &e.capability_id.0)?;
            }
        }
        Ok(())
    }
}

impl<S> Resettable for CapabilityCatalogProjection<S>
where
    S: TenantStore<AggregateId, CapabilityReadModel>,
{
    fn reset(&self, ctx: &RequestContext) -> Result<(), ReadModelError> {
        self.store.clear_tenant(ctx.tenant()?)
    }
}

/// Hierarchy node with the parent's name denormalized for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityNode {
    pub id: CapabilityId,
    pub name: String,
    pub level: CapabilityLevel,
    pub parent_id: Option<CapabilityId>,
    pub parent_name: Option<String>,
}

/// Capability tree with cached parent names.
pub struct CapabilityHierarchyProjection<S>
where
    S: TenantStore<AggregateId, CapabilityNode>,
{
    store: S,
    registry: EventRegistry<CapabilityEvent>,
}

impl<S> CapabilityHierarchyProjection<S>
where
    S: TenantStore<AggregateId, CapabilityNode>,
{
    pub const NAME: &'static str = "capabilities.hierarchy";

    pub fn new(store: S) -> Self {
        Self {
            store,
            registry: event_registry(),
        }
    }

    pub fn get_by_id(
        &self,
        ctx: &RequestContext,
        id: CapabilityId,
    ) -> Result<Option<CapabilityNode>, ReadModelError> {
        self.store.read(ctx, &id.0)
    }

    pub fn get_all_paginated(
        &self,
        ctx: &RequestContext,
        page: &Page<AggregateId>,
    ) -> Result<Vec<CapabilityNode>, ReadModelError> {
        self.store.read_page(ctx, page)
    }

    /// Live direct children of `parent_id`.
    pub fn children(
        &self,
        ctx: &RequestContext,
        parent_id: CapabilityId,
    ) -> Result<Vec<CapabilityNode>, ReadModelError> {
        Ok(direct_children(self.store.read_all(ctx)?, parent_id))
    }

    fn children_of(
        &self,
        tenant_id: TenantId,
        parent_id: CapabilityId,
    ) -> Result<Vec<CapabilityNode>, ReadModelError> {
        Ok(direct_children(self.store.list(tenant_id)?, parent_id))
    }

    fn parent_name(
        &self,
        tenant_id: TenantId,
        parent_id: Option<CapabilityId>,
    ) -> Result<Option<String>, ReadModelError> {
        match parent_id {
            None => Ok(None),
            Some(p) => Ok(self.store.get(tenant_id, &p.0)?.map(|n| n.name)),
        }
    }
}

fn direct_children(nodes: Vec<CapabilityNode>, parent_id: CapabilityId) -> Vec<CapabilityNode> {
    nodes
        .into_iter()
        .filter(|n| n.parent_id == Some(parent_id))
        .collect()
}

impl<S> Projector for CapabilityHierarchyProjection<S>
where
    S: TenantStore<AggregateId, CapabilityNode>,
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
            CapabilityEvent::CapabilityCreated(e) => {
                let parent_name = self.parent_name(tenant_id, e.parent_id)?;
                self.store.upsert(
                    tenant_id,
                    e.capability_id.0,
                    CapabilityNode {
                        id: e.capability_id,
                        name: e.name,
                        level: e.level,
                        parent_id: e.parent_id,
                        parent_name,
                    },
                )?;
            }
            CapabilityEvent::CapabilityUpdated(e) => {
                if let Some(mut node) = self.store.get(tenant_id, &e.capability_id.0)? {
                    node.name = e.name.clone();
                    self.store.update(tenant_id, &e.capability_id.0, node)?;
                }

                let children = self.children_of(tenant_id, e.capability_id)?;
                debug!(
                    capability_id = %e.capability_id,
                    children = children.len(),
                    "refreshing cached parent name"
                );
                for mut child in children {
                    child.parent_name = Some(e.name.clone());
                    let child_id = child.id.0.clone();
                    self.store.update(tenant_id, &child_id, child)?;
                }
            }
            CapabilityEvent::CapabilityParentChanged(e) => {
                let parent_name = self.parent_name(tenant_id, e.parent_id)?;
                if let Some(mut node) = self.store.get(tenant_id, &e.capability_id.0)? {
                    node.parent_id = e.parent_id;
                    node.level = e.level;
                    node.parent_name = parent_name;
                    self.store.update(tenant_id, &e.capability_id.0, node)?;
                }
            }
            CapabilityEvent::CapabilityDeleted(e) => {
                self.store.mark_deleted(tenant_id, &e.capability_id.0)?;

                // Children keep their parent id; only the cached name goes.
                for mut child in self.children_of(tenant_id, e.capability_id)? {
                    if child.parent_name.take().is_some() {
                        let child_id = child.id.0.clone();
                        self.store.update(tenant_id, &child_id, child)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl<S> Resettable for CapabilityHierarchyProjection<S>
where
    S: TenantStore<AggregateId, CapabilityNode>,
{
    fn reset(&self, ctx: &RequestContext) -> Result<(), ReadModelError> {
        self.store.clear_tenant(ctx.tenant()?)
    }
}
