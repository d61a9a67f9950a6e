//! Composition root: wires the event store, bus, repositories, command handlers and
//! projections into one runtime.
//!
//! ```text
//! dispatch(cmd) -> CommandBus -> handler -> repository.save
//!                                             -> PublishingEventStore
//!                                                  -> EventStore (commit)
//!                                                  -> EventBus (sync or queued)
//!                                                       -> projections -> read models
//! ```

use std::sync::Arc;

use sqlx::PgPool;
use tokio::runtime::Handle;
use tracing::{info, warn};

use archcat_core::{AggregateId, RequestContext};
use archcat_events::{
    subscribe_projector, BusError, Command, CommandResult, EventBus, InMemoryEventBus,
};

use crate::command_bus::{CommandBus, DispatchError};
use crate::config::{apply_migrations, connect_pool, InfraConfig, PublishMode};
use crate::event_bus::QueuedEventBus;
use crate::event_store::{
    EventStore, InMemoryEventStore, PostgresEventStore, PublishingEventStore,
};
use crate::handlers::capabilities::CapabilityRepository;
use crate::handlers::components::ComponentRepository;
use crate::handlers::{register_capability_handlers, register_component_handlers};
use crate::projections::{
    CapabilityCatalogProjection, CapabilityHierarchyProjection, CapabilityNode,
    CapabilityReadModel, ComponentCatalogProjection, ComponentReadModel, ProjectionReplayer,
    ReplayError, ReplayReport,
};
use crate::read_model::{InMemoryTenantStore, PostgresTenantStore, TenantStore};
use crate::repository::EventSourcedRepository;

pub type ReadStore<V> = Arc<dyn TenantStore<AggregateId, V>>;

/// The store repositories write through: commit, then publish.
pub type CommittingStore = Arc<PublishingEventStore<Arc<dyn EventStore>, Arc<dyn EventBus>>>;

/// Read-model backends for the built-in projections.
pub struct ReadStores {
    pub components: ReadStore<ComponentReadModel>,
    pub capabilities: ReadStore<CapabilityReadModel>,
    pub hierarchy: ReadStore<CapabilityNode>,
}

impl ReadStores {
    pub fn in_memory() -> Self {
        Self {
            components: Arc::new(InMemoryTenantStore::<AggregateId, ComponentReadModel>::new()),
            capabilities: Arc::new(InMemoryTenantStore::<AggregateId, CapabilityReadModel>::new()),
            hierarchy: Arc::new(InMemoryTenantStore::<AggregateId, CapabilityNode>::new()),
        }
    }

    pub fn postgres(pool: &PgPool, runtime: &Handle) -> Self {
        Self {
            components: Arc::new(PostgresTenantStore::<ComponentReadModel>::new(
                pool.clone(),
                runtime.clone(),
                ComponentCatalogProjection::<ReadStore<ComponentReadModel>>::NAME,
            )),
            capabilities: Arc::new(PostgresTenantStore::<CapabilityReadModel>::new(
                pool.clone(),
                runtime.clone(),
                CapabilityCatalogProjection::<ReadStore<CapabilityReadModel>>::NAME,
            )),
            hierarchy: Arc::new(PostgresTenantStore::<CapabilityNode>::new(
                pool.clone(),
                runtime.clone(),
                CapabilityHierarchyProjection::<ReadStore<CapabilityNode>>::NAME,
            )),
        }
    }
}

pub struct Runtime {
    log: Arc<dyn EventStore>,
    bus: Arc<dyn EventBus>,
    queue: Option<Arc<QueuedEventBus<InMemoryEventBus>>>,
    commands: CommandBus,
    component_repo: Arc<ComponentRepository<CommittingStore>>,
    capability_repo: Arc<CapabilityRepository<CommittingStore>>,
    component_catalog: Arc<ComponentCatalogProjection<ReadStore<ComponentReadModel>>>,
    capability_catalog: Arc<CapabilityCatalogProjection<ReadStore<CapabilityReadModel>>>,
    capability_hierarchy: Arc<CapabilityHierarchyProjection<ReadStore<CapabilityNode>>>,
}

impl Runtime {
    /// Everything in process memory.
    pub fn in_memory(mode: PublishMode, queue_capacity: usize) -> Result<Self, BusError> {
        Self::assemble(
            Arc::new(InMemoryEventStore::new()),
            ReadStores::in_memory(),
            mode,
            queue_capacity,
        )
    }

    /// Postgres event log and read models. `runtime` drives the pool from sync callers.
    pub fn postgres(
        pool: PgPool,
        runtime: Handle,
        mode: PublishMode,
        queue_capacity: usize,
    ) -> Result<Self, BusError> {
        let stores = ReadStores::postgres(&pool, &runtime);
        Self::assemble(
            Arc::new(PostgresEventStore::new(pool, runtime)),
            stores,
            mode,
            queue_capacity,
        )
    }

    /// Build from configuration: Postgres (migrated) when a database URL is set,
    /// in-memory otherwise. Must be called inside a multi-threaded tokio runtime when
    /// Postgres is used.
    pub async fn from_config(config: &InfraConfig) -> anyhow::Result<Self> {
        let runtime = match config.database_url {
            Some(_) => {
                let pool = connect_pool(config).await?;
                apply_migrations(&pool).await?;
                Self::postgres(pool, Handle::current(), config.publish_mode, config.queue_capacity)?
            }
            None => Self::in_memory(config.publish_mode, config.queue_capacity)?,
        };
        Ok(runtime)
    }

    /// Wire an arbitrary event log and read-model backends together.
    pub fn assemble(
        log: Arc<dyn EventStore>,
        stores: ReadStores,
        mode: PublishMode,
        queue_capacity: usize,
    ) -> Result<Self, BusError> {
        let queue = match mode {
            PublishMode::Sync => None,
            PublishMode::Queued => Some(Arc::new(QueuedEventBus::spawn(
                "archcat-event-queue",
                InMemoryEventBus::new(),
                queue_capacity,
            )?)),
        };
        let bus: Arc<dyn EventBus> = match &queue {
            Some(queue) => queue.clone(),
            None => Arc::new(InMemoryEventBus::new()),
        };

        let component_catalog = Arc::new(ComponentCatalogProjection::new(stores.components));
        let capability_catalog = Arc::new(CapabilityCatalogProjection::new(stores.capabilities));
        let capability_hierarchy = Arc::new(CapabilityHierarchyProjection::new(stores.hierarchy));
        subscribe_projector(&bus, component_catalog.clone());
        subscribe_projector(&bus, capability_catalog.clone());
        subscribe_projector(&bus, capability_hierarchy.clone());

        let committing: CommittingStore =
            Arc::new(PublishingEventStore::new(log.clone(), bus.clone()));
        let component_repo = Arc::new(EventSourcedRepository::new(
            committing.clone(),
            archcat_components::event_registry(),
        ));
        let capability_repo = Arc::new(EventSourcedRepository::new(
            committing,
            archcat_capabilities::event_registry(),
        ));

        let commands = CommandBus::new();
        register_component_handlers(&commands, component_repo.clone());
        register_capability_handlers(&commands, capability_repo.clone());

        info!(
            publish_mode = ?mode,
            commands = commands.registered_commands().len(),
            "runtime assembled"
        );

        Ok(Self {
            log,
            bus,
            queue,
            commands,
            component_repo,
            capability_repo,
            component_catalog,
            capability_catalog,
            capability_hierarchy,
        })
    }

    pub fn dispatch(
        &self,
        ctx: &RequestContext,
        command: &dyn Command,
    ) -> Result<CommandResult, DispatchError> {
        self.commands.dispatch(ctx, command)
    }

    pub fn commands(&self) -> &CommandBus {
        &self.commands
    }

    /// The raw event log (no publishing).
    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.log
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn component_repository(&self) -> &ComponentRepository<CommittingStore> {
        &self.component_repo
    }

    pub fn capability_repository(&self) -> &CapabilityRepository<CommittingStore> {
        &self.capability_repo
    }

    pub fn component_catalog(&self) -> &ComponentCatalogProjection<ReadStore<ComponentReadModel>> {
        &self.component_catalog
    }

    pub fn capability_catalog(
        &self,
    ) -> &CapabilityCatalogProjection<ReadStore<CapabilityReadModel>> {
        &self.capability_catalog
    }

    pub fn capability_hierarchy(
        &self,
    ) -> &CapabilityHierarchyProjection<ReadStore<CapabilityNode>> {
        &self.capability_hierarchy
    }

    /// Wait for queued deliveries. A no-op in synchronous mode.
    pub fn flush(&self) -> Result<(), BusError> {
        match &self.queue {
            Some(queue) => queue.flush(),
            None => Ok(()),
        }
    }

    pub fn replayer(&self) -> ProjectionReplayer<Arc<dyn EventStore>> {
        ProjectionReplayer::new(self.log.clone())
    }

    /// Reset and replay every built-in projection for the context tenant.
    ///
    /// In queued mode pending deliveries are flushed first so they cannot land on top of
    /// the rebuilt rows.
    pub fn rebuild_read_models(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<ReplayReport>, ReplayError> {
        if let Err(err) = self.flush() {
            warn!(error = %err, "flush before rebuild failed");
        }
        let replayer = self.replayer();
        Ok(vec![
            replayer.rebuild(ctx, self.component_catalog.as_ref())?,
            replayer.rebuild(ctx, self.capability_catalog.as_ref())?,
            replayer.rebuild(ctx, self.capability_hierarchy.as_ref())?,
        ])
    }

    /// Drain and stop the delivery worker (queued mode).
    pub fn shutdown(&self) {
        if let Some(queue) = &self.queue {
            queue.shutdown();
        }
    }
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("queued", &self.queue.is_some())
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}
