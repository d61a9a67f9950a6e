//! Domain events, buses and projection contracts.
//!
//! Mechanics only: nothing in this crate performs IO. Storage lives in
//! `archcat-infra`, business rules in the bounded-context crates.

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod projection;
pub mod registry;
pub mod tenant;

pub use bus::{handler_fn, BusError, EventBus, EventHandler, HandlerError, PublishedEvent};
pub use command::{AsAny, Command, CommandResult};
pub use envelope::EventEnvelope;
pub use event::DomainEvent;
pub use in_memory_bus::InMemoryEventBus;
pub use projection::{subscribe_projector, Projector};
pub use registry::{EventRegistry, RegistryError};
pub use tenant::{ensure_tenant, TenantScoped};
