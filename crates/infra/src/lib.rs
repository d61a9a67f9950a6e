//! Infrastructure layer: event store backends, command bus, repositories, projections
//! and the runtime wiring them together.

mod blocking;

pub mod command_bus;
pub mod config;
pub mod event_bus;
pub mod event_store;
pub mod handlers;
pub mod projections;
pub mod read_model;
pub mod repository;
pub mod runtime;

pub use command_bus::{typed_handler, CommandBus, CommandHandler, DispatchError};
pub use config::{ConfigError, InfraConfig, PublishMode};
pub use event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
pub use repository::{EventSourcedRepository, RepositoryError};
pub use runtime::Runtime;

#[cfg(test)]
mod integration_tests;
