//! Application components bounded context (event-sourced).
//!
//! Pure domain logic: no IO, no HTTP, no storage. The runtime in `archcat-infra` loads
//! and saves [`ApplicationComponent`] through its event history.

pub mod component;

pub use component::{
    event_registry, ApplicationComponent, ComponentCreated, ComponentDeleted, ComponentEvent,
    ComponentId, ComponentUpdated, CreateComponent, DeleteComponent, UpdateComponent,
    COMPONENT_CREATED, COMPONENT_DELETED, COMPONENT_UPDATED, EVENT_TYPES,
};
