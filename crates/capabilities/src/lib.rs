//! Business capabilities bounded context (event-sourced).
//!
//! Capabilities form a map of up to four levels. Renaming a capability is projected into
//! more than one read model (catalog and the parent-name cache of its children).

pub mod capability;

pub use capability::{
    event_registry, Capability, CapabilityCreated, CapabilityDeleted, CapabilityEvent,
    CapabilityId, CapabilityLevel, CapabilityParentChanged, CapabilityUpdated,
    ChangeCapabilityParent, CreateCapability, DeleteCapability, UpdateCapability,
    CAPABILITY_CREATED, CAPABILITY_DELETED, CAPABILITY_PARENT_CHANGED, CAPABILITY_UPDATED,
    EVENT_TYPES,
};
