//! Tenant-isolated read model storage abstractions.

pub mod postgres;
pub mod tenant_store;

pub use postgres::PostgresTenantStore;
pub use tenant_store::{InMemoryTenantStore, Page, ReadModelError, TenantStore};
