//! `archcat-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the aggregate-root event application model, the request/tenant
//! context and the domain error model.

pub mod aggregate;
pub mod context;
pub mod error;
pub mod id;
pub mod name;

pub use aggregate::{AggregateCore, AggregateRoot, ExpectedVersion, Lifecycle};
pub use context::{get_tenant, ContextError, RequestContext};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId};
pub use name::Name;
