//! Request context: the tenant boundary and deadline carried through every call.
//!
//! The context is immutable once built. Stores and read models resolve the tenant
//! from it at every boundary; there is no default tenant.

use std::time::{Duration, Instant};

use thiserror::Error;
use uuid::Uuid;

use crate::id::TenantId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// No tenant was attached to the context (configuration/programmer error).
    #[error("missing tenant in request context")]
    MissingTenant,

    /// The caller's deadline passed before the operation started.
    #[error("deadline exceeded before {0}")]
    DeadlineExceeded(&'static str),
}

/// Per-request context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    tenant_id: Option<TenantId>,
    correlation_id: Uuid,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context scoped to a tenant.
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            correlation_id: Uuid::now_v7(),
            deadline: None,
        }
    }

    /// Context without a tenant. Any tenant-scoped operation fails with
    /// [`ContextError::MissingTenant`].
    pub fn without_tenant() -> Self {
        Self {
            tenant_id: None,
            correlation_id: Uuid::now_v7(),
            deadline: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Resolve the tenant, failing closed when absent.
    pub fn tenant(&self) -> Result<TenantId, ContextError> {
        self.tenant_id.ok_or(ContextError::MissingTenant)
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail if the deadline has already passed. `operation` names the step for errors.
    pub fn check_deadline(&self, operation: &'static str) -> Result<(), ContextError> {
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(ContextError::DeadlineExceeded(operation)),
            _ => Ok(()),
        }
    }
}

/// Resolve the tenant of a context.
pub fn get_tenant(ctx: &RequestContext) -> Result<TenantId, ContextError> {
    ctx.tenant()
}
