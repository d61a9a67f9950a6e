//! Projection replay: rebuild read models from the event log.
//!
//! Used to correct read models left stale by a swallowed publish failure or by a
//! partially applied fan-out, and to populate a newly added projection.

use thiserror::Error;
use tracing::{info, instrument};

use archcat_core::{ContextError, RequestContext};
use archcat_events::{HandlerError, Projector};

use crate::event_store::{EventStore, EventStoreError};
use crate::projections::Resettable;
use crate::read_model::ReadModelError;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("failed to reset read model: {0}")]
    Reset(#[from] ReadModelError),

    #[error("projector '{projector}' failed on {event_type} (event {event_id}): {source}")]
    Projection {
        projector: &'static str,
        event_type: String,
        event_id: u64,
        #[source]
        source: HandlerError,
    },
}

/// Outcome of a replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Events read from the tenant log.
    pub scanned: u64,
    /// Events handed to the projector.
    pub applied: u64,
    /// Store position of the last scanned event (0 if none).
    pub last_event_id: u64,
}

/// Re-drives a tenant's event log through projectors, page by page.
pub struct ProjectionReplayer<S> {
    store: S,
    batch_size: usize,
}

impl<S> ProjectionReplayer<S>
where
    S: EventStore,
{
    pub const DEFAULT_BATCH_SIZE: usize = 500;

    pub fn new(store: S) -> Self {
        Self {
            store,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Feed every event of the context tenant with `id > after_id` to `projector`.
    ///
    /// Projectors are idempotent, so replaying over an up-to-date read model is safe.
    /// The context deadline is checked before each page.
    #[instrument(skip(self, ctx, projector), fields(projector = projector.name()), err)]
    pub fn replay<P>(
        &self,
        ctx: &RequestContext,
        projector: &P,
        after_id: u64,
    ) -> Result<ReplayReport, ReplayError>
    where
        P: Projector + ?Sized,
    {
        let mut report = ReplayReport {
            last_event_id: after_id,
            ..ReplayReport::default()
        };

        loop {
            ctx.check_deadline("replay")?;
            let batch = self
                .store
                .get_tenant_events(ctx, report.last_event_id, self.batch_size)?;
            let Some(last) = batch.last() else {
                break;
            };
            report.last_event_id = last.id;

            for stored in &batch {
                report.scanned += 1;
                if !projector.handles(&stored.event_type) {
                    continue;
                }
                projector
                    .project(ctx, &stored.to_envelope())
                    .map_err(|source| ReplayError::Projection {
                        projector: projector.name(),
                        event_type: stored.event_type.clone(),
                        event_id: stored.id,
                        source,
                    })?;
                report.applied += 1;
            }

            if batch.len() < self.batch_size {
                break;
            }
        }

        info!(
            scanned = report.scanned,
            applied = report.applied,
            "projection replay finished"
        );
        Ok(report)
    }

    /// Wipe the tenant's rows of `projection`, then replay the whole log into it.
    pub fn rebuild<P>(&self, ctx: &RequestContext, projection: &P) -> Result<ReplayReport, ReplayError>
    where
        P: Projector + Resettable + ?Sized,
    {
        projection.reset(ctx)?;
        self.replay(ctx, projection, 0)
    }
}
