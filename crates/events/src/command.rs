use std::any::Any;

use serde::{Deserialize, Serialize};

use archcat_core::AggregateId;

/// Upcast helper so type-erased commands can be downcast by their handler.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A named intent to change state (command abstraction).
///
/// Commands represent **intent** and are transient (never persisted); accepted commands
/// turn into events, which are. The command bus routes on [`Command::name`], so names
/// must be unique across the whole application (e.g. "components.create").
///
/// Multi-tenancy is not part of the command: the tenant travels in the
/// `RequestContext` handed to `dispatch`.
pub trait Command: AsAny + core::fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> &'static str;
}

/// Outcome of a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    aggregate_id: AggregateId,
    version: u64,
    created: bool,
}

impl CommandResult {
    /// A command that created a new aggregate.
    pub fn created(aggregate_id: AggregateId, version: u64) -> Self {
        Self {
            aggregate_id,
            version,
            created: true,
        }
    }

    /// A command that changed an existing aggregate.
    pub fn updated(aggregate_id: AggregateId, version: u64) -> Self {
        Self {
            aggregate_id,
            version,
            created: false,
        }
    }

    /// Id of the aggregate the command created, if it created one.
    pub fn created_id(&self) -> Option<AggregateId> {
        self.created.then_some(self.aggregate_id)
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    /// Aggregate version after the command was committed.
    pub fn version(&self) -> u64 {
        self.version
    }
}
