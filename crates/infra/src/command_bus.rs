//! Command bus: routes a named command to exactly one handler.
//!
//! ```text
//! Command
//!   ↓ dispatch(ctx, &cmd)          lookup by Command::name()
//! CommandHandler
//!   ↓ repository.get_by_id / aggregate mutator / repository.save
//! CommandResult | DispatchError
//! ```
//!
//! The bus itself does no validation. Handler, repository and aggregate errors reach the
//! caller unchanged, mapped into one [`DispatchError`] taxonomy.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, warn};

use archcat_core::{ContextError, DomainError, RequestContext};
use archcat_events::{Command, CommandResult};

use crate::event_store::EventStoreError;
use crate::repository::RepositoryError;

/// Error taxonomy seen by command callers.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale aggregate version). Safe to retry.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Deterministic validation failure; nothing was written.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("missing tenant in request context")]
    MissingTenant,

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("no handler registered for command '{0}'")]
    HandlerNotFound(String),
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
        }
    }
}

impl From<ContextError> for DispatchError {
    fn from(value: ContextError) -> Self {
        match value {
            ContextError::MissingTenant => DispatchError::MissingTenant,
            ContextError::DeadlineExceeded(_) => DispatchError::Infrastructure(value.to_string()),
        }
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Context(ctx) => ctx.into(),
            EventStoreError::Concurrency { .. } => DispatchError::Concurrency(value.to_string()),
            EventStoreError::Serialization(_)
            | EventStoreError::Unavailable(_) => DispatchError::Infrastructure(value.to_string()),
        }
    }
}

impl From<RepositoryError> for DispatchError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound(id) => DispatchError::NotFound(format!("aggregate {id}")),
            RepositoryError::Store(err) => err.into(),
            RepositoryError::Deserialize(_) | RepositoryError::IncompleteReplay { .. } => {
                DispatchError::Infrastructure(value.to_string())
            }
        }
    }
}

/// Handles one command type. Receives the type-erased command; see [`typed_handler`].
pub trait CommandHandler: Send + Sync {
    fn handle(
        &self,
        ctx: &RequestContext,
        command: &dyn Command,
    ) -> Result<CommandResult, DispatchError>;
}

impl<F> CommandHandler for F
where
    F: Fn(&RequestContext, &dyn Command) -> Result<CommandResult, DispatchError> + Send + Sync,
{
    fn handle(
        &self,
        ctx: &RequestContext,
        command: &dyn Command,
    ) -> Result<CommandResult, DispatchError> {
        self(ctx, command)
    }
}

/// Adapt a handler written against a concrete command type.
///
/// A command of any other type (a routing mistake) fails with
/// [`DispatchError::Infrastructure`].
pub fn typed_handler<C, F>(f: F) -> Arc<dyn CommandHandler>
where
    C: Command,
    F: Fn(&RequestContext, &C) -> Result<CommandResult, DispatchError> + Send + Sync + 'static,
{
    Arc::new(
        move |ctx: &RequestContext, command: &dyn Command| -> Result<CommandResult, DispatchError> {
            let typed = command.as_any().downcast_ref::<C>().ok_or_else(|| {
                DispatchError::Infrastructure(format!(
                    "handler for {} received {:?}",
                    core::any::type_name::<C>(),
                    command
                ))
            })?;
            f(ctx, typed)
        },
    )
}

/// Name-keyed command router.
#[derive(Default)]
pub struct CommandBus {
    handlers: RwLock<HashMap<&'static str, Arc<dyn CommandHandler>>>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `name`. A second registration replaces the first.
    pub fn register(&self, name: &'static str, handler: Arc<dyn CommandHandler>) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handlers.insert(name, handler).is_some() {
            warn!(command = name, "command handler re-registered; previous handler replaced");
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }

    pub fn registered_commands(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .copied()
            .collect();
        names.sort_unstable();
        names
    }

    pub fn dispatch(
        &self,
        ctx: &RequestContext,
        command: &dyn Command,
    ) -> Result<CommandResult, DispatchError> {
        let name = command.name();
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::HandlerNotFound(name.to_string()))?;

        debug!(command = name, correlation_id = %ctx.correlation_id(), "dispatching command");
        handler.handle(ctx, command)
    }
}

impl core::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandBus")
            .field("commands", &self.registered_commands())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use archcat_core::{AggregateId, TenantId};

    use super::*;

    #[derive(Debug)]
    struct Ping;

    impl Command for Ping {
        fn name(&self) -> &'static str {
            "test.ping"
        }
    }

    #[derive(Debug)]
    struct Pong;

    impl Command for Pong {
        fn name(&self) -> &'static str {
            "test.ping"
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::for_tenant(TenantId::new())
    }

    #[test]
    fn unknown_command_is_handler_not_found() {
        let bus = CommandBus::new();
        let err = bus.dispatch(&ctx(), &Ping).unwrap_err();
        assert!(matches!(err, DispatchError::HandlerNotFound(name) if name == "test.ping"));
    }

    #[test]
    fn routes_to_the_registered_handler() {
        let bus = CommandBus::new();
        let id = AggregateId::new();
        bus.register(
            "test.ping",
            typed_handler(move |_, _: &Ping| Ok(CommandResult::created(id, 1))),
        );

        let result = bus.dispatch(&ctx(), &Ping).unwrap();
        assert_eq!(result.created_id(), Some(id));
        assert_eq!(result.version(), 1);
        assert!(bus.is_registered("test.ping"));
    }

    #[test]
    fn re_registration_replaces_the_previous_handler() {
        let bus = CommandBus::new();
        let id = AggregateId::new();
        bus.register(
            "test.ping",
            typed_handler(|_, _: &Ping| Err(DispatchError::Validation("old".to_string()))),
        );
        bus.register(
            "test.ping",
            typed_handler(move |_, _: &Ping| Ok(CommandResult::updated(id, 4))),
        );

        let result = bus.dispatch(&ctx(), &Ping).unwrap();
        assert_eq!(result.created_id(), None);
        assert_eq!(result.version(), 4);
        assert_eq!(bus.registered_commands(), vec!["test.ping"]);
    }

    #[test]
    fn handler_errors_pass_through_unchanged() {
        let bus = CommandBus::new();
        bus.register(
            "test.ping",
            typed_handler(|_, _: &Ping| Err(DomainError::validation("name is empty").into())),
        );

        let err = bus.dispatch(&ctx(), &Ping).unwrap_err();
        assert!(matches!(err, DispatchError::Validation(msg) if msg == "name is empty"));
    }

    #[test]
    fn wrong_command_type_is_rejected_by_typed_handler() {
        let bus = CommandBus::new();
        bus.register(
            "test.ping",
            typed_handler(|_, _: &Ping| Ok(CommandResult::updated(AggregateId::new(), 1))),
        );

        assert!(matches!(
            bus.dispatch(&ctx(), &Pong),
            Err(DispatchError::Infrastructure(_))
        ));
    }

    #[test]
    fn store_errors_map_into_the_taxonomy() {
        let conflict: DispatchError = EventStoreError::Concurrency {
            aggregate_id: AggregateId::new(),
            expected: archcat_core::ExpectedVersion::Exact(0),
            actual: 1,
        }
        .into();
        assert!(matches!(conflict, DispatchError::Concurrency(_)));

        let missing: DispatchError = EventStoreError::Context(ContextError::MissingTenant).into();
        assert!(matches!(missing, DispatchError::MissingTenant));

        let not_found: DispatchError = RepositoryError::NotFound(AggregateId::new()).into();
        assert!(matches!(not_found, DispatchError::NotFound(_)));
    }
}
