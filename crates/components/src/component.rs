use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use archcat_core::{AggregateCore, AggregateId, AggregateRoot, DomainResult, Name};
use archcat_events::{Command, DomainEvent, EventRegistry};

/// Application component identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub AggregateId);

impl ComponentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl From<AggregateId> for ComponentId {
    fn from(value: AggregateId) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

pub const COMPONENT_CREATED: &str = "components.component.created";
pub const COMPONENT_UPDATED: &str = "components.component.updated";
pub const COMPONENT_DELETED: &str = "components.component.deleted";

/// Every event type an [`ApplicationComponent`] can raise.
pub const EVENT_TYPES: &[&str] = &[COMPONENT_CREATED, COMPONENT_UPDATED, COMPONENT_DELETED];

/// Event: ComponentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCreated {
    pub component_id: ComponentId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ComponentUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentUpdated {
    pub component_id: ComponentId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ComponentDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDeleted {
    pub component_id: ComponentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentEvent {
    ComponentCreated(ComponentCreated),
    ComponentUpdated(ComponentUpdated),
    ComponentDeleted(ComponentDeleted),
}

impl DomainEvent for ComponentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ComponentEvent::ComponentCreated(_) => COMPONENT_CREATED,
            ComponentEvent::ComponentUpdated(_) => COMPONENT_UPDATED,
            ComponentEvent::ComponentDeleted(_) => COMPONENT_DELETED,
        }
    }

    fn aggregate_id(&self) -> AggregateId {
        match self {
            ComponentEvent::ComponentCreated(e) => e.component_id.0,
            ComponentEvent::ComponentUpdated(e) => e.component_id.0,
            ComponentEvent::ComponentDeleted(e) => e.component_id.0,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ComponentEvent::ComponentCreated(e) => e.occurred_at,
            ComponentEvent::ComponentUpdated(e) => e.occurred_at,
            ComponentEvent::ComponentDeleted(e) => e.occurred_at,
        }
    }

    fn event_data(&self) -> Result<JsonValue, serde_json::Error> {
        match self {
            ComponentEvent::ComponentCreated(e) => serde_json::to_value(e),
            ComponentEvent::ComponentUpdated(e) => serde_json::to_value(e),
            ComponentEvent::ComponentDeleted(e) => serde_json::to_value(e),
        }
    }
}

/// Deserializers for every component event type.
pub fn event_registry() -> EventRegistry<ComponentEvent> {
    EventRegistry::new()
        .register(COMPONENT_CREATED, ComponentEvent::ComponentCreated)
        .register(COMPONENT_UPDATED, ComponentEvent::ComponentUpdated)
        .register(COMPONENT_DELETED, ComponentEvent::ComponentDeleted)
}

/// Aggregate root: ApplicationComponent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationComponent {
    core: AggregateCore<ComponentEvent>,
    name: String,
    description: String,
}

impl ApplicationComponent {
    /// Create a new component. Raises exactly one `ComponentCreated` (version 1).
    pub fn create(
        id: ComponentId,
        name: &str,
        description: &str,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = Name::parse(name)?;

        let mut component = Self::empty(id.0);
        component.raise_event(ComponentEvent::ComponentCreated(ComponentCreated {
            component_id: id,
            name: name.into_inner(),
            description: description.trim().to_string(),
            occurred_at,
        }))?;
        Ok(component)
    }

    pub fn update(
        &mut self,
        name: &str,
        description: &str,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active()?;
        let name = Name::parse(name)?;

        self.raise_event(ComponentEvent::ComponentUpdated(ComponentUpdated {
            component_id: self.component_id(),
            name: name.into_inner(),
            description: description.trim().to_string(),
            occurred_at,
        }))
    }

    pub fn delete(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_active()?;
        self.raise_event(ComponentEvent::ComponentDeleted(ComponentDeleted {
            component_id: self.component_id(),
            occurred_at,
        }))
    }

    pub fn component_id(&self) -> ComponentId {
        ComponentId(self.core.id())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl AggregateRoot for ApplicationComponent {
    type Event = ComponentEvent;

    fn empty(id: AggregateId) -> Self {
        Self {
            core: AggregateCore::new(id),
            name: String::new(),
            description: String::new(),
        }
    }

    fn core(&self) -> &AggregateCore<ComponentEvent> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AggregateCore<ComponentEvent> {
        &mut self.core
    }

    fn apply(&mut self, event: &ComponentEvent) {
        match event {
            ComponentEvent::ComponentCreated(e) => {
                self.name = e.name.clone();
                self.description = e.description.clone();
            }
            ComponentEvent::ComponentUpdated(e) => {
                self.name = e.name.clone();
                self.description = e.description.clone();
            }
            ComponentEvent::ComponentDeleted(_) => {}
        }
    }

    fn is_terminal(event: &ComponentEvent) -> bool {
        matches!(event, ComponentEvent::ComponentDeleted(_))
    }
}

/// Command: CreateComponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateComponent {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl CreateComponent {
    pub const NAME: &'static str = "components.create";
}

impl Command for CreateComponent {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

/// Command: UpdateComponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateComponent {
    pub component_id: ComponentId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl UpdateComponent {
    pub const NAME: &'static str = "components.update";
}

impl Command for UpdateComponent {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

/// Command: DeleteComponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteComponent {
    pub component_id: ComponentId,
}

impl DeleteComponent {
    pub const NAME: &'static str = "components.delete";
}

impl Command for DeleteComponent {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}
