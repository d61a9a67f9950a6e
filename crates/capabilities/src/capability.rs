use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use archcat_core::{AggregateCore, AggregateId, AggregateRoot, DomainError, DomainResult, Name};
use archcat_events::{Command, DomainEvent, EventRegistry};

/// Business capability identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(pub AggregateId);

impl CapabilityId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl From<AggregateId> for CapabilityId {
    fn from(value: AggregateId) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Depth of a capability in the capability map (L1 is a root).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CapabilityLevel {
    L1,
    L2,
    L3,
    L4,
}

impl CapabilityLevel {
    /// Level of a child of this capability, if the map allows one.
    pub fn child(self) -> Option<Self> {
        match self {
            CapabilityLevel::L1 => Some(CapabilityLevel::L2),
            CapabilityLevel::L2 => Some(CapabilityLevel::L3),
            CapabilityLevel::L3 => Some(CapabilityLevel::L4),
            CapabilityLevel::L4 => None,
        }
    }
}

pub const CAPABILITY_CREATED: &str = "capabilities.capability.created";
pub const CAPABILITY_UPDATED: &str = "capabilities.capability.updated";
pub const CAPABILITY_PARENT_CHANGED: &str = "capabilities.capability.parent_changed";
pub const CAPABILITY_DELETED: &str = "capabilities.capability.deleted";

/// Every event type a [`Capability`] can raise.
pub const EVENT_TYPES: &[&str] = &[
    CAPABILITY_CREATED,
    CAPABILITY_UPDATED,
    CAPABILITY_PARENT_CHANGED,
    CAPABILITY_DELETED,
];

/// Event: CapabilityCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityCreated {
    pub capability_id: CapabilityId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub level: CapabilityLevel,
    #[serde(default)]
    pub parent_id: Option<CapabilityId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CapabilityUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityUpdated {
    pub capability_id: CapabilityId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CapabilityParentChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityParentChanged {
    pub capability_id: CapabilityId,
    pub parent_id: Option<CapabilityId>,
    pub level: CapabilityLevel,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CapabilityDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDeleted {
    pub capability_id: CapabilityId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityEvent {
    CapabilityCreated(CapabilityCreated),
    CapabilityUpdated(CapabilityUpdated),
    CapabilityParentChanged(CapabilityParentChanged),
    CapabilityDeleted(CapabilityDeleted),
}

impl DomainEvent for CapabilityEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CapabilityEvent::CapabilityCreated(_) => CAPABILITY_CREATED,
            CapabilityEvent::CapabilityUpdated(_) => CAPABILITY_UPDATED,
            CapabilityEvent::CapabilityParentChanged(_) => CAPABILITY_PARENT_CHANGED,
            CapabilityEvent::CapabilityDeleted(_) => CAPABILITY_DELETED,
        }
    }

    fn aggregate_id(&self) -> AggregateId {
        match self {
            CapabilityEvent::CapabilityCreated(e) => e.capability_id.0,
            CapabilityEvent::CapabilityUpdated(e) => e.capability_id.0,
            CapabilityEvent::CapabilityParentChanged(e) => e.capability_id.0,
            CapabilityEvent::CapabilityDeleted(e) => e.capability_id.0,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CapabilityEvent::CapabilityCreated(e) => e.occurred_at,
            CapabilityEvent::CapabilityUpdated(e) => e.occurred_at,
            CapabilityEvent::CapabilityParentChanged(e) => e.occurred_at,
            CapabilityEvent::CapabilityDeleted(e) => e.occurred_at,
        }
    }

    fn event_data(&self) -> Result<JsonValue, serde_json::Error> {
        match self {
            CapabilityEvent::CapabilityCreated(e) => serde_json::to_value(e),
            CapabilityEvent::CapabilityUpdated(e) => serde_json::to_value(e),
            CapabilityEvent::CapabilityParentChanged(e) => serde_json::to_value(e),
            CapabilityEvent::CapabilityDeleted(e) => serde_json::to_value(e),
        }
    }
}

/// Deserializers for every capability event type.
pub fn event_registry() -> EventRegistry<CapabilityEvent> {
    EventRegistry::new()
        .register(CAPABILITY_CREATED, CapabilityEvent::CapabilityCreated)
        .register(CAPABILITY_UPDATED, CapabilityEvent::CapabilityUpdated)
        .register(CAPABILITY_PARENT_CHANGED, CapabilityEvent::CapabilityParentChanged)
        .register(CAPABILITY_DELETED, CapabilityEvent::CapabilityDeleted)
}

/// Aggregate root: Capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    core: AggregateCore<CapabilityEvent>,
    name: String,
    description: String,
    level: CapabilityLevel,
    parent_id: Option<CapabilityId>,
}

impl Capability {
    /// Create a capability. A root (L1) has no parent; any other level needs one.
    pub fn create(
        id: CapabilityId,
        name: &str,
        description: &str,
        level: CapabilityLevel,
        parent_id: Option<CapabilityId>,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = Name::parse(name)?;
        validate_placement(id, level, parent_id)?;

        let mut capability = Self::empty(id.0);
        capability.raise_event(CapabilityEvent::CapabilityCreated(CapabilityCreated {
            capability_id: id,
            name: name.into_inner(),
            description: description.trim().to_string(),
            level,
            parent_id,
            occurred_at,
        }))?;
        Ok(capability)
    }

    pub fn update(
        &mut self,
        name: &str,
        description: &str,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active()?;
        let name = Name::parse(name)?;

        self.raise_event(CapabilityEvent::CapabilityUpdated(CapabilityUpdated {
            capability_id: self.capability_id(),
            name: name.into_inner(),
            description: description.trim().to_string(),
            occurred_at,
        }))
    }

    /// Move the capability under `parent` (or make it a root when `None`).
    ///
    /// `parent` is the parent's current state, loaded by the caller.
    pub fn change_parent(
        &mut self,
        parent: Option<&Capability>,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active()?;

        let (parent_id, level) = match parent {
            None => (None, CapabilityLevel::L1),
            Some(p) => {
                p.ensure_active()?;
                let level = p.level().child().ok_or_else(|| {
                    DomainError::validation("L4 capabilities cannot have children")
                })?;
                (Some(p.capability_id()), level)
            }
        };
        validate_placement(self.capability_id(), level, parent_id)?;

        self.raise_event(CapabilityEvent::CapabilityParentChanged(
            CapabilityParentChanged {
                capability_id: self.capability_id(),
                parent_id,
                level,
                occurred_at,
            },
        ))
    }

    pub fn delete(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_active()?;
        self.raise_event(CapabilityEvent::CapabilityDeleted(CapabilityDeleted {
            capability_id: self.capability_id(),
            occurred_at,
        }))
    }

    pub fn capability_id(&self) -> CapabilityId {
        CapabilityId(self.core.id())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn level(&self) -> CapabilityLevel {
        self.level
    }

    pub fn parent_id(&self) -> Option<CapabilityId> {
        self.parent_id
    }
}

fn validate_placement(
    id: CapabilityId,
    level: CapabilityLevel,
    parent_id: Option<CapabilityId>,
) -> DomainResult<()> {
    match (level, parent_id) {
        (CapabilityLevel::L1, Some(_)) => {
            Err(DomainError::validation("L1 capabilities cannot have a parent"))
        }
        (CapabilityLevel::L1, None) => Ok(()),
        (_, None) => Err(DomainError::validation(
            "only L1 capabilities can be created without a parent",
        )),
        (_, Some(parent)) if parent == id => {
            Err(DomainError::validation("a capability cannot be its own parent"))
        }
        (_, Some(_)) => Ok(()),
    }
}

impl AggregateRoot for Capability {
    type Event = CapabilityEvent;

    fn empty(id: AggregateId) -> Self {
        Self {
            core: AggregateCore::new(id),
            name: String::new(),
            description: String::new(),
            level: CapabilityLevel::L1,
            parent_id: None,
        }
    }

    fn core(&self) -> &AggregateCore<CapabilityEvent> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AggregateCore<CapabilityEvent> {
        &mut self.core
    }

    fn apply(&mut self, event: &CapabilityEvent) {
        match event {
            CapabilityEvent::CapabilityCreated(e) => {
                self.name = e.name.clone();
                self.description = e.description.clone();
                self.level = e.level;
                self.parent_id = e.parent_id;
            }
            CapabilityEvent::CapabilityUpdated(e) => {
                self.name = e.name.clone();
                self.description = e.description.clone();
            }
            CapabilityEvent::CapabilityParentChanged(e) => {
                self.parent_id = e.parent_id;
                self.level = e.level;
            }
            CapabilityEvent::CapabilityDeleted(_) => {}
        }
    }

    fn is_terminal(event: &CapabilityEvent) -> bool {
        matches!(event, CapabilityEvent::CapabilityDeleted(_))
    }
}

/// Command: CreateCapability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCapability {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_id: Option<CapabilityId>,
}

impl CreateCapability {
    pub const NAME: &'static str = "capabilities.create";
}

impl Command for CreateCapability {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

/// Command: UpdateCapability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCapability {
    pub capability_id: CapabilityId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl UpdateCapability {
    pub const NAME: &'static str = "capabilities.update";
}

impl Command for UpdateCapability {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

/// Command: ChangeCapabilityParent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCapabilityParent {
    pub capability_id: CapabilityId,
    pub parent_id: Option<CapabilityId>,
}

impl ChangeCapabilityParent {
    pub const NAME: &'static str = "capabilities.change_parent";
}

impl Command for ChangeCapabilityParent {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

/// Command: DeleteCapability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteCapability {
    pub capability_id: CapabilityId,
}

impl DeleteCapability {
    pub const NAME: &'static str = "capabilities.delete";
}

impl Command for DeleteCapability {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}
