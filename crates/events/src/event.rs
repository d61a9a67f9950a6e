use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use archcat_core::AggregateId;

/// A domain event: an immutable fact about one aggregate.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (`schema_version` lets old payloads keep deserializing)
/// - **self-sufficient**: `event_data` holds everything needed to replay them
pub trait DomainEvent: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "components.component.created").
    fn event_type(&self) -> &'static str;

    /// Schema version of this event's payload.
    fn schema_version(&self) -> u32 {
        1
    }

    fn aggregate_id(&self) -> AggregateId;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// The payload as a JSON object, without any enum tagging.
    ///
    /// This is what gets persisted and what the registry deserializes by `event_type`.
    fn event_data(&self) -> Result<JsonValue, serde_json::Error>;
}
