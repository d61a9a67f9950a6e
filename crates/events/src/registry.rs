//! Event deserializer registry.
//!
//! Maps a stored `event_type` to the function that turns its JSON payload back into the
//! aggregate's event enum. One registry per aggregate type, built by the bounded context
//! and injected into the repository.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to deserialize {event_type}: {source}")]
pub struct RegistryError {
    pub event_type: String,
    #[source]
    pub source: serde_json::Error,
}

type DeserializeFn<E> = Box<dyn Fn(JsonValue) -> Result<E, serde_json::Error> + Send + Sync>;

pub struct EventRegistry<E> {
    entries: HashMap<&'static str, DeserializeFn<E>>,
}

impl<E> Default for EventRegistry<E> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<E> core::fmt::Debug for EventRegistry<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut types = self.event_types();
        types.sort_unstable();
        f.debug_struct("EventRegistry").field("event_types", &types).finish()
    }
}

impl<E: 'static> EventRegistry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payload type `P` for `event_type`, wrapped into the event enum by `wrap`.
    pub fn register<P>(mut self, event_type: &'static str, wrap: fn(P) -> E) -> Self
    where
        P: DeserializeOwned + 'static,
    {
        self.entries.insert(
            event_type,
            Box::new(move |data| serde_json::from_value::<P>(data).map(wrap)),
        );
        self
    }

    /// Register a hand-written deserializer (e.g. an upcaster for an old schema).
    pub fn register_fn<F>(mut self, event_type: &'static str, f: F) -> Self
    where
        F: Fn(JsonValue) -> Result<E, serde_json::Error> + Send + Sync + 'static,
    {
        self.entries.insert(event_type, Box::new(f));
        self
    }
}

impl<E> EventRegistry<E> {
    pub fn contains(&self, event_type: &str) -> bool {
        self.entries.contains_key(event_type)
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    /// Deserialize a stored payload.
    ///
    /// Returns `Ok(None)` when `event_type` has no registered deserializer.
    pub fn deserialize(&self, event_type: &str, data: JsonValue) -> Result<Option<E>, RegistryError> {
        let Some(f) = self.entries.get(event_type) else {
            return Ok(None);
        };
        f(data).map(Some).map_err(|source| RegistryError {
            event_type: event_type.to_string(),
            source,
        })
    }

    /// Event types from `expected` that have no deserializer.
    pub fn missing<'a>(&self, expected: &[&'a str]) -> Vec<&'a str> {
        expected
            .iter()
            .copied()
            .filter(|t| !self.contains(t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Renamed {
        name: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Ev {
        Renamed(Renamed),
        Legacy(String),
    }

    fn registry() -> EventRegistry<Ev> {
        EventRegistry::new()
            .register("thing.renamed", Ev::Renamed)
            .register_fn("thing.legacy", |data| {
                Ok(Ev::Legacy(data["label"].as_str().unwrap_or_default().to_string()))
            })
    }

    #[test]
    fn deserializes_registered_payloads() {
        let ev = registry()
            .deserialize("thing.renamed", json!({ "name": "CRM" }))
            .unwrap();
        assert_eq!(ev, Some(Ev::Renamed(Renamed { name: "CRM".to_string() })));

        let legacy = registry()
            .deserialize("thing.legacy", json!({ "label": "old" }))
            .unwrap();
        assert_eq!(legacy, Some(Ev::Legacy("old".to_string())));
    }

    #[test]
    fn unknown_type_yields_none() {
        assert!(registry().deserialize("thing.unknown", json!({})).unwrap().is_none());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let err = registry()
            .deserialize("thing.renamed", json!({ "nom": 1 }))
            .unwrap_err();
        assert_eq!(err.event_type, "thing.renamed");
    }

    #[test]
    fn missing_reports_unregistered_types() {
        let missing = registry().missing(&["thing.renamed", "thing.deleted"]);
        assert_eq!(missing, vec!["thing.deleted"]);
    }
}
