//! Bus events.
//!
//! Services communicate through a broadcast bus of [`Event`]s. A service only
//! sees events whose type matches one of its subscription patterns.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::service::ServiceError;

/// An event on the daemon's broadcast bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type identifier (e.g. "plug/toggled", "controller/stop")
    pub event_type: String,

    /// Service or subsystem that published the event
    pub source: String,

    /// Payload
    pub data: serde_json::Value,

    /// Unix milliseconds at creation
    pub timestamp: u64,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            data,
            timestamp: unix_millis(),
        }
    }

    /// Check this event's type against a subscription pattern.
    ///
    /// Patterns are either an exact type, a `prefix/*` wildcard matching every
    /// type under that prefix, or `*` matching everything.
    pub fn matches(&self, pattern: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            return self
                .event_type
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'));
        }
        self.event_type == pattern
    }

    /// Get a field from the payload.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Get a string field from the payload.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Get a boolean field from the payload.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(|v| v.as_bool())
    }
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Cloneable handle for publishing events onto the bus.
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<Event>,
}

impl EventPublisher {
    pub fn new(tx: broadcast::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Publish an event. Fails only when nothing is listening.
    pub fn publish(&self, event: Event) -> Result<(), ServiceError> {
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|_| ServiceError::ChannelClosed)
    }

    /// Build and publish an event in one step.
    pub fn emit(
        &self,
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<(), ServiceError> {
        self.publish(Event::new(event_type, source, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matching() {
        let event = Event::new("controller/stop", "test", serde_json::Value::Null);

        assert!(event.matches("controller/stop"));
        assert!(event.matches("controller/*"));
        assert!(event.matches("*"));
        assert!(!event.matches("controller/start"));
        assert!(!event.matches("plug/*"));

        // A bare prefix is not covered by its own wildcard.
        let bare = Event::new("controller", "test", serde_json::Value::Null);
        assert!(!bare.matches("controller/*"));
        assert!(bare.matches("controller"));
    }

    #[test]
    fn payload_accessors() {
        let event = Event::new(
            "plug/toggled",
            "presence/controller",
            serde_json::json!({"plug": "desk", "on": true}),
        );

        assert_eq!(event.get_str("plug"), Some("desk"));
        assert_eq!(event.get_bool("on"), Some(true));
        assert!(event.get("missing").is_none());
        assert!(event.timestamp > 0);
    }
}
