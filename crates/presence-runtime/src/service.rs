//! Service abstraction.
//!
//! Implement [`Service`] and hand the instance to the
//! [`ServiceManager`](crate::ServiceManager); the manager owns the task,
//! delivers lifecycle calls, and routes subscribed bus events to `on_event`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventPublisher};

/// Errors surfaced by the service lifecycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("service failed to start: {0}")]
    StartFailed(String),

    #[error("service already running: {0}")]
    AlreadyRunning(String),

    #[error("service not running: {0}")]
    NotRunning(String),

    #[error("shutdown timed out")]
    ShutdownTimeout,

    #[error("channel closed")]
    ChannelClosed,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Static description of a service: identity, subscriptions, shutdown budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Unique service identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Event patterns routed to `on_event` (see [`Event::matches`])
    #[serde(default)]
    pub subscriptions: Vec<String>,

    /// Refuse a second instance with the same id
    #[serde(default = "default_singleton")]
    pub singleton: bool,

    /// Grace budget for `on_stop`
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_singleton() -> bool {
    true
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

impl ServiceSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            subscriptions: Vec::new(),
            singleton: true,
            shutdown_timeout: default_shutdown_timeout(),
            description: None,
        }
    }

    pub fn subscribe(mut self, pattern: impl Into<String>) -> Self {
        self.subscriptions.push(pattern.into());
        self
    }

    pub fn singleton(mut self, singleton: bool) -> Self {
        self.singleton = singleton;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Per-service context handed to every lifecycle call.
pub struct ServiceContext {
    pub service_id: String,

    /// Flat key-value configuration attributes for this service instance
    pub config: serde_json::Value,

    publisher: EventPublisher,
}

impl ServiceContext {
    pub fn new(service_id: String, config: serde_json::Value, publisher: EventPublisher) -> Self {
        Self {
            service_id,
            config,
            publisher,
        }
    }

    /// A publisher clone, for handing to background tasks the service owns.
    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    /// Publish an event sourced from this service.
    pub fn emit(&self, event_type: impl Into<String>, data: serde_json::Value) -> ServiceResult<()> {
        self.publisher
            .publish(Event::new(event_type, &self.service_id, data))
    }

    /// Get a string attribute from the config.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    /// Get a boolean attribute from the config.
    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(|v| v.as_bool())
    }
}

/// Lifecycle hooks for a managed service.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Static description of this service.
    fn spec(&self) -> ServiceSpec;

    /// Called once when the service starts. An error keeps the service from
    /// ever reaching `Running`.
    async fn on_start(&mut self, ctx: &ServiceContext) -> ServiceResult<()>;

    /// Called once when a started service stops. Not called when `on_start`
    /// failed.
    async fn on_stop(&mut self, ctx: &ServiceContext) -> ServiceResult<()>;

    /// Called for every bus event matching a subscription, and for events
    /// sent directly via the handle.
    async fn on_event(&mut self, _ctx: &ServiceContext, _event: Event) -> ServiceResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builder() {
        let spec = ServiceSpec::new("presence/controller", "Presence Controller")
            .subscribe("controller/*")
            .with_shutdown_timeout(Duration::from_secs(5))
            .with_description("toggles a plug on presence");

        assert_eq!(spec.id, "presence/controller");
        assert_eq!(spec.subscriptions, vec!["controller/*"]);
        assert_eq!(spec.shutdown_timeout, Duration::from_secs(5));
        assert!(spec.singleton);
        assert!(spec.description.is_some());
    }

    #[test]
    fn context_config_accessors() {
        let (tx, _rx) = tokio::sync::broadcast::channel(8);
        let ctx = ServiceContext::new(
            "test".into(),
            serde_json::json!({"sensor": "mmwave-office", "auto_start": false}),
            EventPublisher::new(tx),
        );

        assert_eq!(ctx.config_str("sensor"), Some("mmwave-office"));
        assert_eq!(ctx.config_bool("auto_start"), Some(false));
        assert_eq!(ctx.config_str("kasa"), None);
        // Type mismatches read as absent.
        assert_eq!(ctx.config_bool("sensor"), None);
    }
}
