//! Service runtime for the presenced daemon.
//!
//! A service is a long-running component with lifecycle hooks (`on_start`,
//! `on_stop`, `on_event`). The [`ServiceManager`] runs each service on its own
//! tokio task, routes bus events to subscribers, and coordinates graceful
//! shutdown.

mod event;
mod handle;
mod manager;
mod service;

pub use event::{Event, EventPublisher};
pub use handle::{ServiceHandle, ServiceState};
pub use manager::ServiceManager;
pub use service::{Service, ServiceContext, ServiceError, ServiceResult, ServiceSpec};
