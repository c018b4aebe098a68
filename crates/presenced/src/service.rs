//! Runtime service adapter for the presence controller.
//!
//! Binds [`PresenceController`] into the daemon's service bus: configuration
//! arrives through the service context, runtime control arrives as
//! `controller/*` events.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use presence_runtime::{Event, Service, ServiceContext, ServiceError, ServiceResult, ServiceSpec};

use crate::config::PresenceConfig;
use crate::controller::PresenceController;
use crate::devices::DeviceRegistry;

/// Service id on the daemon bus.
pub const SERVICE_ID: &str = "presence/controller";

pub struct PresenceService {
    controller: PresenceController,
    registry: Arc<DeviceRegistry>,
}

impl PresenceService {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            controller: PresenceController::new(SERVICE_ID),
            registry,
        }
    }
}

#[async_trait]
impl Service for PresenceService {
    fn spec(&self) -> ServiceSpec {
        ServiceSpec::new(SERVICE_ID, "Presence Plug Controller")
            .subscribe("controller/*")
            .with_shutdown_timeout(std::time::Duration::from_secs(5))
            .with_description("toggles a smart plug from mmWave presence readings")
    }

    async fn on_start(&mut self, ctx: &ServiceContext) -> ServiceResult<()> {
        // Invalid attributes are fatal here: the service never reaches
        // Running.
        let config = PresenceConfig::from_attrs(&ctx.config)
            .map_err(|e| ServiceError::StartFailed(e.to_string()))?;

        self.controller.set_event_publisher(ctx.publisher());
        self.controller.reconfigure(&config, &self.registry);
        if !config.auto_start {
            info!("auto_start disabled, waiting for controller/start");
        }
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
        self.controller.close();
        Ok(())
    }

    async fn on_event(&mut self, _ctx: &ServiceContext, event: Event) -> ServiceResult<()> {
        match event.event_type.as_str() {
            "controller/start" => self.controller.start(),
            "controller/stop" => self.controller.stop(),
            // Attributes ride in the event payload. Invalid ones are logged
            // and ignored: runtime reconfiguration must not kill the service.
            "controller/reconfigure" => match PresenceConfig::from_attrs(&event.data) {
                Ok(config) => self.controller.reconfigure(&config, &self.registry),
                Err(e) => warn!(error = %e, "ignoring invalid reconfigure attributes"),
            },
            other => debug!(event_type = other, "ignoring event"),
        }
        Ok(())
    }
}
