//! Service manager.
//!
//! Owns every running service task, routes bus events to subscribers, and
//! coordinates graceful shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::event::{Event, EventPublisher};
use crate::handle::{ServiceCommand, ServiceHandle, ServiceState};
use crate::service::{Service, ServiceContext, ServiceError, ServiceResult, ServiceSpec};

const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 1024;

struct RunningService {
    handle: ServiceHandle,
    join_handle: JoinHandle<ServiceResult<()>>,
    spec: ServiceSpec,
}

/// Central owner of all service tasks.
pub struct ServiceManager {
    services: DashMap<String, RunningService>,
    shutdown_tx: broadcast::Sender<()>,
    event_tx: broadcast::Sender<Event>,
    default_shutdown_timeout: Duration,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

        Self {
            services: DashMap::new(),
            shutdown_tx,
            event_tx,
            default_shutdown_timeout: Duration::from_secs(30),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// A publisher onto the manager's event bus.
    pub fn event_publisher(&self) -> EventPublisher {
        EventPublisher::new(self.event_tx.clone())
    }

    /// Spawn a service with no configuration attributes.
    pub async fn spawn<S: Service>(&self, service: S) -> ServiceResult<ServiceHandle> {
        self.spawn_with_config(service, serde_json::Value::Null)
            .await
    }

    /// Spawn a service, handing it `config` through its [`ServiceContext`].
    pub async fn spawn_with_config<S: Service>(
        &self,
        service: S,
        config: serde_json::Value,
    ) -> ServiceResult<ServiceHandle> {
        let spec = service.spec();
        let service_id = spec.id.clone();

        if spec.singleton && self.services.contains_key(&service_id) {
            return Err(ServiceError::AlreadyRunning(service_id));
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let state = Arc::new(AtomicU8::new(ServiceState::Starting as u8));
        let handle = ServiceHandle::new(service_id.clone(), command_tx, Arc::clone(&state));

        let ctx = ServiceContext::new(service_id.clone(), config, self.event_publisher());
        let shutdown_rx = self.shutdown_tx.subscribe();
        let event_rx = self.event_tx.subscribe();
        let subscriptions = spec.subscriptions.clone();
        let shutdown_timeout = spec.shutdown_timeout;
        let task_state = Arc::clone(&state);

        let join_handle = tokio::spawn(run_service(
            service,
            ctx,
            command_rx,
            shutdown_rx,
            event_rx,
            task_state,
            subscriptions,
            shutdown_timeout,
        ));

        self.services.insert(
            service_id,
            RunningService {
                handle: handle.clone(),
                join_handle,
                spec,
            },
        );

        Ok(handle)
    }

    pub fn get(&self, service_id: &str) -> Option<ServiceHandle> {
        self.services.get(service_id).map(|s| s.handle.clone())
    }

    pub fn is_running(&self, service_id: &str) -> bool {
        self.services
            .get(service_id)
            .is_some_and(|s| s.handle.is_running())
    }

    /// Publish an event onto the bus. Dropped silently when no service is
    /// subscribed yet.
    pub fn publish_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Build and publish an event onto the bus.
    pub fn emit(
        &self,
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: serde_json::Value,
    ) {
        self.publish_event(Event::new(event_type, source, data));
    }

    /// Stop one service and wait for its task, bounded by the spec's
    /// shutdown timeout.
    pub async fn stop(&self, service_id: &str) -> ServiceResult<()> {
        let running = self
            .services
            .remove(service_id)
            .map(|(_, v)| v)
            .ok_or_else(|| ServiceError::NotRunning(service_id.to_string()))?;

        let _ = running.handle.shutdown().await;

        match tokio::time::timeout(running.spec.shutdown_timeout, running.join_handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                tracing::error!(service_id, error = ?join_err, "service task panicked");
                Err(ServiceError::Internal(format!(
                    "task panicked: {join_err:?}"
                )))
            }
            Err(_) => {
                tracing::warn!(service_id, "service shutdown timed out");
                Err(ServiceError::ShutdownTimeout)
            }
        }
    }

    /// Stop every service and wait for all tasks to reach a terminal state.
    pub async fn shutdown_all(&self) -> ServiceResult<()> {
        tracing::info!("shutting down all services");
        let _ = self.shutdown_tx.send(());

        let ids: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            if let Some(handle) = self.get(id) {
                let _ = handle.shutdown().await;
            }
        }

        let drained = tokio::time::timeout(self.default_shutdown_timeout, async {
            while !self.services.is_empty() {
                self.services.retain(|_, v| !v.handle.is_terminal());
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!("some services did not stop within the timeout");
            return Err(ServiceError::ShutdownTimeout);
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<(String, ServiceState)> {
        self.services
            .iter()
            .map(|e| (e.key().clone(), e.value().handle.state()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// The per-service task: start, serve commands and subscribed events, stop.
#[allow(clippy::too_many_arguments)]
async fn run_service<S: Service>(
    mut service: S,
    ctx: ServiceContext,
    mut command_rx: mpsc::Receiver<ServiceCommand>,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut event_rx: broadcast::Receiver<Event>,
    state: Arc<AtomicU8>,
    subscriptions: Vec<String>,
    shutdown_timeout: Duration,
) -> ServiceResult<()> {
    if let Err(e) = service.on_start(&ctx).await {
        tracing::error!(service_id = %ctx.service_id, error = %e, "service failed to start");
        state.store(ServiceState::Failed as u8, Ordering::SeqCst);
        return Err(e);
    }

    state.store(ServiceState::Running as u8, Ordering::SeqCst);
    tracing::info!(service_id = %ctx.service_id, "service started");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!(service_id = %ctx.service_id, "global shutdown signal");
                break;
            }

            Some(cmd) = command_rx.recv() => match cmd {
                ServiceCommand::Shutdown => {
                    tracing::debug!(service_id = %ctx.service_id, "shutdown command");
                    break;
                }
                ServiceCommand::Event(event) => {
                    if let Err(e) = service.on_event(&ctx, event).await {
                        tracing::warn!(
                            service_id = %ctx.service_id,
                            error = %e,
                            "error handling direct event"
                        );
                    }
                }
            },

            Ok(event) = event_rx.recv() => {
                if subscriptions.iter().any(|p| event.matches(p)) {
                    if let Err(e) = service.on_event(&ctx, event).await {
                        tracing::warn!(
                            service_id = %ctx.service_id,
                            error = %e,
                            "error handling bus event"
                        );
                    }
                }
            }
        }
    }

    state.store(ServiceState::Stopping as u8, Ordering::SeqCst);

    match tokio::time::timeout(shutdown_timeout, service.on_stop(&ctx)).await {
        Ok(Ok(())) => {
            state.store(ServiceState::Stopped as u8, Ordering::SeqCst);
            tracing::info!(service_id = %ctx.service_id, "service stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            state.store(ServiceState::Failed as u8, Ordering::SeqCst);
            tracing::error!(service_id = %ctx.service_id, error = %e, "service stop failed");
            Err(e)
        }
        Err(_) => {
            state.store(ServiceState::Failed as u8, Ordering::SeqCst);
            tracing::error!(service_id = %ctx.service_id, "service stop timed out");
            Err(ServiceError::ShutdownTimeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio_test::assert_ok;

    #[derive(Default)]
    struct Probe {
        starts: AtomicUsize,
        stops: AtomicUsize,
        events: AtomicUsize,
    }

    struct ProbeService {
        id: String,
        probe: Arc<Probe>,
        fail_start: bool,
    }

    impl ProbeService {
        fn new(id: &str) -> (Self, Arc<Probe>) {
            let probe = Arc::new(Probe::default());
            (
                Self {
                    id: id.to_string(),
                    probe: Arc::clone(&probe),
                    fail_start: false,
                },
                probe,
            )
        }
    }

    #[async_trait]
    impl Service for ProbeService {
        fn spec(&self) -> ServiceSpec {
            ServiceSpec::new(&self.id, "Probe").subscribe("probe/*")
        }

        async fn on_start(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
            if self.fail_start {
                return Err(ServiceError::StartFailed("probe told to fail".into()));
            }
            self.probe.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_stop(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
            self.probe.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_event(&mut self, _ctx: &ServiceContext, _event: Event) -> ServiceResult<()> {
            self.probe.events.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn spawn_and_stop() {
        let manager = ServiceManager::new();
        let (service, probe) = ProbeService::new("probe-1");

        let handle = assert_ok!(manager.spawn(service).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(probe.starts.load(Ordering::SeqCst), 1);
        assert!(handle.is_running());

        assert_ok!(manager.stop("probe-1").await);
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
        assert!(manager.get("probe-1").is_none());
    }

    #[tokio::test]
    async fn routes_subscribed_events_only() {
        let manager = ServiceManager::new();
        let (service, probe) = ProbeService::new("probe-2");

        manager.spawn(service).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        manager.emit("probe/ping", "test", serde_json::json!({}));
        manager.emit("other/ping", "test", serde_json::json!({}));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(probe.events.load(Ordering::SeqCst), 1);

        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn singleton_guard() {
        let manager = ServiceManager::new();
        let (first, _) = ProbeService::new("probe-3");
        let (second, _) = ProbeService::new("probe-3");

        manager.spawn(first).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = manager.spawn(second).await;
        assert!(matches!(result, Err(ServiceError::AlreadyRunning(_))));

        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn failed_start_is_terminal() {
        let manager = ServiceManager::new();
        let (mut service, probe) = ProbeService::new("probe-4");
        service.fail_start = true;

        let handle = manager.spawn(service).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(probe.starts.load(Ordering::SeqCst), 0);
        assert!(handle.is_terminal());
    }
}
