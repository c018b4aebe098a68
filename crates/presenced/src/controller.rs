//! The presence control loop.
//!
//! Polls the bound sensor once a second and toggles the bound plug: on as
//! soon as a target is detected, off only after a grace window without one,
//! so intermittent misses do not flicker the plug. The off-command runs as a
//! separate cancellable task; re-detected presence supersedes it.
//!
//! Collaborator failures never terminate the loop: they are logged and the
//! state flags stay at "command not confirmed", so a later iteration retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use presence_runtime::EventPublisher;

use crate::config::PresenceConfig;
use crate::devices::{
    DeviceError, DeviceKind, DeviceRegistry, PlugCommand, PlugSink, Reading, SensorSource,
};

/// Time between sensor polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Grace window between losing presence and toggling the plug off.
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// State shared between the controller, the loop task, and the delayed-off
/// task. Handles are swapped by `reconfigure` and picked up by the loop on
/// its next iteration; guards are never held across an await.
struct Shared {
    light_on: AtomicBool,
    sensor: RwLock<Option<Arc<dyn SensorSource>>>,
    plug: RwLock<Option<Arc<dyn PlugSink>>>,
}

impl Shared {
    fn light_on(&self) -> bool {
        self.light_on.load(Ordering::SeqCst)
    }

    fn set_light_on(&self, on: bool) {
        self.light_on.store(on, Ordering::SeqCst);
    }

    /// Read the bound sensor. An absent sensor or a failed read degrades to
    /// an empty reading, which classifies as no target.
    async fn read_sensor(&self) -> Reading {
        let sensor = self.sensor.read().clone();
        match sensor {
            Some(sensor) => match sensor.get_readings().await {
                Ok(reading) => reading,
                Err(e) => {
                    warn!(error = %e, "sensor read failed");
                    Reading::default()
                }
            },
            None => Reading::default(),
        }
    }

    /// Issue a command to the bound plug.
    async fn command_plug(&self, command: PlugCommand) -> Result<serde_json::Value, DeviceError> {
        let plug = self.plug.read().clone();
        match plug {
            Some(plug) => plug.do_command(command.to_request()).await,
            None => Err(DeviceError::NotBound(DeviceKind::Plug)),
        }
    }
}

/// A scheduled delayed-off: the task plus its cancellation sender.
struct DelayedOff {
    handle: JoinHandle<()>,
    cancel: Option<oneshot::Sender<()>>,
}

impl DelayedOff {
    /// Completed, cancelled, or failed all count as no longer pending.
    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            // A send error means the task already won the race and ran.
            let _ = tx.send(());
        }
    }
}

/// Presence-triggered plug controller.
///
/// Lifecycle: `reconfigure` binds collaborators (and starts the loop when
/// `auto_start` is set), `start`/`stop` control the loop, `close` tears
/// everything down. At most one loop and one delayed-off exist at a time.
pub struct PresenceController {
    name: String,
    shared: Arc<Shared>,
    auto_start: bool,
    stop_tx: watch::Sender<bool>,
    loop_task: Option<JoinHandle<()>>,
    events: Option<EventPublisher>,
}

impl PresenceController {
    pub fn new(name: impl Into<String>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                light_on: AtomicBool::new(false),
                sensor: RwLock::new(None),
                plug: RwLock::new(None),
            }),
            auto_start: true,
            stop_tx,
            loop_task: None,
            events: None,
        }
    }

    /// Route controller events (plug toggles) onto the daemon bus.
    pub fn set_event_publisher(&mut self, publisher: EventPublisher) {
        self.events = Some(publisher);
    }

    /// Whether the control loop is currently running.
    pub fn is_running(&self) -> bool {
        self.loop_task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Last commanded plug state, best effort.
    pub fn light_on(&self) -> bool {
        self.shared.light_on()
    }

    /// Rebind collaborators from validated attributes.
    ///
    /// Safe to call repeatedly; a running loop picks the new handles up on
    /// its next iteration. Does not reset the commanded plug state.
    /// Unresolvable identifiers bind nothing: an absent sensor reads as no
    /// target, an absent plug fails commands recoverably.
    pub fn reconfigure(&mut self, config: &PresenceConfig, registry: &DeviceRegistry) {
        self.auto_start = config.auto_start;

        let sensor = registry.sensor(&config.sensor);
        if sensor.is_none() {
            warn!(sensor = %config.sensor, "sensor not found in registry");
        }
        *self.shared.sensor.write() = sensor;

        let plug = registry.plug(&config.kasa);
        if plug.is_none() {
            warn!(plug = %config.kasa, "plug not found in registry");
        }
        *self.shared.plug.write() = plug;

        if self.auto_start {
            self.start();
        }
    }

    /// Launch the control loop. No-op while a previous loop is still running.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!("control loop already running");
            return;
        }
        self.stop_tx.send_replace(false);

        let shared = Arc::clone(&self.shared);
        let stop_rx = self.stop_tx.subscribe();
        let events = self.events.clone();
        let name = self.name.clone();
        self.loop_task = Some(tokio::spawn(run_control_loop(name, shared, stop_rx, events)));
    }

    /// Set the stop signal and cancel the loop task and any pending
    /// delayed-off. Safe to call repeatedly and when idle.
    pub fn stop(&mut self) {
        self.stop_tx.send_replace(true);
        if let Some(task) = self.loop_task.take() {
            task.abort();
        }
    }

    /// Tear down; afterwards no scheduled work remains.
    pub fn close(&mut self) {
        self.stop();
    }
}

impl Drop for PresenceController {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_control_loop(
    name: String,
    shared: Arc<Shared>,
    mut stop_rx: watch::Receiver<bool>,
    events: Option<EventPublisher>,
) {
    info!("presence control loop started");
    let mut delayed_off: Option<DelayedOff> = None;

    while !*stop_rx.borrow() {
        poll_once(&name, &shared, &stop_rx, &events, &mut delayed_off).await;

        // The stop signal wakes the sleep early but is only acted on at the
        // iteration boundary.
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = stop_rx.changed() => {}
        }
    }

    if let Some(pending) = delayed_off.take() {
        pending.cancel();
    }
    info!("presence control loop stopped");
}

/// One iteration: read, classify, actuate.
async fn poll_once(
    name: &str,
    shared: &Arc<Shared>,
    stop_rx: &watch::Receiver<bool>,
    events: &Option<EventPublisher>,
    delayed_off: &mut Option<DelayedOff>,
) {
    let reading = shared.read_sensor().await;
    let status = reading.detection_status();
    debug!(%status, "sensor poll");

    if status.presence() {
        if !shared.light_on() {
            info!("presence detected, toggling plug on");
            match shared.command_plug(PlugCommand::ToggleOn).await {
                Ok(response) => {
                    debug!(?response, "toggle_on acknowledged");
                    shared.set_light_on(true);
                    publish_toggle(events, name, true);
                }
                Err(e) => warn!(error = %e, "failed to toggle plug on"),
            }
        }

        // Presence inside the grace window supersedes the scheduled off.
        if let Some(pending) = delayed_off.take() {
            if !pending.is_finished() {
                info!("presence re-detected, cancelling delayed-off");
            }
            pending.cancel();
        }
    } else {
        let pending = delayed_off.as_ref().is_some_and(|t| !t.is_finished());
        if shared.light_on() && !pending {
            info!(grace = ?GRACE_PERIOD, "presence lost, scheduling delayed-off");
            *delayed_off = Some(spawn_delayed_off(name, shared, stop_rx, events));
        }
    }
}

/// Schedule the toggle-off after the grace window.
///
/// The wait races cancellation (presence returned), the controller stop
/// signal, and the grace timer inside one `select!`; exactly one branch
/// runs, so the light flag always matches the last command actually sent.
fn spawn_delayed_off(
    name: &str,
    shared: &Arc<Shared>,
    stop_rx: &watch::Receiver<bool>,
    events: &Option<EventPublisher>,
) -> DelayedOff {
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let shared = Arc::clone(shared);
    let mut stop_rx = stop_rx.clone();
    let events = events.clone();
    let name = name.to_string();

    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = cancel_rx => {
                info!("delayed-off cancelled, presence returned");
                return;
            }
            _ = stop_rx.changed() => {
                debug!("delayed-off cancelled by shutdown");
                return;
            }
            _ = tokio::time::sleep(GRACE_PERIOD) => {}
        }

        info!(grace = ?GRACE_PERIOD, "no presence through grace window, toggling plug off");
        match shared.command_plug(PlugCommand::ToggleOff).await {
            Ok(response) => {
                debug!(?response, "toggle_off acknowledged");
                shared.set_light_on(false);
                publish_toggle(&events, &name, false);
            }
            // The light stays marked on, so a later no-presence poll
            // schedules a fresh attempt.
            Err(e) => warn!(error = %e, "failed to toggle plug off"),
        }
    });

    DelayedOff {
        handle,
        cancel: Some(cancel_tx),
    }
}

fn publish_toggle(events: &Option<EventPublisher>, source: &str, on: bool) {
    if let Some(publisher) = events {
        let _ = publisher.emit("plug/toggled", source, serde_json::json!({"on": on}));
    }
}
