//! Simulated collaborators.
//!
//! No sensor or plug protocol lives in this crate, so the daemon wires these
//! into the registry for end-to-end runs; tests script them to drive the
//! controller through presence transitions and failure cases.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{DetectionStatus, DeviceError, PlugSink, Reading, SensorSource};

/// A scriptable presence sensor.
pub struct SimSensor {
    name: String,
    status: RwLock<DetectionStatus>,
    fail_reads: AtomicUsize,
}

impl SimSensor {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            status: RwLock::new(DetectionStatus::NoTarget),
            fail_reads: AtomicUsize::new(0),
        })
    }

    pub fn set_status(&self, status: DetectionStatus) {
        *self.status.write() = status;
    }

    pub fn status(&self) -> DetectionStatus {
        *self.status.read()
    }

    /// Make the next `n` reads fail.
    pub fn fail_next_reads(&self, n: usize) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl SensorSource for SimSensor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_readings(&self) -> Result<Reading, DeviceError> {
        let scripted_failure = self
            .fail_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(DeviceError::Read("simulated read failure".into()));
        }

        let status = self.status();
        let energy = if status.presence() { 55 } else { 0 };
        let mut reading = Reading::with_status(status);
        reading.set("move_energy", serde_json::json!(energy));
        Ok(reading)
    }
}

/// A plug that records every command it receives.
pub struct SimPlug {
    name: String,
    commands: RwLock<Vec<serde_json::Value>>,
    fail_commands: AtomicUsize,
}

impl SimPlug {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            commands: RwLock::new(Vec::new()),
            fail_commands: AtomicUsize::new(0),
        })
    }

    /// Make the next `n` commands fail. Failed commands are still recorded.
    pub fn fail_next_commands(&self, n: usize) {
        self.fail_commands.store(n, Ordering::SeqCst);
    }

    /// Every command received so far, failed ones included.
    pub fn commands(&self) -> Vec<serde_json::Value> {
        self.commands.read().clone()
    }

    pub fn toggle_on_count(&self) -> usize {
        self.count_key("toggle_on")
    }

    pub fn toggle_off_count(&self) -> usize {
        self.count_key("toggle_off")
    }

    /// On/off as implied by the toggles received so far (failed commands do
    /// not count).
    pub fn is_on(&self) -> bool {
        for command in self.commands.read().iter().rev() {
            if command.get("failed").is_some() {
                continue;
            }
            if command.get("toggle_on").is_some() {
                return true;
            }
            if command.get("toggle_off").is_some() {
                return false;
            }
        }
        false
    }

    fn count_key(&self, key: &str) -> usize {
        self.commands
            .read()
            .iter()
            .filter(|c| c.get(key).is_some())
            .count()
    }
}

#[async_trait]
impl PlugSink for SimPlug {
    fn name(&self) -> &str {
        &self.name
    }

    async fn do_command(
        &self,
        command: serde_json::Value,
    ) -> Result<serde_json::Value, DeviceError> {
        let scripted_failure = self
            .fail_commands
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let mut recorded = command;
        if scripted_failure {
            if let Some(map) = recorded.as_object_mut() {
                map.insert("failed".into(), true.into());
            }
        }
        self.commands.write().push(recorded);

        if scripted_failure {
            return Err(DeviceError::Command("simulated command failure".into()));
        }
        Ok(serde_json::json!({"status": "ok"}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::PlugCommand;

    #[tokio::test]
    async fn sensor_reports_and_fails_on_script() {
        let sensor = SimSensor::new("mmwave");

        let reading = sensor.get_readings().await.unwrap();
        assert_eq!(reading.detection_status(), DetectionStatus::NoTarget);

        sensor.set_status(DetectionStatus::MovingTarget);
        sensor.fail_next_reads(1);
        assert!(sensor.get_readings().await.is_err());

        let reading = sensor.get_readings().await.unwrap();
        assert_eq!(reading.detection_status(), DetectionStatus::MovingTarget);
        assert_eq!(reading.get("move_energy"), Some(&serde_json::json!(55)));
    }

    #[tokio::test]
    async fn plug_records_commands_and_tracks_state() {
        let plug = SimPlug::new("desk");
        assert!(!plug.is_on());

        plug.do_command(PlugCommand::ToggleOn.to_request())
            .await
            .unwrap();
        assert!(plug.is_on());
        assert_eq!(plug.toggle_on_count(), 1);

        // A failed toggle is recorded but does not change the implied state.
        plug.fail_next_commands(1);
        assert!(
            plug.do_command(PlugCommand::ToggleOff.to_request())
                .await
                .is_err()
        );
        assert!(plug.is_on());
        assert_eq!(plug.toggle_off_count(), 1);

        plug.do_command(PlugCommand::ToggleOff.to_request())
            .await
            .unwrap();
        assert!(!plug.is_on());
        assert_eq!(plug.toggle_off_count(), 2);
    }
}
