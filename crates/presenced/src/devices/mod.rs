//! Device seams.
//!
//! The controller talks to its collaborators through two capability traits:
//! [`SensorSource`] for presence readings and [`PlugSink`] for opaque plug
//! commands. Live handles are resolved by name through the
//! [`DeviceRegistry`].

pub mod registry;
pub mod sim;

pub use registry::DeviceRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Capability kinds the registry resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Sensor,
    Plug,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Sensor => "sensor",
            Self::Plug => "plug",
        })
    }
}

/// Detection categories reported by mmWave presence sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionStatus {
    #[default]
    NoTarget,
    MovingTarget,
    StaticTarget,
    MovingAndStaticTargets,
}

impl DetectionStatus {
    /// The wire string carried in readings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoTarget => "No Target",
            Self::MovingTarget => "Moving Target",
            Self::StaticTarget => "Static Target",
            Self::MovingAndStaticTargets => "Moving and Static Targets",
        }
    }

    /// Classify a wire string. Unknown strings count as no target.
    pub fn classify(s: &str) -> Self {
        match s {
            "Moving Target" => Self::MovingTarget,
            "Static Target" => Self::StaticTarget,
            "Moving and Static Targets" => Self::MovingAndStaticTargets,
            _ => Self::NoTarget,
        }
    }

    /// True when any target, moving or static, is currently detected.
    pub fn presence(&self) -> bool {
        !matches!(self, Self::NoTarget)
    }
}

impl std::fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One poll's worth of sensor values.
///
/// A flat mapping; the controller only interprets `detection_status`, the
/// rest rides along for logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reading {
    #[serde(flatten)]
    values: serde_json::Map<String, serde_json::Value>,
}

impl Reading {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(status: DetectionStatus) -> Self {
        let mut reading = Self::new();
        reading.set("detection_status", status.as_str().into());
        reading
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Classified detection status; absent or unknown reads as no target.
    pub fn detection_status(&self) -> DetectionStatus {
        self.get("detection_status")
            .and_then(|v| v.as_str())
            .map(DetectionStatus::classify)
            .unwrap_or_default()
    }
}

/// Instructions the controller sends to a plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugCommand {
    ToggleOn,
    ToggleOff,
}

impl PlugCommand {
    /// The opaque command object handed to [`PlugSink::do_command`].
    pub fn to_request(&self) -> serde_json::Value {
        match self {
            Self::ToggleOn => serde_json::json!({"toggle_on": []}),
            Self::ToggleOff => serde_json::json!({"toggle_off": []}),
        }
    }
}

/// Collaborator failures. Recoverable: the controller logs them and retries
/// on a later iteration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    #[error("sensor read failed: {0}")]
    Read(String),

    #[error("plug command failed: {0}")]
    Command(String),

    #[error("no {0} bound")]
    NotBound(DeviceKind),
}

/// A presence sensor capability.
#[async_trait]
pub trait SensorSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the current readings.
    async fn get_readings(&self) -> Result<Reading, DeviceError>;
}

/// A smart plug capability accepting opaque command objects.
#[async_trait]
pub trait PlugSink: Send + Sync {
    fn name(&self) -> &str;

    /// Execute a command and return the device response.
    async fn do_command(&self, command: serde_json::Value)
    -> Result<serde_json::Value, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            DetectionStatus::NoTarget,
            DetectionStatus::MovingTarget,
            DetectionStatus::StaticTarget,
            DetectionStatus::MovingAndStaticTargets,
        ] {
            assert_eq!(DetectionStatus::classify(status.as_str()), status);
        }
        assert_eq!(
            DetectionStatus::classify("Garbage"),
            DetectionStatus::NoTarget
        );
    }

    #[test]
    fn presence_subset() {
        assert!(!DetectionStatus::NoTarget.presence());
        assert!(DetectionStatus::MovingTarget.presence());
        assert!(DetectionStatus::StaticTarget.presence());
        assert!(DetectionStatus::MovingAndStaticTargets.presence());
    }

    #[test]
    fn reading_defaults_to_no_target() {
        assert_eq!(Reading::new().detection_status(), DetectionStatus::NoTarget);

        // A mistyped field also reads as no target.
        let mut reading = Reading::new();
        reading.set("detection_status", serde_json::json!(3));
        assert_eq!(reading.detection_status(), DetectionStatus::NoTarget);

        let reading = Reading::with_status(DetectionStatus::StaticTarget);
        assert_eq!(reading.detection_status(), DetectionStatus::StaticTarget);
    }

    #[test]
    fn command_wire_shapes() {
        assert_eq!(
            PlugCommand::ToggleOn.to_request(),
            serde_json::json!({"toggle_on": []})
        );
        assert_eq!(
            PlugCommand::ToggleOff.to_request(),
            serde_json::json!({"toggle_off": []})
        );
    }
}
