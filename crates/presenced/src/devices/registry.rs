//! Device registry: dependency resolution for collaborator handles.
//!
//! Devices register under an identifier per capability kind; the controller
//! resolves identifiers from its configuration into live handles. A lookup
//! miss is not an error here; callers decide how to degrade.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{DeviceKind, PlugSink, SensorSource};

/// Named device handles, resolvable by identifier and capability kind.
#[derive(Default)]
pub struct DeviceRegistry {
    sensors: RwLock<HashMap<String, Arc<dyn SensorSource>>>,
    plugs: RwLock<HashMap<String, Arc<dyn PlugSink>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sensor under its own name. Replaces any previous handle
    /// with that name.
    pub fn register_sensor(&self, sensor: Arc<dyn SensorSource>) {
        let name = sensor.name().to_string();
        tracing::info!(%name, "registered sensor");
        self.sensors.write().insert(name, sensor);
    }

    /// Register a plug under its own name. Replaces any previous handle with
    /// that name.
    pub fn register_plug(&self, plug: Arc<dyn PlugSink>) {
        let name = plug.name().to_string();
        tracing::info!(%name, "registered plug");
        self.plugs.write().insert(name, plug);
    }

    /// Resolve a sensor identifier to a live handle.
    pub fn sensor(&self, name: &str) -> Option<Arc<dyn SensorSource>> {
        self.sensors.read().get(name).cloned()
    }

    /// Resolve a plug identifier to a live handle.
    pub fn plug(&self, name: &str) -> Option<Arc<dyn PlugSink>> {
        self.plugs.read().get(name).cloned()
    }

    pub fn contains(&self, kind: DeviceKind, name: &str) -> bool {
        match kind {
            DeviceKind::Sensor => self.sensors.read().contains_key(name),
            DeviceKind::Plug => self.plugs.read().contains_key(name),
        }
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("sensors", &self.sensors.read().len())
            .field("plugs", &self.plugs.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::sim::{SimPlug, SimSensor};

    #[test]
    fn resolves_by_name_and_kind() {
        let registry = DeviceRegistry::new();
        registry.register_sensor(SimSensor::new("mmwave-office"));
        registry.register_plug(SimPlug::new("desk-plug"));

        assert!(registry.sensor("mmwave-office").is_some());
        assert!(registry.plug("desk-plug").is_some());
        assert!(registry.contains(DeviceKind::Sensor, "mmwave-office"));
        assert!(registry.contains(DeviceKind::Plug, "desk-plug"));

        // Kinds are separate namespaces.
        assert!(registry.sensor("desk-plug").is_none());
        assert!(registry.plug("mmwave-office").is_none());
    }

    #[test]
    fn lookup_miss_is_none() {
        let registry = DeviceRegistry::new();
        assert!(registry.sensor("nope").is_none());
        assert!(!registry.contains(DeviceKind::Plug, "nope"));
    }
}
