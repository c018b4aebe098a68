//! Daemon configuration.
//!
//! The TOML file carries a flat `[controller]` attribute table. The table is
//! kept as a raw JSON value so it can ride through the service context and
//! reconfigure events unchanged; [`PresenceConfig::from_attrs`] is the single
//! place the attributes are validated.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration file (`presenced.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Flat key-value attributes for the presence controller
    pub controller: serde_json::Value,
}

impl AppConfig {
    /// Read and parse the configuration file.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))
    }
}

/// Validated controller attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceConfig {
    /// Identifier of the presence sensor to resolve
    pub sensor: String,

    /// Identifier of the Kasa smart plug to resolve
    pub kasa: String,

    /// Launch the control loop as soon as the controller is configured
    pub auto_start: bool,
}

impl PresenceConfig {
    /// Validate flat attributes: `sensor` and `kasa` must be present and
    /// strings, `auto_start` defaults to true.
    pub fn from_attrs(attrs: &serde_json::Value) -> Result<Self> {
        let sensor = required_string(attrs, "sensor")?;
        let kasa = required_string(attrs, "kasa")?;
        let auto_start = attrs
            .get("auto_start")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        Ok(Self {
            sensor,
            kasa,
            auto_start,
        })
    }
}

fn required_string(attrs: &serde_json::Value, key: &str) -> Result<String> {
    match attrs.get(key) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        _ => Err(Error::Config(format!(
            "`{key}` must be a string and included in the configuration"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;

    #[test]
    fn accepts_valid_attrs() {
        let config = PresenceConfig::from_attrs(&json!({
            "sensor": "mmwave-office",
            "kasa": "desk-plug",
        }))
        .unwrap();

        assert_eq!(config.sensor, "mmwave-office");
        assert_eq!(config.kasa, "desk-plug");
        assert!(config.auto_start);
    }

    #[test]
    fn auto_start_can_be_disabled() {
        let config = PresenceConfig::from_attrs(&json!({
            "sensor": "s",
            "kasa": "k",
            "auto_start": false,
        }))
        .unwrap();

        assert!(!config.auto_start);
    }

    #[test]
    fn rejects_missing_sensor() {
        let err = PresenceConfig::from_attrs(&json!({"kasa": "k"})).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("`sensor`"));
    }

    #[test]
    fn rejects_non_string_kasa() {
        let err = PresenceConfig::from_attrs(&json!({"sensor": "s", "kasa": 7})).unwrap_err();
        assert!(err.to_string().contains("`kasa`"));
    }

    #[tokio::test]
    async fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presenced.toml");
        std::fs::write(
            &path,
            r#"
[controller]
sensor = "mmwave-office"
kasa = "desk-plug"
auto_start = false
"#,
        )
        .unwrap();

        let app = assert_ok!(AppConfig::load(&path).await);
        let config = assert_ok!(PresenceConfig::from_attrs(&app.controller));

        assert_eq!(config.kasa, "desk-plug");
        assert!(!config.auto_start);
    }

    #[tokio::test]
    async fn missing_file_is_a_config_error() {
        let err = AppConfig::load(Path::new("/nonexistent/presenced.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
