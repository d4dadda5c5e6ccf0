//! Robot configuration – the static description a [`Robot`][crate::Robot] is
//! assembled from, usually read from a TOML file.
//!
//! ```toml
//! name = "Robot A"
//! start_timeout_ms = 5000
//!
//! [[connections]]
//! name = "serial"
//! adaptor = "sim"
//! params = { port = "/dev/ttyACM0" }
//!
//! [[devices]]
//! name = "led"
//! driver = "led"
//! pin = 3
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use robokit_types::{ConnectionSpec, DeviceSpec, Params, RobotError};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default bound on each pending start result.
pub const DEFAULT_START_TIMEOUT_MS: u64 = 30_000;

fn default_start_timeout_ms() -> u64 {
    DEFAULT_START_TIMEOUT_MS
}

fn default_name() -> String {
    "robot".to_string()
}

/// Everything needed to construct one robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotConfig {
    #[serde(default = "default_name")]
    pub name: String,

    /// Per-unit bound on the start barrier, in milliseconds.  `0` waits
    /// forever.
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,

    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,

    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            start_timeout_ms: DEFAULT_START_TIMEOUT_MS,
            connections: Vec::new(),
            devices: Vec::new(),
        }
    }
}

impl RobotConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn connection(mut self, spec: ConnectionSpec) -> Self {
        self.connections.push(spec);
        self
    }

    pub fn device(mut self, spec: DeviceSpec) -> Self {
        self.devices.push(spec);
        self
    }

    /// Set the start bound.  `None` disables it; a bound shorter than 1 ms is
    /// rounded up so it never reads as disabled.
    pub fn with_start_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.start_timeout_ms = timeout.map_or(0, |t| {
            u64::try_from(t.as_millis()).unwrap_or(u64::MAX).max(1)
        });
        self
    }

    /// The start barrier's per-unit bound, `None` when disabled.
    pub fn start_timeout(&self) -> Option<Duration> {
        (self.start_timeout_ms > 0).then(|| Duration::from_millis(self.start_timeout_ms))
    }

    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, RobotError> {
        toml::from_str(raw).map_err(|e| RobotError::Config(format!("Failed to parse config: {e}")))
    }

    /// Copy of this config with `overrides` merged into the matching specs.
    pub fn with_overrides(&self, overrides: &RobotOverrides) -> Self {
        let mut merged = self.clone();
        for spec in &mut merged.connections {
            if let Some(params) = overrides.connections.get(&spec.name) {
                merge_params(&mut spec.params, params);
            }
        }
        for spec in &mut merged.devices {
            if let Some(params) = overrides.devices.get(&spec.name) {
                merge_params(&mut spec.params, params);
            }
        }
        merged
    }
}

fn merge_params(base: &mut Params, overrides: &Params) {
    for (key, value) in overrides {
        base.insert(key.clone(), value.clone());
    }
}

/// Per-instance parameter overrides, keyed by unit identifier.  Override
/// keys win over the configured ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotOverrides {
    #[serde(default)]
    pub connections: HashMap<String, Params>,
    #[serde(default)]
    pub devices: HashMap<String, Params>,
}

impl RobotOverrides {
    pub fn connection(mut self, name: impl Into<String>, params: Params) -> Self {
        self.connections.insert(name.into(), params);
        self
    }

    pub fn device(mut self, name: impl Into<String>, params: Params) -> Self {
        self.devices.insert(name.into(), params);
        self
    }
}

/// Load a config from `path` and apply environment overrides.
pub fn load_from(path: &Path) -> Result<RobotConfig, RobotError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        RobotError::Config(format!("Failed to read config at {}: {}", path.display(), e))
    })?;
    let mut cfg = RobotConfig::from_toml_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `ROBOKIT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROBOKIT_ROBOT_NAME` | `name` |
/// | `ROBOKIT_START_TIMEOUT_MS` | `start_timeout_ms` |
pub fn apply_env_overrides(cfg: &mut RobotConfig) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides_from(cfg: &mut RobotConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("ROBOKIT_ROBOT_NAME") {
        cfg.name = v;
    }
    if let Some(v) = lookup("ROBOKIT_START_TIMEOUT_MS") {
        match v.trim().parse::<u64>() {
            Ok(ms) => cfg.start_timeout_ms = ms,
            Err(e) => warn!(value = %v, error = %e, "ignoring invalid ROBOKIT_START_TIMEOUT_MS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const ROBOT_A: &str = r#"
        name = "Robot A"
        start_timeout_ms = 5000

        [[connections]]
        name = "serial"
        adaptor = "sim"
        params = { port = "/dev/ttyACM0" }

        [[devices]]
        name = "led"
        driver = "led"
        pin = 3
    "#;

    #[test]
    fn parses_robot_description() {
        let cfg = RobotConfig::from_toml_str(ROBOT_A).unwrap();
        assert_eq!(cfg.name, "Robot A");
        assert_eq!(cfg.start_timeout(), Some(Duration::from_millis(5000)));
        assert_eq!(cfg.connections.len(), 1);
        assert_eq!(cfg.connections[0].params["port"], "/dev/ttyACM0");
        assert_eq!(cfg.devices[0].pin, Some(3));
        assert_eq!(cfg.devices[0].interval_ms, robokit_types::DEFAULT_INTERVAL_MS);
    }

    #[test]
    fn defaults_apply_to_empty_document() {
        let cfg = RobotConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, RobotConfig::default());
        assert_eq!(cfg.start_timeout(), Some(Duration::from_millis(DEFAULT_START_TIMEOUT_MS)));
    }

    #[test]
    fn zero_timeout_disables_the_bound() {
        let cfg = RobotConfig::new("r").with_start_timeout(None);
        assert_eq!(cfg.start_timeout_ms, 0);
        assert_eq!(cfg.start_timeout(), None);
    }

    #[test]
    fn sub_millisecond_timeout_stays_bounded() {
        let cfg = RobotConfig::new("r").with_start_timeout(Some(Duration::from_micros(500)));
        assert_eq!(cfg.start_timeout_ms, 1);
        assert_eq!(cfg.start_timeout(), Some(Duration::from_millis(1)));

        let cfg = RobotConfig::new("r").with_start_timeout(Some(Duration::MAX));
        assert_eq!(cfg.start_timeout_ms, u64::MAX);
    }

    #[test]
    fn env_overrides_replace_name_and_timeout() {
        let mut cfg = RobotConfig::from_toml_str(ROBOT_A).unwrap();
        apply_overrides_from(&mut cfg, |key| match key {
            "ROBOKIT_ROBOT_NAME" => Some("Robot B".to_string()),
            "ROBOKIT_START_TIMEOUT_MS" => Some("250".to_string()),
            _ => None,
        });
        assert_eq!(cfg.name, "Robot B");
        assert_eq!(cfg.start_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn invalid_env_timeout_is_ignored() {
        let mut cfg = RobotConfig::from_toml_str(ROBOT_A).unwrap();
        apply_overrides_from(&mut cfg, |key| {
            (key == "ROBOKIT_START_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert_eq!(cfg.name, "Robot A");
        assert_eq!(cfg.start_timeout_ms, 5000);
    }

    #[test]
    fn unset_env_leaves_config_alone() {
        let mut cfg = RobotConfig::from_toml_str(ROBOT_A).unwrap();
        let before = cfg.clone();
        apply_overrides_from(&mut cfg, |_| None);
        assert_eq!(cfg, before);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let result = RobotConfig::from_toml_str("name = [");
        assert!(matches!(result, Err(RobotError::Config(_))));
    }

    #[test]
    fn overrides_win_and_leave_the_base_config_untouched() {
        let cfg = RobotConfig::from_toml_str(ROBOT_A).unwrap();
        let mut port = Params::new();
        port.insert("port".into(), json!("/dev/ttyUSB1"));
        let mut blink = Params::new();
        blink.insert("blink".into(), json!(true));

        let overrides = RobotOverrides::default()
            .connection("serial", port)
            .device("led", blink)
            .device("ghost", Params::new());
        let merged = cfg.with_overrides(&overrides);

        assert_eq!(merged.connections[0].params["port"], "/dev/ttyUSB1");
        assert_eq!(merged.devices[0].params["blink"], true);
        assert_eq!(cfg.connections[0].params["port"], "/dev/ttyACM0");
        assert_eq!(merged.devices.len(), 1);
    }

    #[test]
    fn load_from_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ROBOT_A.as_bytes()).unwrap();
        let cfg = load_from(file.path()).unwrap();
        assert_eq!(cfg.devices[0].name, "led");
    }

    #[test]
    fn load_from_missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_from(&dir.path().join("robot.toml"));
        assert!(matches!(result, Err(RobotError::Config(msg)) if msg.contains("robot.toml")));
    }
}
