use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Free-form parameters attached to a connection or device descriptor.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Default polling interval for devices that do not declare one.
pub const DEFAULT_INTERVAL_MS: u64 = 500;

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

/// Immutable descriptor for one connection, e.g. a serial port or a socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Identifier, unique within a robot (e.g. `"serial"`).
    pub name: String,
    /// Adaptor kind used to build the I/O channel (e.g. `"sim"`, `"tcp"`).
    pub adaptor: String,
    #[serde(default)]
    pub params: Params,
}

impl ConnectionSpec {
    pub fn new(name: impl Into<String>, adaptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adaptor: adaptor.into(),
            params: Params::new(),
        }
    }

    /// Builder-style helper for setting one parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Immutable descriptor for one logical device driven through a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Identifier, unique within a robot (e.g. `"led"`).
    pub name: String,
    /// Driver kind (e.g. `"led"`, `"button"`, `"passthru"`).
    pub driver: String,
    /// Connection the device talks through.  `None` selects the robot's
    /// default connection.
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub pin: Option<u32>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub params: Params,
}

impl DeviceSpec {
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            connection: None,
            pin: None,
            interval_ms: DEFAULT_INTERVAL_MS,
            params: Params::new(),
        }
    }

    pub fn with_pin(mut self, pin: u32) -> Self {
        self.pin = Some(pin);
        self
    }

    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Topics
// ────────────────────────────────────────────────────────────────────────────

/// Scoped name of a unit owned by `robot`: `<robot>_<unit>`, lower-cased with
/// whitespace folded into `_`.
///
/// ```
/// assert_eq!(robokit_types::scoped_name("Robot A", "led"), "robot_a_led");
/// ```
pub fn scoped_name(robot: &str, unit: &str) -> String {
    format!("{}_{}", robot_scope(robot), robot_scope(unit))
}

/// Scope for events raised by the robot itself, e.g. `"robot_a"`.  Every
/// unit's scoped name starts with it.
pub fn robot_scope(robot: &str) -> String {
    robot.split_whitespace().collect::<Vec<_>>().join("_").to_lowercase()
}

/// Event topic for `event` raised by the unit with scoped name `scope`.
pub fn event_topic(scope: &str, event: &str) -> String {
    format!("{scope}.{event}")
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"robot_a_led.start"`
    pub topic: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            topic: topic.into(),
            payload,
        }
    }
}

/// Data carried by an [`Event`].  The bus enforces no schema on `Data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    Connected,
    Disconnected,
    Started,
    Data(serde_json::Value),
    Fault { component: String, message: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error type spanning connection failures, device warm-up failures, driver
/// dispatch failures and robot assembly problems.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RobotError {
    #[error("Connection error on {connection}: {details}")]
    Connection { connection: String, details: String },

    #[error("Device start failed on {device}: {details}")]
    DeviceStart { device: String, details: String },

    #[error("Driver dispatch failed on {device} ({command}): {details}")]
    DriverDispatch {
        device: String,
        command: String,
        details: String,
    },

    #[error("Start of {unit} timed out after {timeout_ms} ms")]
    StartTimeout { unit: String, timeout_ms: u64 },

    #[error("Start aborted: {} of {total} unit(s) failed", .failures.len())]
    StartAborted {
        failures: Vec<RobotError>,
        total: usize,
    },

    #[error("Unknown adaptor kind: {0}")]
    UnknownAdaptor(String),

    #[error("Unknown driver kind: {0}")]
    UnknownDriver(String),

    #[error("Duplicate unit identifier: {0}")]
    DuplicateUnit(String),

    #[error("Unit terminated: {0}")]
    UnitTerminated(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RobotError {
    pub fn connection(connection: &str, details: impl Into<String>) -> Self {
        RobotError::Connection {
            connection: connection.to_string(),
            details: details.into(),
        }
    }

    pub fn device_start(device: &str, details: impl Into<String>) -> Self {
        RobotError::DeviceStart {
            device: device.to_string(),
            details: details.into(),
        }
    }
}
