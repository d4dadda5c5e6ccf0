//! In-process simulated adaptor for CI/CD testing without physical hardware.
//!
//! [`SimAdaptor`] keeps a pin table in memory and answers the same raw
//! command set a microcontroller board would (`pin_mode`, `digital_write`,
//! `digital_read`, `analog_write`, `analog_read`, `firmware_name`).  This lets
//! a full robot run in headless tests and CI pipelines.
//!
//! # Parameters
//!
//! | Key | Effect |
//! |---|---|
//! | `fail_connect` | `true` makes `connect` fail, simulating unplugged hardware |
//! | `firmware` | name reported by `firmware_name` (default `"robokit-sim"`) |
//!
//! # Example
//!
//! ```rust
//! use robokit_hal::adaptor::Adaptor;
//! use robokit_hal::sim::SimAdaptor;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sim = SimAdaptor::new("serial");
//! sim.connect().await.unwrap();
//! sim.command("digital_write", &[json!(13), json!(1)]).await.unwrap();
//! assert_eq!(sim.command("digital_read", &[json!(13)]).await.unwrap(), json!(1));
//! # }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use robokit_types::{Params, RobotError};
use serde_json::{Value, json};
use tracing::debug;

use crate::adaptor::Adaptor;

const DEFAULT_FIRMWARE: &str = "robokit-sim";

/// Simulated pin I/O board.  Records every write and replays it on read.
pub struct SimAdaptor {
    name: String,
    connected: bool,
    fail_connect: bool,
    firmware: String,
    pins: HashMap<u64, SimPin>,
}

#[derive(Debug, Clone, Default)]
struct SimPin {
    mode: Option<String>,
    value: i64,
}

impl SimAdaptor {
    /// Create a simulated adaptor for the connection named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: false,
            fail_connect: false,
            firmware: DEFAULT_FIRMWARE.to_string(),
            pins: HashMap::new(),
        }
    }

    /// Create a simulated adaptor configured from connection parameters.
    pub fn from_params(name: impl Into<String>, params: &Params) -> Self {
        let mut sim = Self::new(name);
        sim.fail_connect = params
            .get("fail_connect")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if let Some(firmware) = params.get("firmware").and_then(Value::as_str) {
            sim.firmware = firmware.to_string();
        }
        sim
    }

    /// Whether the simulated channel is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn pin_arg(&self, command: &str, args: &[Value]) -> Result<u64, RobotError> {
        args.first().and_then(Value::as_u64).ok_or_else(|| {
            RobotError::connection(&self.name, format!("{command}: expected a pin number"))
        })
    }

    fn value_arg(&self, command: &str, args: &[Value]) -> Result<i64, RobotError> {
        match args.get(1) {
            Some(Value::Bool(b)) => Ok(i64::from(*b)),
            Some(v) => v.as_i64().ok_or_else(|| {
                RobotError::connection(&self.name, format!("{command}: expected an integer value"))
            }),
            None => Err(RobotError::connection(
                &self.name,
                format!("{command}: missing value"),
            )),
        }
    }
}

#[async_trait]
impl Adaptor for SimAdaptor {
    fn kind(&self) -> &str {
        "sim"
    }

    async fn connect(&mut self) -> Result<(), RobotError> {
        if self.fail_connect {
            return Err(RobotError::connection(&self.name, "simulated board not found"));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), RobotError> {
        self.connected = false;
        Ok(())
    }

    async fn command(&mut self, command: &str, args: &[Value]) -> Result<Value, RobotError> {
        if !self.connected {
            return Err(RobotError::connection(&self.name, "not connected"));
        }
        debug!(connection = %self.name, command, ?args, "sim command");
        match command {
            "firmware_name" => Ok(json!(self.firmware)),
            "pin_mode" => {
                let pin = self.pin_arg(command, args)?;
                // With no mode argument the current mode is reported back.
                match args.get(1).and_then(Value::as_str) {
                    Some(mode) => {
                        self.pins.entry(pin).or_default().mode = Some(mode.to_string());
                        Ok(Value::Null)
                    }
                    None => Ok(json!(self.pins.get(&pin).and_then(|p| p.mode.clone()))),
                }
            }
            "digital_write" => {
                let pin = self.pin_arg(command, args)?;
                let value = self.value_arg(command, args)?;
                self.pins.entry(pin).or_default().value = i64::from(value != 0);
                Ok(Value::Null)
            }
            "analog_write" => {
                let pin = self.pin_arg(command, args)?;
                let value = self.value_arg(command, args)?;
                self.pins.entry(pin).or_default().value = value;
                Ok(Value::Null)
            }
            "digital_read" => {
                let pin = self.pin_arg(command, args)?;
                let value = self.pins.get(&pin).map_or(0, |p| p.value);
                Ok(json!(i64::from(value != 0)))
            }
            "analog_read" => {
                let pin = self.pin_arg(command, args)?;
                Ok(json!(self.pins.get(&pin).map_or(0, |p| p.value)))
            }
            other => Err(RobotError::connection(
                &self.name,
                format!("unsupported command '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn digital_write_then_read() {
        let mut sim = SimAdaptor::new("serial");
        sim.connect().await.unwrap();
        sim.command("digital_write", &[json!(3), json!(1)]).await.unwrap();
        assert_eq!(sim.command("digital_read", &[json!(3)]).await.unwrap(), json!(1));
        sim.command("digital_write", &[json!(3), json!(false)]).await.unwrap();
        assert_eq!(sim.command("digital_read", &[json!(3)]).await.unwrap(), json!(0));
    }

    #[tokio::test]
    async fn analog_write_keeps_level() {
        let mut sim = SimAdaptor::new("serial");
        sim.connect().await.unwrap();
        sim.command("analog_write", &[json!(9), json!(128)]).await.unwrap();
        assert_eq!(sim.command("analog_read", &[json!(9)]).await.unwrap(), json!(128));
        assert_eq!(sim.command("digital_read", &[json!(9)]).await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn commands_fail_while_disconnected() {
        let mut sim = SimAdaptor::new("serial");
        let result = sim.command("digital_read", &[json!(3)]).await;
        assert!(matches!(result, Err(RobotError::Connection { .. })));

        sim.connect().await.unwrap();
        sim.disconnect().await.unwrap();
        assert!(!sim.is_connected());
        assert!(sim.command("firmware_name", &[]).await.is_err());
    }

    #[tokio::test]
    async fn unsupported_command_is_a_connection_error() {
        let mut sim = SimAdaptor::new("serial");
        sim.connect().await.unwrap();
        let err = sim.command("self_destruct", &[]).await.unwrap_err();
        assert!(err.to_string().contains("self_destruct"));
    }

    #[tokio::test]
    async fn params_configure_failure_and_firmware() {
        let mut params = Params::new();
        params.insert("fail_connect".into(), json!(true));
        let mut broken = SimAdaptor::from_params("serial", &params);
        assert!(broken.connect().await.is_err());

        let mut params = Params::new();
        params.insert("firmware".into(), json!("StandardFirmata"));
        let mut board = SimAdaptor::from_params("serial", &params);
        board.connect().await.unwrap();
        assert_eq!(
            board.command("firmware_name", &[]).await.unwrap(),
            json!("StandardFirmata")
        );
    }

    #[tokio::test]
    async fn pin_mode_reports_back_when_queried() {
        let mut sim = SimAdaptor::new("serial");
        sim.connect().await.unwrap();
        assert_eq!(sim.command("pin_mode", &[json!(4)]).await.unwrap(), Value::Null);
        sim.command("pin_mode", &[json!(4), json!("output")]).await.unwrap();
        assert_eq!(sim.command("pin_mode", &[json!(4)]).await.unwrap(), json!("output"));
    }

    #[tokio::test]
    async fn missing_pin_argument_is_rejected() {
        let mut sim = SimAdaptor::new("serial");
        sim.connect().await.unwrap();
        assert!(sim.command("digital_write", &[]).await.is_err());
        assert!(sim.command("digital_write", &[json!(3)]).await.is_err());
    }
}
