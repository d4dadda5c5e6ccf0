//! [`LedDriver`] – on/off/dimmable LED on a single output pin.
//!
//! Translates `on`, `off`, `toggle`, `is_on`, and `brightness` into
//! `digital_write` / `analog_write` raw commands and publishes the resulting
//! state on `<scope>.update`.

use async_trait::async_trait;
use robokit_types::{EventPayload, RobotError};
use serde_json::{Value, json};

use crate::device::DeviceContext;
use crate::driver::{Driver, bad_args};

const COMMANDS: &[&str] = &["on", "off", "toggle", "is_on", "brightness"];

/// Highest PWM level accepted by `brightness`.
pub const MAX_BRIGHTNESS: i64 = 255;

#[derive(Debug, Default)]
pub struct LedDriver {
    is_on: bool,
}

impl LedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    async fn switch(&mut self, device: &DeviceContext, on: bool) -> Result<Value, RobotError> {
        let pin = device.require_pin()?;
        device
            .send_raw("digital_write", vec![json!(pin), json!(u8::from(on))])
            .await?;
        self.is_on = on;
        device.publish("update", EventPayload::Data(json!({ "on": on })));
        Ok(json!(on))
    }

    async fn brightness(
        &mut self,
        device: &DeviceContext,
        args: &[Value],
    ) -> Result<Value, RobotError> {
        let pin = device.require_pin()?;
        let level = args
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| bad_args(device, "brightness", "expected a level 0-255"))?
            .clamp(0, MAX_BRIGHTNESS);
        device
            .send_raw("analog_write", vec![json!(pin), json!(level)])
            .await?;
        self.is_on = level > 0;
        device.publish(
            "update",
            EventPayload::Data(json!({ "on": self.is_on, "brightness": level })),
        );
        Ok(json!(level))
    }
}

#[async_trait]
impl Driver for LedDriver {
    fn kind(&self) -> &str {
        "led"
    }

    fn commands(&self) -> &[&'static str] {
        COMMANDS
    }

    async fn start(&mut self, device: &DeviceContext) -> Result<(), RobotError> {
        let pin = device.require_pin()?;
        device
            .send_raw("pin_mode", vec![json!(pin), json!("output")])
            .await?;
        Ok(())
    }

    async fn execute(
        &mut self,
        device: &DeviceContext,
        command: &str,
        args: &[Value],
    ) -> Result<Value, RobotError> {
        match command {
            "on" => self.switch(device, true).await,
            "off" => self.switch(device, false).await,
            "toggle" => {
                let next = !self.is_on;
                self.switch(device, next).await
            }
            "is_on" => Ok(json!(self.is_on)),
            "brightness" => self.brightness(device, args).await,
            other => Err(bad_args(device, other, "not an led command")),
        }
    }
}
