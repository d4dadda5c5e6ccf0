//! [`ButtonDriver`] – momentary push button on a single input pin.
//!
//! `is_pressed` samples the pin and, when the state changed since the last
//! sample, publishes `<scope>.push` or `<scope>.release`.

use async_trait::async_trait;
use robokit_types::{EventPayload, RobotError};
use serde_json::{Value, json};

use crate::device::DeviceContext;
use crate::driver::Driver;

const COMMANDS: &[&str] = &["is_pressed"];

#[derive(Debug, Default)]
pub struct ButtonDriver {
    pressed: Option<bool>,
}

impl ButtonDriver {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sample(&mut self, device: &DeviceContext) -> Result<Value, RobotError> {
        let pin = device.require_pin()?;
        let raw = device.send_raw("digital_read", vec![json!(pin)]).await?;
        let pressed = raw.as_i64().map(|v| v != 0).or_else(|| raw.as_bool()).unwrap_or(false);

        if self.pressed != Some(pressed) {
            // The first sample only establishes the baseline.
            if self.pressed.is_some() {
                let event = if pressed { "push" } else { "release" };
                device.publish(event, EventPayload::Data(json!({ "pin": pin })));
            }
            self.pressed = Some(pressed);
        }
        Ok(json!(pressed))
    }
}

#[async_trait]
impl Driver for ButtonDriver {
    fn kind(&self) -> &str {
        "button"
    }

    fn commands(&self) -> &[&'static str] {
        COMMANDS
    }

    async fn start(&mut self, device: &DeviceContext) -> Result<(), RobotError> {
        let pin = device.require_pin()?;
        device
            .send_raw("pin_mode", vec![json!(pin), json!("input")])
            .await?;
        self.sample(device).await.map(|_| ())
    }

    async fn execute(
        &mut self,
        device: &DeviceContext,
        _command: &str,
        _args: &[Value],
    ) -> Result<Value, RobotError> {
        self.sample(device).await
    }
}
