//! Generic `Driver` trait and the command dispatch path.
//!
//! A driver translates high-level device commands into raw connection
//! commands.  Each driver kind declares a fixed vocabulary; anything outside
//! it is not rejected but forwarded verbatim to the owning connection:
//!
//! ```text
//! DeviceHandle::command("toggle")   ─► vocabulary? ─yes─► Driver::execute
//!                                                  └no──► warn! + DeviceContext::send_raw
//!                                         any Err ─► error! + backtrace, Value::Null
//! ```
//!
//! Failures on either path stop at [`dispatch`]: the caller receives
//! `Value::Null` and keeps running.

use std::backtrace::Backtrace;

use async_trait::async_trait;
use robokit_types::RobotError;
use serde_json::Value;
use tracing::{error, warn};

use crate::device::DeviceContext;

/// Device-family behaviour owned by exactly one device.
///
/// The driver never holds a reference to its connection; it reaches it
/// through the [`DeviceContext`] passed into every call.
#[async_trait]
pub trait Driver: Send {
    /// Driver kind, e.g. `"led"`.
    fn kind(&self) -> &str;

    /// The commands this driver handles itself.
    fn commands(&self) -> &[&'static str];

    /// `true` iff `name` is part of [`commands`][Self::commands].
    fn is_known_command(&self, name: &str) -> bool {
        self.commands().contains(&name)
    }

    /// Device warm-up, e.g. initial pin configuration.
    ///
    /// # Errors
    ///
    /// Any error aborts the robot's start barrier.
    async fn start(&mut self, _device: &DeviceContext) -> Result<(), RobotError> {
        Ok(())
    }

    /// Handle one vocabulary command.  Only called for names where
    /// [`is_known_command`][Self::is_known_command] holds.
    async fn execute(
        &mut self,
        device: &DeviceContext,
        command: &str,
        args: &[Value],
    ) -> Result<Value, RobotError>;
}

/// Run `command` against `driver`, falling back to the raw connection path
/// for commands outside its vocabulary.
///
/// Never fails: errors are logged as [`RobotError::DriverDispatch`] and
/// replaced by `Value::Null`.
pub async fn dispatch(
    driver: &mut dyn Driver,
    device: &DeviceContext,
    command: &str,
    args: Vec<Value>,
) -> Value {
    let outcome = if driver.is_known_command(command) {
        driver.execute(device, command, &args).await
    } else {
        warn!(
            device = %device.name(),
            driver = driver.kind(),
            command,
            "command not in driver vocabulary, forwarding to connection"
        );
        device.send_raw(command, args).await
    };

    match outcome {
        Ok(value) => value,
        Err(e) => {
            let err = RobotError::DriverDispatch {
                device: device.name().to_string(),
                command: command.to_string(),
                details: e.to_string(),
            };
            error!(
                error = %err,
                backtrace = %Backtrace::capture(),
                "driver command failed, returning null"
            );
            Value::Null
        }
    }
}

/// Error for a malformed argument list on a vocabulary command.
pub fn bad_args(device: &DeviceContext, command: &str, details: impl Into<String>) -> RobotError {
    RobotError::DriverDispatch {
        device: device.name().to_string(),
        command: command.to_string(),
        details: details.into(),
    }
}
