//! [`PassthruDriver`] – a driver with an empty vocabulary.
//!
//! Every command takes the fallback path and is forwarded verbatim to the
//! device's connection.  Useful for boards whose command set has not been
//! wrapped in a dedicated driver yet.

use async_trait::async_trait;
use robokit_types::RobotError;
use serde_json::Value;

use crate::device::DeviceContext;
use crate::driver::Driver;

pub struct PassthruDriver;

#[async_trait]
impl Driver for PassthruDriver {
    fn kind(&self) -> &str {
        "passthru"
    }

    fn commands(&self) -> &[&'static str] {
        &[]
    }

    async fn execute(
        &mut self,
        device: &DeviceContext,
        command: &str,
        args: &[Value],
    ) -> Result<Value, RobotError> {
        device.send_raw(command, args.to_vec()).await
    }
}
