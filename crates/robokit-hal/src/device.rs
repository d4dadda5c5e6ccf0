//! [`Device`] – concurrent unit pairing one [`Driver`] with its metadata.
//!
//! Like a [`Connection`][crate::connection::Connection], a device runs as its
//! own Tokio task behind a mailbox and is only reachable through a cloneable
//! [`DeviceHandle`].  The device implements no command logic itself: every
//! command goes through [`dispatch`], which picks the driver's typed path or
//! the raw connection fallback.

use std::sync::Arc;
use std::time::Duration;

use robokit_middleware::EventBus;
use robokit_types::{DeviceSpec, EventPayload, Params, RobotError, event_topic, scoped_name};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::driver::{Driver, dispatch};
use crate::pending::{Pending, Reply};

enum DeviceMsg {
    Start(Reply<()>),
    Command {
        command: String,
        args: Vec<Value>,
        reply: Reply<Value>,
    },
}

impl std::fmt::Debug for DeviceMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceMsg::Start(_) => f.write_str("Start"),
            DeviceMsg::Command { command, .. } => write!(f, "Command({command})"),
        }
    }
}

/// Read-only snapshot of a device, as exposed to the serialization view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub name: String,
    pub driver: String,
    pub connection: String,
    pub pin: Option<u32>,
    pub interval_ms: u64,
    pub commands: Vec<String>,
    pub started: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Context
// ────────────────────────────────────────────────────────────────────────────

/// The device as seen by its driver: identity, pin, interval, and the route
/// to the device's connection.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    name: String,
    scope: String,
    pin: Option<u32>,
    interval: Duration,
    params: Params,
    connection: ConnectionHandle,
    bus: EventBus,
}

impl DeviceContext {
    pub fn new(robot: &str, spec: &DeviceSpec, connection: ConnectionHandle, bus: EventBus) -> Self {
        Self {
            name: spec.name.clone(),
            scope: scoped_name(robot, &spec.name),
            pin: spec.pin,
            interval: Duration::from_millis(spec.interval_ms),
            params: spec.params.clone(),
            connection,
            bus,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scoped name used to build this device's event topics.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn pin(&self) -> Option<u32> {
        self.pin
    }

    /// The configured pin.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Config`] when the device has no pin.
    pub fn require_pin(&self) -> Result<u32, RobotError> {
        self.pin
            .ok_or_else(|| RobotError::Config(format!("device '{}' has no pin", self.name)))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Forward a raw command to the device's connection.
    pub async fn send_raw(&self, command: &str, args: Vec<Value>) -> Result<Value, RobotError> {
        self.connection.command(command, args).await
    }

    /// Publish `payload` on `<scope>.<event>`.
    pub fn publish(&self, event: &str, payload: EventPayload) -> usize {
        self.bus.publish(event_topic(&self.scope, event), payload)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Unit
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct DeviceInfo {
    name: String,
    driver: String,
    scope: String,
    connection: String,
    pin: Option<u32>,
    interval_ms: u64,
    commands: Vec<String>,
}

/// The task-side state of a device.  Owns its driver for its whole lifetime.
pub struct Device {
    context: DeviceContext,
    driver: Box<dyn Driver>,
    started: watch::Sender<bool>,
    mailbox: mpsc::UnboundedReceiver<DeviceMsg>,
}

impl Device {
    /// Spawn the device task for `spec`, routing raw commands to
    /// `connection`.  No I/O happens here.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Config`] when called outside a Tokio runtime.
    pub fn spawn(
        robot: &str,
        spec: &DeviceSpec,
        driver: Box<dyn Driver>,
        connection: ConnectionHandle,
        bus: EventBus,
    ) -> Result<DeviceHandle, RobotError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RobotError::Config(format!("device '{}': {e}", spec.name)))?;

        let info = Arc::new(DeviceInfo {
            name: spec.name.clone(),
            driver: driver.kind().to_string(),
            scope: scoped_name(robot, &spec.name),
            connection: connection.name().to_string(),
            pin: spec.pin,
            interval_ms: spec.interval_ms,
            commands: driver.commands().iter().map(|c| c.to_string()).collect(),
        });
        let (tx, mailbox) = mpsc::unbounded_channel();
        let (started, started_rx) = watch::channel(false);

        let unit = Device {
            context: DeviceContext::new(robot, spec, connection, bus),
            driver,
            started,
            mailbox,
        };
        runtime.spawn(unit.run());

        Ok(DeviceHandle {
            info,
            tx,
            started: started_rx,
        })
    }

    async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                DeviceMsg::Start(reply) => {
                    let _ = reply.send(self.start().await);
                }
                DeviceMsg::Command {
                    command,
                    args,
                    reply,
                } => {
                    let value = dispatch(self.driver.as_mut(), &self.context, &command, args).await;
                    let _ = reply.send(Ok(value));
                }
            }
        }
        debug!(device = %self.context.name, "device task finished");
    }

    async fn start(&mut self) -> Result<(), RobotError> {
        if *self.started.borrow() {
            debug!(device = %self.context.name, "already started");
            return Ok(());
        }
        if let Err(e) = self.driver.start(&self.context).await {
            let err = match e {
                RobotError::DeviceStart { .. } => e,
                other => RobotError::device_start(&self.context.name, other.to_string()),
            };
            self.context.publish(
                "fault",
                EventPayload::Fault {
                    component: self.context.name.clone(),
                    message: err.to_string(),
                },
            );
            return Err(err);
        }
        self.started.send_replace(true);
        info!(device = %self.context.name, driver = self.driver.kind(), "device started");
        self.context.publish("start", EventPayload::Started);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handle
// ────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to a running [`Device`].
#[derive(Clone, Debug)]
pub struct DeviceHandle {
    info: Arc<DeviceInfo>,
    tx: mpsc::UnboundedSender<DeviceMsg>,
    started: watch::Receiver<bool>,
}

impl DeviceHandle {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn driver(&self) -> &str {
        &self.info.driver
    }

    /// Scoped name used to build this device's event topics.
    pub fn scope(&self) -> &str {
        &self.info.scope
    }

    /// Name of the connection this device talks through.
    pub fn connection(&self) -> &str {
        &self.info.connection
    }

    pub fn pin(&self) -> Option<u32> {
        self.info.pin
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.info.interval_ms)
    }

    /// The driver's declared command vocabulary.
    pub fn commands(&self) -> &[String] {
        &self.info.commands
    }

    /// Whether the device finished its warm-up.  Never blocks.
    pub fn is_started(&self) -> bool {
        *self.started.borrow()
    }

    /// Run the device warm-up.  Failures surface as
    /// [`RobotError::DeviceStart`].
    pub fn start_device(&self) -> Pending<()> {
        self.request(DeviceMsg::Start)
    }

    /// Issue a command.  Resolves to `Value::Null` when the command failed
    /// downstream; only a vanished device task yields an `Err`.
    pub fn command(&self, command: impl Into<String>, args: Vec<Value>) -> Pending<Value> {
        let command = command.into();
        self.request(|reply| DeviceMsg::Command {
            command,
            args,
            reply,
        })
    }

    pub fn to_hash(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            name: self.info.name.clone(),
            driver: self.info.driver.clone(),
            connection: self.info.connection.clone(),
            pin: self.info.pin,
            interval_ms: self.info.interval_ms,
            commands: self.info.commands.clone(),
            started: self.is_started(),
        }
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> DeviceMsg) -> Pending<T> {
        let (reply, pending) = Pending::channel(&self.info.name);
        if self.tx.send(make(reply)).is_err() {
            warn!(device = %self.info.name, "device task is gone");
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::passthru::PassthruDriver;
    use crate::sim::SimAdaptor;
    use async_trait::async_trait;
    use robokit_types::ConnectionSpec;
    use serde_json::json;

    struct BrokenDriver;

    #[async_trait]
    impl Driver for BrokenDriver {
        fn kind(&self) -> &str {
            "broken"
        }
        fn commands(&self) -> &[&'static str] {
            &[]
        }
        async fn start(&mut self, device: &DeviceContext) -> Result<(), RobotError> {
            device.require_pin().map(|_| ())
        }
        async fn execute(
            &mut self,
            _device: &DeviceContext,
            _command: &str,
            _args: &[Value],
        ) -> Result<Value, RobotError> {
            Ok(Value::Null)
        }
    }

    async fn serial(bus: &EventBus) -> ConnectionHandle {
        let conn = Connection::spawn(
            "Robot A",
            &ConnectionSpec::new("serial", "sim"),
            Box::new(SimAdaptor::new("serial")),
            bus.clone(),
        )
        .unwrap();
        conn.connect().await.unwrap();
        conn
    }

    #[tokio::test]
    async fn start_device_publishes_start_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut started = bus.subscribe("robot_a_relay.start");
        let spec = DeviceSpec::new("relay", "passthru").with_pin(8);
        let device = Device::spawn("Robot A", &spec, Box::new(PassthruDriver), serial(&bus).await, bus.clone())?;

        assert!(!device.is_started());
        device.start_device().await?;
        assert!(device.is_started());

        let event = started.recv().await.ok_or("no start event")?;
        assert_eq!(event.payload, EventPayload::Started);
        Ok(())
    }

    #[tokio::test]
    async fn start_failure_is_a_device_start_error() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let spec = DeviceSpec::new("mystery", "broken");
        let device = Device::spawn("Robot A", &spec, Box::new(BrokenDriver), serial(&bus).await, bus)?;

        let err = device.start_device().await.unwrap_err();
        assert!(matches!(err, RobotError::DeviceStart { ref device, .. } if device == "mystery"));
        assert!(!device.is_started());
        Ok(())
    }

    #[tokio::test]
    async fn commands_reach_the_connection() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let conn = serial(&bus).await;
        let spec = DeviceSpec::new("relay", "passthru").with_pin(8);
        let device = Device::spawn("Robot A", &spec, Box::new(PassthruDriver), conn.clone(), bus)?;

        device.command("digital_write", vec![json!(8), json!(1)]).await?;
        assert_eq!(conn.command("digital_read", vec![json!(8)]).await?, json!(1));
        Ok(())
    }

    #[tokio::test]
    async fn failed_command_resolves_to_null() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let conn = serial(&bus).await;
        let spec = DeviceSpec::new("relay", "passthru");
        let device = Device::spawn("Robot A", &spec, Box::new(PassthruDriver), conn.clone(), bus)?;

        conn.disconnect().await?;
        let value = device.command("digital_read", vec![json!(8)]).await?;
        assert_eq!(value, Value::Null);
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_describes_the_device() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let spec = DeviceSpec::new("relay", "passthru").with_pin(8).with_interval_ms(250);
        let device = Device::spawn("Robot A", &spec, Box::new(PassthruDriver), serial(&bus).await, bus)?;

        let snapshot = device.to_hash();
        assert_eq!(snapshot.name, "relay");
        assert_eq!(snapshot.driver, "passthru");
        assert_eq!(snapshot.connection, "serial");
        assert_eq!(snapshot.pin, Some(8));
        assert_eq!(snapshot.interval_ms, 250);
        assert!(snapshot.commands.is_empty());
        assert!(!snapshot.started);
        assert_eq!(device.scope(), "robot_a_relay");
        Ok(())
    }
}
