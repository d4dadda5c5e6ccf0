//! [`Connection`] – concurrent unit owning one I/O channel.
//!
//! A connection runs as its own Tokio task and drains a mailbox one message
//! at a time, so operations issued by one caller are applied in issuance
//! order and the [`Adaptor`] never needs locking.  Callers hold a cheap,
//! cloneable [`ConnectionHandle`]; every operation on it returns a
//! [`Pending`] immediately.
//!
//! # Failure policy
//!
//! | Operation | On adaptor error |
//! |---|---|
//! | `connect` | fail-hard: the `Pending` resolves to [`RobotError::Connection`] |
//! | `disconnect` | fail-soft: logged, the `Pending` still resolves to `Ok(())` |
//! | `command` | the error is returned to the caller (drivers decide) |

use std::sync::Arc;

use robokit_middleware::EventBus;
use robokit_types::{ConnectionSpec, EventPayload, Params, RobotError, event_topic, scoped_name};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::adaptor::Adaptor;
use crate::pending::{Pending, Reply};

enum ConnectionMsg {
    Connect(Reply<()>),
    Disconnect(Reply<()>),
    Command {
        command: String,
        args: Vec<Value>,
        reply: Reply<Value>,
    },
}

/// Read-only snapshot of a connection, as exposed to the serialization view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub name: String,
    pub adaptor: String,
    pub connected: bool,
    pub params: Params,
}

#[derive(Debug)]
struct ConnectionInfo {
    name: String,
    adaptor: String,
    scope: String,
    params: Params,
}

// ────────────────────────────────────────────────────────────────────────────
// Unit
// ────────────────────────────────────────────────────────────────────────────

/// The task-side state of a connection.  Only reachable through its
/// [`ConnectionHandle`].
pub struct Connection {
    info: Arc<ConnectionInfo>,
    adaptor: Box<dyn Adaptor>,
    bus: EventBus,
    connected: watch::Sender<bool>,
    mailbox: mpsc::UnboundedReceiver<ConnectionMsg>,
}

impl Connection {
    /// Spawn the connection task for `spec` owned by the robot named `robot`.
    ///
    /// No I/O happens here; the channel is only opened by
    /// [`ConnectionHandle::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Config`] when called outside a Tokio runtime.
    pub fn spawn(
        robot: &str,
        spec: &ConnectionSpec,
        adaptor: Box<dyn Adaptor>,
        bus: EventBus,
    ) -> Result<ConnectionHandle, RobotError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RobotError::Config(format!("connection '{}': {e}", spec.name)))?;

        let info = Arc::new(ConnectionInfo {
            name: spec.name.clone(),
            adaptor: adaptor.kind().to_string(),
            scope: scoped_name(robot, &spec.name),
            params: spec.params.clone(),
        });
        let (tx, mailbox) = mpsc::unbounded_channel();
        let (connected, connected_rx) = watch::channel(false);

        let unit = Connection {
            info: Arc::clone(&info),
            adaptor,
            bus,
            connected,
            mailbox,
        };
        runtime.spawn(unit.run());

        Ok(ConnectionHandle {
            info,
            tx,
            connected: connected_rx,
        })
    }

    async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                ConnectionMsg::Connect(reply) => {
                    let _ = reply.send(self.connect().await);
                }
                ConnectionMsg::Disconnect(reply) => {
                    self.disconnect().await;
                    let _ = reply.send(Ok(()));
                }
                ConnectionMsg::Command {
                    command,
                    args,
                    reply,
                } => {
                    let _ = reply.send(self.adaptor.command(&command, &args).await);
                }
            }
        }
        debug!(connection = %self.info.name, "connection task finished");
    }

    async fn connect(&mut self) -> Result<(), RobotError> {
        if *self.connected.borrow() {
            debug!(connection = %self.info.name, "already connected");
            return Ok(());
        }
        match self.adaptor.connect().await {
            Ok(()) => {
                self.connected.send_replace(true);
                info!(connection = %self.info.name, adaptor = %self.info.adaptor, "connected");
                self.bus
                    .publish(event_topic(&self.info.scope, "connect"), EventPayload::Connected);
                Ok(())
            }
            Err(e) => {
                let err = match e {
                    RobotError::Connection { .. } => e,
                    other => RobotError::connection(&self.info.name, other.to_string()),
                };
                self.bus.publish(
                    event_topic(&self.info.scope, "fault"),
                    EventPayload::Fault {
                        component: self.info.name.clone(),
                        message: err.to_string(),
                    },
                );
                Err(err)
            }
        }
    }

    async fn disconnect(&mut self) {
        if !*self.connected.borrow() {
            return;
        }
        if let Err(e) = self.adaptor.disconnect().await {
            warn!(connection = %self.info.name, error = %e, "disconnect failed");
        }
        self.connected.send_replace(false);
        info!(connection = %self.info.name, "disconnected");
        self.bus.publish(
            event_topic(&self.info.scope, "disconnect"),
            EventPayload::Disconnected,
        );
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handle
// ────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to a running [`Connection`].
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    info: Arc<ConnectionInfo>,
    tx: mpsc::UnboundedSender<ConnectionMsg>,
    connected: watch::Receiver<bool>,
}

impl std::fmt::Debug for ConnectionMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionMsg::Connect(_) => f.write_str("Connect"),
            ConnectionMsg::Disconnect(_) => f.write_str("Disconnect"),
            ConnectionMsg::Command { command, .. } => write!(f, "Command({command})"),
        }
    }
}

impl ConnectionHandle {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn adaptor(&self) -> &str {
        &self.info.adaptor
    }

    /// Scoped name used to build this connection's event topics.
    pub fn scope(&self) -> &str {
        &self.info.scope
    }

    pub fn params(&self) -> &Params {
        &self.info.params
    }

    /// Last known channel state.  Never blocks.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Open the channel.  Safe to issue more than once: a connected unit
    /// answers `Ok(())` without touching the adaptor again.
    pub fn connect(&self) -> Pending<()> {
        self.request(ConnectionMsg::Connect)
    }

    /// Close the channel, best effort.  Always resolves to `Ok(())` unless
    /// the unit is gone.
    pub fn disconnect(&self) -> Pending<()> {
        self.request(ConnectionMsg::Disconnect)
    }

    /// Run one raw command on the adaptor.
    pub fn command(&self, command: impl Into<String>, args: Vec<Value>) -> Pending<Value> {
        let command = command.into();
        self.request(|reply| ConnectionMsg::Command {
            command,
            args,
            reply,
        })
    }

    pub fn to_hash(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            name: self.info.name.clone(),
            adaptor: self.info.adaptor.clone(),
            connected: self.is_connected(),
            params: self.info.params.clone(),
        }
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> ConnectionMsg) -> Pending<T> {
        let (reply, pending) = Pending::channel(&self.info.name);
        // A closed mailbox drops the reply, which resolves the pending to
        // `UnitTerminated`.
        if self.tx.send(make(reply)).is_err() {
            warn!(connection = %self.info.name, "connection task is gone");
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimAdaptor;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Adaptor that counts connects and can be told to fail.
    struct CountingAdaptor {
        connects: Arc<AtomicUsize>,
        fail_connect: bool,
        fail_disconnect: bool,
    }

    #[async_trait]
    impl Adaptor for CountingAdaptor {
        fn kind(&self) -> &str {
            "counting"
        }
        async fn connect(&mut self) -> Result<(), RobotError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                return Err(RobotError::Config("port busy".to_string()));
            }
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<(), RobotError> {
            if self.fail_disconnect {
                return Err(RobotError::connection("c", "cable yanked"));
            }
            Ok(())
        }
        async fn command(&mut self, command: &str, _args: &[Value]) -> Result<Value, RobotError> {
            Ok(json!(command))
        }
    }

    fn counting(fail_connect: bool, fail_disconnect: bool) -> (Box<dyn Adaptor>, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let adaptor = CountingAdaptor {
            connects: Arc::clone(&connects),
            fail_connect,
            fail_disconnect,
        };
        (Box::new(adaptor), connects)
    }

    #[tokio::test]
    async fn connect_then_command() -> Result<(), Box<dyn std::error::Error>> {
        let spec = ConnectionSpec::new("serial", "sim");
        let conn = Connection::spawn("Robot A", &spec, Box::new(SimAdaptor::new("serial")), EventBus::default())?;
        assert!(!conn.is_connected());

        conn.connect().await?;
        assert!(conn.is_connected());

        conn.command("digital_write", vec![json!(3), json!(1)]).await?;
        assert_eq!(conn.command("digital_read", vec![json!(3)]).await?, json!(1));
        Ok(())
    }

    #[tokio::test]
    async fn connect_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let (adaptor, connects) = counting(false, false);
        let conn = Connection::spawn("r", &ConnectionSpec::new("c", "counting"), adaptor, EventBus::default())?;

        conn.connect().await?;
        conn.connect().await?;
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn connect_failure_is_a_connection_error() -> Result<(), Box<dyn std::error::Error>> {
        let (adaptor, _) = counting(true, false);
        let bus = EventBus::default();
        let mut faults = bus.subscribe("r_c.fault");
        let conn = Connection::spawn("r", &ConnectionSpec::new("c", "counting"), adaptor, bus)?;

        let err = conn.connect().await.unwrap_err();
        assert_eq!(err, RobotError::connection("c", "Configuration error: port busy"));
        assert!(!conn.is_connected());

        let fault = faults.recv().await.ok_or("no fault event")?;
        assert!(matches!(fault.payload, EventPayload::Fault { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_failure_is_swallowed() -> Result<(), Box<dyn std::error::Error>> {
        let (adaptor, _) = counting(false, true);
        let conn = Connection::spawn("r", &ConnectionSpec::new("c", "counting"), adaptor, EventBus::default())?;

        conn.connect().await?;
        conn.disconnect().await?;
        assert!(!conn.is_connected());
        Ok(())
    }

    #[tokio::test]
    async fn operations_apply_in_issuance_order() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut events = bus.subscribe_prefix("robot_a_serial.");
        let spec = ConnectionSpec::new("serial", "sim");
        let conn = Connection::spawn("Robot A", &spec, Box::new(SimAdaptor::new("serial")), bus)?;

        // Issue everything before awaiting anything.
        let connect = conn.connect();
        let write = conn.command("digital_write", vec![json!(7), json!(1)]);
        let disconnect = conn.disconnect();
        let read = conn.command("digital_read", vec![json!(7)]);

        connect.await?;
        write.await?;
        disconnect.await?;
        assert!(matches!(read.await, Err(RobotError::Connection { .. })));

        assert_eq!(events.recv().await.ok_or("missing")?.topic, "robot_a_serial.connect");
        assert_eq!(events.recv().await.ok_or("missing")?.topic, "robot_a_serial.disconnect");
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_reflects_state() -> Result<(), Box<dyn std::error::Error>> {
        let spec = ConnectionSpec::new("serial", "sim").with_param("port", "/dev/ttyACM0");
        let conn = Connection::spawn("r", &spec, Box::new(SimAdaptor::new("serial")), EventBus::default())?;

        let before = conn.to_hash();
        assert_eq!(before.name, "serial");
        assert_eq!(before.adaptor, "sim");
        assert!(!before.connected);
        assert_eq!(before.params["port"], "/dev/ttyACM0");

        conn.connect().await?;
        assert!(conn.to_hash().connected);
        Ok(())
    }

    #[test]
    fn spawn_outside_runtime_is_a_config_error() {
        let result = Connection::spawn(
            "r",
            &ConnectionSpec::new("c", "sim"),
            Box::new(SimAdaptor::new("c")),
            EventBus::default(),
        );
        assert!(matches!(result, Err(RobotError::Config(_))));
    }
}
