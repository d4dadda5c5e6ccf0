//! [`Robot`] – supervisor owning every connection and device of one robot.
//!
//! Lifecycle:
//!
//! 1. **Construct** – [`Robot::new`] builds one [`Connection`] per
//!    connection spec and one [`Device`] (with its driver) per device spec.
//!    Every unit task is spawned, none performs I/O yet.
//! 2. **Start barrier** – [`Robot::start`] issues `connect` to every
//!    connection and `start_device` to every device without waiting, then
//!    joins on all N+M results at once.  Any failure aborts the start.
//! 3. **Work** – [`Robot::work`] runs the barrier and, only if it cleared,
//!    the user work procedure.  Failures are logged, never propagated.
//! 4. **Teardown** – [`Robot::disconnect`] tells every connection to
//!    disconnect and returns without waiting.
//!
//! # Failure policy
//!
//! | Where | Policy |
//! |---|---|
//! | start barrier | fail-hard: [`RobotError::StartAborted`], work skipped |
//! | user work | fail-soft: logged with backtrace, [`WorkOutcome::WorkFailed`] |
//! | device commands | fail-soft: `Value::Null` (see [`robokit_hal::dispatch`]) |
//! | disconnect | fail-soft: logged by each connection |

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::join_all;
use robokit_hal::{
    Connection, ConnectionHandle, ConnectionSnapshot, Device, DeviceHandle, DeviceSnapshot,
    HardwareRegistry, Pending,
};
use robokit_middleware::{EventBus, TopicSubscriber};
use robokit_types::{EventPayload, RobotError, event_topic, robot_scope, scoped_name};
use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::RobotConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Work procedure
// ─────────────────────────────────────────────────────────────────────────────

pub type WorkError = Box<dyn StdError + Send + Sync>;
pub type WorkFuture = Pin<Box<dyn Future<Output = Result<(), WorkError>> + Send>>;

/// User work procedure.  Runs with the robot as its context.  One `Work`
/// can be shared by every robot built from the same description.
pub type Work = Arc<dyn Fn(Arc<Robot>) -> WorkFuture + Send + Sync>;

/// Wrap an async closure into a shareable [`Work`].
pub fn work_fn<F, Fut>(f: F) -> Work
where
    F: Fn(Arc<Robot>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
{
    Arc::new(move |robot| Box::pin(f(robot)))
}

/// How a [`Robot::work`] run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkOutcome {
    /// Barrier cleared and the work returned `Ok` (or there was no work).
    Completed,
    /// At least one unit failed to start; the work never ran.
    StartFailed,
    /// The work returned an error or panicked.
    WorkFailed,
}

/// A spawned task that is aborted when its handle is dropped.
///
/// Awaiting it yields the task's output like a [`JoinHandle`].
#[derive(Debug)]
#[must_use = "dropping a ScopedTask aborts the task"]
pub struct ScopedTask<T>(JoinHandle<T>);

impl<T> ScopedTask<T> {
    pub fn abort(&self) {
        self.0.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl<T> From<JoinHandle<T>> for ScopedTask<T> {
    fn from(handle: JoinHandle<T>) -> Self {
        Self(handle)
    }
}

impl<T> Drop for ScopedTask<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<T> Future for ScopedTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().0).poll(cx)
    }
}

/// Serialization view of a robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotSnapshot {
    pub name: String,
    pub connections: Vec<ConnectionSnapshot>,
    pub devices: Vec<DeviceSnapshot>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Robot
// ─────────────────────────────────────────────────────────────────────────────

/// Supervisor of one robot's connections and devices.
pub struct Robot {
    name: String,
    scope: String,
    connections: HashMap<String, ConnectionHandle>,
    devices: HashMap<String, DeviceHandle>,
    default_connection: Option<String>,
    start_timeout: Option<Duration>,
    bus: EventBus,
    work: Option<Work>,
}

impl Robot {
    /// Assemble a robot from `config`, resolving kinds through `registry`.
    ///
    /// Devices talk through the connection they name, or through the first
    /// declared connection when they name none.
    ///
    /// # Errors
    ///
    /// * [`RobotError::DuplicateUnit`] – two connections or two devices share
    ///   an identifier.
    /// * [`RobotError::UnknownAdaptor`] / [`RobotError::UnknownDriver`].
    /// * [`RobotError::Config`] – a device has no usable connection, or no
    ///   Tokio runtime is running.
    pub fn new(
        config: &RobotConfig,
        registry: &HardwareRegistry,
        bus: EventBus,
    ) -> Result<Self, RobotError> {
        let mut connections = HashMap::with_capacity(config.connections.len());
        for spec in &config.connections {
            if connections.contains_key(&spec.name) {
                return Err(RobotError::DuplicateUnit(spec.name.clone()));
            }
            let adaptor = registry.build_adaptor(spec)?;
            let handle = Connection::spawn(&config.name, spec, adaptor, bus.clone())?;
            connections.insert(spec.name.clone(), handle);
        }
        let default_connection = config.connections.first().map(|c| c.name.clone());

        let mut devices = HashMap::with_capacity(config.devices.len());
        for spec in &config.devices {
            if devices.contains_key(&spec.name) {
                return Err(RobotError::DuplicateUnit(spec.name.clone()));
            }
            let connection_name = spec
                .connection
                .as_ref()
                .or(default_connection.as_ref())
                .ok_or_else(|| {
                    RobotError::Config(format!("device '{}' has no connection", spec.name))
                })?;
            let connection = connections.get(connection_name).cloned().ok_or_else(|| {
                RobotError::Config(format!(
                    "device '{}' refers to unknown connection '{connection_name}'",
                    spec.name
                ))
            })?;
            let driver = registry.build_driver(spec)?;
            let handle = Device::spawn(&config.name, spec, driver, connection, bus.clone())?;
            devices.insert(spec.name.clone(), handle);
        }

        info!(
            robot = %config.name,
            connections = connections.len(),
            devices = devices.len(),
            "robot assembled"
        );

        Ok(Self {
            name: config.name.clone(),
            scope: robot_scope(&config.name),
            connections,
            devices,
            default_connection,
            start_timeout: config.start_timeout(),
            bus,
            work: None,
        })
    }

    /// Attach the work procedure run by [`Robot::work`].
    pub fn with_work(mut self, work: Work) -> Self {
        self.work = Some(work);
        self
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Start barrier: issue every `connect` and `start_device`, then wait for
    /// all of them.
    ///
    /// Connections are issued before devices, so a device's warm-up commands
    /// always queue behind its connection's `connect`.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::StartAborted`] listing every unit that failed or
    /// exceeded the start timeout.
    pub async fn start(&self) -> Result<(), RobotError> {
        let total = self.connections.len() + self.devices.len();
        let mut pending: Vec<Pending<()>> = Vec::with_capacity(total);
        pending.extend(self.connections.values().map(ConnectionHandle::connect));
        pending.extend(self.devices.values().map(DeviceHandle::start_device));
        debug!(robot = %self.name, issued = pending.len(), "start operations issued");

        let timeout = self.start_timeout;
        let results = join_all(pending.into_iter().map(|p| bounded(p, timeout))).await;

        let failures: Vec<RobotError> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            info!(robot = %self.name, units = total, "all units started");
            return Ok(());
        }
        for failure in &failures {
            error!(robot = %self.name, error = %failure, "unit failed to start");
        }
        Err(RobotError::StartAborted { failures, total })
    }

    /// Run the start barrier and then the work procedure on a task of their
    /// own.  Returns immediately.
    ///
    /// The join handle never yields an error from the work: failures are
    /// logged and reported as a [`WorkOutcome`].  Aborting the handle also
    /// aborts the work.
    pub fn work(self: Arc<Self>) -> JoinHandle<WorkOutcome> {
        tokio::spawn(self.run_work())
    }

    async fn run_work(self: Arc<Self>) -> WorkOutcome {
        if let Err(e) = self.start().await {
            error!(robot = %self.name, error = %e, "start barrier failed, work not run");
            return WorkOutcome::StartFailed;
        }
        let Some(work) = self.work.clone() else {
            info!(robot = %self.name, "no work registered");
            return WorkOutcome::Completed;
        };

        info!(robot = %self.name, "running work");
        self.bus
            .publish(event_topic(&self.scope, "work"), EventPayload::Started);

        // Dropped with this future, so aborting the outer task stops the work.
        let task = ScopedTask::from(tokio::spawn(work(Arc::clone(&self))));
        match task.await {
            Ok(Ok(())) => {
                info!(robot = %self.name, "work finished");
                WorkOutcome::Completed
            }
            Ok(Err(e)) => {
                error!(
                    robot = %self.name,
                    error = %error_chain(e.as_ref()),
                    backtrace = %Backtrace::capture(),
                    "work failed"
                );
                WorkOutcome::WorkFailed
            }
            Err(join) if join.is_panic() => {
                error!(
                    robot = %self.name,
                    error = %panic_message(join.into_panic()),
                    backtrace = %Backtrace::capture(),
                    "work panicked"
                );
                WorkOutcome::WorkFailed
            }
            Err(join) => {
                warn!(robot = %self.name, error = %join, "work cancelled");
                WorkOutcome::WorkFailed
            }
        }
    }

    /// Tell every connection to disconnect.  Does not wait; failures are
    /// logged by the connections themselves.
    pub fn disconnect(&self) {
        for connection in self.connections.values() {
            let _ = connection.disconnect();
        }
        info!(robot = %self.name, connections = self.connections.len(), "disconnect issued");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn connection(&self, name: &str) -> Option<&ConnectionHandle> {
        self.connections.get(name)
    }

    /// The first declared connection.
    pub fn default_connection(&self) -> Option<&ConnectionHandle> {
        self.default_connection
            .as_deref()
            .and_then(|name| self.connections.get(name))
    }

    pub fn device(&self, name: &str) -> Option<&DeviceHandle> {
        self.devices.get(name)
    }

    pub fn connections(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.connections.values()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceHandle> {
        self.devices.values()
    }

    /// Snapshot of the robot, sorted by identifier.  Never blocks.
    pub fn to_hash(&self) -> RobotSnapshot {
        let mut connections: Vec<ConnectionSnapshot> =
            self.connections.values().map(ConnectionHandle::to_hash).collect();
        connections.sort_by(|a, b| a.name.cmp(&b.name));
        let mut devices: Vec<DeviceSnapshot> =
            self.devices.values().map(DeviceHandle::to_hash).collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        RobotSnapshot {
            name: self.name.clone(),
            connections,
            devices,
        }
    }

    /// [`to_hash`][Self::to_hash] encoded as JSON text.
    pub fn as_json(&self) -> Result<String, RobotError> {
        serde_json::to_string(&self.to_hash()).map_err(|e| RobotError::Serialization(e.to_string()))
    }

    /// Subscribe to `event` raised by the unit named `unit`.
    pub fn subscribe(&self, unit: &str, event: &str) -> TopicSubscriber {
        self.bus.subscribe(event_topic(&scoped_name(&self.name, unit), event))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Timers
    // ─────────────────────────────────────────────────────────────────────

    /// Run `f` every `period`, first after one full period.  Stops when the
    /// returned handle is dropped.
    pub fn every<F, Fut>(&self, period: Duration, mut f: F) -> ScopedTask<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // tokio's interval rejects a zero period.
        let period = period.max(Duration::from_millis(1));
        ScopedTask::from(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                f().await;
            }
        }))
    }

    /// Run `f` once after `delay`, unless the returned handle is dropped
    /// first.
    pub fn after<F, Fut>(&self, delay: Duration, f: F) -> ScopedTask<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        ScopedTask::from(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f().await;
        }))
    }
}

impl std::fmt::Debug for Robot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut connections: Vec<&str> = self.connections.keys().map(String::as_str).collect();
        connections.sort_unstable();
        let mut devices: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        devices.sort_unstable();
        f.debug_struct("Robot")
            .field("name", &self.name)
            .field("connections", &connections)
            .field("devices", &devices)
            .field("start_timeout", &self.start_timeout)
            .field("has_work", &self.work.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn bounded(pending: Pending<()>, timeout: Option<Duration>) -> Result<(), RobotError> {
    let Some(limit) = timeout else {
        return pending.await;
    };
    let unit = pending.unit().to_string();
    match tokio::time::timeout(limit, pending).await {
        Ok(result) => result,
        Err(_) => Err(RobotError::StartTimeout {
            unit,
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
