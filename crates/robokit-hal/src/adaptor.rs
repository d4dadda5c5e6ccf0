//! Generic `Adaptor` trait for the I/O channel behind a connection (serial
//! port, socket, simulator, …).
//!
//! Adaptors are owned by exactly one [`Connection`][crate::connection::Connection]
//! and are only ever driven from that connection's task, so they need no
//! internal locking.  The rest of the stack only talks to the trait, so
//! adaptors can be swapped without touching drivers or robot logic.

use async_trait::async_trait;
use robokit_types::RobotError;
use serde_json::Value;

/// An I/O channel to a physical or simulated interface.
#[async_trait]
pub trait Adaptor: Send {
    /// Adaptor kind, e.g. `"sim"` or `"tcp"`.
    fn kind(&self) -> &str;

    /// Open the underlying channel.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Connection`] when the channel cannot be opened.
    async fn connect(&mut self) -> Result<(), RobotError>;

    /// Close the underlying channel.
    async fn disconnect(&mut self) -> Result<(), RobotError>;

    /// Execute one raw command against the interface and return its result.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Connection`] when the command fails at the I/O
    /// layer or the interface does not support it.
    async fn command(&mut self, command: &str, args: &[Value]) -> Result<Value, RobotError>;
}
