//! `robokit-hal` – connections, devices, and drivers.
//!
//! # Modules
//!
//! - [`adaptor`] – [`Adaptor`][adaptor::Adaptor]: the I/O channel contract
//!   behind a connection.
//! - [`sim`] / [`tcp`] – built-in adaptors: an in-memory pin board and
//!   line-delimited JSON over TCP.
//! - [`connection`] – [`Connection`][connection::Connection]: concurrent unit
//!   owning one adaptor, driven through a [`ConnectionHandle`].
//! - [`driver`] – [`Driver`][driver::Driver]: per-family command vocabulary
//!   plus [`dispatch`][driver::dispatch], the fail-soft fallback path.
//! - [`led`] / [`button`] / [`passthru`] – built-in drivers.
//! - [`device`] – [`Device`][device::Device]: concurrent unit owning one
//!   driver, driven through a [`DeviceHandle`].
//! - [`pending`] – [`Pending`][pending::Pending]: the result handle returned
//!   by every unit operation.
//! - [`registry`] – [`HardwareRegistry`][registry::HardwareRegistry]: kind to
//!   factory table used when assembling a robot.

pub mod adaptor;
pub mod button;
pub mod connection;
pub mod device;
pub mod driver;
pub mod led;
pub mod passthru;
pub mod pending;
pub mod registry;
pub mod sim;
pub mod tcp;

pub use adaptor::Adaptor;
pub use connection::{Connection, ConnectionHandle, ConnectionSnapshot};
pub use device::{Device, DeviceContext, DeviceHandle, DeviceSnapshot};
pub use driver::{Driver, dispatch};
pub use pending::Pending;
pub use registry::HardwareRegistry;
