//! `robokit-middleware` – topic-addressed event routing.
//!
//! Routes notifications between connections, devices and user work without
//! any of them holding references to one another.
//!
//! # Modules
//!
//! - [`bus`] – Headless publish/subscribe event bus keyed by topic strings,
//!   built on a Tokio broadcast channel.

pub mod bus;

pub use bus::{EventBus, TopicSubscriber};
