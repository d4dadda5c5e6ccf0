//! `robokit-runtime` – robot supervision.
//!
//! # Modules
//!
//! - [`robot`] – [`Robot`]: owns a robot's connections and devices, runs the
//!   concurrent start barrier and the user work procedure.
//! - [`config`] – [`RobotConfig`]: TOML robot descriptions, per-instance
//!   overrides and `ROBOKIT_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP export.

pub mod config;
pub mod robot;
pub mod telemetry;

pub use config::{RobotConfig, RobotOverrides};
pub use robot::{Robot, RobotSnapshot, ScopedTask, Work, WorkError, WorkOutcome, work_fn};
