//! [`HardwareRegistry`] – maps adaptor and driver kinds to factories.
//!
//! A robot's configuration only names kinds (`adaptor = "sim"`,
//! `driver = "led"`).  The registry resolves each kind to a factory and
//! builds a fresh [`Adaptor`] or [`Driver`] per descriptor.  The registry is
//! plain data handed to each robot at construction; there is no global
//! registration table.

use std::collections::HashMap;
use std::sync::Arc;

use robokit_types::{ConnectionSpec, DeviceSpec, RobotError};

use crate::adaptor::Adaptor;
use crate::button::ButtonDriver;
use crate::driver::Driver;
use crate::led::LedDriver;
use crate::passthru::PassthruDriver;
use crate::sim::SimAdaptor;
use crate::tcp::TcpAdaptor;

pub type AdaptorFactory =
    Arc<dyn Fn(&ConnectionSpec) -> Result<Box<dyn Adaptor>, RobotError> + Send + Sync>;
pub type DriverFactory =
    Arc<dyn Fn(&DeviceSpec) -> Result<Box<dyn Driver>, RobotError> + Send + Sync>;

/// Kind → factory table for adaptors and drivers.
///
/// Construct with [`HardwareRegistry::with_builtins`] (or
/// [`HardwareRegistry::new`] for an empty table), register custom kinds, then
/// hand it to the robot.
#[derive(Clone, Default)]
pub struct HardwareRegistry {
    adaptors: HashMap<String, AdaptorFactory>,
    drivers: HashMap<String, DriverFactory>,
}

impl HardwareRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in kinds: adaptors `sim` and
    /// `tcp`, drivers `led`, `button`, and `passthru`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_adaptor("sim", |spec| {
            Ok(Box::new(SimAdaptor::from_params(&spec.name, &spec.params)))
        });
        registry.register_adaptor("tcp", |spec| {
            Ok(Box::new(TcpAdaptor::from_params(&spec.name, &spec.params)?))
        });
        registry.register_driver("led", |_| Ok(Box::new(LedDriver::new())));
        registry.register_driver("button", |_| Ok(Box::new(ButtonDriver::new())));
        registry.register_driver("passthru", |_| Ok(Box::new(PassthruDriver)));
        registry
    }

    /// Register an adaptor factory.  Any previous factory for the same kind is
    /// replaced.
    pub fn register_adaptor<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ConnectionSpec) -> Result<Box<dyn Adaptor>, RobotError> + Send + Sync + 'static,
    {
        self.adaptors.insert(kind.into(), Arc::new(factory));
    }

    /// Register a driver factory.  Any previous factory for the same kind is
    /// replaced.
    pub fn register_driver<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&DeviceSpec) -> Result<Box<dyn Driver>, RobotError> + Send + Sync + 'static,
    {
        self.drivers.insert(kind.into(), Arc::new(factory));
    }

    /// Build the adaptor for `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::UnknownAdaptor`] for an unregistered kind, or
    /// whatever the factory reports.
    pub fn build_adaptor(&self, spec: &ConnectionSpec) -> Result<Box<dyn Adaptor>, RobotError> {
        let factory = self
            .adaptors
            .get(&spec.adaptor)
            .ok_or_else(|| RobotError::UnknownAdaptor(spec.adaptor.clone()))?;
        factory(spec)
    }

    /// Build the driver for `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::UnknownDriver`] for an unregistered kind, or
    /// whatever the factory reports.
    pub fn build_driver(&self, spec: &DeviceSpec) -> Result<Box<dyn Driver>, RobotError> {
        let factory = self
            .drivers
            .get(&spec.driver)
            .ok_or_else(|| RobotError::UnknownDriver(spec.driver.clone()))?;
        factory(spec)
    }

    /// Registered adaptor kinds, sorted.
    pub fn adaptor_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.adaptors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Registered driver kinds, sorted.
    pub fn driver_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for HardwareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareRegistry")
            .field("adaptors", &self.adaptor_kinds())
            .field("drivers", &self.driver_kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_are_registered() {
        let registry = HardwareRegistry::with_builtins();
        assert_eq!(registry.adaptor_kinds(), vec!["sim", "tcp"]);
        assert_eq!(registry.driver_kinds(), vec!["button", "led", "passthru"]);
    }

    #[test]
    fn builds_by_kind() {
        let registry = HardwareRegistry::with_builtins();
        let adaptor = registry
            .build_adaptor(&ConnectionSpec::new("serial", "sim"))
            .unwrap();
        assert_eq!(adaptor.kind(), "sim");

        let driver = registry.build_driver(&DeviceSpec::new("led", "led")).unwrap();
        assert_eq!(driver.kind(), "led");
        assert!(driver.is_known_command("toggle"));
    }

    #[test]
    fn unknown_kinds_are_rejected() {
        let registry = HardwareRegistry::with_builtins();
        assert!(matches!(
            registry.build_adaptor(&ConnectionSpec::new("x", "firmata")),
            Err(RobotError::UnknownAdaptor(kind)) if kind == "firmata"
        ));
        assert!(matches!(
            registry.build_driver(&DeviceSpec::new("x", "servo")),
            Err(RobotError::UnknownDriver(kind)) if kind == "servo"
        ));
    }

    #[test]
    fn factory_errors_propagate() {
        let registry = HardwareRegistry::with_builtins();
        // tcp without a port
        let result = registry.build_adaptor(&ConnectionSpec::new("net", "tcp"));
        assert!(matches!(result, Err(RobotError::Config(_))));

        let ok = registry.build_adaptor(&ConnectionSpec::new("net", "tcp").with_param("port", json!(4000)));
        assert!(ok.is_ok());
    }

    #[test]
    fn re_registering_replaces_the_factory() {
        let mut registry = HardwareRegistry::with_builtins();
        registry.register_driver("led", |_| Ok(Box::new(PassthruDriver)));
        let driver = registry.build_driver(&DeviceSpec::new("led", "led")).unwrap();
        assert_eq!(driver.kind(), "passthru");
    }
}
