use std::collections::HashMap;

use parking_lot::RwLock;

use super::{FactoryError, Instance};
use crate::config::Configuration;
use crate::events::EventDispatcher;
use crate::mapper::ActionMapper;
use crate::message::{Request, Response};

/// A capability check applied to instances registered under a well-known name.
#[derive(Debug, Clone, Copy)]
pub struct Interface {
    name: &'static str,
    check: fn(&Instance) -> bool,
}

impl Interface {
    pub const fn new(name: &'static str, check: fn(&Instance) -> bool) -> Self {
        Self { name, check }
    }

    /// Satisfied when the instance holds an `Arc<T>`.
    pub fn of<T>(name: &'static str) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self::new(name, Instance::is::<T>)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_satisfied_by(&self, instance: &Instance) -> bool {
        (self.check)(instance)
    }
}

/// Well-known component names and the interface each must implement.
#[derive(Debug, Clone)]
pub struct RequiredInterfaces {
    by_name: HashMap<String, Interface>,
}

impl Default for RequiredInterfaces {
    fn default() -> Self {
        Self::standard()
    }
}

impl RequiredInterfaces {
    pub fn empty() -> Self {
        Self {
            by_name: HashMap::new(),
        }
    }

    /// `event_manager`, `configuration`, `request`, `response` and `action_mapper`.
    pub fn standard() -> Self {
        let mut this = Self::empty();
        this.require("event_manager", Interface::of::<dyn EventDispatcher>("EventDispatcher"));
        this.require("configuration", Interface::of::<Configuration>("Configuration"));
        this.require("request", Interface::of::<RwLock<Request>>("Request"));
        this.require("response", Interface::of::<RwLock<Response>>("Response"));
        this.require("action_mapper", Interface::of::<ActionMapper>("ActionMapper"));
        this
    }

    pub fn require(&mut self, name: &str, interface: Interface) {
        self.by_name.insert(name.to_lowercase(), interface);
    }

    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.by_name.get(&name.to_lowercase())
    }

    /// Names without a registered interface always pass.
    pub fn check(&self, name: &str, instance: &Instance) -> Result<(), FactoryError> {
        match self.get(name) {
            Some(interface) if !interface.is_satisfied_by(instance) => {
                Err(FactoryError::InterfaceViolation {
                    name: name.to_string(),
                    expected: interface.name,
                })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn standard_names_are_enforced() {
        let required = RequiredInterfaces::standard();
        let cfg = Instance::new(Arc::new(Configuration::new()));
        assert!(required.check("Configuration", &cfg).is_ok());

        match required.check("request", &cfg).unwrap_err() {
            FactoryError::InterfaceViolation { name, expected } => {
                assert_eq!(name, "request");
                assert_eq!(expected, "Request");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_names_pass() {
        let required = RequiredInterfaces::standard();
        let anything = Instance::new(Arc::new(5_u8));
        assert!(required.check("whatever", &anything).is_ok());
        assert!(RequiredInterfaces::empty()
            .check("request", &anything)
            .is_ok());
    }
}
