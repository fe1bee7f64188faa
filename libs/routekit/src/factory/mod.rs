//! Instance registry: builds named components from configuration sections.
//!
//! A component named `store` is described by the `[store]` section. The
//! optional `__class` key selects the class (defaults to the section name),
//! `__shared = false` disables caching, constructor parameters are resolved
//! in this order:
//!
//! 1. an already-registered instance named like the parameter,
//! 2. an explicit value in the merged section,
//! 3. a component built from a section named like the parameter,
//! 4. the parameter's default.
//!
//! Remaining non-metadata keys go through the class setter.

mod argument;
mod class;
mod error;
mod instance;
mod interfaces;

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};

pub use argument::{Argument, Overrides, Value};
pub use class::{Args, ClassRegistry, ComponentClass, ComponentRegistrator, Param, Requirement};
pub use error::FactoryError;
pub use instance::Instance;
pub use interfaces::{Interface, RequiredInterfaces};

use crate::config::{Configuration, META_PREFIX};

const CLASS_KEY: &str = "__class";
const SHARED_KEY: &str = "__shared";

/// Name under which the factory registers its configuration store.
pub const CONFIGURATION_INSTANCE: &str = "configuration";

/// Merged construction input: lower-cased keys in source order.
#[derive(Debug, Default)]
struct Blueprint {
    entries: Vec<(String, Argument)>,
}

impl Blueprint {
    fn set(&mut self, key: &str, value: Argument) {
        let key = key.to_lowercase();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    fn get(&self, key: &str) -> Option<&Argument> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn take(&mut self, key: &str) -> Option<Argument> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    fn is_shared(&self) -> bool {
        !matches!(self.get(SHARED_KEY), Some(Argument::Bool(false)))
    }
}

/// Builds, caches and hands out component instances.
pub struct ObjectFactory {
    configuration: Arc<Configuration>,
    classes: ClassRegistry,
    interfaces: RequiredInterfaces,
    instances: RwLock<HashMap<String, Instance>>,
    /// Serialises check-then-create; re-entered by nested construction.
    /// Holds the names currently under construction.
    building: ReentrantMutex<RefCell<Vec<String>>>,
}

impl std::fmt::Debug for ObjectFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectFactory")
            .field("classes", &self.classes)
            .field("instances", &self.instance_names())
            .finish()
    }
}

impl ObjectFactory {
    pub fn new(configuration: Arc<Configuration>, classes: ClassRegistry) -> Self {
        Self::with_interfaces(configuration, classes, RequiredInterfaces::standard())
    }

    pub fn with_interfaces(
        configuration: Arc<Configuration>,
        classes: ClassRegistry,
        interfaces: RequiredInterfaces,
    ) -> Self {
        let mut instances = HashMap::new();
        instances.insert(
            CONFIGURATION_INSTANCE.to_string(),
            Instance::new(Arc::clone(&configuration)).with_class("Configuration"),
        );
        Self {
            configuration,
            classes,
            interfaces,
            instances: RwLock::new(instances),
            building: ReentrantMutex::new(RefCell::new(Vec::new())),
        }
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// Shared instance of component `name`, built on first use.
    pub fn get_instance(&self, name: &str, overrides: &Overrides) -> Result<Instance, FactoryError> {
        let _guard = self.building.lock();
        let key = cache_key(name, overrides);
        if let Some(found) = self.instances.read().get(&key) {
            tracing::trace!(name, "instance cache hit");
            return Ok(found.clone());
        }
        let blueprint = self.blueprint(name, overrides)?;
        let shared = blueprint.is_shared();
        self.construct(name, None, blueprint, shared.then_some(key.as_str()))
    }

    /// Fresh, uncached instance of component `name`.
    pub fn get_new_instance(
        &self,
        name: &str,
        overrides: &Overrides,
    ) -> Result<Instance, FactoryError> {
        let _guard = self.building.lock();
        let blueprint = self.blueprint(name, overrides)?;
        self.construct(name, None, blueprint, None)
    }

    /// Fresh instance of `class`, configured by the section of the same name if any.
    pub fn get_instance_of(
        &self,
        class: &str,
        overrides: &Overrides,
    ) -> Result<Instance, FactoryError> {
        let _guard = self.building.lock();
        let component = self
            .classes
            .get(class)
            .ok_or_else(|| FactoryError::UnknownClass(class.to_string()))?;
        let mut blueprint = Blueprint::default();
        if self.configuration.has_section(class) {
            self.load_section(class, &mut blueprint)?;
        }
        for (key, value) in overrides {
            blueprint.set(key, value.clone());
        }
        self.construct(class, Some(component), blueprint, None)
    }

    /// Register an externally built instance under `name`.
    pub fn register_instance(&self, name: &str, instance: Instance) -> Result<(), FactoryError> {
        self.interfaces.check(name, &instance)?;
        self.instances.write().insert(name.to_lowercase(), instance);
        tracing::debug!(name, "instance registered");
        Ok(())
    }

    pub fn has_instance(&self, name: &str) -> bool {
        self.instances.read().contains_key(&name.to_lowercase())
    }

    pub fn remove_instance(&self, name: &str) -> Option<Instance> {
        self.instances.write().remove(&name.to_lowercase())
    }

    /// Cache keys of all shared instances, sorted.
    pub fn instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn load_section(&self, name: &str, blueprint: &mut Blueprint) -> Result<(), FactoryError> {
        for (key, raw) in self.configuration.get_section_raw(name)? {
            blueprint.set(&key, Argument::parse(&raw));
        }
        Ok(())
    }

    fn blueprint(&self, name: &str, overrides: &Overrides) -> Result<Blueprint, FactoryError> {
        if !self.configuration.has_section(name) {
            return Err(FactoryError::NotFound(name.to_string()));
        }
        let mut blueprint = Blueprint::default();
        self.load_section(name, &mut blueprint)?;
        for (key, value) in overrides {
            blueprint.set(key, value.clone());
        }
        Ok(blueprint)
    }

    fn construct(
        &self,
        name: &str,
        class: Option<Arc<ComponentClass>>,
        mut blueprint: Blueprint,
        cache_as: Option<&str>,
    ) -> Result<Instance, FactoryError> {
        let class = match class {
            Some(class) => class,
            None => {
                let class_name = blueprint
                    .get(CLASS_KEY)
                    .and_then(Argument::as_text)
                    .unwrap_or(name)
                    .to_string();
                self.classes
                    .get(&class_name)
                    .ok_or(FactoryError::UnknownClass(class_name))?
            }
        };

        let guard = self.building.lock();
        let entry = UnderConstruction::enter(&guard, name)?;
        let built = self.build(name, &class, &mut blueprint);
        drop(entry);
        let instance = built?;

        if let Some(key) = cache_as {
            self.instances.write().insert(key.to_string(), instance.clone());
            tracing::debug!(name, class = class.name(), "shared instance cached");
        } else {
            tracing::trace!(name, class = class.name(), "instance built");
        }
        Ok(instance)
    }

    fn build(
        &self,
        name: &str,
        class: &ComponentClass,
        blueprint: &mut Blueprint,
    ) -> Result<Instance, FactoryError> {
        let mut args = Args::new(class.name());
        for param in class.params() {
            let pname = param.name();
            let explicit = blueprint.take(pname);

            let registered = self.instances.read().get(pname).cloned();
            let value = if let Some(instance) = registered {
                Some(Value::Instance(instance))
            } else if let Some(arg) = explicit {
                Some(self.resolve(&arg)?)
            } else if self.configuration.has_section(pname) {
                Some(Value::Instance(self.get_instance(pname, &Overrides::new())?))
            } else {
                match param.requirement() {
                    Requirement::Default(default) => Some(default.clone()),
                    Requirement::Optional => None,
                    Requirement::Required => {
                        return Err(FactoryError::Construction {
                            class: class.name().to_string(),
                            parameter: pname.to_string(),
                        })
                    }
                }
            };
            if let Some(value) = value {
                args.insert(pname, value);
            }
        }

        let instance = class.build(&args)?;
        self.interfaces.check(name, &instance)?;

        for (key, arg) in &blueprint.entries {
            if key.starts_with(META_PREFIX) {
                continue;
            }
            let value = self.resolve(arg)?;
            if !class.apply(&instance, key, &value)? {
                tracing::warn!(
                    component = name,
                    class = class.name(),
                    property = %key,
                    "unknown property ignored"
                );
            }
        }
        Ok(instance)
    }

    fn resolve(&self, arg: &Argument) -> Result<Value, FactoryError> {
        Ok(match arg {
            Argument::Bool(b) => Value::Bool(*b),
            Argument::Int(i) => Value::Int(*i),
            Argument::Float(f) => Value::Float(*f),
            Argument::Str(s) => Value::Str(s.clone()),
            Argument::Reference(name) => Value::Instance(self.get_instance(name, &Overrides::new())?),
            Argument::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.resolve(item))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

/// Entry on the under-construction stack; popped on drop, unwinding included.
struct UnderConstruction<'a> {
    stack: &'a RefCell<Vec<String>>,
}

impl<'a> UnderConstruction<'a> {
    fn enter(stack: &'a RefCell<Vec<String>>, name: &str) -> Result<Self, FactoryError> {
        let lower = name.to_lowercase();
        let mut names = stack.borrow_mut();
        if names.contains(&lower) {
            let mut path = names.clone();
            path.push(lower);
            return Err(FactoryError::CircularDependency { path });
        }
        names.push(lower);
        Ok(Self { stack })
    }
}

impl Drop for UnderConstruction<'_> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

fn cache_key(name: &str, overrides: &Overrides) -> String {
    let name = name.to_lowercase();
    if overrides.is_empty() {
        return name;
    }
    let suffix = serde_json::to_string(overrides).unwrap_or_default();
    format!("{name}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Store {
        path: String,
        retries: i64,
    }

    struct Service {
        store: Arc<Store>,
        verbose: RwLock<bool>,
    }

    fn classes() -> ClassRegistry {
        let mut registry = ClassRegistry::with_builtin().unwrap();
        registry
            .register(
                ComponentClass::new("Store", |args| {
                    Ok(Instance::new(Arc::new(Store {
                        path: args.string("path")?,
                        retries: args.int("retries")?,
                    })))
                })
                .param("path")
                .param_or("retries", Value::Int(3)),
            )
            .unwrap();
        registry
            .register(
                ComponentClass::new("Service", |args| {
                    Ok(Instance::new(Arc::new(Service {
                        store: args.instance::<Store>("store")?,
                        verbose: RwLock::new(false),
                    })))
                })
                .param("store")
                .with_setter(|instance, key, value| {
                    let Some(service) = instance.get::<Service>() else {
                        return Ok(false);
                    };
                    match (key, value.as_bool()) {
                        ("verbose", Some(v)) => {
                            *service.verbose.write() = v;
                            Ok(true)
                        }
                        _ => Ok(false),
                    }
                }),
            )
            .unwrap();
        registry
    }

    fn factory(text: &str) -> ObjectFactory {
        let cfg = Configuration::with_defaults().unwrap();
        cfg.add_configuration_str("test", text).unwrap();
        ObjectFactory::new(Arc::new(cfg), classes())
    }

    #[test]
    fn shared_instances_are_reused() {
        let f = factory("[store]\npath = \"/tmp/db\"\n");
        let a = f.get_instance("store", &Overrides::new()).unwrap();
        let b = f.get_instance("STORE", &Overrides::new()).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.get::<Store>().unwrap().retries, 3);
        assert!(f.has_instance("store"));
    }

    #[test]
    fn new_instances_are_distinct_and_uncached() {
        let f = factory("[store]\npath = \"/tmp/db\"\n");
        let a = f.get_new_instance("store", &Overrides::new()).unwrap();
        let b = f.get_new_instance("store", &Overrides::new()).unwrap();
        assert!(!a.ptr_eq(&b));
        assert!(!f.has_instance("store"));
    }

    #[test]
    fn non_shared_section_is_never_cached() {
        let f = factory("[store]\n__shared = false\npath = \"/tmp/db\"\n");
        let a = f.get_instance("store", &Overrides::new()).unwrap();
        let b = f.get_instance("store", &Overrides::new()).unwrap();
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn overrides_win_and_get_their_own_cache_slot() {
        let f = factory("[store]\npath = \"/tmp/db\"\n");
        let mut overrides = Overrides::new();
        overrides.insert("retries".into(), Argument::Int(9));

        let tuned = f.get_instance("store", &overrides).unwrap();
        let plain = f.get_instance("store", &Overrides::new()).unwrap();
        assert_eq!(tuned.get::<Store>().unwrap().retries, 9);
        assert_eq!(plain.get::<Store>().unwrap().retries, 3);
        assert!(tuned.ptr_eq(&f.get_instance("store", &overrides).unwrap()));
        assert_eq!(f.instance_names().len(), 3);
    }

    #[test]
    fn dependencies_come_from_sections_named_like_parameters() {
        let f = factory("[store]\npath = \"/data\"\n[service]\nverbose = true\n");
        let svc = f.get_instance("service", &Overrides::new()).unwrap();
        let svc = svc.get::<Service>().unwrap();
        assert_eq!(svc.store.path, "/data");
        assert!(*svc.verbose.read());

        let store = f.get_instance("store", &Overrides::new()).unwrap();
        assert!(Arc::ptr_eq(&store.get::<Store>().unwrap(), &svc.store));
    }

    #[test]
    fn explicit_reference_and_class_alias() {
        let f = factory(
            "[primary]\n__class = Store\npath = \"/primary\"\n\
             [service]\nstore = primary\n",
        );
        let svc = f.get_instance("service", &Overrides::new()).unwrap();
        assert_eq!(svc.get::<Service>().unwrap().store.path, "/primary");
        assert_eq!(
            f.get_instance("primary", &Overrides::new()).unwrap().class(),
            "Store"
        );
    }

    #[test]
    fn registered_instance_wins_over_configuration() {
        let f = factory("[store]\npath = \"/cfg\"\n[service]\nstore = other\n");
        f.register_instance(
            "store",
            Instance::new(Arc::new(Store {
                path: "/registered".into(),
                retries: 0,
            })),
        )
        .unwrap();
        let svc = f.get_instance("service", &Overrides::new()).unwrap();
        assert_eq!(svc.get::<Service>().unwrap().store.path, "/registered");
    }

    #[test]
    fn missing_required_parameter_is_fatal_and_not_cached() {
        let f = factory("[store]\nretries = 1\n");
        match f.get_instance("store", &Overrides::new()).unwrap_err() {
            FactoryError::Construction { class, parameter } => {
                assert_eq!(class, "Store");
                assert_eq!(parameter, "path");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!f.has_instance("store"));

        f.configuration().set_value("path", "store", "\"/late\"").unwrap();
        let store = f.get_instance("store", &Overrides::new()).unwrap();
        assert_eq!(store.get::<Store>().unwrap().path, "/late");
    }

    #[test]
    fn unknown_section_is_not_found() {
        let f = factory("[store]\npath = \"/x\"\n");
        assert!(matches!(
            f.get_instance("nowhere", &Overrides::new()),
            Err(FactoryError::NotFound(name)) if name == "nowhere"
        ));
        assert!(matches!(
            f.get_instance_of("NoSuchClass", &Overrides::new()),
            Err(FactoryError::UnknownClass(_))
        ));
    }

    #[test]
    fn cycles_fail_fast() {
        let mut registry = classes();
        registry
            .register(
                ComponentClass::new("Left", |args| {
                    Ok(Instance::new(Arc::new(args.contains("right"))))
                })
                .param("right"),
            )
            .unwrap();
        registry
            .register(
                ComponentClass::new("Right", |args| {
                    Ok(Instance::new(Arc::new(args.contains("left"))))
                })
                .param("left"),
            )
            .unwrap();
        let cfg = Configuration::new();
        cfg.add_configuration_str("t", "[left]\n[right]\n").unwrap();
        let f = ObjectFactory::new(Arc::new(cfg), registry);

        match f.get_instance("left", &Overrides::new()).unwrap_err() {
            FactoryError::CircularDependency { path } => {
                assert_eq!(path, vec!["left", "right", "left"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(f.instance_names().iter().all(|n| n != "left" && n != "right"));
    }

    #[test]
    fn interface_violations_are_reported() {
        let mut registry = classes();
        registry
            .register(ComponentClass::new("Fake", |_args| {
                Ok(Instance::new(Arc::new(0_u32)))
            }))
            .unwrap();
        let cfg = Configuration::new();
        cfg.add_configuration_str("t", "[event_manager]\n__class = Fake\n")
            .unwrap();
        let f = ObjectFactory::new(Arc::new(cfg), registry);

        assert!(matches!(
            f.get_instance("event_manager", &Overrides::new()),
            Err(FactoryError::InterfaceViolation { .. })
        ));
        assert!(matches!(
            f.register_instance("configuration", Instance::new(Arc::new(1_u8))),
            Err(FactoryError::InterfaceViolation { .. })
        ));
    }

    #[test]
    fn configuration_is_self_registered() {
        let f = factory("[store]\npath = \"/x\"\n");
        let cfg = f
            .get_instance(CONFIGURATION_INSTANCE, &Overrides::new())
            .unwrap()
            .get::<Configuration>()
            .unwrap();
        assert!(Arc::ptr_eq(&cfg, f.configuration()));
    }

    #[test]
    fn panicking_build_does_not_leave_name_under_construction() {
        static ATTEMPTS: AtomicUsize = AtomicUsize::new(0);
        let mut registry = ClassRegistry::new();
        registry
            .register(ComponentClass::new("Flaky", |_args| {
                if ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first build blows up");
                }
                Ok(Instance::new(Arc::new(7_u32)))
            }))
            .unwrap();
        let cfg = Configuration::new();
        cfg.add_configuration_str("t", "[flaky]\n").unwrap();
        let f = Arc::new(ObjectFactory::new(Arc::new(cfg), registry));

        let first = {
            let f = Arc::clone(&f);
            std::thread::spawn(move || f.get_instance("flaky", &Overrides::new()).map(|_| ()))
        };
        assert!(first.join().is_err());

        let second = f.get_instance("flaky", &Overrides::new()).unwrap();
        assert_eq!(*second.get::<u32>().unwrap(), 7);
        assert_eq!(ATTEMPTS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_first_use_builds_once() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);
        let mut registry = ClassRegistry::new();
        registry
            .register(ComponentClass::new("Slow", |_args| {
                BUILDS.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(5));
                Ok(Instance::new(Arc::new(())))
            }))
            .unwrap();
        let cfg = Configuration::new();
        cfg.add_configuration_str("t", "[slow]\n").unwrap();
        let f = Arc::new(ObjectFactory::new(Arc::new(cfg), registry));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let f = Arc::clone(&f);
                std::thread::spawn(move || f.get_instance("slow", &Overrides::new()).unwrap())
            })
            .collect();
        let built: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        assert!(built.windows(2).all(|w| w[0].ptr_eq(&w[1])));
    }
}
