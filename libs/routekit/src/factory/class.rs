use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{FactoryError, Instance, Value};
use crate::contracts::Handler;

type BuildFn = dyn Fn(&Args) -> anyhow::Result<Instance> + Send + Sync;
type SetterFn = dyn Fn(&Instance, &str, &Value) -> Result<bool, FactoryError> + Send + Sync;

/// How a constructor parameter behaves when nothing supplies it.
#[derive(Debug, Clone)]
pub enum Requirement {
    Required,
    Default(Value),
    Optional,
}

#[derive(Debug, Clone)]
pub struct Param {
    name: String,
    requirement: Requirement,
}

impl Param {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }
}

/// A constructible component: declared parameters plus a build function.
///
/// ```ignore
/// ComponentClass::new("Greeter", |args| {
///     let prefix = args.string("prefix")?;
///     Ok(Instance::new(Arc::new(Greeter { prefix })))
/// })
/// .param_or("prefix", Value::Str("hello".into()))
/// ```
pub struct ComponentClass {
    name: String,
    params: Vec<Param>,
    build: Arc<BuildFn>,
    setter: Option<Arc<SetterFn>>,
}

impl fmt::Debug for ComponentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentClass")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("has_setter", &self.setter.is_some())
            .finish()
    }
}

impl ComponentClass {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn(&Args) -> anyhow::Result<Instance> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params: Vec::new(),
            build: Arc::new(build),
            setter: None,
        }
    }

    /// A class whose instances are dispatchable handlers.
    pub fn handler<H, F>(name: impl Into<String>, build: F) -> Self
    where
        H: Handler + 'static,
        F: Fn(&Args) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        Self::new(name, move |args| Ok(Instance::handler(build(args)?)))
    }

    fn push_param(mut self, name: &str, requirement: Requirement) -> Self {
        self.params.push(Param {
            name: name.to_lowercase(),
            requirement,
        });
        self
    }

    pub fn param(self, name: &str) -> Self {
        self.push_param(name, Requirement::Required)
    }

    pub fn param_or(self, name: &str, default: Value) -> Self {
        self.push_param(name, Requirement::Default(default))
    }

    pub fn optional_param(self, name: &str) -> Self {
        self.push_param(name, Requirement::Optional)
    }

    /// Handle configuration keys that are not constructor parameters.
    /// The setter returns `false` for keys it does not know.
    pub fn with_setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&Instance, &str, &Value) -> Result<bool, FactoryError> + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub(crate) fn build(&self, args: &Args) -> Result<Instance, FactoryError> {
        (self.build)(args)
            .map(|instance| instance.with_class(&self.name))
            .map_err(|err| match err.downcast::<FactoryError>() {
                Ok(inner) => inner,
                Err(source) => FactoryError::Build {
                    class: self.name.clone(),
                    source,
                },
            })
    }

    pub(crate) fn apply(
        &self,
        instance: &Instance,
        key: &str,
        value: &Value,
    ) -> Result<bool, FactoryError> {
        match &self.setter {
            Some(setter) => setter(instance, key, value),
            None => Ok(false),
        }
    }
}

/// Resolved constructor arguments handed to a build function.
#[derive(Debug, Default)]
pub struct Args {
    class: String,
    values: HashMap<String, Value>,
}

impl Args {
    pub(crate) fn new(class: &str) -> Self {
        Self {
            class: class.to_string(),
            values: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_lowercase(), value);
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&name.to_lowercase())
    }

    fn invalid(&self, name: &str, message: impl Into<String>) -> FactoryError {
        FactoryError::InvalidArgument {
            class: self.class.clone(),
            parameter: name.to_string(),
            message: message.into(),
        }
    }

    fn require(&self, name: &str) -> Result<&Value, FactoryError> {
        self.get(name).ok_or_else(|| self.invalid(name, "missing"))
    }

    fn mismatch(&self, name: &str, expected: &str, found: &Value) -> FactoryError {
        self.invalid(name, format!("expected {expected}, found {}", found.kind()))
    }

    pub fn instance<T>(&self, name: &str) -> Result<Arc<T>, FactoryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let value = self.require(name)?;
        value
            .as_instance()
            .and_then(Instance::get::<T>)
            .ok_or_else(|| self.mismatch(name, std::any::type_name::<T>(), value))
    }

    pub fn bool(&self, name: &str) -> Result<bool, FactoryError> {
        let value = self.require(name)?;
        value.as_bool().ok_or_else(|| self.mismatch(name, "bool", value))
    }

    pub fn int(&self, name: &str) -> Result<i64, FactoryError> {
        let value = self.require(name)?;
        value.as_int().ok_or_else(|| self.mismatch(name, "integer", value))
    }

    pub fn float(&self, name: &str) -> Result<f64, FactoryError> {
        let value = self.require(name)?;
        value.as_float().ok_or_else(|| self.mismatch(name, "float", value))
    }

    pub fn string(&self, name: &str) -> Result<String, FactoryError> {
        let value = self.require(name)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.mismatch(name, "string", value))
    }

    pub fn list(&self, name: &str) -> Result<&[Value], FactoryError> {
        let value = self.require(name)?;
        value.as_list().ok_or_else(|| self.mismatch(name, "list", value))
    }
}

/// Function type submitted through `inventory::submit!` to contribute classes.
pub struct ComponentRegistrator(pub fn(&mut ClassRegistry) -> Result<(), FactoryError>);

inventory::collect!(ComponentRegistrator);

/// Name-indexed table of constructible classes. Lookups ignore case.
#[derive(Default)]
pub struct ClassRegistry {
    classes: HashMap<String, Arc<ComponentClass>>,
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.names())
            .finish()
    }
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the framework classes (`Request`, `Response`, `EventManager`).
    pub fn with_builtin() -> Result<Self, FactoryError> {
        let mut registry = Self::new();
        crate::message::register_classes(&mut registry)?;
        crate::events::register_classes(&mut registry)?;
        Ok(registry)
    }

    /// Built-in classes plus everything submitted via `inventory`.
    pub fn discover() -> Result<Self, FactoryError> {
        let mut registry = Self::with_builtin()?;
        for r in ::inventory::iter::<ComponentRegistrator> {
            r.0(&mut registry)?;
        }
        tracing::debug!(classes = registry.classes.len(), "component classes discovered");
        Ok(registry)
    }

    pub fn register(&mut self, class: ComponentClass) -> Result<(), FactoryError> {
        let key = class.name.to_lowercase();
        if self.classes.contains_key(&key) {
            return Err(FactoryError::DuplicateClass(class.name));
        }
        self.classes.insert(key, Arc::new(class));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ComponentClass>> {
        self.classes.get(&name.to_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(&name.to_lowercase())
    }

    /// Registered class names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.values().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }
}
