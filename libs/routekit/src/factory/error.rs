use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised while building or registering component instances.
///
/// All of them are fatal for the call that raised them; the factory never
/// caches a partially built instance.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("no configuration section or instance named '{0}'")]
    NotFound(String),
    #[error("unknown component class '{0}'")]
    UnknownClass(String),
    #[error("cannot construct '{class}': parameter '{parameter}' could not be resolved")]
    Construction { class: String, parameter: String },
    #[error("instance '{name}' does not satisfy the '{expected}' interface")]
    InterfaceViolation {
        name: String,
        expected: &'static str,
    },
    #[error("circular dependency detected: {}", path.join(" -> "))]
    CircularDependency { path: Vec<String> },
    #[error("invalid argument '{parameter}' for '{class}': {message}")]
    InvalidArgument {
        class: String,
        parameter: String,
        message: String,
    },
    #[error("build failed for component class '{class}'")]
    Build {
        class: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("component class '{0}' is already registered")]
    DuplicateClass(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
