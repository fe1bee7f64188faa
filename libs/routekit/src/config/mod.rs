//! Configuration store: sectioned `key = value` sources merged in layers.

mod error;
pub mod parser;
mod store;
mod value;

pub use error::ConfigError;
pub use store::{Configuration, SectionKeys, META_PREFIX};
pub use value::ConfigValue;

pub(crate) use value::{is_float_literal, parse_bool, unquote};

/// Section and key names compare under full Unicode lower-casing, the same
/// folding the lookup tables use.
pub(crate) fn same_name(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Name under which the built-in defaults are merged.
pub const DEFAULTS_SOURCE: &str = "<defaults>";

/// Component sections every application needs (`request`, `response`, `event_manager`).
pub const DEFAULT_CONFIGURATION: &str = include_str!("../../resources/defaults.ini");
