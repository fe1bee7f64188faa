use std::collections::BTreeMap;

use serde::Serialize;

use super::Instance;
use crate::config::{is_float_literal, parse_bool, unquote};

/// Construction argument as written in configuration, interpreted once.
///
/// Booleans and numbers are literals, quoted text is a string literal and any
/// other bare word names another instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Argument {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Reference(String),
    List(Vec<Argument>),
}

/// Per-call overrides merged over a component's configuration section.
///
/// Ordered so that identical overrides always serialise to the same cache key.
pub type Overrides = BTreeMap<String, Argument>;

impl Argument {
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim();
        if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            return Self::List(
                inner
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(Self::parse_scalar)
                    .collect(),
            );
        }
        Self::parse_scalar(text)
    }

    fn parse_scalar(text: &str) -> Self {
        if let Some(b) = parse_bool(text) {
            return Self::Bool(b);
        }
        if let Some(s) = unquote(text) {
            return Self::Str(s.to_string());
        }
        if let Ok(i) = text.parse::<i64>() {
            return Self::Int(i);
        }
        if is_float_literal(text) {
            if let Ok(f) = text.parse::<f64>() {
                return Self::Float(f);
            }
        }
        if text.is_empty() {
            return Self::Str(String::new());
        }
        Self::Reference(text.to_string())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }

    /// Text of a string literal or reference, used for metadata such as `__class`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Reference(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Argument {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Argument {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Argument {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// A resolved argument: references have been turned into instances.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Instance(Instance),
    List(Vec<Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Instance(_) => "instance",
            Self::List(_) => "list",
        }
    }
}
