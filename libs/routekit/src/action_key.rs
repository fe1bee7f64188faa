//! Action keys - the `resource?context?action` routing triple

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Separator between the three parts of a serialized key.
pub const DELIMITER: char = '?';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionKeyError {
    #[error("action key part '{part}' must not contain '?'")]
    DelimiterInPart { part: String },
    #[error("action key '{0}' has more than three parts")]
    TooManyParts(String),
}

/// A routing key made of resource (sender), context and action.
///
/// Any part may be empty. Serialized form is `resource?context?action`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub resource: String,
    pub context: String,
    pub action: String,
}

impl ActionKey {
    pub fn new(
        resource: impl Into<String>,
        context: impl Into<String>,
        action: impl Into<String>,
    ) -> Result<Self, ActionKeyError> {
        let key = Self {
            resource: resource.into(),
            context: context.into(),
            action: action.into(),
        };
        for part in [&key.resource, &key.context, &key.action] {
            if part.contains(DELIMITER) {
                return Err(ActionKeyError::DelimiterInPart { part: part.clone() });
            }
        }
        Ok(key)
    }

    /// Parse a serialized key. Missing trailing parts are treated as empty.
    pub fn parse(raw: &str) -> Result<Self, ActionKeyError> {
        let mut parts = raw.split(DELIMITER);
        let resource = parts.next().unwrap_or_default();
        let context = parts.next().unwrap_or_default();
        let action = parts.next().unwrap_or_default();
        if parts.next().is_some() {
            return Err(ActionKeyError::TooManyParts(raw.to_string()));
        }
        Ok(Self {
            resource: resource.to_string(),
            context: context.to_string(),
            action: action.to_string(),
        })
    }

    pub fn is_catch_all(&self) -> bool {
        self.resource.is_empty() && self.context.is_empty() && self.action.is_empty()
    }
}

/// Serialize three parts into a key string without validation.
pub fn create_key(resource: &str, context: &str, action: &str) -> String {
    format!("{resource}{DELIMITER}{context}{DELIMITER}{action}")
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&create_key(&self.resource, &self.context, &self.action))
    }
}

impl FromStr for ActionKey {
    type Err = ActionKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_parse_is_identity() {
        let samples = [
            ("users", "admin", "list"),
            ("", "admin", "list"),
            ("users", "", ""),
            ("", "", ""),
        ];
        for (r, c, a) in samples {
            let parsed = ActionKey::parse(&create_key(r, c, a)).unwrap();
            assert_eq!(parsed, ActionKey::new(r, c, a).unwrap());
        }
    }

    #[test]
    fn parse_pads_missing_parts() {
        let key = ActionKey::parse("users").unwrap();
        assert_eq!(key.resource, "users");
        assert_eq!(key.context, "");
        assert_eq!(key.action, "");
        assert_eq!(key.to_string(), "users??");
    }

    #[test]
    fn delimiter_in_part_is_rejected() {
        let err = ActionKey::new("a?b", "", "").unwrap_err();
        assert_eq!(
            err,
            ActionKeyError::DelimiterInPart {
                part: "a?b".to_string()
            }
        );
        assert!(matches!(
            ActionKey::parse("a?b?c?d"),
            Err(ActionKeyError::TooManyParts(_))
        ));
    }

    #[test]
    fn catch_all_detection() {
        assert!("??".parse::<ActionKey>().unwrap().is_catch_all());
        assert!(!"??x".parse::<ActionKey>().unwrap().is_catch_all());
    }
}
