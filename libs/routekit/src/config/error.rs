use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the configuration store.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration source '{0}' not found")]
    SourceNotFound(String),
    #[error("section '{0}' not found")]
    SectionNotFound(String),
    #[error("key '{key}' not found in section '{section}'")]
    KeyNotFound { section: String, key: String },
    #[error("parse error in '{source_name}' at line {line}: {message}")]
    Parse {
        source_name: String,
        line: usize,
        message: String,
    },
    #[error("invalid section or key name '{0}'")]
    InvalidName(String),
    #[error("invalid entry '{0}'")]
    InvalidEntry(String),
    #[error("I/O error on '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// True for the "requested thing is absent" family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound(_) | Self::SectionNotFound(_) | Self::KeyNotFound { .. }
        )
    }
}
