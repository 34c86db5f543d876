//! Errors raised while parsing shared types and configuration.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid night date '{value}': expected YYYY_MM_DD")]
    InvalidDate { value: String },

    #[error("Invalid run kind: '{0}'")]
    InvalidRunKind(String),

    #[error("Invalid product kind: '{0}'")]
    InvalidProductKind(String),

    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(String),

    #[error("Unknown placeholder '{{{placeholder}}}' in template '{template}'")]
    UnknownPlaceholder {
        placeholder: String,
        template: String,
    },

    #[error("Unterminated placeholder in template '{0}'")]
    UnterminatedPlaceholder(String),
}
