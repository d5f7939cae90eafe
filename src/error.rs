//! Error types for signing file collection and upload.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CollectorError>;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Keychain access denied: {0}")]
    AccessDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to decode provisioning profile {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("Failed to export {entity}: missing or invalid {field}")]
    Export { entity: String, field: &'static str },

    #[error("No signing files left to upload after matching")]
    EmptyPayload,

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Failed to open signing files collection: {0}")]
    Collection(String),

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Invalid certificate: {0}")]
    Certificate(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),
}

impl CollectorError {
    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn export(entity: impl ToString, field: &'static str) -> Self {
        Self::Export {
            entity: entity.to_string(),
            field,
        }
    }
}
