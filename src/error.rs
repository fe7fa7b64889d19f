use std::path::PathBuf;
use thiserror::Error;

/// Main error type for kgmem
#[derive(Error, Debug)]
pub enum KgmemError {
    /// Operation payload is missing a required field or has the wrong shape
    #[error("Invalid parameters for '{operation}': {message}")]
    InvalidParameters { operation: String, message: String },

    /// Operation identifier not recognized by the router
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Referenced entity absent where presence is mandatory
    #[error("Entity not found: {entity}")]
    EntityNotFound { entity: String },

    /// Graph document unreadable or unwritable
    #[error("Storage error at {}: {source}", .path.display())]
    StorageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl KgmemError {
    pub fn invalid_params(operation: &str, message: impl Into<String>) -> Self {
        KgmemError::InvalidParameters {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KgmemError::StorageIo {
            path: path.into(),
            source,
        }
    }

    /// External name of the error kind, as reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            KgmemError::InvalidParameters { .. } => "InvalidParametersError",
            KgmemError::UnknownOperation(_) => "UnknownOperationError",
            KgmemError::EntityNotFound { .. } => "EntityNotFoundError",
            KgmemError::StorageIo { .. } => "StorageIOError",
        }
    }

    /// Caller errors are never worth retrying; storage errors may be.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, KgmemError::StorageIo { .. })
    }
}

/// Convenient Result type using KgmemError
pub type Result<T> = std::result::Result<T, KgmemError>;
