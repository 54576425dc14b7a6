use thiserror::Error;

use crate::bulk::EntityKind;

#[derive(Error, Debug)]
pub enum CoralError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0} must be resolved through get_or_add before it can be linked")]
    UnregisteredEntity(EntityKind),

    #[error("Circular dependency detected involving {0}")]
    CyclicDependency(EntityKind),

    #[error("Failed to decode stored row: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<coral_model::ModelError> for CoralError {
    fn from(err: coral_model::ModelError) -> Self {
        CoralError::Decode(err.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CoralError>;
