//! Error types for exchange-reconcile

use thiserror::Error;

use crate::store::EntityType;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Query failed for {entity_type} (filter: {filter}): {message}")]
    Query {
        entity_type: EntityType,
        filter: String,
        message: String,
    },

    #[error("Transaction rejected: {0}")]
    Transact(String),

    #[error("Store returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single entity could not be read through its typed view.
///
/// Never aborts a pass: the entity is skipped and counted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{entity_type} {entity_id}: {message}")]
pub struct TransformError {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub message: String,
}

impl TransformError {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            message: message.into(),
        }
    }
}

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, ReconcileError>;
