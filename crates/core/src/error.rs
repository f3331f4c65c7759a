use thiserror::Error;

use crate::types::VariantState;

pub type VariantResult<T> = Result<T, VariantError>;

#[derive(Error, Debug)]
pub enum VariantError {
    #[error("Invalid base variant: {0}")]
    InvalidBaseVariant(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("No selectable variant in pool {0}")]
    NoSelectableVariant(String),

    #[error("Generation exhausted: {0}")]
    GenerationExhausted(String),

    #[error("Persistence conflict on pool {key}: expected version {expected}, found {found}")]
    PersistenceConflict {
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown generation strategy: {0}")]
    UnknownStrategy(String),

    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    #[error("Variant not found: {0}")]
    VariantNotFound(String),

    #[error("Invalid state transition {from} -> {to}")]
    InvalidTransition { from: VariantState, to: VariantState },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl VariantError {
    /// True for write conflicts that a caller may retry after backing off.
    pub fn is_conflict(&self) -> bool {
        matches!(self, VariantError::PersistenceConflict { .. })
    }
}
