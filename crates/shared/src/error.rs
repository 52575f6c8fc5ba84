//! Attribution store errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid timestamp {value:?} in column {column}")]
    InvalidTimestamp { column: &'static str, value: String },

    #[error("Timestamp formatting failed: {0}")]
    Format(#[from] time::error::Format),
}

pub type StoreResult<T> = Result<T, StoreError>;
