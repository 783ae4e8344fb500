//! Storage-boundary errors and their mapping onto the domain taxonomy.

use thiserror::Error;

use stockflow_core::DomainError;

/// Storage operation error.
///
/// These are **infrastructure errors**. They never reach callers as-is:
/// conversion into [`DomainError`] logs the detail and re-signals a generic
/// code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error in {operation}: {message}")]
    Database { operation: String, message: String },

    /// A unique constraint rejected the write (e.g. duplicate SKU).
    #[error("unique violation: {0}")]
    UniqueViolation(String),

    /// The row is still referenced (e.g. an item with ledger history).
    #[error("row still referenced: {0}")]
    Referenced(String),
}

impl StoreError {
    pub fn database(operation: &str, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(detail) => {
                tracing::debug!(%detail, "unique violation");
                DomainError::invalid("conflicting record already exists")
            }
            StoreError::Referenced(detail) => {
                tracing::debug!(%detail, "row still referenced");
                DomainError::invalid("record is still referenced")
            }
            StoreError::Database { operation, message } => {
                tracing::error!(%operation, %message, "store fault");
                DomainError::database(format!("{operation} failed"))
            }
        }
    }
}

/// Map SQLx errors to [`StoreError`].
///
/// | PostgreSQL code | StoreError |
/// |---|---|
/// | `23505` unique violation | `UniqueViolation` |
/// | `23503` foreign key violation | `Referenced` |
/// | anything else | `Database` |
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("{}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(msg),
                Some("23503") => StoreError::Referenced(msg),
                _ => StoreError::database(operation, db_err.message()),
            }
        }
        other => StoreError::database(operation, other.to_string()),
    }
}
