//! Domain error model.

use thiserror::Error;

/// Result type used across the domain and service layers.
pub type DomainResult<T> = Result<T, DomainError>;

/// Failure surfaced to callers of the inventory core.
///
/// Per-line soft failures inside a movement batch (unknown item, insufficient
/// stock) are *not* errors; they are reported as line outcomes instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A referenced item, category, movement or account does not exist.
    #[error("not found")]
    NotFound,

    /// Input was rejected (empty batch, non-positive quantity, duplicate SKU, ...).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The caller does not own the referenced resource.
    #[error("unauthorized")]
    Unauthorized,

    /// The backing store failed during a step. The message never carries
    /// storage-engine detail.
    #[error("database error: {0}")]
    Database(String),
}

impl DomainError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Stable machine-readable code, used by the request layer to build responses.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::NotFound => "NOT_FOUND",
            DomainError::InvalidData(_) => "INVALID_DATA",
            DomainError::Unauthorized => "UNAUTHORIZED",
            DomainError::Database(_) => "DATABASE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(DomainError::not_found().code(), "NOT_FOUND");
        assert_eq!(DomainError::invalid("empty batch").code(), "INVALID_DATA");
        assert_eq!(DomainError::Unauthorized.code(), "UNAUTHORIZED");
        assert_eq!(DomainError::database("insert movement").code(), "DATABASE_ERROR");
    }

    #[test]
    fn invalid_data_keeps_message() {
        let err = DomainError::invalid("SKU already exists");
        assert_eq!(err.to_string(), "invalid data: SKU already exists");
    }
}
