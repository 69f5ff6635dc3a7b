use thiserror::Error;

/// Error taxonomy surfaced by every core operation.
///
/// Transitions that violate a precondition reject synchronously with one of
/// these and leave no partial state behind; the core never retries on its
/// own behalf.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Malformed or missing input, with a field-level message.
    #[error("validation failed on `{field}`: {message}")]
    Validation { field: &'static str, message: String },

    /// Referenced entity absent, soft-deleted, or not visible to the
    /// actor's organization.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness or state-precondition violation (duplicate kit id,
    /// transition attempted from the wrong phase, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Role not permitted, or the owning organization is credential-locked.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Blob store, lab bridge, or notification sink failure.
    #[error("dependency `{service}` failed: {message}")]
    Dependency { service: &'static str, message: String },

    /// Unclassified store error.
    #[error("database error: {0}")]
    Database(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn dependency(service: &'static str, message: impl Into<String>) -> Self {
        Self::Dependency {
            service,
            message: message.into(),
        }
    }
}
