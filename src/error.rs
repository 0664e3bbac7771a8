//! Request-level errors.
//!
//! Storage and IO failures travel as `anyhow::Error` and surface as
//! [`ServiceError::Internal`]. Agent failures never reach this type; the
//! generator turns them into fallback drafts.

/// Errors returned by generation and post-editing operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ServiceError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ServiceError::InvalidRequest(message.into())
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
