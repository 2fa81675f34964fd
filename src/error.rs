// Error taxonomy shared by every workflow
//
// Every rejected operation surfaces as one of these variants before any
// mutation is committed. Storage and collaborator failures collapse into the
// Server kind.

use thiserror::Error;

/// Coarse classification used by callers to decide how to respond
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Conflict,
    Server,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or invalid actor credential
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, but ineligible by status, ownership or actor kind
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input or a failed completeness predicate
    #[error("validation: {0}")]
    Validation(String),

    /// State-machine violation
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("export: {0}")]
    Export(#[from] csv::Error),

    /// Failure inside an external collaborator (hasher, token gateway, blob store)
    #[error("collaborator: {0}")]
    Collaborator(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Unauthorized(_) => ErrorKind::Unauthorized,
            PipelineError::Forbidden(_) => ErrorKind::Forbidden,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::Conflict(_) => ErrorKind::Conflict,
            PipelineError::Storage(_)
            | PipelineError::Serialization(_)
            | PipelineError::Export(_)
            | PipelineError::Collaborator(_) => ErrorKind::Server,
        }
    }

    /// Human-facing message without the variant prefix
    pub fn message(&self) -> String {
        match self {
            PipelineError::Unauthorized(m)
            | PipelineError::Forbidden(m)
            | PipelineError::NotFound(m)
            | PipelineError::Validation(m)
            | PipelineError::Conflict(m)
            | PipelineError::Collaborator(m) => m.clone(),
            // Internal details stay in logs
            PipelineError::Storage(_) | PipelineError::Serialization(_) | PipelineError::Export(_) => {
                "Server error".to_string()
            }
        }
    }

    pub(crate) fn not_found(what: &str) -> Self {
        PipelineError::NotFound(format!("{} not found", what))
    }

    pub(crate) fn conflict(message: &str) -> Self {
        PipelineError::Conflict(message.to_string())
    }

    pub(crate) fn validation(message: &str) -> Self {
        PipelineError::Validation(message.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(PipelineError::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(PipelineError::not_found("Task").kind(), ErrorKind::NotFound);
        assert_eq!(
            PipelineError::Storage(rusqlite::Error::InvalidQuery).kind(),
            ErrorKind::Server
        );
    }

    #[test]
    fn test_message_hides_storage_details() {
        let err = PipelineError::Storage(rusqlite::Error::InvalidQuery);
        assert_eq!(err.message(), "Server error");

        let err = PipelineError::not_found("Payment");
        assert_eq!(err.message(), "Payment not found");
    }
}
