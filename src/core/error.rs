use thiserror::Error;

use crate::{
    core::{invariants::InvariantError, model::ValidationError, synthesizer::SynthesisError},
    ports::{ServingError, StoreError},
};

/// Which side is at fault; decides between 400-class and 500-class reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    User,
    Infrastructure,
}

/// Error returned by every engine command and query.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// Malformed input value
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Duplicate, invalid hierarchy or protected primary host
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Referenced host, mapping or service is absent
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Failed to apply configuration for {hostname}: {source}")]
    Apply {
        hostname: String,
        source: ServingError,
    },

    #[error("Serving layer reload failed: {0}")]
    Reload(#[source] ServingError),

    /// The command failed and putting the previous state back failed too
    #[error("{cause}; rollback failed: {reason}")]
    Rollback {
        cause: Box<EngineError>,
        reason: String,
    },
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) | EngineError::Conflict(_) | EngineError::NotFound(_) => {
                ErrorKind::User
            }
            _ => ErrorKind::Infrastructure,
        }
    }

    pub fn is_user_error(&self) -> bool {
        self.kind() == ErrorKind::User
    }
}

impl From<InvariantError> for EngineError {
    fn from(value: InvariantError) -> Self {
        match value {
            InvariantError::Conflict(message) => EngineError::Conflict(message),
            InvariantError::NotFound(message) => EngineError::NotFound(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let user = EngineError::from(InvariantError::NotFound("x".into()));
        assert!(user.is_user_error());
        assert!(matches!(user, EngineError::NotFound(_)));

        let validation = EngineError::from(ValidationError::new("path", "bad"));
        assert_eq!(validation.kind(), ErrorKind::User);
        assert_eq!(validation.to_string(), "invalid path: bad");

        let reload = EngineError::Reload(ServingError::Rejected("bad config".into()));
        assert_eq!(reload.kind(), ErrorKind::Infrastructure);

        let rollback = EngineError::Rollback {
            cause: Box::new(reload),
            reason: "disk full".into(),
        };
        assert_eq!(rollback.kind(), ErrorKind::Infrastructure);
        assert!(rollback.to_string().ends_with("rollback failed: disk full"));
    }
}
