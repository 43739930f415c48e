use thiserror::Error;

/// Stable machine-readable classification of a failed board operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    StorageUnavailable,
    Serialization,
    NotFound,
    PersistenceFailure,
    Timeout,
    LookupFailed,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::PersistenceFailure => "PERSISTENCE_FAILURE",
            Self::Timeout => "TIMEOUT",
            Self::LookupFailed => "LOOKUP_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure result returned by every public board operation.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("durable storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("malformed persisted data: {0}")]
    Serialization(String),
    #[error("message `{0}` does not exist")]
    NotFound(String),
    #[error("write rejected by storage backend: {0}")]
    PersistenceFailure(String),
    #[error("roster lookup timed out after {0} ms")]
    Timeout(u64),
    #[error("roster lookup failed: {0}")]
    LookupFailed(String),
}

impl BoardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::LookupFailed(_) => ErrorKind::LookupFailed,
        }
    }
}

impl From<serde_json::Error> for BoardError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type BoardResult<T> = Result<T, BoardError>;

/// Error raised at the key-value backend boundary.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("quota exceeded: {needed} bytes needed, limit is {limit}")]
    QuotaExceeded { needed: usize, limit: usize },
    #[error("backend disabled: {0}")]
    Disabled(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<BackendError> for BoardError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Disabled(reason) => Self::StorageUnavailable(reason),
            other => Self::PersistenceFailure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_map_to_board_kinds() {
        let quota: BoardError = BackendError::QuotaExceeded {
            needed: 10,
            limit: 5,
        }
        .into();
        assert_eq!(quota.kind(), ErrorKind::PersistenceFailure);

        let disabled: BoardError = BackendError::Disabled("private mode".into()).into();
        assert_eq!(disabled.kind(), ErrorKind::StorageUnavailable);
    }

    #[test]
    fn kind_codes_are_stable() {
        assert_eq!(ErrorKind::NotFound.as_str(), "NOT_FOUND");
        assert_eq!(
            BoardError::Validation("content".into()).kind().to_string(),
            "VALIDATION_ERROR"
        );
    }
}
