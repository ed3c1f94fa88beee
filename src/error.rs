use std::path::PathBuf;

use thiserror::Error;

pub type PumpkinResult<T> = Result<T, PumpkinError>;

#[derive(Debug, Error)]
pub enum PumpkinError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("artifact directory already exists: {0}")]
    ArtifactConflict(PathBuf),

    #[error("artifact i/o failure: {0}")]
    ArtifactIo(#[from] std::io::Error),

    #[error("driver deadline exceeded after {0}ms")]
    DriverTimeout(u64),

    #[error("browser driver failure: {0}")]
    DriverError(String),

    #[error("run {0} does not exist")]
    RunMissing(i64),

    #[error("run {0} is no longer accepting results")]
    RunClosed(i64),

    #[error("persistent ingest failure: {0}")]
    IngestPersistent(String),

    #[error("run aborted: {0}")]
    RunAborted(String),
}

impl PumpkinError {
    /// Whether this error came from a dropped or unobtainable connection,
    /// which ingestion is allowed to retry once.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::DatabaseUnavailable(_) => true,
            Self::Database(diesel::result::Error::DatabaseError(kind, _)) => matches!(
                kind,
                diesel::result::DatabaseErrorKind::ClosedConnection
                    | diesel::result::DatabaseErrorKind::UnableToSendCommand
            ),
            _ => false,
        }
    }

    /// Whether this error is a unique-constraint violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Self::Database(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ))
        )
    }
}
