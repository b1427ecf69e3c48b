//! Error taxonomy shared by the pipeline, ledger and API facade.

use stratum_domain::VersionError;

/// Errors surfaced across the scanner core.
///
/// `NoNeedToInsert` is a success sentinel: the ledger reports it when an
/// upsert was skipped because an equal-or-newer engine already analyzed the
/// layer, and callers are expected to treat it as OK. `Transient` marks
/// database contention worth retrying with backoff. Fatal configuration
/// problems (bad URLs, unwritable directories) surface from constructors as
/// plain `anyhow` errors before any daemon starts.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("parent layer is unknown, it must be processed first")]
    ParentUnknown,

    #[error("OS and/or package manager are not supported")]
    Unsupported,

    #[error("layer was already processed by an equal or newer engine")]
    NoNeedToInsert,

    #[error("operation canceled")]
    Canceled,

    #[error("transient: {0}")]
    Transient(String),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScanError {
    /// Whether this value reports an outcome callers may treat as success.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NoNeedToInsert)
    }

    /// Whether retrying the operation may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl From<rusqlite::Error> for ScanError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound,
            rusqlite::Error::SqliteFailure(failure, message)
                if matches!(
                    failure.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                Self::Transient(message.unwrap_or_else(|| failure.to_string()))
            }
            other => Self::Other(other.into()),
        }
    }
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;
