//! Error types for objio-core
//!
//! Every driver normalizes its native failures into this taxonomy, so callers
//! never see backend-specific error types. Each variant also maps to a CLI
//! exit code.

use thiserror::Error;

/// Result type alias for objio-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for objio-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// A prefix is already owned by a differing mount configuration
    #[error("Configuration conflict: {0}")]
    ConfigurationConflict(String),

    /// No mounted storage matches the path
    #[error("No storage mounted for: {0}")]
    UnmountedStorage(String),

    /// The backend cannot honour the requested mode or operation
    #[error("Unsupported mode: {0}")]
    UnsupportedMode(String),

    /// Object does not exist
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Backend denied the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Transient network or service failure (retryable)
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Object changed remotely while it was being read
    #[error("Stale read: {0}")]
    StaleRead(String),

    /// Operation attempted on a closed handle
    #[error("I/O operation on closed handle: {0}")]
    ClosedHandle(String),

    /// A write handle failed earlier and its upload was abandoned
    #[error("Handle failed: {0}")]
    HandleFailed(String),

    /// Exclusive creation requested but the object exists
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    /// Directory removal requested on a directory with entries
    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Invalid path format
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid open mode string
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// No driver factory registered under this storage name
    #[error("Unknown storage: {0}")]
    UnknownStorage(String),

    /// Required storage parameter is missing
    #[error("Missing storage parameter: {0}")]
    MissingParameter(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Get the appropriate exit code for this error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidPath(_)
            | Error::InvalidMode(_)
            | Error::Config(_)
            | Error::MissingParameter(_)
            | Error::UnknownStorage(_) => 2, // UsageError
            Error::BackendUnavailable(_) => 3,             // NetworkError
            Error::PermissionDenied(_) => 4,               // AuthError
            Error::NotFound(_) | Error::UnmountedStorage(_) => 5, // NotFound
            Error::ConfigurationConflict(_)
            | Error::AlreadyExists(_)
            | Error::DirectoryNotEmpty(_)
            | Error::StaleRead(_) => 6, // Conflict
            Error::UnsupportedMode(_) => 7, // UnsupportedFeature
            _ => 1,                         // GeneralError
        }
    }

    /// Whether retrying the same request may succeed
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_))
    }

    /// Recover the crate error carried by an `std::io::Error`
    ///
    /// Errors that crossed a `Read`/`Write` boundary come back as their
    /// original variant; anything else becomes [`Error::Io`].
    pub fn from_io(err: std::io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Error::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Error::General(other.to_string()),
            None => Error::General("empty I/O error".into()),
        }
    }

    /// Closest `std::io::ErrorKind` for this error
    pub fn io_kind(&self) -> std::io::ErrorKind {
        use std::io::ErrorKind;

        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::DirectoryNotEmpty(_) => ErrorKind::DirectoryNotEmpty,
            Error::UnsupportedMode(_) => ErrorKind::Unsupported,
            Error::InvalidPath(_) | Error::InvalidMode(_) => ErrorKind::InvalidInput,
            Error::BackendUnavailable(_) => ErrorKind::ConnectionAborted,
            Error::Io(e) => e.kind(),
            _ => ErrorKind::Other,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            other => std::io::Error::new(other.io_kind(), other),
        }
    }
}
