//! Error types for ocfl_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using ocfl_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during object and repository operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Inventory or layout JSON could not be encoded or decoded.
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// The caller supplied a bad combination of arguments.
    #[error("{reason}")]
    InvalidArguments { reason: String },

    /// A version identifier did not match the `vN` syntax.
    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    /// The requested version is not part of the object.
    #[error("Version {version} does not exist in object '{id}'")]
    VersionNotFound { id: String, version: String },

    /// The source directory for an update is missing.
    #[error("Source '{path}' does not exist or is not a directory")]
    SourceMissing { path: PathBuf },

    /// The object instance already holds an uncommitted deposit.
    #[error(
        "This object is already in deposit. You need to commit the last changes before updating again."
    )]
    AlreadyInDeposit { id: String },

    /// Another process has a deposit for the same object on disk.
    #[error("An object with id '{id}' is already being deposited at {path}")]
    DepositExists { id: String, path: PathBuf },

    /// The object's path is nested beneath an existing object.
    #[error("The object at '{path}' would be a child of an existing object at '{parent}'")]
    ChildOfObject { path: String, parent: String },

    /// The location does not hold a valid object.
    #[error("'{path}' doesn't look like an OCFL object: {reason}")]
    NotAnObject { path: String, reason: String },

    /// `init` was called on an instance that is already bound.
    #[error("Object is already initialised at '{path}'")]
    AlreadyBound { path: String },

    /// An operation was attempted before `init`.
    #[error("Object has not been initialised")]
    NotBound,

    /// The export target is unusable.
    #[error("Export target {path} {reason}")]
    ExportTarget { path: PathBuf, reason: String },

    /// Verification failed while finalizing a deposit.
    #[error("The object does not verify, aborting: {}", .errors.join("; "))]
    VerificationFailed { errors: Vec<String> },

    /// Moving or syncing the deposit into the repository failed.
    #[error("Error moving deposit object to repository: {reason}")]
    Publish { reason: String },

    /// The storage backend reported a failure.
    #[error("Backend error{}: {reason}", .status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    Backend { status: Option<u16>, reason: String },

    /// The operation is not available on this backend.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        operation: String,
        backend: String,
    },

    /// Unsupported digest algorithm.
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// Repository root is invalid or not initialised.
    #[error("Invalid repository at {path}: {reason}")]
    InvalidRepository { path: String, reason: String },

    /// Object id or path could not be mapped to a storage location.
    #[error("Invalid object path '{path}': {reason}")]
    InvalidObjectPath { path: String, reason: String },
}

impl Error {
    /// Create an InvalidArguments error.
    pub fn invalid_arguments(reason: impl Into<String>) -> Self {
        Error::InvalidArguments {
            reason: reason.into(),
        }
    }

    /// Create an InvalidVersion error.
    pub fn invalid_version(version: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidVersion {
            version: version.into(),
            reason: reason.into(),
        }
    }

    /// Create a VersionNotFound error.
    pub fn version_not_found(id: impl Into<String>, version: impl Into<String>) -> Self {
        Error::VersionNotFound {
            id: id.into(),
            version: version.into(),
        }
    }

    /// Create a SourceMissing error.
    pub fn source_missing(path: impl Into<PathBuf>) -> Self {
        Error::SourceMissing { path: path.into() }
    }

    /// Create a ChildOfObject error.
    pub fn child_of_object(path: impl Into<String>, parent: impl Into<String>) -> Self {
        Error::ChildOfObject {
            path: path.into(),
            parent: parent.into(),
        }
    }

    /// Create a NotAnObject error.
    pub fn not_an_object(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::NotAnObject {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an ExportTarget error.
    pub fn export_target(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::ExportTarget {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a Publish error.
    pub fn publish(reason: impl Into<String>) -> Self {
        Error::Publish {
            reason: reason.into(),
        }
    }

    /// Create a Backend error with an optional HTTP-style status.
    pub fn backend(status: Option<u16>, reason: impl Into<String>) -> Self {
        Error::Backend {
            status,
            reason: reason.into(),
        }
    }

    /// Create an Unsupported error.
    pub fn unsupported(operation: impl Into<String>, backend: impl Into<String>) -> Self {
        Error::Unsupported {
            operation: operation.into(),
            backend: backend.into(),
        }
    }

    /// Create an UnsupportedAlgorithm error.
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Error::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Create an InvalidRepository error.
    pub fn invalid_repository(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidRepository {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidObjectPath error.
    pub fn invalid_object_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidObjectPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path/loop error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}
