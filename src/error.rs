// src/error.rs

//! Crate-wide error type
//!
//! The first group of variants is the failure taxonomy hosts react to
//! (feed problems, integrity failures, lock contention). The rest carry
//! lower-level context from I/O, archives and patching.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The release feed could not be retrieved
    #[error("Update feed unavailable: {0}")]
    FeedUnavailable(String),

    /// The release feed was retrieved but could not be parsed
    #[error("Malformed update feed: {0}")]
    MalformedFeed(String),

    /// A downloaded or reconstructed artifact failed verification
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A delta references a file that is missing from the base package
    #[error("Patch target missing: {0}")]
    PatchTargetMissing(String),

    /// A patch decoded to the wrong content or could not be decoded at all
    #[error("Patch corrupt: {0}")]
    PatchCorrupt(String),

    /// Another update operation holds the lock for this application
    #[error("Another update operation is already in progress for {0}")]
    AlreadyInProgress(String),

    /// No installed version is recorded for the application
    #[error("Application is not installed")]
    NotInstalled,

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("Delta error: {0}")]
    DeltaError(String),

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the failed operation could plausibly succeed
    ///
    /// Only transport and filesystem errors qualify. Integrity failures,
    /// cancellation and lock contention are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::IoError(_) | Error::Io(_) | Error::DownloadError(_) | Error::FeedUnavailable(_)
        )
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => Error::Io(io),
            other => Error::ArchiveError(other.to_string()),
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(e: walkdir::Error) -> Self {
        Error::IoError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::IoError("disk busy".into()).is_transient());
        assert!(Error::DownloadError("reset by peer".into()).is_transient());
        assert!(!Error::Cancelled.is_transient());
        assert!(
            !Error::ChecksumMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .is_transient()
        );
        assert!(!Error::AlreadyInProgress("app".into()).is_transient());
    }

    #[test]
    fn test_display() {
        let err = Error::PatchTargetMissing("lib/app.dll".into());
        assert_eq!(err.to_string(), "Patch target missing: lib/app.dll");
    }
}
