//! Error types for dataset synchronization.

use std::io;
use thiserror::Error;

use crate::types::RetryPolicy;

/// Failure while resolving the dataset manifest.
///
/// Resolution errors are fatal for the whole run: without a manifest there is
/// nothing to download.
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// HTTP request error while talking to the manifest API.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The API body was not the JSON shape we expect.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The API answered with a non-success status.
    #[error("manifest endpoint {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// An expected nested field was absent from the response.
    #[error("manifest response is missing {0}")]
    MissingField(&'static str),
}

/// Failure of a single file transfer.
///
/// Whether a variant is retried is decided by [`TransferError::is_transient`]
/// against the run's [`RetryPolicy`]; exhausting the policy surfaces the last
/// recorded error as the file's permanent failure.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Network-level failure: connect error, reset, timeout, bad TLS.
    #[error(transparent)]
    Network(#[from] reqwest::Error),

    /// The server answered with an unexpected HTTP status.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The response body ended before the declared size was reached.
    #[error("incomplete transfer: wrote {written} of {expected} bytes")]
    Incomplete { written: u64, expected: u64 },

    /// No bytes arrived within the per-chunk read timeout.
    #[error("connection stalled while streaming body")]
    Stalled,

    /// Local filesystem failure: cannot create, write or inspect the
    /// destination. Fatal for this file, never retried.
    #[error(transparent)]
    Filesystem(#[from] io::Error),

    /// The transfer was cancelled by the caller.
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Whether this failure should be retried under `policy`.
    pub fn is_transient(&self, policy: &RetryPolicy) -> bool {
        match self {
            TransferError::Network(_) | TransferError::Incomplete { .. } | TransferError::Stalled => true,
            TransferError::Status { status, .. } => policy.is_retryable_status(*status),
            TransferError::Filesystem(_) | TransferError::Cancelled => false,
        }
    }
}

/// Failure while unpacking a completed archive.
///
/// Extraction failures are reported but never roll back the downloaded
/// archive, which stays on disk for inspection.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// I/O error while reading the archive or writing entries.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The zip archive is corrupt or unreadable.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

/// Top-level error for a synchronization run.
///
/// Per-file transfer failures are *not* represented here; they are collected
/// in the run's [`SyncReport`](crate::SyncReport) so one bad file does not
/// abort its siblings.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Manifest resolution failed. Aborts the entire run.
    #[error("failed to resolve dataset manifest: {0}")]
    Resolution(#[from] ResolutionError),

    /// HTTP client could not be constructed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Destination directory is missing or not resolvable.
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn retryable_status_is_transient() {
        let err = TransferError::Status {
            url: "http://example.com/f".into(),
            status: 503,
        };
        assert!(err.is_transient(&policy()));
    }

    #[test]
    fn client_error_status_is_permanent() {
        let err = TransferError::Status {
            url: "http://example.com/f".into(),
            status: 404,
        };
        assert!(!err.is_transient(&policy()));
    }

    #[test]
    fn incomplete_and_stalled_are_transient() {
        let incomplete = TransferError::Incomplete {
            written: 10,
            expected: 20,
        };
        assert!(incomplete.is_transient(&policy()));
        assert!(TransferError::Stalled.is_transient(&policy()));
    }

    #[test]
    fn cancelled_and_filesystem_are_not_retried() {
        assert!(!TransferError::Cancelled.is_transient(&policy()));
        let fs = TransferError::Filesystem(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(!fs.is_transient(&policy()));
    }
}
