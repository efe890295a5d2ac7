//! StashSync - resumable downloader for versioned Dryad datasets
//!
//! This library synchronizes a local directory with the latest version of a
//! Dryad (Stash) dataset: it resolves the dataset's file manifest through the
//! versioned API, downloads each file with resume-from-partial support, and
//! unpacks archive-typed files into the destination directory.
//!
//! # Features
//!
//! - **Resumable Downloads**: interrupted transfers continue from the bytes
//!   already on disk using HTTP range requests
//! - **Automatic Retry**: transient failures are retried with exponential
//!   backoff per an explicit [`RetryPolicy`]
//! - **Size Verification**: completed files are checked against the size the
//!   server declares
//! - **Progress Tracking**: per-file progress bars with bounded update cadence
//! - **Archive Extraction**: zip and tar archives are unpacked in place after
//!   download
//!
//! # Example
//!
//! ```no_run
//! use stashsync::{sync_dataset, CancelToken, SyncConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::default();
//! let cancel = CancelToken::shared();
//!
//! let report = sync_dataset(&config, &cancel).await?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

mod error;
mod extract;
mod manifest;
mod orchestrator;
mod progress;
mod shutdown;
mod transfer;
mod types;

pub use error::{ExtractionError, ResolutionError, SyncError, TransferError};
pub use extract::{archive_kind, extract_archive, ArchiveKind};
pub use manifest::resolve_manifest;
pub use orchestrator::{sync_dataset, SyncReport};
pub use progress::ProgressReporter;
pub use shutdown::{CancelToken, SharedCancel};
pub use transfer::{TransferEngine, TransferOutcome};
pub use types::{FileDescriptor, RetryPolicy, SyncConfig, TransferRequest};
