//! Main orchestration: resolve the manifest, then drive each file through the
//! transfer engine and the post-transfer dispatcher, one at a time.

use std::time::Duration;

use reqwest::Client;
use tracing::{error, info, warn};

use crate::error::{ExtractionError, SyncError, TransferError};
use crate::extract::{archive_kind, extract_archive};
use crate::manifest::resolve_manifest;
use crate::progress::ProgressReporter;
use crate::shutdown::CancelToken;
use crate::transfer::{TransferEngine, TransferOutcome};
use crate::types::{SyncConfig, TransferRequest};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-file outcomes of one synchronization run.
///
/// A permanent failure for one file does not abort its siblings; everything
/// is collected here so the caller can decide the exit status.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Files that reached `Completed` (including already-complete skips).
    pub completed: Vec<String>,
    /// Files whose transfer failed permanently, with the last error.
    pub failed: Vec<(String, TransferError)>,
    /// Archives that downloaded fine but could not be unpacked.
    pub extraction_failures: Vec<(String, ExtractionError)>,
    /// The run was stopped by the cancellation token.
    pub cancelled: bool,
}

impl SyncReport {
    /// True when every file completed and the run was not cancelled.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

/// Synchronizes the configured dataset into `config.data_dir`.
///
/// Resolution failures abort the whole run; per-file transfer failures are
/// recorded in the returned [`SyncReport`] and the run continues with the
/// remaining files.
pub async fn sync_dataset(config: &SyncConfig, cancel: &CancelToken) -> Result<SyncReport, SyncError> {
    // Precondition: the destination directory must already exist.
    let data_dir = config.data_dir.canonicalize()?;

    let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
    let manifest = resolve_manifest(&client, config).await?;
    info!(
        "📦 Synchronizing {} files into {}",
        manifest.len(),
        data_dir.display()
    );

    let engine = TransferEngine::new(&client, &config.retry, cancel);
    let mut report = SyncReport::default();

    for descriptor in manifest {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let relative_path = descriptor.relative_path.clone();
        let request = TransferRequest {
            destination: data_dir.join(&descriptor.relative_path),
            descriptor,
        };
        let mut reporter = ProgressReporter::new(&relative_path);

        match engine.run(&request, &mut reporter).await {
            Ok(outcome) => {
                let bytes = tokio::fs::metadata(&request.destination)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                reporter.finish(bytes);
                if outcome == TransferOutcome::Completed {
                    info!("✅ Downloaded {} ({} bytes)", relative_path, bytes);
                }
                dispatch_extraction(&request, &data_dir, &mut report);
                report.completed.push(relative_path);
            }
            Err(TransferError::Cancelled) => {
                reporter.abandon("cancelled");
                warn!("Cancelled while transferring {}", relative_path);
                report.cancelled = true;
                break;
            }
            Err(e) => {
                reporter.abandon("failed");
                error!("❌ {} failed permanently: {}", relative_path, e);
                report.failed.push((relative_path, e));
            }
        }
    }

    if report.is_success() {
        info!("✅ All files synchronized into {}", data_dir.display());
    }
    Ok(report)
}

/// If the completed file declares an archive content type, unpack it into the
/// destination directory. Extraction failure never removes the archive.
fn dispatch_extraction(
    request: &TransferRequest,
    data_dir: &std::path::Path,
    report: &mut SyncReport,
) {
    let Some(kind) = archive_kind(&request.descriptor.mime_type) else {
        return;
    };
    let relative_path = &request.descriptor.relative_path;
    info!("📂 Extracting {} ...", relative_path);
    match extract_archive(&request.destination, kind, data_dir) {
        Ok(count) => info!("✅ Extracted {} entries from {}", count, relative_path),
        Err(e) => {
            warn!(
                "Extraction of {} failed ({}), archive kept on disk",
                relative_path, e
            );
            report
                .extraction_failures
                .push((relative_path.clone(), e));
        }
    }
}
