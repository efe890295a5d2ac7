//! Resumable file transfer engine.
//!
//! One engine invocation drives a single file through an explicit state
//! machine:
//!
//! ```text
//! Init -> Probing -> (Resuming | Restarting) -> Streaming -> Verifying -> Completed
//!                \____________ BackoffWait <- transient failure ____________/
//! ```
//!
//! The only durable artifact is the destination file itself; its byte length
//! *is* the resumption checkpoint. There is no journal or sidecar metadata.

use std::io;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{header, Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::progress::ProgressReporter;
use crate::shutdown::CancelToken;
use crate::types::{RetryPolicy, TransferRequest};

/// Timeout for the metadata probe request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum wait for the retrieval response headers and for each body chunk
/// before the connection is considered stalled and the attempt retried.
#[cfg(not(test))]
const STALL_TIMEOUT: Duration = Duration::from_secs(60);
#[cfg(test)]
const STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Terminal success states of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The destination already matched the remote size; nothing was streamed.
    AlreadyComplete,
    /// The file was downloaded (possibly resumed) and verified.
    Completed,
}

/// Phases of the transfer state machine, tracked for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Probing,
    Resuming,
    Restarting,
    Streaming,
    Verifying,
    BackoffWait,
}

/// Mutable state owned exclusively by one in-flight transfer.
///
/// Invariant: `bytes_written` equals the byte length persisted at the
/// destination at every observation point; it is never advanced ahead of a
/// completed write.
#[derive(Debug, Default)]
struct TransferState {
    bytes_written: u64,
    total_size: Option<u64>,
    range_supported: bool,
    retry_count: u32,
    last_error: Option<String>,
}

/// What the metadata probe learned about the remote file.
struct ProbeResult {
    content_length: Option<u64>,
    accepts_ranges: bool,
}

/// Downloads one remote file to one local path with resume, retry and size
/// verification.
pub struct TransferEngine<'a> {
    client: &'a Client,
    policy: &'a RetryPolicy,
    cancel: &'a CancelToken,
}

impl<'a> TransferEngine<'a> {
    pub fn new(client: &'a Client, policy: &'a RetryPolicy, cancel: &'a CancelToken) -> Self {
        Self {
            client,
            policy,
            cancel,
        }
    }

    /// Drive `request` to a terminal state.
    ///
    /// Transient failures are retried with exponential backoff until the
    /// policy is exhausted; the partial file is left on disk in every failure
    /// mode so a later run can resume it.
    pub async fn run(
        &self,
        request: &TransferRequest,
        reporter: &mut ProgressReporter,
    ) -> Result<TransferOutcome, TransferError> {
        let mut state = TransferState::default();
        let mut delays = self.policy.backoff_delays();

        loop {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            match self.attempt(request, &mut state, reporter).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient(self.policy) => {
                    state.retry_count += 1;
                    state.last_error = Some(e.to_string());
                    match delays.next() {
                        Some(delay) => {
                            debug!(phase = ?Phase::BackoffWait, "entering backoff");
                            warn!(
                                "Attempt {} for {} failed ({}), retrying in {:?}",
                                state.retry_count, request.descriptor.relative_path, e, delay
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            warn!(
                                "Giving up on {} after {} attempts (last error: {}), partial file kept for resume",
                                request.descriptor.relative_path,
                                state.retry_count,
                                state.last_error.as_deref().unwrap_or("none")
                            );
                            return Err(e);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One attempt: probe, open, stream, verify.
    async fn attempt(
        &self,
        request: &TransferRequest,
        state: &mut TransferState,
        reporter: &mut ProgressReporter,
    ) -> Result<TransferOutcome, TransferError> {
        let descriptor = &request.descriptor;
        let dest = &request.destination;

        // Init: whatever is on disk is the candidate resume offset.
        let existed = match tokio::fs::metadata(dest).await {
            Ok(meta) => {
                state.bytes_written = meta.len();
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                state.bytes_written = 0;
                false
            }
            Err(e) => return Err(TransferError::Filesystem(e)),
        };

        debug!(phase = ?Phase::Probing, url = %descriptor.download_url);
        let probe = self.probe(&descriptor.download_url).await?;
        state.total_size = probe.content_length.or(descriptor.declared_size);
        state.range_supported = probe.accepts_ranges;

        if let Some(total) = state.total_size {
            if state.bytes_written == total && (total > 0 || existed) {
                info!(
                    "✅ {} already complete ({} bytes), skipping",
                    descriptor.relative_path, total
                );
                return Ok(TransferOutcome::AlreadyComplete);
            }
            if state.bytes_written > total {
                // Stale partial longer than the remote object; start over.
                warn!(
                    "Local {} has {} bytes but remote declares {}, restarting",
                    descriptor.relative_path, state.bytes_written, total
                );
                state.bytes_written = 0;
            }
        }

        let resume_from = if state.range_supported {
            state.bytes_written
        } else {
            0
        };

        let (response, mut file) = if resume_from > 0 {
            debug!(phase = ?Phase::Resuming, offset = resume_from);
            let response = timeout(
                STALL_TIMEOUT,
                self.client
                    .get(&descriptor.download_url)
                    .header(header::RANGE, format!("bytes={resume_from}-"))
                    .send(),
            )
            .await
            .map_err(|_| TransferError::Stalled)??;
            match response.status() {
                StatusCode::PARTIAL_CONTENT => {
                    info!(
                        "⬇️  Resuming {} from byte {}",
                        descriptor.relative_path, resume_from
                    );
                    let file = tokio::fs::OpenOptions::new().append(true).open(dest).await?;
                    (response, file)
                }
                StatusCode::OK => {
                    // The server ignored the range request and is sending the
                    // full body. Appending it would corrupt the file, so
                    // truncate and treat this as a fresh restart.
                    debug!(phase = ?Phase::Restarting, "range request ignored");
                    warn!(
                        "{} ignored range request, restarting from zero",
                        descriptor.download_url
                    );
                    state.bytes_written = 0;
                    let file = tokio::fs::File::create(dest).await?;
                    (response, file)
                }
                status => {
                    return Err(TransferError::Status {
                        url: descriptor.download_url.clone(),
                        status: status.as_u16(),
                    })
                }
            }
        } else {
            debug!(phase = ?Phase::Restarting);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let response = timeout(STALL_TIMEOUT, self.client.get(&descriptor.download_url).send())
                .await
                .map_err(|_| TransferError::Stalled)??;
            let status = response.status();
            if !status.is_success() {
                return Err(TransferError::Status {
                    url: descriptor.download_url.clone(),
                    status: status.as_u16(),
                });
            }
            state.bytes_written = 0;
            let file = tokio::fs::File::create(dest).await?;
            (response, file)
        };

        debug!(phase = ?Phase::Streaming, from = state.bytes_written);
        let mut stream = response.bytes_stream();
        loop {
            if self.cancel.is_cancelled() {
                file.flush().await?;
                return Err(TransferError::Cancelled);
            }
            let piece = match timeout(STALL_TIMEOUT, stream.next()).await {
                Ok(piece) => piece,
                Err(_) => {
                    file.flush().await?;
                    return Err(TransferError::Stalled);
                }
            };
            let chunk = match piece {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    // Connection dropped mid-body. Keep what is on disk and
                    // let the retry loop re-probe for a resume.
                    file.flush().await?;
                    return Err(e.into());
                }
                None => break,
            };
            file.write_all(&chunk).await?;
            state.bytes_written += chunk.len() as u64;
            reporter.record(state.bytes_written, state.total_size);
        }
        file.flush().await?;

        debug!(phase = ?Phase::Verifying, written = state.bytes_written);
        if let Some(total) = state.total_size {
            if state.bytes_written != total {
                return Err(TransferError::Incomplete {
                    written: state.bytes_written,
                    expected: total,
                });
            }
        }
        Ok(TransferOutcome::Completed)
    }

    /// Metadata-only request: total size and range support.
    async fn probe(&self, url: &str) -> Result<ProbeResult, TransferError> {
        let response = self
            .client
            .head(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let content_length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let accepts_ranges = response
            .headers()
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);
        Ok(ProbeResult {
            content_length,
            accepts_ranges,
        })
    }
}
