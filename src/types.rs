//! Data structures for dataset synchronization.

use std::path::PathBuf;
use std::time::Duration;

use tokio_retry2::strategy::{jitter, ExponentialFactorBackoff};

/// One remote file to synchronize, as resolved from the dataset manifest.
///
/// Descriptors are immutable once produced by the resolver; `relative_path`
/// is unique within one manifest.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    /// Path of the file relative to the destination directory.
    pub relative_path: String,
    /// Fully qualified download URL.
    pub download_url: String,
    /// Content type declared by the manifest (e.g. `"application/zip"`).
    pub mime_type: String,
    /// Size declared by the manifest, if any. Used as a fallback when the
    /// server omits `Content-Length`.
    pub declared_size: Option<u64>,
}

/// A single transfer: one descriptor bound to one local destination path.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub descriptor: FileDescriptor,
    pub destination: PathBuf,
}

/// Retry configuration shared (read-only) by every transfer in a run.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per file, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_multiplier: f64,
    /// HTTP statuses that are retried; any other status is a permanent
    /// failure for the file.
    pub retryable_statuses: Vec<u16>,
    /// Randomize each delay to avoid thundering herds. Disabled in tests
    /// that assert exact delays.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Whether `status` is in the retryable set.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// The sequence of backoff delays: `base * multiplier^(n-1)` for retry
    /// `n`, at most `max_attempts - 1` entries (no wait after the last
    /// attempt). An exhausted iterator means retries are exhausted.
    pub fn backoff_delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let base = ExponentialFactorBackoff::from_millis(
            self.base_delay.as_millis().max(1) as u64,
            self.backoff_multiplier,
        )
        .take(self.max_attempts.saturating_sub(1) as usize);

        if self.jitter {
            Box::new(base.map(jitter))
        } else {
            Box::new(base)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            jitter: true,
        }
    }
}

/// Configuration for one synchronization run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root of the manifest API (e.g. `<https://datadryad.org>`).
    pub api_base: String,
    /// DOI of the dataset to synchronize.
    pub dataset_doi: String,
    /// Destination directory. Must exist before the run starts.
    pub data_dir: PathBuf,
    /// Retry policy applied to every file transfer.
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: "https://datadryad.org".to_string(),
            dataset_doi: "10.5061/dryad.dncjsxm85".to_string(),
            data_dir: PathBuf::from("data"),
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unjittered(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn default_retryable_statuses_match_server_side_failures() {
        let policy = RetryPolicy::default();
        for status in [429, 500, 502, 503, 504] {
            assert!(policy.is_retryable_status(status), "{status} should retry");
        }
        assert!(!policy.is_retryable_status(404));
        assert!(!policy.is_retryable_status(403));
    }

    #[test]
    fn backoff_yields_one_delay_fewer_than_attempts() {
        assert_eq!(unjittered(4).backoff_delays().count(), 3);
        assert_eq!(unjittered(1).backoff_delays().count(), 0);
    }

    #[test]
    fn backoff_grows_by_multiplier() {
        let delays: Vec<Duration> = unjittered(4).backoff_delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }

    #[test]
    fn jittered_backoff_still_bounded_by_attempts() {
        let policy = RetryPolicy {
            jitter: true,
            ..unjittered(5)
        };
        assert_eq!(policy.backoff_delays().count(), 4);
    }
}
