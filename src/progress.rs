//! Progress reporting for in-flight transfers.
//!
//! The reporter is purely observational: the engine pushes
//! `(bytes_written, total)` observations and the reporter decides, via a
//! cadence gate, whether the display is worth refreshing. It never influences
//! engine state.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

/// Refresh the display at least this often while bytes are flowing.
const EMIT_INTERVAL: Duration = Duration::from_secs(1);
/// ...or whenever this many new bytes have been written, whichever first.
const EMIT_BYTE_STEP: u64 = 100 * 1024 * 1024;

/// Decides when an observation should actually be rendered.
///
/// Emits when either the elapsed-time threshold or the byte threshold has
/// been reached since the last emission.
#[derive(Debug)]
struct EmitGate {
    last_emit: Instant,
    last_bytes: u64,
    interval: Duration,
    byte_step: u64,
}

impl EmitGate {
    fn new(interval: Duration, byte_step: u64) -> Self {
        Self {
            last_emit: Instant::now(),
            last_bytes: 0,
            interval,
            byte_step,
        }
    }

    fn should_emit(&self, bytes: u64) -> bool {
        bytes.saturating_sub(self.last_bytes) >= self.byte_step
            || self.last_emit.elapsed() >= self.interval
    }

    fn mark_emitted(&mut self, bytes: u64) {
        self.last_bytes = bytes;
        self.last_emit = Instant::now();
    }
}

/// Renders transfer progress for a single file.
///
/// While the total size is unknown the display degrades to an absolute byte
/// count; as soon as a total is learned it switches to a percentage bar.
pub struct ProgressReporter {
    bar: ProgressBar,
    total: Option<u64>,
    started: Instant,
    gate: EmitGate,
}

impl ProgressReporter {
    /// Create a reporter labelled with the file's relative path.
    pub fn new(label: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        Self::with_bar(bar, label)
    }

    /// Reporter whose output is discarded. Used by tests and library callers
    /// that render progress themselves.
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden(), "")
    }

    fn with_bar(bar: ProgressBar, label: &str) -> Self {
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} {bytes} @ {bytes_per_sec}")
                .unwrap(),
        );
        bar.set_message(label.to_string());
        Self {
            bar,
            total: None,
            started: Instant::now(),
            gate: EmitGate::new(EMIT_INTERVAL, EMIT_BYTE_STEP),
        }
    }

    /// Record an observation from the engine.
    pub fn record(&mut self, bytes_written: u64, total: Option<u64>) {
        if self.total.is_none() {
            if let Some(total) = total {
                // Upgrade from byte spinner to percentage bar.
                self.total = Some(total);
                self.bar.set_length(total);
                self.bar.set_style(
                    ProgressStyle::default_bar()
                        .template(
                            "{spinner:.cyan} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) @ {bytes_per_sec}",
                        )
                        .unwrap()
                        .progress_chars("█▓▒░ "),
                );
            }
        }

        if self.gate.should_emit(bytes_written) {
            self.bar.set_position(bytes_written);
            self.gate.mark_emitted(bytes_written);
        }
    }

    /// Finish the bar after a completed transfer.
    pub fn finish(&self, bytes_written: u64) {
        self.bar.set_position(bytes_written);
        let elapsed = Duration::from_secs(self.started.elapsed().as_secs());
        self.bar
            .finish_with_message(format!("✅ done in {}", humantime::format_duration(elapsed)));
    }

    /// Abandon the bar after a failed or cancelled transfer, leaving the last
    /// position visible.
    pub fn abandon(&self, reason: &str) {
        self.bar.abandon_with_message(format!("❌ {reason}"));
    }
}
