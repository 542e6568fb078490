//! Reporting interface: where trial outcomes and progress go.

use crate::monitor::TrialOutcome;
use crate::stats::Snapshot;
use tracing::{debug, info};

/// Receives results from every worker. Calls come from worker threads, one at a
/// time, with trials in trial order whatever the worker count.
pub trait Reporter: Send + Sync {
    /// A trial was counted (truncated to the frames that counted).
    fn on_trial(&self, _trial: u64, _outcome: &TrialOutcome) {}

    /// Periodic totals, at the configured cadence.
    fn on_progress(&self, _snapshot: &Snapshot) {}

    /// Final totals for one noise point.
    fn on_complete(&self, _noise: f32, _snapshot: &Snapshot) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn on_trial(&self, trial: u64, outcome: &TrialOutcome) {
        debug!(
            trial,
            frame_errors = outcome.frame_errors(),
            bit_errors = outcome.bit_errors(),
            passes = ?outcome.pass_counts(),
            "trial counted"
        );
    }

    fn on_progress(&self, snapshot: &Snapshot) {
        info!(
            frames = snapshot.frames,
            frame_errors = snapshot.frame_errors,
            ber = snapshot.ber(),
            fer = snapshot.fer(),
            elapsed_ms = snapshot.elapsed.as_millis() as u64,
            "progress"
        );
    }

    fn on_complete(&self, noise: f32, snapshot: &Snapshot) {
        info!(
            noise,
            frames = snapshot.frames,
            frame_errors = snapshot.frame_errors,
            bit_errors = snapshot.bit_errors,
            ber = snapshot.ber(),
            fer = snapshot.fer(),
            avg_passes = snapshot.average_passes(),
            "point complete"
        );
    }
}
