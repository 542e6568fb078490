//! Shared Monte Carlo accumulator.
//!
//! Workers claim trial indices, run them without holding any lock, then hand the
//! outcome back through [`Statistics::merge`]. Outcomes are folded strictly in
//! trial order, frame by frame, so the totals depend only on the per-trial seeds
//! and never on how many workers ran or which finished first.

use crate::config::{Cadence, StoppingRule};
use crate::invariant_ppt::{assert_invariant, STATS_SERIALIZED, STOP_RULE};
use crate::monitor::TrialOutcome;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Totals at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    /// Trials with at least one counted frame.
    pub trials: u64,
    pub frames: u64,
    pub frame_errors: u64,
    pub bit_errors: u64,
    /// Feedback-loop passes summed over counted frames.
    pub passes: u64,
    /// Information bits per frame, for the bit error rate.
    pub bits_per_frame: u64,
    pub elapsed: Duration,
}

impl Snapshot {
    /// Frame error rate.
    pub fn fer(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.frame_errors as f64 / self.frames as f64
    }

    /// Bit error rate.
    pub fn ber(&self) -> f64 {
        let bits = self.frames * self.bits_per_frame;
        if bits == 0 {
            return 0.0;
        }
        self.bit_errors as f64 / bits as f64
    }

    /// Mean feedback-loop passes per frame.
    pub fn average_passes(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.passes as f64 / self.frames as f64
    }
}

/// What one [`Statistics::merge`] call folded in.
#[derive(Debug, Clone, Default)]
pub struct Merged {
    /// Trials folded by this call in trial order, truncated to their counted frames.
    pub counted: Vec<(u64, TrialOutcome)>,
    /// Progress snapshot, when the cadence is due.
    pub progress: Option<Snapshot>,
}

#[derive(Debug)]
struct Inner {
    next_claim: u64,
    next_fold: u64,
    pending: BTreeMap<u64, TrialOutcome>,
    trials: u64,
    frames: u64,
    frame_errors: u64,
    bit_errors: u64,
    passes: u64,
    stopped: bool,
    aborted: bool,
    started: Instant,
    last_progress: Instant,
}

impl Inner {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            next_claim: 0,
            next_fold: 0,
            pending: BTreeMap::new(),
            trials: 0,
            frames: 0,
            frame_errors: 0,
            bit_errors: 0,
            passes: 0,
            stopped: false,
            aborted: false,
            started: now,
            last_progress: now,
        }
    }
}

/// Simulation statistics: the only state shared between workers.
#[derive(Debug)]
pub struct Statistics {
    rule: StoppingRule,
    batch_width: u64,
    bits_per_frame: u64,
    cadence: Cadence,
    inner: Mutex<Inner>,
}

impl Statistics {
    pub fn new(rule: StoppingRule, batch_width: usize, bits_per_frame: usize, cadence: Cadence) -> Self {
        Self {
            rule,
            batch_width: batch_width.max(1) as u64,
            bits_per_frame: bits_per_frame as u64,
            cadence,
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Start over for a new simulation point.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::new();
    }

    /// Next trial index to run, or `None` once the run is over.
    ///
    /// Trials whose first frame already lies beyond the frame cap are never handed
    /// out, and a target of zero frame errors is met before the first trial.
    pub fn claim(&self) -> Option<u64> {
        let mut inner = self.inner.lock();
        if inner.stopped || inner.aborted {
            return None;
        }
        if self.rule_met(&inner) {
            inner.stopped = true;
            return None;
        }
        let trial = inner.next_claim;
        if trial * self.batch_width >= self.rule.frame_cap {
            return None;
        }
        inner.next_claim += 1;
        Some(trial)
    }

    /// Stop handing out trials after a failure.
    pub fn abort(&self) {
        self.inner.lock().aborted = true;
    }

    /// Whether the stopping rule has fired.
    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Fold the outcome of `trial`, plus any later trials it unblocks.
    pub fn merge(&self, trial: u64, outcome: TrialOutcome) -> Merged {
        let mut inner = self.inner.lock();
        let mut merged = Merged::default();
        inner.pending.insert(trial, outcome);
        loop {
            let next = inner.next_fold;
            let Some(outcome) = inner.pending.remove(&next) else {
                break;
            };
            inner.next_fold += 1;
            if inner.stopped {
                continue;
            }
            let counted = self.fold(&mut inner, next, outcome);
            if !counted.frames.is_empty() {
                inner.trials += 1;
                if let Some(snapshot) = self.progress_due(&mut inner) {
                    merged.progress = Some(snapshot);
                }
                merged.counted.push((next, counted));
            }
        }
        assert_invariant(
            STATS_SERIALIZED,
            inner.frame_errors <= inner.frames && inner.next_fold <= inner.next_claim,
            "totals only change under the accumulator lock, in trial order",
            Some("merge"),
        );
        assert_invariant(
            STOP_RULE,
            inner.frame_errors <= self.rule.target_frame_errors && inner.frames <= self.rule.frame_cap,
            "totals never pass either stopping limit",
            Some("merge"),
        );
        merged
    }

    fn fold(&self, inner: &mut Inner, trial: u64, outcome: TrialOutcome) -> TrialOutcome {
        let mut counted = TrialOutcome::default();
        for (f, frame) in outcome.frames.into_iter().enumerate() {
            let global = trial * self.batch_width + f as u64;
            if global >= self.rule.frame_cap || inner.stopped || self.rule_met(inner) {
                inner.stopped = true;
                break;
            }
            inner.frames += 1;
            inner.bit_errors += frame.bit_errors as u64;
            inner.passes += frame.passes as u64;
            if frame.is_error() {
                inner.frame_errors += 1;
            }
            counted.frames.push(frame);
            if self.rule_met(inner) {
                inner.stopped = true;
            }
        }
        counted
    }

    fn rule_met(&self, inner: &Inner) -> bool {
        inner.frame_errors >= self.rule.target_frame_errors || inner.frames >= self.rule.frame_cap
    }

    fn progress_due(&self, inner: &mut Inner) -> Option<Snapshot> {
        let due = match self.cadence {
            Cadence::Never => false,
            Cadence::Trials(n) => n > 0 && inner.trials % n == 0,
            Cadence::Interval(every) => inner.last_progress.elapsed() >= every,
        };
        if !due {
            return None;
        }
        inner.last_progress = Instant::now();
        Some(self.snapshot_of(inner))
    }

    fn snapshot_of(&self, inner: &Inner) -> Snapshot {
        Snapshot {
            trials: inner.trials,
            frames: inner.frames,
            frame_errors: inner.frame_errors,
            bit_errors: inner.bit_errors,
            passes: inner.passes,
            bits_per_frame: self.bits_per_frame,
            elapsed: inner.started.elapsed(),
        }
    }

    /// Current totals.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock();
        self.snapshot_of(&inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iteration::FrameState;
    use crate::monitor::FrameOutcome;

    fn outcome(errors: &[usize]) -> TrialOutcome {
        TrialOutcome {
            frames: errors
                .iter()
                .map(|&bit_errors| FrameOutcome {
                    bit_errors,
                    passes: 1,
                    state: FrameState::Converged,
                })
                .collect(),
        }
    }

    fn rule(frame_cap: u64, target_frame_errors: u64) -> StoppingRule {
        StoppingRule {
            frame_cap,
            target_frame_errors,
        }
    }

    #[test]
    fn stops_exactly_at_target_mid_trial() {
        let stats = Statistics::new(rule(100, 3), 4, 8, Cadence::Never);
        let t0 = stats.claim().unwrap();
        let t1 = stats.claim().unwrap();
        stats.merge(t0, outcome(&[1, 0, 2, 0]));
        let merged = stats.merge(t1, outcome(&[0, 5, 1, 1]));
        let snap = stats.snapshot();
        assert_eq!(snap.frame_errors, 3);
        assert_eq!(snap.frames, 6);
        assert_eq!(merged.counted[0].1.frames.len(), 2);
        assert!(stats.claim().is_none());
    }

    #[test]
    fn folds_in_trial_order() {
        let stats = Statistics::new(rule(100, 1), 1, 8, Cadence::Never);
        let t0 = stats.claim().unwrap();
        let t1 = stats.claim().unwrap();
        // Trial 1 finishes first, with an error, but trial 0 must be counted first.
        let early = stats.merge(t1, outcome(&[3]));
        assert!(early.counted.is_empty());
        assert_eq!(stats.snapshot().frames, 0);
        let late = stats.merge(t0, outcome(&[2]));
        assert_eq!(late.counted.len(), 1);
        assert_eq!(late.counted[0].0, 0);
        let snap = stats.snapshot();
        assert_eq!((snap.frames, snap.frame_errors, snap.bit_errors), (1, 1, 2));
    }

    #[test]
    fn frame_cap_truncates_last_trial() {
        let stats = Statistics::new(rule(6, 100), 4, 8, Cadence::Never);
        let t0 = stats.claim().unwrap();
        let t1 = stats.claim().unwrap();
        assert!(stats.claim().is_none());
        stats.merge(t0, outcome(&[0; 4]));
        stats.merge(t1, outcome(&[1; 4]));
        let snap = stats.snapshot();
        assert_eq!(snap.frames, 6);
        assert_eq!(snap.frame_errors, 2);
    }

    #[test]
    fn zero_target_is_met_before_any_trial() {
        let stats = Statistics::new(rule(100, 0), 2, 8, Cadence::Never);
        assert_eq!(stats.claim(), None);
        assert!(stats.is_stopped());
        let snap = stats.snapshot();
        assert_eq!((snap.trials, snap.frames, snap.frame_errors), (0, 0, 0));
    }

    #[test]
    fn late_trial_after_stop_is_discarded() {
        let stats = Statistics::new(rule(100, 1), 2, 8, Cadence::Never);
        let t0 = stats.claim().unwrap();
        let t1 = stats.claim().unwrap();
        stats.merge(t0, outcome(&[4, 0]));
        let merged = stats.merge(t1, outcome(&[1, 1]));
        assert!(merged.counted.is_empty());
        let snap = stats.snapshot();
        assert_eq!((snap.trials, snap.frames, snap.frame_errors), (1, 1, 1));
    }

    #[test]
    fn progress_every_n_trials() {
        let stats = Statistics::new(rule(100, 100), 1, 8, Cadence::Trials(2));
        let mut reports = 0;
        for _ in 0..6 {
            let t = stats.claim().unwrap();
            if stats.merge(t, outcome(&[0])).progress.is_some() {
                reports += 1;
            }
        }
        assert_eq!(reports, 3);
    }

    #[test]
    fn reset_clears_totals() {
        let stats = Statistics::new(rule(10, 1), 1, 8, Cadence::Never);
        let t = stats.claim().unwrap();
        stats.merge(t, outcome(&[1]));
        assert!(stats.is_stopped());
        stats.reset();
        assert!(!stats.is_stopped());
        assert_eq!(stats.snapshot().frames, 0);
        assert_eq!(stats.claim(), Some(0));
    }

    #[test]
    fn rates() {
        let snap = Snapshot {
            trials: 2,
            frames: 4,
            frame_errors: 1,
            bit_errors: 2,
            passes: 10,
            bits_per_frame: 8,
            elapsed: Duration::ZERO,
        };
        assert_eq!(snap.fer(), 0.25);
        assert_eq!(snap.ber(), 2.0 / 32.0);
        assert_eq!(snap.average_passes(), 2.5);
    }
}
