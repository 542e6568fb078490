//! Simulation configuration.

use crate::error::Error;
use std::time::Duration;

/// Global Monte Carlo stopping rule: stop at whichever limit is hit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoppingRule {
    /// Maximum number of frames to simulate.
    pub frame_cap: u64,
    /// Stop once this many frame errors have been counted.
    pub target_frame_errors: u64,
}

impl Default for StoppingRule {
    fn default() -> Self {
        Self {
            frame_cap: 1_000_000,
            target_frame_errors: 100,
        }
    }
}

/// Feedback-loop limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationConfig {
    /// Maximum demodulate/decode passes per frame.
    pub max_passes: usize,
    /// Consecutive passes the stopping predicate must hold before a frame converges.
    pub convergence_depth: usize,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            max_passes: 15,
            convergence_depth: 1,
        }
    }
}

/// How often progress snapshots reach the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cadence {
    /// Only the final snapshot.
    #[default]
    Never,
    /// Every `n` counted trials.
    Trials(u64),
    /// At most once per interval.
    Interval(Duration),
}

/// Configuration for a Monte Carlo run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub stopping: StoppingRule,
    pub iteration: IterationConfig,
    /// Worker threads, each owning one backend.
    pub workers: usize,
    /// Base seed; trial `i` derives its own seed from it.
    pub seed: u64,
    pub cadence: Cadence,
    /// Frames per batch.
    pub batch_width: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            stopping: StoppingRule::default(),
            iteration: IterationConfig::default(),
            workers: 1,
            seed: 0,
            cadence: Cadence::default(),
            batch_width: 1,
        }
    }
}

impl SimulationConfig {
    pub fn with_frame_cap(mut self, frame_cap: u64) -> Self {
        self.stopping.frame_cap = frame_cap;
        self
    }

    pub fn with_target_frame_errors(mut self, target: u64) -> Self {
        self.stopping.target_frame_errors = target;
        self
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.iteration.max_passes = max_passes;
        self
    }

    pub fn with_convergence_depth(mut self, depth: usize) -> Self {
        self.iteration.convergence_depth = depth;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn with_batch_width(mut self, batch_width: usize) -> Self {
        self.batch_width = batch_width;
        self
    }

    /// Reject values that would make a run meaningless or unbounded.
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.batch_width == 0 {
            return Err(Error::Config("batch width must be non-zero".into()));
        }
        if self.iteration.max_passes == 0 {
            return Err(Error::Config("max_passes must be at least 1".into()));
        }
        if self.iteration.convergence_depth == 0 {
            return Err(Error::Config("convergence_depth must be at least 1".into()));
        }
        if self.stopping.frame_cap == 0 {
            return Err(Error::Config("frame_cap must be non-zero".into()));
        }
        if let Cadence::Trials(0) = self.cadence {
            return Err(Error::Config("progress cadence of 0 trials".into()));
        }
        Ok(())
    }
}
