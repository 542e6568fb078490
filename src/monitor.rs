//! Error monitor: compares decoded frames against the transmitted reference.

use crate::error::Error;
use crate::frame::{frame, Bit};
use crate::iteration::{FrameState, IterationState};
use crate::module::{Module, PortContract, Role};

/// Result of one frame within a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    /// Number of information bits that differ from the reference.
    pub bit_errors: usize,
    /// Feedback-loop passes the frame went through.
    pub passes: usize,
    /// Final convergence state.
    pub state: FrameState,
}

impl FrameOutcome {
    pub fn is_error(&self) -> bool {
        self.bit_errors > 0
    }
}

/// Result of one trial: one entry per frame of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrialOutcome {
    pub frames: Vec<FrameOutcome>,
}

impl TrialOutcome {
    pub fn bit_errors(&self) -> usize {
        self.frames.iter().map(|f| f.bit_errors).sum()
    }

    pub fn frame_errors(&self) -> usize {
        self.frames.iter().filter(|f| f.is_error()).count()
    }

    pub fn pass_counts(&self) -> Vec<usize> {
        self.frames.iter().map(|f| f.passes).collect()
    }
}

/// Bit/frame error counter. Contract: `k` bits per frame on both inputs.
#[derive(Debug, Clone)]
pub struct Monitor {
    k: usize,
    batch_width: usize,
}

impl Monitor {
    pub fn new(k: usize, batch_width: usize) -> Self {
        Self { k, batch_width }
    }

    /// Count errors frame by frame and attach each frame's loop history.
    pub fn check(
        &mut self,
        reference: &[Bit],
        decoded: &[Bit],
        iteration: &IterationState,
    ) -> Result<TrialOutcome, Error> {
        let c = self.contract();
        c.check(self.name(), "reference", c.pre(), reference.len())?;
        c.check(self.name(), "decoded", c.post(), decoded.len())?;
        c.check(self.name(), "iteration", 1, iteration.batch_width())?;
        let frames = (0..c.batch_width())
            .map(|f| FrameOutcome {
                bit_errors: frame(reference, f, self.k)
                    .iter()
                    .zip(frame(decoded, f, self.k))
                    .filter(|(a, b)| a != b)
                    .count(),
                passes: iteration.passes(f),
                state: iteration.state(f),
            })
            .collect();
        Ok(TrialOutcome { frames })
    }
}

impl Module for Monitor {
    fn name(&self) -> &str {
        "Monitor"
    }

    fn role(&self) -> Role {
        Role::Monitor
    }

    fn contract(&self) -> PortContract {
        PortContract::new(self.k, self.k, self.batch_width)
    }
}
