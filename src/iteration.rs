//! Per-frame convergence bookkeeping for the demodulate/decode feedback loop.
//!
//! A batch always advances in lockstep, but every frame carries its own state.
//! Once a frame is final it drops out of the activity mask: loop kernels skip it
//! and its buffers keep the value from the pass that finished it.

use crate::error::Error;
use crate::frame::{frame, Bit};
use crate::invariant_ppt::{assert_invariant, FROZEN_FRAMES, ITERATION_TERMINATES};

/// Convergence state of one logical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Still cycling; carries the number of completed passes.
    Running(usize),
    /// The stopping predicate held; the frame is frozen.
    Converged,
    /// The pass budget ran out without convergence.
    Exhausted,
}

impl FrameState {
    pub fn is_final(self) -> bool {
        !matches!(self, FrameState::Running(_))
    }
}

/// Per-frame stopping condition consulted after every pass.
pub trait Predicate: Send {
    /// Whether a frame may stop iterating, given its current hard decision and
    /// the transmitted reference.
    fn should_stop(&mut self, decoded: &[Bit], reference: &[Bit]) -> bool;
}

impl<F> Predicate for F
where
    F: FnMut(&[Bit], &[Bit]) -> bool + Send,
{
    fn should_stop(&mut self, decoded: &[Bit], reference: &[Bit]) -> bool {
        self(decoded, reference)
    }
}

/// Genie-aided stop: the decoded frame equals the reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct Genie;

impl Predicate for Genie {
    fn should_stop(&mut self, decoded: &[Bit], reference: &[Bit]) -> bool {
        decoded == reference
    }
}

/// Never stop early; every frame runs the full pass budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl Predicate for Never {
    fn should_stop(&mut self, _decoded: &[Bit], _reference: &[Bit]) -> bool {
        false
    }
}

/// Side arrays tracking every frame of one batch through the loop.
#[derive(Debug, Clone)]
pub struct IterationState {
    max_passes: usize,
    depth: usize,
    states: Vec<FrameState>,
    passes: Vec<usize>,
    streak: Vec<usize>,
    active: Vec<bool>,
}

impl IterationState {
    /// `depth` is the number of consecutive passes the predicate must hold for.
    pub fn new(batch_width: usize, max_passes: usize, depth: usize) -> Self {
        Self {
            max_passes,
            depth: depth.max(1),
            states: vec![FrameState::Running(0); batch_width],
            passes: vec![0; batch_width],
            streak: vec![0; batch_width],
            active: vec![true; batch_width],
        }
    }

    /// Back to `Running(0)` for every frame.
    pub fn reset(&mut self) {
        self.states.fill(FrameState::Running(0));
        self.passes.fill(0);
        self.streak.fill(0);
        self.active.fill(true);
    }

    pub fn batch_width(&self) -> usize {
        self.states.len()
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    /// One flag per frame: `true` while the frame is still running.
    pub fn active(&self) -> &[bool] {
        &self.active
    }

    pub fn state(&self, frame: usize) -> FrameState {
        self.states[frame]
    }

    pub fn states(&self) -> &[FrameState] {
        &self.states
    }

    pub fn passes(&self, frame: usize) -> usize {
        self.passes[frame]
    }

    pub fn pass_counts(&self) -> &[usize] {
        &self.passes
    }

    /// Every frame is converged or exhausted.
    pub fn is_finished(&self) -> bool {
        self.states.iter().all(|s| s.is_final())
    }

    /// Frames still running.
    pub fn running(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }

    /// Close one pass. `stop(frame)` is consulted only for running frames.
    /// Returns the number of frames still running.
    pub fn record_pass<F>(&mut self, mut stop: F) -> usize
    where
        F: FnMut(usize) -> bool,
    {
        for f in 0..self.states.len() {
            if !self.active[f] {
                continue;
            }
            self.passes[f] += 1;
            if stop(f) {
                self.streak[f] += 1;
            } else {
                self.streak[f] = 0;
            }
            self.states[f] = if self.streak[f] >= self.depth {
                FrameState::Converged
            } else if self.passes[f] >= self.max_passes {
                FrameState::Exhausted
            } else {
                FrameState::Running(self.passes[f])
            };
            self.active[f] = !self.states[f].is_final();
        }
        assert_invariant(
            FROZEN_FRAMES,
            self.passes.iter().all(|&p| p <= self.max_passes),
            "final frames are never advanced",
            Some("record_pass"),
        );
        self.running()
    }
}

/// Runs the feedback loop for one batch.
pub struct IterationDriver {
    state: IterationState,
    predicate: Box<dyn Predicate>,
}

impl IterationDriver {
    pub fn new(batch_width: usize, max_passes: usize, depth: usize, predicate: Box<dyn Predicate>) -> Self {
        Self {
            state: IterationState::new(batch_width, max_passes, depth),
            predicate,
        }
    }

    pub fn state(&self) -> &IterationState {
        &self.state
    }

    /// Repeat `pass` until every frame is final.
    ///
    /// `pass` receives the activity mask and the hard-decision buffer it must fill
    /// for active frames; the predicate then judges each running frame against
    /// `reference`.
    pub fn drive<F>(&mut self, reference: &[Bit], decoded: &mut [Bit], mut pass: F) -> Result<(), Error>
    where
        F: FnMut(&[bool], &mut [Bit]) -> Result<(), Error>,
    {
        self.state.reset();
        let stride = reference.len() / self.state.batch_width().max(1);
        while !self.state.is_finished() {
            pass(self.state.active(), decoded)?;
            let predicate = &mut self.predicate;
            let decided: &[Bit] = decoded;
            self.state.record_pass(|f| {
                predicate.should_stop(frame(decided, f, stride), frame(reference, f, stride))
            });
        }
        assert_invariant(
            ITERATION_TERMINATES,
            self.state.is_finished(),
            "loop ends with every frame final",
            Some("drive"),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_on_first_passing_check() {
        let mut state = IterationState::new(2, 4, 1);
        state.record_pass(|f| f == 0);
        assert_eq!(state.state(0), FrameState::Converged);
        assert_eq!(state.state(1), FrameState::Running(1));
        assert_eq!(state.active(), &[false, true]);
        assert!(!state.is_finished());
    }

    #[test]
    fn exhausts_at_cap() {
        let mut state = IterationState::new(1, 3, 1);
        for _ in 0..3 {
            state.record_pass(|_| false);
        }
        assert_eq!(state.state(0), FrameState::Exhausted);
        assert_eq!(state.passes(0), 3);
        assert!(state.is_finished());
    }

    #[test]
    fn final_frames_not_consulted() {
        let mut state = IterationState::new(2, 5, 1);
        state.record_pass(|f| f == 1);
        let mut consulted = Vec::new();
        state.record_pass(|f| {
            consulted.push(f);
            false
        });
        assert_eq!(consulted, vec![0]);
        assert_eq!(state.passes(1), 1);
    }

    #[test]
    fn depth_needs_consecutive_passes() {
        let mut state = IterationState::new(1, 10, 2);
        state.record_pass(|_| true);
        assert_eq!(state.state(0), FrameState::Running(1));
        state.record_pass(|_| false);
        state.record_pass(|_| true);
        assert_eq!(state.state(0), FrameState::Running(3));
        state.record_pass(|_| true);
        assert_eq!(state.state(0), FrameState::Converged);
        assert_eq!(state.passes(0), 4);
    }

    #[test]
    fn convergence_wins_over_exhaustion_on_last_pass() {
        let mut state = IterationState::new(1, 1, 1);
        state.record_pass(|_| true);
        assert_eq!(state.state(0), FrameState::Converged);
    }

    #[test]
    fn driver_stops_when_all_frames_final() {
        let mut driver = IterationDriver::new(2, 3, 1, Box::new(Genie));
        let reference = [1, 0, 1, 1];
        let mut decoded = [0; 4];
        let mut passes = 0;
        driver
            .drive(&reference, &mut decoded, |active, out| {
                passes += 1;
                // Frame 0 decodes correctly on pass 2, frame 1 never does.
                if active[0] && passes == 2 {
                    out[..2].copy_from_slice(&[1, 0]);
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(passes, 3);
        assert_eq!(driver.state().state(0), FrameState::Converged);
        assert_eq!(driver.state().passes(0), 2);
        assert_eq!(driver.state().state(1), FrameState::Exhausted);
    }

    #[test]
    fn closures_are_predicates() {
        let mut p = |d: &[Bit], _r: &[Bit]| d.iter().all(|&b| b == 0);
        assert!(p.should_stop(&[0, 0], &[1, 1]));
        assert!(!Never.should_stop(&[1], &[1]));
    }
}
