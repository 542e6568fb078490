//! Test harness: deterministic modules and fixtures for exercising chains,
//! engines and simulations without a real codec.

use crate::chain::{ChainBuilder, Stages};
use crate::error::Error;
use crate::frame::{Bit, Real};
use crate::module::{Channel, Decoder, Module, PortContract, Role};
use crate::monitor::TrialOutcome;
use crate::report::Reporter;
use crate::stages::{AwgnChannel, BpskModem, RandomSource, RepetitionDecoder, RepetitionEncoder};
use crate::stats::Snapshot;
use parking_lot::Mutex;
use std::sync::Arc;

/// Channel that passes symbols through untouched, with unity gains.
#[derive(Debug, Clone)]
pub struct NoiselessChannel {
    n: usize,
    batch_width: usize,
}

impl NoiselessChannel {
    pub fn new(n: usize, batch_width: usize) -> Self {
        Self { n, batch_width }
    }
}

impl Module for NoiselessChannel {
    fn name(&self) -> &str {
        "NoiselessChannel"
    }

    fn role(&self) -> Role {
        Role::Channel
    }

    fn contract(&self) -> PortContract {
        PortContract::new(self.n, self.n, self.batch_width)
    }
}

impl Channel for NoiselessChannel {
    fn add_noise_frame(&mut self, sent: &[Real], received: &mut [Real], _frame: usize) -> Result<(), Error> {
        received.copy_from_slice(sent);
        Ok(())
    }

    fn add_noise_with_gains_frame(
        &mut self,
        sent: &[Real],
        received: &mut [Real],
        gains: &mut [Real],
        _frame: usize,
    ) -> Result<(), Error> {
        received.copy_from_slice(sent);
        gains.fill(1.0);
        Ok(())
    }

    fn provides_gains(&self) -> bool {
        true
    }
}

/// Shared per-frame call counts of a [`ScriptedDecoder`].
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    siho: Arc<Mutex<Vec<usize>>>,
    siso: Arc<Mutex<Vec<usize>>>,
}

impl CallLog {
    fn new(batch_width: usize) -> Self {
        Self {
            siho: Arc::new(Mutex::new(vec![0; batch_width])),
            siso: Arc::new(Mutex::new(vec![0; batch_width])),
        }
    }

    /// Hard-output decodes per frame, across every trial so far.
    pub fn siho(&self) -> Vec<usize> {
        self.siho.lock().clone()
    }

    /// Soft-output decodes per frame, across every trial so far.
    pub fn siso(&self) -> Vec<usize> {
        self.siso.lock().clone()
    }
}

/// Decoder whose frames become correct on a scripted pass.
///
/// Frame `f` outputs the hard decisions of its first `k` soft values on pass
/// `converge_at[f]` and the same decisions with bit 0 flipped on every other
/// pass. Behind a noiseless channel those decisions are the transmitted bits,
/// so a genie predicate stops each frame exactly at its scripted pass.
/// `usize::MAX` never converges. Extrinsic output is zero.
#[derive(Debug, Clone)]
pub struct ScriptedDecoder {
    k: usize,
    n: usize,
    batch_width: usize,
    converge_at: Vec<usize>,
    passes: Vec<usize>,
    log: CallLog,
}

impl ScriptedDecoder {
    pub fn new(k: usize, n: usize, converge_at: Vec<usize>) -> Self {
        let batch_width = converge_at.len();
        Self {
            k,
            n,
            batch_width,
            passes: vec![0; batch_width],
            log: CallLog::new(batch_width),
            converge_at,
        }
    }

    /// Handle to the call counts; stays valid after the decoder is boxed.
    pub fn calls(&self) -> CallLog {
        self.log.clone()
    }
}

impl Module for ScriptedDecoder {
    fn name(&self) -> &str {
        "ScriptedDecoder"
    }

    fn role(&self) -> Role {
        Role::Decoder
    }

    fn contract(&self) -> PortContract {
        PortContract::with_secondary(self.n, self.k, self.n, self.batch_width)
    }

    fn reset(&mut self) {
        self.passes.fill(0);
    }
}

impl Decoder for ScriptedDecoder {
    fn decode_siso_frame(&mut self, _llrs: &[Real], extrinsic: &mut [Real], frame: usize) -> Result<(), Error> {
        self.log.siso.lock()[frame] += 1;
        extrinsic.fill(0.0);
        Ok(())
    }

    fn decode_siho_frame(&mut self, llrs: &[Real], decoded: &mut [Bit], frame: usize) -> Result<(), Error> {
        self.log.siho.lock()[frame] += 1;
        self.passes[frame] += 1;
        for (v, &l) in decoded.iter_mut().zip(llrs) {
            *v = (l < 0.0) as Bit;
        }
        if self.passes[frame] != self.converge_at[frame] {
            decoded[0] ^= 1;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Log {
    trials: Vec<(u64, TrialOutcome)>,
    progress: Vec<Snapshot>,
    complete: Vec<(f32, Snapshot)>,
}

/// Reporter that keeps everything it is told.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Log>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trial indices in the order they were reported.
    pub fn trials(&self) -> Vec<u64> {
        self.log.lock().trials.iter().map(|(t, _)| *t).collect()
    }

    pub fn outcomes(&self) -> Vec<TrialOutcome> {
        self.log.lock().trials.iter().map(|(_, o)| o.clone()).collect()
    }

    pub fn progress(&self) -> Vec<Snapshot> {
        self.log.lock().progress.clone()
    }

    pub fn complete(&self) -> Vec<(f32, Snapshot)> {
        self.log.lock().complete.clone()
    }
}

impl Reporter for Recorder {
    fn on_trial(&self, trial: u64, outcome: &TrialOutcome) {
        self.log.lock().trials.push((trial, outcome.clone()));
    }

    fn on_progress(&self, snapshot: &Snapshot) {
        self.log.lock().progress.push(*snapshot);
    }

    fn on_complete(&self, noise: f32, snapshot: &Snapshot) {
        self.log.lock().complete.push((noise, *snapshot));
    }
}

/// Repetition-coded BPSK over AWGN: `k` info bits, `reps` copies each.
pub fn repetition_builder(k: usize, reps: usize, batch_width: usize) -> ChainBuilder {
    let n = k * reps;
    ChainBuilder::new()
        .source(RandomSource::new(k, batch_width, 1))
        .encoder(RepetitionEncoder::new(k, reps, batch_width))
        .modem(BpskModem::new(n, batch_width))
        .channel(AwgnChannel::new(n, batch_width, 2))
        .decoder(RepetitionDecoder::new(k, reps, batch_width))
}

/// The stages of [`repetition_builder`].
pub fn repetition_stages(k: usize, reps: usize, batch_width: usize) -> Stages {
    let n = k * reps;
    Stages::new(
        RandomSource::new(k, batch_width, 1),
        RepetitionEncoder::new(k, reps, batch_width),
        BpskModem::new(n, batch_width),
        AwgnChannel::new(n, batch_width, 2),
        RepetitionDecoder::new(k, reps, batch_width),
    )
}

/// Noiseless chain around a [`ScriptedDecoder`], uncoded (`k == n`).
pub fn scripted_builder(k: usize, converge_at: Vec<usize>) -> (ChainBuilder, CallLog) {
    let width = converge_at.len();
    let decoder = ScriptedDecoder::new(k, k, converge_at);
    let calls = decoder.calls();
    let builder = ChainBuilder::new()
        .source(RandomSource::new(k, width, 1))
        .encoder(RepetitionEncoder::new(k, 1, width))
        .modem(BpskModem::new(k, width))
        .channel(NoiselessChannel::new(k, width))
        .decoder(decoder);
    (builder, calls)
}
