//! Reference processing modules.
//!
//! Small exact implementations of every role: enough to drive a chain end to
//! end. Real codecs plug in through the same traits.

use crate::error::Error;
use crate::frame::{Bit, Real};
use crate::module::{Channel, Decoder, Encoder, Modem, Module, PortContract, Role, Source};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

/// Uniform random information bits.
#[derive(Debug, Clone)]
pub struct RandomSource {
    k: usize,
    batch_width: usize,
    rng: ChaCha8Rng,
}

impl RandomSource {
    pub fn new(k: usize, batch_width: usize, seed: u64) -> Self {
        Self {
            k,
            batch_width,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Module for RandomSource {
    fn name(&self) -> &str {
        "RandomSource"
    }

    fn role(&self) -> Role {
        Role::Source
    }

    fn contract(&self) -> PortContract {
        PortContract::new(self.k, self.k, self.batch_width)
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }
}

impl Source for RandomSource {
    fn generate_frame(&mut self, bits: &mut [Bit], _frame: usize) -> Result<(), Error> {
        for b in bits.iter_mut() {
            *b = self.rng.gen::<bool>() as Bit;
        }
        Ok(())
    }
}

/// Repeats the information block `reps` times: `x[r * k + i] = u[i]`.
#[derive(Debug, Clone)]
pub struct RepetitionEncoder {
    k: usize,
    reps: usize,
    batch_width: usize,
}

impl RepetitionEncoder {
    pub fn new(k: usize, reps: usize, batch_width: usize) -> Self {
        Self { k, reps, batch_width }
    }
}

impl Module for RepetitionEncoder {
    fn name(&self) -> &str {
        "RepetitionEncoder"
    }

    fn role(&self) -> Role {
        Role::Encoder
    }

    fn contract(&self) -> PortContract {
        PortContract::new(self.k, self.k * self.reps, self.batch_width)
    }
}

impl Encoder for RepetitionEncoder {
    fn encode_frame(&mut self, info: &[Bit], coded: &mut [Bit], _frame: usize) -> Result<(), Error> {
        for block in coded.chunks_exact_mut(self.k) {
            block.copy_from_slice(info);
        }
        Ok(())
    }
}

/// Filtering applied by [`BpskModem`] between channel and demodulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Filter {
    /// Pass-through; batch filtering becomes a plain copy.
    Identity,
    /// Multiply every sample. Same sizes, but not the identity.
    Scale(Real),
}

/// BPSK: bit `b` maps to `1 - 2b`; LLRs are `2 h y / sigma^2`.
#[derive(Debug, Clone)]
pub struct BpskModem {
    n: usize,
    batch_width: usize,
    sigma: f32,
    filter: Filter,
}

impl BpskModem {
    pub fn new(n: usize, batch_width: usize) -> Self {
        Self {
            n,
            batch_width,
            sigma: 1.0,
            filter: Filter::Identity,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    fn llr_scale(&self) -> Real {
        let gain = match self.filter {
            Filter::Identity => 1.0,
            Filter::Scale(g) => g,
        };
        2.0 / (self.sigma * self.sigma * gain)
    }
}

impl Module for BpskModem {
    fn name(&self) -> &str {
        "BpskModem"
    }

    fn role(&self) -> Role {
        Role::Modulator
    }

    fn contract(&self) -> PortContract {
        PortContract::with_secondary(self.n, self.n, self.n, self.batch_width)
    }

    fn set_noise(&mut self, sigma: f32) {
        self.sigma = sigma;
    }
}

impl Modem for BpskModem {
    fn modulate_frame(&mut self, bits: &[Bit], symbols: &mut [Real], _frame: usize) -> Result<(), Error> {
        for (s, &b) in symbols.iter_mut().zip(bits) {
            *s = 1.0 - 2.0 * b as Real;
        }
        Ok(())
    }

    fn filter_frame(&mut self, received: &[Real], filtered: &mut [Real], _frame: usize) -> Result<(), Error> {
        let gain = match self.filter {
            Filter::Identity => 1.0,
            Filter::Scale(g) => g,
        };
        for (o, &y) in filtered.iter_mut().zip(received) {
            *o = gain * y;
        }
        Ok(())
    }

    fn filter_is_identity(&self) -> bool {
        self.filter == Filter::Identity
    }

    fn demodulate_frame(&mut self, filtered: &[Real], llrs: &mut [Real], _frame: usize) -> Result<(), Error> {
        let scale = self.llr_scale();
        for (l, &y) in llrs.iter_mut().zip(filtered) {
            *l = scale * y;
        }
        Ok(())
    }

    fn demodulate_with_gains_frame(
        &mut self,
        filtered: &[Real],
        gains: &[Real],
        llrs: &mut [Real],
        _frame: usize,
    ) -> Result<(), Error> {
        let scale = self.llr_scale();
        for ((l, &y), &h) in llrs.iter_mut().zip(filtered).zip(gains) {
            *l = scale * h * y;
        }
        Ok(())
    }

    fn demodulate_extrinsic_frame(
        &mut self,
        filtered: &[Real],
        extrinsic: &[Real],
        llrs: &mut [Real],
        _frame: usize,
    ) -> Result<(), Error> {
        let scale = self.llr_scale();
        for ((l, &y), &e) in llrs.iter_mut().zip(filtered).zip(extrinsic) {
            *l = scale * y + e;
        }
        Ok(())
    }

    fn demodulate_with_gains_extrinsic_frame(
        &mut self,
        filtered: &[Real],
        gains: &[Real],
        extrinsic: &[Real],
        llrs: &mut [Real],
        _frame: usize,
    ) -> Result<(), Error> {
        let scale = self.llr_scale();
        for (i, l) in llrs.iter_mut().enumerate() {
            *l = scale * gains[i] * filtered[i] + extrinsic[i];
        }
        Ok(())
    }
}

/// Additive white Gaussian noise, optionally with Rayleigh block-free fading.
#[derive(Debug, Clone)]
pub struct AwgnChannel {
    n: usize,
    batch_width: usize,
    sigma: f32,
    fading: bool,
    rng: ChaCha8Rng,
}

impl AwgnChannel {
    pub fn new(n: usize, batch_width: usize, seed: u64) -> Self {
        Self {
            n,
            batch_width,
            sigma: 1.0,
            fading: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Draw a Rayleigh gain per sample in [`Channel::add_noise_with_gains`].
    pub fn with_fading(mut self) -> Self {
        self.fading = true;
        self
    }

    fn gaussian(&mut self) -> Real {
        self.rng.sample(StandardNormal)
    }
}

impl Module for AwgnChannel {
    fn name(&self) -> &str {
        "AwgnChannel"
    }

    fn role(&self) -> Role {
        Role::Channel
    }

    fn contract(&self) -> PortContract {
        PortContract::new(self.n, self.n, self.batch_width)
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    fn set_noise(&mut self, sigma: f32) {
        self.sigma = sigma;
    }
}

impl Channel for AwgnChannel {
    fn add_noise_frame(&mut self, sent: &[Real], received: &mut [Real], _frame: usize) -> Result<(), Error> {
        for (y, &x) in received.iter_mut().zip(sent) {
            *y = x + self.sigma * self.gaussian();
        }
        Ok(())
    }

    fn add_noise_with_gains_frame(
        &mut self,
        sent: &[Real],
        received: &mut [Real],
        gains: &mut [Real],
        _frame: usize,
    ) -> Result<(), Error> {
        for i in 0..sent.len() {
            let h = if self.fading {
                let (a, b) = (self.gaussian(), self.gaussian());
                ((a * a + b * b) / 2.0).sqrt()
            } else {
                1.0
            };
            gains[i] = h;
            received[i] = h * sent[i] + self.sigma * self.gaussian();
        }
        Ok(())
    }

    fn provides_gains(&self) -> bool {
        true
    }
}

/// Soft decoder for [`RepetitionEncoder`] codewords.
///
/// The a-posteriori value of bit `i` is the sum of its `reps` copies; the
/// extrinsic value of each copy is that sum minus the copy itself.
#[derive(Debug, Clone)]
pub struct RepetitionDecoder {
    k: usize,
    reps: usize,
    batch_width: usize,
}

impl RepetitionDecoder {
    pub fn new(k: usize, reps: usize, batch_width: usize) -> Self {
        Self { k, reps, batch_width }
    }

    fn total(&self, llrs: &[Real], i: usize) -> Real {
        (0..self.reps).map(|r| llrs[r * self.k + i]).sum()
    }
}

impl Module for RepetitionDecoder {
    fn name(&self) -> &str {
        "RepetitionDecoder"
    }

    fn role(&self) -> Role {
        Role::Decoder
    }

    fn contract(&self) -> PortContract {
        let n = self.k * self.reps;
        PortContract::with_secondary(n, self.k, n, self.batch_width)
    }
}

impl Decoder for RepetitionDecoder {
    fn decode_siso_frame(&mut self, llrs: &[Real], extrinsic: &mut [Real], _frame: usize) -> Result<(), Error> {
        for i in 0..self.k {
            let total = self.total(llrs, i);
            for r in 0..self.reps {
                let j = r * self.k + i;
                extrinsic[j] = total - llrs[j];
            }
        }
        Ok(())
    }

    fn decode_siho_frame(&mut self, llrs: &[Real], decoded: &mut [Bit], _frame: usize) -> Result<(), Error> {
        for (i, v) in decoded.iter_mut().enumerate() {
            *v = (self.total(llrs, i) < 0.0) as Bit;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repetition_roundtrip_without_noise() {
        let mut enc = RepetitionEncoder::new(4, 3, 1);
        let mut modem = BpskModem::new(12, 1);
        let mut dec = RepetitionDecoder::new(4, 3, 1);
        let u = [1, 0, 0, 1];
        let mut x = [0; 12];
        let mut s = [0.0; 12];
        let mut l = [0.0; 12];
        let mut v = [0; 4];
        enc.encode(&u, &mut x).unwrap();
        modem.modulate(&x, &mut s).unwrap();
        modem.demodulate(&s, &mut l).unwrap();
        dec.decode_siho(&l, &mut v, None).unwrap();
        assert_eq!(v, u);
    }

    #[test]
    fn extrinsic_excludes_own_copy() {
        let mut dec = RepetitionDecoder::new(1, 3, 1);
        let mut ext = [0.0; 3];
        dec.decode_siso(&[1.0, 2.0, 4.0], &mut ext, None).unwrap();
        assert_eq!(ext, [6.0, 5.0, 3.0]);
    }

    #[test]
    fn reseed_replays_source() {
        let mut src = RandomSource::new(16, 2, 7);
        let mut a = [0; 32];
        let mut b = [0; 32];
        src.reseed(99);
        src.generate(&mut a).unwrap();
        src.reseed(99);
        src.generate(&mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unfaded_gains_are_unity() {
        let mut chn = AwgnChannel::new(4, 1, 3);
        chn.set_noise(0.0);
        let mut y = [0.0; 4];
        let mut h = [0.0; 4];
        chn.add_noise_with_gains(&[1.0, -1.0, 1.0, -1.0], &mut y, &mut h).unwrap();
        assert_eq!(h, [1.0; 4]);
        assert_eq!(y, [1.0, -1.0, 1.0, -1.0]);
    }

    #[test]
    fn scaling_filter_is_not_identity() {
        let modem = BpskModem::new(4, 1).with_filter(Filter::Scale(0.5));
        assert!(!modem.filter_is_identity());
        assert!(BpskModem::new(4, 1).filter_is_identity());
    }
}
