//! Port contracts and processing-module traits.
//!
//! Every role trait splits into per-frame kernels, which concrete modules
//! implement, and provided batch entry points, which validate every buffer
//! against the module's [`PortContract`] before walking the batch by stride.
//! Optional kernels default to [`Error::UnimplementedOperation`].

#![forbid(unsafe_code)]

use crate::error::Error;
use crate::frame::{frame, frame_mut, selected, Bit, Real};
use crate::invariant_ppt::{assert_invariant, SIZE_CONTRACT};

/// Fixed per-frame geometry of a module plus its batch width.
///
/// `pre` is the input frame size, `post` the size after the primary transform and
/// `post_secondary` the size after the secondary one (filtering for a modem, the
/// soft output for a decoder). Modules with a single transform set both equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortContract {
    pre: usize,
    post: usize,
    post_secondary: usize,
    batch_width: usize,
}

impl PortContract {
    /// Contract with a single transform (`post_secondary == post`).
    pub fn new(pre: usize, post: usize, batch_width: usize) -> Self {
        Self::with_secondary(pre, post, post, batch_width)
    }

    /// Contract with a primary and a secondary transform.
    pub fn with_secondary(pre: usize, post: usize, post_secondary: usize, batch_width: usize) -> Self {
        Self {
            pre,
            post,
            post_secondary,
            batch_width,
        }
    }

    pub fn pre(&self) -> usize {
        self.pre
    }

    pub fn post(&self) -> usize {
        self.post
    }

    pub fn post_secondary(&self) -> usize {
        self.post_secondary
    }

    pub fn batch_width(&self) -> usize {
        self.batch_width
    }

    /// Reject degenerate geometry.
    pub fn validate(&self, module: &str) -> Result<(), Error> {
        if self.batch_width == 0 {
            return Err(Error::Config(format!("{module}: batch width must be non-zero")));
        }
        if self.pre == 0 || self.post == 0 || self.post_secondary == 0 {
            return Err(Error::Config(format!(
                "{module}: frame sizes must be non-zero (got {}/{}/{})",
                self.pre, self.post, self.post_secondary
            )));
        }
        Ok(())
    }

    /// Check that a buffer holds exactly `per_frame * batch_width` elements.
    pub fn check(&self, module: &str, port: &'static str, per_frame: usize, actual: usize) -> Result<(), Error> {
        let expected = per_frame * self.batch_width;
        if actual != expected {
            return Err(Error::SizeMismatch {
                module: module.to_string(),
                port,
                per_frame,
                batch_width: self.batch_width,
                expected,
                actual,
            });
        }
        assert_invariant(
            SIZE_CONTRACT,
            actual == expected,
            "buffer holds exactly one per-frame region for every frame of the batch",
            Some(port),
        );
        Ok(())
    }

    /// Check an optional activity mask: one flag per frame.
    pub fn check_mask(&self, module: &str, mask: Option<&[bool]>) -> Result<(), Error> {
        match mask {
            Some(m) => self.check(module, "active", 1, m.len()),
            None => Ok(()),
        }
    }
}

/// Role of a processing module in the chain.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Source,
    Encoder,
    Modulator,
    Channel,
    Decoder,
    Monitor,
}

/// Behavior shared by every processing module.
///
/// A module is owned by exactly one chain and never shared across workers, so
/// kernels take `&mut self` freely.
pub trait Module: Send {
    /// Human-readable name used in error messages.
    fn name(&self) -> &str;

    fn role(&self) -> Role;

    fn contract(&self) -> PortContract;

    /// Reseed any random state. Called before every trial.
    fn reseed(&mut self, _seed: u64) {}

    /// Clear per-trial scratch state. Called before every trial.
    fn reset(&mut self) {}

    /// Update the noise standard deviation for the current simulation point.
    fn set_noise(&mut self, _sigma: f32) {}
}

pub(crate) fn unimplemented(module: &str, operation: &'static str) -> Error {
    Error::UnimplementedOperation {
        module: module.to_string(),
        operation,
    }
}

/// Information-bit generator. Contract: `post` bits per frame (`pre` is unused).
pub trait Source: Module {
    fn generate_frame(&mut self, bits: &mut [Bit], frame: usize) -> Result<(), Error>;

    fn generate(&mut self, bits: &mut [Bit]) -> Result<(), Error> {
        let c = self.contract();
        c.check(self.name(), "output", c.post(), bits.len())?;
        for f in 0..c.batch_width() {
            self.generate_frame(frame_mut(bits, f, c.post()), f)?;
        }
        Ok(())
    }
}

/// Channel encoder. Contract: `pre` information bits to `post` coded bits.
pub trait Encoder: Module {
    fn encode_frame(&mut self, info: &[Bit], coded: &mut [Bit], frame: usize) -> Result<(), Error>;

    fn encode(&mut self, info: &[Bit], coded: &mut [Bit]) -> Result<(), Error> {
        let c = self.contract();
        c.check(self.name(), "input", c.pre(), info.len())?;
        c.check(self.name(), "output", c.post(), coded.len())?;
        for f in 0..c.batch_width() {
            self.encode_frame(frame(info, f, c.pre()), frame_mut(coded, f, c.post()), f)?;
        }
        Ok(())
    }
}

/// Modulator, filter and demodulator in one module.
///
/// Contract: `pre` coded bits, `post` modulated symbols, `post_secondary`
/// filtered symbols. Demodulation maps filtered symbols back to `pre` soft values.
pub trait Modem: Module {
    fn modulate_frame(&mut self, _bits: &[Bit], _symbols: &mut [Real], _frame: usize) -> Result<(), Error> {
        Err(unimplemented(self.name(), "modulate"))
    }

    fn filter_frame(&mut self, _received: &[Real], _filtered: &mut [Real], _frame: usize) -> Result<(), Error> {
        Err(unimplemented(self.name(), "filter"))
    }

    fn demodulate_frame(&mut self, _filtered: &[Real], _llrs: &mut [Real], _frame: usize) -> Result<(), Error> {
        Err(unimplemented(self.name(), "demodulate"))
    }

    fn demodulate_with_gains_frame(
        &mut self,
        _filtered: &[Real],
        _gains: &[Real],
        _llrs: &mut [Real],
        _frame: usize,
    ) -> Result<(), Error> {
        Err(unimplemented(self.name(), "demodulate_with_gains"))
    }

    fn demodulate_extrinsic_frame(
        &mut self,
        _filtered: &[Real],
        _extrinsic: &[Real],
        _llrs: &mut [Real],
        _frame: usize,
    ) -> Result<(), Error> {
        Err(unimplemented(self.name(), "demodulate_extrinsic"))
    }

    fn demodulate_with_gains_extrinsic_frame(
        &mut self,
        _filtered: &[Real],
        _gains: &[Real],
        _extrinsic: &[Real],
        _llrs: &mut [Real],
        _frame: usize,
    ) -> Result<(), Error> {
        Err(unimplemented(self.name(), "demodulate_with_gains_extrinsic"))
    }

    /// Whether filtering is semantically the identity. Independent of whether
    /// `post == post_secondary`: equal sizes alone never enable the copy path.
    fn filter_is_identity(&self) -> bool {
        false
    }

    fn modulate(&mut self, bits: &[Bit], symbols: &mut [Real]) -> Result<(), Error> {
        let c = self.contract();
        c.check(self.name(), "input", c.pre(), bits.len())?;
        c.check(self.name(), "output", c.post(), symbols.len())?;
        for f in 0..c.batch_width() {
            self.modulate_frame(frame(bits, f, c.pre()), frame_mut(symbols, f, c.post()), f)?;
        }
        Ok(())
    }

    fn filter(&mut self, received: &[Real], filtered: &mut [Real]) -> Result<(), Error> {
        let c = self.contract();
        c.check(self.name(), "input", c.post(), received.len())?;
        c.check(self.name(), "output", c.post_secondary(), filtered.len())?;
        if self.filter_is_identity() && c.post() == c.post_secondary() {
            filtered.copy_from_slice(received);
            return Ok(());
        }
        for f in 0..c.batch_width() {
            self.filter_frame(
                frame(received, f, c.post()),
                frame_mut(filtered, f, c.post_secondary()),
                f,
            )?;
        }
        Ok(())
    }

    fn demodulate(&mut self, filtered: &[Real], llrs: &mut [Real]) -> Result<(), Error> {
        let c = self.contract();
        c.check(self.name(), "input", c.post_secondary(), filtered.len())?;
        c.check(self.name(), "output", c.pre(), llrs.len())?;
        for f in 0..c.batch_width() {
            self.demodulate_frame(
                frame(filtered, f, c.post_secondary()),
                frame_mut(llrs, f, c.pre()),
                f,
            )?;
        }
        Ok(())
    }

    fn demodulate_with_gains(&mut self, filtered: &[Real], gains: &[Real], llrs: &mut [Real]) -> Result<(), Error> {
        let c = self.contract();
        c.check(self.name(), "input", c.post_secondary(), filtered.len())?;
        c.check(self.name(), "gains", c.post_secondary(), gains.len())?;
        c.check(self.name(), "output", c.pre(), llrs.len())?;
        for f in 0..c.batch_width() {
            self.demodulate_with_gains_frame(
                frame(filtered, f, c.post_secondary()),
                frame(gains, f, c.post_secondary()),
                frame_mut(llrs, f, c.pre()),
                f,
            )?;
        }
        Ok(())
    }

    /// Turbo demodulation with decoder feedback. Frames masked off in `active`
    /// are skipped; their region of `llrs` is left untouched.
    fn demodulate_extrinsic(
        &mut self,
        filtered: &[Real],
        extrinsic: &[Real],
        llrs: &mut [Real],
        active: Option<&[bool]>,
    ) -> Result<(), Error> {
        let c = self.contract();
        c.check(self.name(), "input", c.post_secondary(), filtered.len())?;
        c.check(self.name(), "extrinsic", c.pre(), extrinsic.len())?;
        c.check(self.name(), "output", c.pre(), llrs.len())?;
        c.check_mask(self.name(), active)?;
        for f in selected(c.batch_width(), active) {
            self.demodulate_extrinsic_frame(
                frame(filtered, f, c.post_secondary()),
                frame(extrinsic, f, c.pre()),
                frame_mut(llrs, f, c.pre()),
                f,
            )?;
        }
        Ok(())
    }

    fn demodulate_with_gains_extrinsic(
        &mut self,
        filtered: &[Real],
        gains: &[Real],
        extrinsic: &[Real],
        llrs: &mut [Real],
        active: Option<&[bool]>,
    ) -> Result<(), Error> {
        let c = self.contract();
        c.check(self.name(), "input", c.post_secondary(), filtered.len())?;
        c.check(self.name(), "gains", c.post_secondary(), gains.len())?;
        c.check(self.name(), "extrinsic", c.pre(), extrinsic.len())?;
        c.check(self.name(), "output", c.pre(), llrs.len())?;
        c.check_mask(self.name(), active)?;
        for f in selected(c.batch_width(), active) {
            self.demodulate_with_gains_extrinsic_frame(
                frame(filtered, f, c.post_secondary()),
                frame(gains, f, c.post_secondary()),
                frame(extrinsic, f, c.pre()),
                frame_mut(llrs, f, c.pre()),
                f,
            )?;
        }
        Ok(())
    }
}

/// Noise channel. Contract: `pre == post` symbols per frame.
pub trait Channel: Module {
    fn add_noise_frame(&mut self, sent: &[Real], received: &mut [Real], frame: usize) -> Result<(), Error>;

    fn add_noise_with_gains_frame(
        &mut self,
        _sent: &[Real],
        _received: &mut [Real],
        _gains: &mut [Real],
        _frame: usize,
    ) -> Result<(), Error> {
        Err(unimplemented(self.name(), "add_noise_with_gains"))
    }

    /// Whether [`Channel::add_noise_with_gains`] is supported.
    fn provides_gains(&self) -> bool {
        false
    }

    fn add_noise(&mut self, sent: &[Real], received: &mut [Real]) -> Result<(), Error> {
        let c = self.contract();
        c.check(self.name(), "input", c.pre(), sent.len())?;
        c.check(self.name(), "output", c.post(), received.len())?;
        for f in 0..c.batch_width() {
            self.add_noise_frame(frame(sent, f, c.pre()), frame_mut(received, f, c.post()), f)?;
        }
        Ok(())
    }

    fn add_noise_with_gains(&mut self, sent: &[Real], received: &mut [Real], gains: &mut [Real]) -> Result<(), Error> {
        let c = self.contract();
        c.check(self.name(), "input", c.pre(), sent.len())?;
        c.check(self.name(), "output", c.post(), received.len())?;
        c.check(self.name(), "gains", c.post(), gains.len())?;
        for f in 0..c.batch_width() {
            self.add_noise_with_gains_frame(
                frame(sent, f, c.pre()),
                frame_mut(received, f, c.post()),
                frame_mut(gains, f, c.post()),
                f,
            )?;
        }
        Ok(())
    }
}

/// Soft-input decoder.
///
/// Contract: `pre` soft values in, `post` hard information bits out of
/// [`Decoder::decode_siho`], `post_secondary` extrinsic values out of
/// [`Decoder::decode_siso`].
pub trait Decoder: Module {
    fn decode_siso_frame(&mut self, _llrs: &[Real], _extrinsic: &mut [Real], _frame: usize) -> Result<(), Error> {
        Err(unimplemented(self.name(), "decode_siso"))
    }

    fn decode_siho_frame(&mut self, _llrs: &[Real], _decoded: &mut [Bit], _frame: usize) -> Result<(), Error> {
        Err(unimplemented(self.name(), "decode_siho"))
    }

    fn decode_siso(&mut self, llrs: &[Real], extrinsic: &mut [Real], active: Option<&[bool]>) -> Result<(), Error> {
        let c = self.contract();
        c.check(self.name(), "input", c.pre(), llrs.len())?;
        c.check(self.name(), "extrinsic", c.post_secondary(), extrinsic.len())?;
        c.check_mask(self.name(), active)?;
        for f in selected(c.batch_width(), active) {
            self.decode_siso_frame(
                frame(llrs, f, c.pre()),
                frame_mut(extrinsic, f, c.post_secondary()),
                f,
            )?;
        }
        Ok(())
    }

    fn decode_siho(&mut self, llrs: &[Real], decoded: &mut [Bit], active: Option<&[bool]>) -> Result<(), Error> {
        let c = self.contract();
        c.check(self.name(), "input", c.pre(), llrs.len())?;
        c.check(self.name(), "output", c.post(), decoded.len())?;
        c.check_mask(self.name(), active)?;
        for f in selected(c.batch_width(), active) {
            self.decode_siho_frame(frame(llrs, f, c.pre()), frame_mut(decoded, f, c.post()), f)?;
        }
        Ok(())
    }
}
