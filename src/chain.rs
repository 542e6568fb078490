//! Chain orchestrator: the threaded backend.
//!
//! A [`Chain`] owns one module per role and every buffer a trial needs. The
//! open-loop stages run once per trial, then the [`IterationDriver`] cycles
//! demodulation and decoding until every frame of the batch is final.

use crate::config::IterationConfig;
use crate::error::Error;
use crate::frame::{Bit, Real};
use crate::invariant_ppt::{assert_invariant, CHAIN_GEOMETRY};
use crate::iteration::{Genie, IterationDriver, IterationState, Predicate};
use crate::module::{unimplemented, Channel, Decoder, Encoder, Modem, Module, PortContract, Source};
use crate::monitor::{Monitor, TrialOutcome};
use crate::simulation::{derive_seed, Backend};
use tracing::debug;

/// One processing module per role.
pub struct Stages {
    pub source: Box<dyn Source>,
    pub encoder: Box<dyn Encoder>,
    pub modem: Box<dyn Modem>,
    pub channel: Box<dyn Channel>,
    pub decoder: Box<dyn Decoder>,
    pub monitor: Monitor,
}

struct Endpoint<'a> {
    name: &'a str,
    contract: PortContract,
}

fn link(producer: &Endpoint<'_>, consumer: &Endpoint<'_>, what: &'static str, produced: usize, expected: usize) -> Result<(), Error> {
    if produced != expected {
        return Err(Error::ContractViolation {
            producer: producer.name.to_string(),
            consumer: consumer.name.to_string(),
            what,
            expected,
            actual: produced,
        });
    }
    Ok(())
}

impl Stages {
    /// Bundle the five pluggable modules; the monitor is sized from the source.
    pub fn new<S, E, M, C, D>(source: S, encoder: E, modem: M, channel: C, decoder: D) -> Self
    where
        S: Source + 'static,
        E: Encoder + 'static,
        M: Modem + 'static,
        C: Channel + 'static,
        D: Decoder + 'static,
    {
        let c = source.contract();
        Self {
            source: Box::new(source),
            encoder: Box::new(encoder),
            modem: Box::new(modem),
            channel: Box::new(channel),
            decoder: Box::new(decoder),
            monitor: Monitor::new(c.post(), c.batch_width()),
        }
    }

    pub fn batch_width(&self) -> usize {
        self.source.contract().batch_width()
    }

    /// Information bits per frame.
    pub fn info_bits(&self) -> usize {
        self.source.contract().post()
    }

    /// Check every adjacent pairing, in pipeline order.
    ///
    /// With `gains`, the channel must also emit per-sample gains and those gains
    /// must line up with the filtered symbols the demodulator reads.
    pub fn validate(&self, gains: bool) -> Result<(), Error> {
        let src = Endpoint { name: self.source.name(), contract: self.source.contract() };
        let enc = Endpoint { name: self.encoder.name(), contract: self.encoder.contract() };
        let modem = Endpoint { name: self.modem.name(), contract: self.modem.contract() };
        let chn = Endpoint { name: self.channel.name(), contract: self.channel.contract() };
        let dec = Endpoint { name: self.decoder.name(), contract: self.decoder.contract() };
        let mon = Endpoint { name: self.monitor.name(), contract: self.monitor.contract() };

        for end in [&src, &enc, &modem, &chn, &dec, &mon] {
            end.contract.validate(end.name)?;
        }
        let width = src.contract.batch_width();
        for end in [&enc, &modem, &chn, &dec, &mon] {
            link(&src, end, "batch width", end.contract.batch_width(), width)?;
        }

        link(&src, &enc, "frame size", src.contract.post(), enc.contract.pre())?;
        link(&enc, &modem, "frame size", enc.contract.post(), modem.contract.pre())?;
        link(&modem, &chn, "frame size", modem.contract.post(), chn.contract.pre())?;
        link(&chn, &chn, "noisy frame size", chn.contract.post(), chn.contract.pre())?;
        link(&chn, &modem, "filter input size", chn.contract.post(), modem.contract.post())?;
        link(&modem, &dec, "soft frame size", modem.contract.pre(), dec.contract.pre())?;
        link(&dec, &modem, "extrinsic size", dec.contract.post_secondary(), modem.contract.pre())?;
        link(&dec, &mon, "decoded size", dec.contract.post(), mon.contract.pre())?;
        link(&src, &mon, "reference size", src.contract.post(), mon.contract.pre())?;

        if self.modem.filter_is_identity() {
            link(&modem, &modem, "identity filter size", modem.contract.post_secondary(), modem.contract.post())?;
        }
        if gains {
            if !self.channel.provides_gains() {
                return Err(unimplemented(chn.name, "add_noise_with_gains"));
            }
            link(&chn, &modem, "gain size", chn.contract.post(), modem.contract.post_secondary())?;
        }

        assert_invariant(
            CHAIN_GEOMETRY,
            src.contract.post() == mon.contract.pre() && dec.contract.pre() == modem.contract.pre(),
            "validated chain has matching geometry end to end",
            Some("Stages::validate"),
        );
        Ok(())
    }

    /// Give every random module its own stream derived from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.source.reseed(derive_seed(seed, 0));
        self.encoder.reseed(derive_seed(seed, 1));
        self.modem.reseed(derive_seed(seed, 2));
        self.channel.reseed(derive_seed(seed, 3));
        self.decoder.reseed(derive_seed(seed, 4));
    }

    pub fn set_noise(&mut self, sigma: f32) {
        self.source.set_noise(sigma);
        self.encoder.set_noise(sigma);
        self.modem.set_noise(sigma);
        self.channel.set_noise(sigma);
        self.decoder.set_noise(sigma);
        self.monitor.set_noise(sigma);
    }

    /// Clear per-trial scratch state of every module.
    pub fn reset(&mut self) {
        self.source.reset();
        self.encoder.reset();
        self.modem.reset();
        self.channel.reset();
        self.decoder.reset();
        self.monitor.reset();
    }
}

/// Builder for [`Chain`]. Every role except the monitor must be supplied.
pub struct ChainBuilder {
    source: Option<Box<dyn Source>>,
    encoder: Option<Box<dyn Encoder>>,
    modem: Option<Box<dyn Modem>>,
    channel: Option<Box<dyn Channel>>,
    decoder: Option<Box<dyn Decoder>>,
    monitor: Option<Monitor>,
    predicate: Option<Box<dyn Predicate>>,
    iteration: IterationConfig,
    gains: bool,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            encoder: None,
            modem: None,
            channel: None,
            decoder: None,
            monitor: None,
            predicate: None,
            iteration: IterationConfig::default(),
            gains: false,
        }
    }

    pub fn source(mut self, source: impl Source + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn encoder(mut self, encoder: impl Encoder + 'static) -> Self {
        self.encoder = Some(Box::new(encoder));
        self
    }

    pub fn modem(mut self, modem: impl Modem + 'static) -> Self {
        self.modem = Some(Box::new(modem));
        self
    }

    pub fn channel(mut self, channel: impl Channel + 'static) -> Self {
        self.channel = Some(Box::new(channel));
        self
    }

    pub fn decoder(mut self, decoder: impl Decoder + 'static) -> Self {
        self.decoder = Some(Box::new(decoder));
        self
    }

    /// Override the monitor sized from the source.
    pub fn monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Stopping predicate; [`Genie`] when unset.
    pub fn predicate(mut self, predicate: impl Predicate + 'static) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn iteration(mut self, iteration: IterationConfig) -> Self {
        self.iteration = iteration;
        self
    }

    /// Run the channel and demodulator in their with-gains variants.
    pub fn gains(mut self, gains: bool) -> Self {
        self.gains = gains;
        self
    }

    /// Assemble the stages without building a chain, for the dataflow backend.
    pub fn into_stages(self) -> Result<(Stages, Box<dyn Predicate>, IterationConfig, bool), Error> {
        fn missing(role: &str) -> Error {
            Error::Config(format!("chain has no {role}"))
        }
        let source = self.source.ok_or_else(|| missing("source"))?;
        let c = source.contract();
        let stages = Stages {
            source,
            encoder: self.encoder.ok_or_else(|| missing("encoder"))?,
            modem: self.modem.ok_or_else(|| missing("modem"))?,
            channel: self.channel.ok_or_else(|| missing("channel"))?,
            decoder: self.decoder.ok_or_else(|| missing("decoder"))?,
            monitor: self.monitor.unwrap_or_else(|| Monitor::new(c.post(), c.batch_width())),
        };
        let predicate = self.predicate.unwrap_or_else(|| Box::new(Genie) as Box<dyn Predicate>);
        Ok((stages, predicate, self.iteration, self.gains))
    }

    pub fn build(self) -> Result<Chain, Error> {
        let (stages, predicate, iteration, gains) = self.into_stages()?;
        Chain::new(stages, predicate, iteration, gains)
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A validated chain with its trial buffers.
pub struct Chain {
    stages: Stages,
    driver: IterationDriver,
    gains: bool,
    info: Vec<Bit>,
    coded: Vec<Bit>,
    symbols: Vec<Real>,
    received: Vec<Real>,
    channel_gains: Vec<Real>,
    filtered: Vec<Real>,
    llrs: Vec<Real>,
    extrinsic: Vec<Real>,
    decoded: Vec<Bit>,
}

impl Chain {
    /// Validate the stages and allocate every buffer once.
    pub fn new(
        stages: Stages,
        predicate: Box<dyn Predicate>,
        iteration: IterationConfig,
        gains: bool,
    ) -> Result<Self, Error> {
        stages.validate(gains)?;
        if iteration.max_passes == 0 {
            return Err(Error::Config("max_passes must be at least 1".into()));
        }
        let width = stages.batch_width();
        let src = stages.source.contract();
        let modem = stages.modem.contract();
        debug!(
            info = src.post(),
            coded = modem.pre(),
            symbols = modem.post(),
            filtered = modem.post_secondary(),
            batch_width = width,
            gains,
            "chain built"
        );
        Ok(Self {
            driver: IterationDriver::new(width, iteration.max_passes, iteration.convergence_depth, predicate),
            gains,
            info: vec![0; src.post() * width],
            coded: vec![0; modem.pre() * width],
            symbols: vec![0.0; modem.post() * width],
            received: vec![0.0; modem.post() * width],
            channel_gains: vec![0.0; modem.post() * width],
            filtered: vec![0.0; modem.post_secondary() * width],
            llrs: vec![0.0; modem.pre() * width],
            extrinsic: vec![0.0; modem.pre() * width],
            decoded: vec![0; src.post() * width],
            stages,
        })
    }

    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    pub fn stages(&self) -> &Stages {
        &self.stages
    }

    pub fn stages_mut(&mut self) -> &mut Stages {
        &mut self.stages
    }

    pub fn reseed(&mut self, seed: u64) {
        self.stages.reseed(seed);
    }

    pub fn set_noise(&mut self, sigma: f32) {
        self.stages.set_noise(sigma);
    }

    /// Loop bookkeeping of the last trial.
    pub fn iteration(&self) -> &IterationState {
        self.driver.state()
    }

    /// Reference bits of the last trial.
    pub fn reference(&self) -> &[Bit] {
        &self.info
    }

    /// Final hard decisions of the last trial.
    pub fn decoded(&self) -> &[Bit] {
        &self.decoded
    }

    /// Run one trial: open-loop stages once, then the feedback loop, then the monitor.
    pub fn run_trial(&mut self) -> Result<TrialOutcome, Error> {
        let Chain {
            stages,
            driver,
            gains,
            info,
            coded,
            symbols,
            received,
            channel_gains,
            filtered,
            llrs,
            extrinsic,
            decoded,
        } = self;
        let gains = *gains;
        stages.reset();
        let Stages {
            source,
            encoder,
            modem,
            channel,
            decoder,
            monitor,
        } = stages;

        source.generate(info)?;
        encoder.encode(info, coded)?;
        modem.modulate(coded, symbols)?;
        if gains {
            channel.add_noise_with_gains(symbols, received, channel_gains)?;
        } else {
            channel.add_noise(symbols, received)?;
        }
        modem.filter(received, filtered)?;

        // First pass sees no prior information.
        extrinsic.fill(0.0);
        llrs.fill(0.0);
        decoded.fill(0);
        driver.drive(info, decoded, |active, decided| {
            if gains {
                modem.demodulate_with_gains_extrinsic(filtered, channel_gains, extrinsic, llrs, Some(active))?;
            } else {
                modem.demodulate_extrinsic(filtered, extrinsic, llrs, Some(active))?;
            }
            decoder.decode_siso(llrs, extrinsic, Some(active))?;
            decoder.decode_siho(llrs, decided, Some(active))
        })?;

        monitor.check(info, decoded, driver.state())
    }
}

impl Backend for Chain {
    fn batch_width(&self) -> usize {
        self.stages.batch_width()
    }

    fn info_bits(&self) -> usize {
        self.stages.info_bits()
    }

    fn reseed(&mut self, seed: u64) {
        Chain::reseed(self, seed);
    }

    fn set_noise(&mut self, sigma: f32) {
        Chain::set_noise(self, sigma);
    }

    fn run_trial(&mut self) -> Result<TrialOutcome, Error> {
        Chain::run_trial(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iteration::FrameState;
    use crate::stages::{AwgnChannel, BpskModem, RandomSource, RepetitionDecoder, RepetitionEncoder};

    fn builder(k: usize, reps: usize, width: usize) -> ChainBuilder {
        Chain::builder()
            .source(RandomSource::new(k, width, 1))
            .encoder(RepetitionEncoder::new(k, reps, width))
            .modem(BpskModem::new(k * reps, width))
            .channel(AwgnChannel::new(k * reps, width, 2))
            .decoder(RepetitionDecoder::new(k, reps, width))
    }

    #[test]
    fn missing_role_is_config_error() {
        let err = Chain::builder()
            .source(RandomSource::new(4, 1, 0))
            .build()
            .err()
            .unwrap();
        assert_eq!(err, Error::Config("chain has no encoder".into()));
    }

    #[test]
    fn quiet_channel_decodes_on_first_pass() {
        let mut chain = builder(8, 3, 4).build().unwrap();
        chain.set_noise(1e-3);
        let out = chain.run_trial().unwrap();
        assert_eq!(out.frame_errors(), 0);
        assert!(out.frames.iter().all(|f| f.state == FrameState::Converged && f.passes == 1));
        assert_eq!(chain.decoded(), chain.reference());
    }

    #[test]
    fn batch_width_mismatch_rejected() {
        let err = builder(8, 3, 4)
            .decoder(RepetitionDecoder::new(8, 3, 2))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::ContractViolation { what: "batch width", .. }));
    }
}
