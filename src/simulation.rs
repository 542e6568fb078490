//! Monte Carlo driver.
//!
//! Every worker owns one backend, built on the calling thread before any worker
//! starts, so construction errors abort the run before statistics exist. Workers
//! then pull trial indices from the shared [`Statistics`] until the stopping rule
//! fires. Trial `i` is seeded from `(seed, i)` alone.

use crate::config::SimulationConfig;
use crate::error::Error;
use crate::monitor::TrialOutcome;
use crate::report::{NullReporter, Reporter};
use crate::stats::{Snapshot, Statistics};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, info, warn};

/// An executable chain the driver can run trials on.
pub trait Backend: Send {
    /// Frames per trial.
    fn batch_width(&self) -> usize;

    /// Information bits per frame.
    fn info_bits(&self) -> usize;

    fn reseed(&mut self, seed: u64);

    fn set_noise(&mut self, sigma: f32);

    fn run_trial(&mut self) -> Result<TrialOutcome, Error>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn batch_width(&self) -> usize {
        (**self).batch_width()
    }

    fn info_bits(&self) -> usize {
        (**self).info_bits()
    }

    fn reseed(&mut self, seed: u64) {
        (**self).reseed(seed)
    }

    fn set_noise(&mut self, sigma: f32) {
        (**self).set_noise(sigma)
    }

    fn run_trial(&mut self) -> Result<TrialOutcome, Error> {
        (**self).run_trial()
    }
}

/// Mix a base seed and a stream index into an independent seed (splitmix64).
pub fn derive_seed(base: u64, stream: u64) -> u64 {
    let mut z = base ^ stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

type Factory = Box<dyn Fn(&SimulationConfig) -> Result<Box<dyn Backend>, Error>>;

/// Replicated Monte Carlo run over one or more noise points.
pub struct Simulation {
    config: SimulationConfig,
    factory: Factory,
    reporter: Box<dyn Reporter>,
}

impl Simulation {
    /// `factory` builds one backend per worker.
    pub fn new<F, B>(config: SimulationConfig, factory: F) -> Self
    where
        F: Fn(&SimulationConfig) -> Result<B, Error> + 'static,
        B: Backend + 'static,
    {
        Self {
            config,
            factory: Box::new(move |c| factory(c).map(|b| Box::new(b) as Box<dyn Backend>)),
            reporter: Box::new(NullReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Simulate one noise point.
    pub fn run(&self, noise: f32) -> Result<Snapshot, Error> {
        let mut points = self.sweep(&[noise])?;
        points
            .pop()
            .ok_or_else(|| Error::Config("no noise point simulated".into()))
    }

    /// Simulate every noise point in order, with fresh statistics for each.
    pub fn sweep(&self, noises: &[f32]) -> Result<Vec<Snapshot>, Error> {
        self.config.validate()?;
        let mut backends = self.build_backends()?;
        let width = self.config.batch_width;
        let info_bits = backends.first().map_or(0, |b| b.info_bits());
        let stats = Statistics::new(
            self.config.stopping,
            width,
            info_bits,
            self.config.cadence,
        );
        info!(
            workers = backends.len(),
            batch_width = width,
            frame_cap = self.config.stopping.frame_cap,
            target_frame_errors = self.config.stopping.target_frame_errors,
            points = noises.len(),
            "simulation starting"
        );

        let mut points = Vec::with_capacity(noises.len());
        for &noise in noises {
            stats.reset();
            for backend in backends.iter_mut() {
                backend.set_noise(noise);
            }
            self.run_point(&mut backends, &stats)?;
            let snapshot = stats.snapshot();
            self.reporter.on_complete(noise, &snapshot);
            points.push(snapshot);
        }
        info!(points = points.len(), "simulation complete");
        Ok(points)
    }

    fn build_backends(&self) -> Result<Vec<Box<dyn Backend>>, Error> {
        let mut backends = Vec::with_capacity(self.config.workers);
        for worker in 0..self.config.workers {
            let backend = (self.factory)(&self.config)?;
            if backend.batch_width() != self.config.batch_width {
                return Err(Error::Config(format!(
                    "worker {worker} built a backend of batch width {}, configured {}",
                    backend.batch_width(),
                    self.config.batch_width
                )));
            }
            debug!(worker, batch_width = backend.batch_width(), "backend built");
            backends.push(backend);
        }
        Ok(backends)
    }

    fn run_point(&self, backends: &mut [Box<dyn Backend>], stats: &Statistics) -> Result<(), Error> {
        let seed = self.config.seed;
        let reporter: &dyn Reporter = self.reporter.as_ref();
        let reporting = Mutex::new(());
        let reporting = &reporting;
        let results: Vec<Result<(), Error>> = std::thread::scope(|scope| {
            let handles: Vec<_> = backends
                .iter_mut()
                .enumerate()
                .map(|(worker, backend)| {
                    scope.spawn(move || run_worker(worker, backend.as_mut(), stats, reporter, reporting, seed))
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| handle.join().unwrap_or(Err(Error::WorkerPanic { worker })))
                .collect()
        });
        results.into_iter().collect()
    }
}

fn run_worker(
    worker: usize,
    backend: &mut dyn Backend,
    stats: &Statistics,
    reporter: &dyn Reporter,
    reporting: &Mutex<()>,
    seed: u64,
) -> Result<(), Error> {
    let mut trials = 0u64;
    while let Some(trial) = stats.claim() {
        backend.reseed(derive_seed(seed, trial));
        let outcome = match catch_unwind(AssertUnwindSafe(|| backend.run_trial())) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                warn!(worker, trial, %err, "trial failed, aborting run");
                stats.abort();
                return Err(err);
            }
            Err(_) => {
                warn!(worker, trial, "trial panicked, aborting run");
                stats.abort();
                return Err(Error::WorkerPanic { worker });
            }
        };
        // Folding and reporting share one lock so reports keep the fold order.
        {
            let _order = reporting.lock();
            let merged = stats.merge(trial, outcome);
            for (index, counted) in &merged.counted {
                reporter.on_trial(*index, counted);
            }
            if let Some(snapshot) = merged.progress {
                reporter.on_progress(&snapshot);
            }
        }
        trials += 1;
    }
    debug!(worker, trials, "worker finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_seeds_differ_per_stream() {
        assert_ne!(derive_seed(7, 0), derive_seed(7, 1));
        assert_ne!(derive_seed(7, 0), derive_seed(8, 0));
        assert_eq!(derive_seed(7, 3), derive_seed(7, 3));
    }
}
