//! Orchestration kernel for iterative forward-error-correction simulation.
//!
//! A chain of pluggable modules (source, encoder, modem, channel, decoder)
//! is run trial after trial by a Monte Carlo driver that accumulates bit and
//! frame error rates. The demodulator and decoder exchange soft information in
//! a feedback loop, gated per frame by a stopping predicate.
//!
//! Two backends execute the same [`Stages`]: the imperative [`Chain`] and the
//! discrete-event dataflow [`Engine`], wired from a [`graph::Graph`] with
//! one designated feedback edge.

pub mod chain;
pub mod config;
pub mod dsl;
pub mod engine;
pub mod error;
pub mod frame;
pub mod graph;
#[doc(hidden)]
pub mod harness;
#[doc(hidden)]
pub mod invariant_ppt;
pub mod iteration;
pub mod module;
pub mod monitor;
pub mod plan;
pub mod report;
pub mod simulation;
pub mod stages;
pub mod states;
pub mod stats;

pub use chain::{Chain, ChainBuilder, Stages};
pub use config::{Cadence, IterationConfig, SimulationConfig, StoppingRule};
pub use engine::Engine;
pub use error::{Error, GraphError, PlanError};
pub use frame::{Bit, ElementKind, FrameBuffer, Real};
pub use iteration::{FrameState, Genie, IterationState, Never, Predicate};
pub use module::{Channel, Decoder, Encoder, Modem, Module, PortContract, Role, Source};
pub use monitor::{FrameOutcome, Monitor, TrialOutcome};
pub use report::{NullReporter, Reporter, TracingReporter};
pub use simulation::{derive_seed, Backend, Simulation};
pub use stats::Snapshot;
