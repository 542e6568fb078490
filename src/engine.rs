//! Discrete-event dataflow engine: the cycle-level backend.
//!
//! Tokens travel along plan edges. Each edge holds at most one token; a node fires
//! once its firing rule is met, and its outputs are delivered `latency` cycles
//! later. Events are processed in time order, ties in scheduling order, so a
//! trial is fully deterministic.

use crate::chain::{ChainBuilder, Stages};
use crate::config::IterationConfig;
use crate::error::{Error, GraphError};
use crate::frame::{frame, Bit, FrameBuffer, Real};
use crate::graph::{Graph, NodeId, NodeKind, Transform};
use crate::invariant_ppt::{assert_invariant, ITERATION_TERMINATES};
use crate::iteration::{IterationState, Predicate};
use crate::monitor::TrialOutcome;
use crate::plan::Plan;
use crate::simulation::Backend;
use crate::states::NodeState;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tracing::debug;

#[derive(Debug)]
enum Event {
    Fire(NodeId),
    Deliver { edge: usize, token: FrameBuffer },
}

#[derive(Debug)]
struct Scheduled {
    time: u64,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.seq) == (other.time, other.seq)
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

fn bits(buf: &FrameBuffer) -> Result<&[Bit], Error> {
    buf.as_bits().ok_or(Error::Graph(GraphError::KindMismatch))
}

fn bits_mut(buf: &mut FrameBuffer) -> Result<&mut [Bit], Error> {
    buf.as_bits_mut().ok_or(Error::Graph(GraphError::KindMismatch))
}

fn reals(buf: &FrameBuffer) -> Result<&[Real], Error> {
    buf.as_reals().ok_or(Error::Graph(GraphError::KindMismatch))
}

fn reals_mut(buf: &mut FrameBuffer) -> Result<&mut [Real], Error> {
    buf.as_reals_mut().ok_or(Error::Graph(GraphError::KindMismatch))
}

/// Run one module transform on the node's input tokens and persistent outputs.
fn execute(
    transform: Transform,
    stages: &mut Stages,
    iteration: &IterationState,
    inputs: &[&FrameBuffer],
    outputs: &mut [FrameBuffer],
) -> Result<Option<TrialOutcome>, Error> {
    let mask = transform.in_loop().then(|| iteration.active());
    match transform {
        Transform::Generate => stages.source.generate(bits_mut(&mut outputs[0])?)?,
        Transform::Encode => stages.encoder.encode(bits(inputs[0])?, bits_mut(&mut outputs[0])?)?,
        Transform::Modulate => stages.modem.modulate(bits(inputs[0])?, reals_mut(&mut outputs[0])?)?,
        Transform::AddNoise => stages.channel.add_noise(reals(inputs[0])?, reals_mut(&mut outputs[0])?)?,
        Transform::AddNoiseWithGains => {
            let [received, gains] = outputs else {
                return Err(GraphError::InvalidPort.into());
            };
            stages
                .channel
                .add_noise_with_gains(reals(inputs[0])?, reals_mut(received)?, reals_mut(gains)?)?
        }
        Transform::Filter => stages.modem.filter(reals(inputs[0])?, reals_mut(&mut outputs[0])?)?,
        Transform::DemodulateExtrinsic => stages.modem.demodulate_extrinsic(
            reals(inputs[0])?,
            reals(inputs[1])?,
            reals_mut(&mut outputs[0])?,
            mask,
        )?,
        Transform::DemodulateWithGainsExtrinsic => stages.modem.demodulate_with_gains_extrinsic(
            reals(inputs[0])?,
            reals(inputs[1])?,
            reals(inputs[2])?,
            reals_mut(&mut outputs[0])?,
            mask,
        )?,
        Transform::DecodeSiso => stages
            .decoder
            .decode_siso(reals(inputs[0])?, reals_mut(&mut outputs[0])?, mask)?,
        Transform::DecodeSiho => stages
            .decoder
            .decode_siho(reals(inputs[0])?, bits_mut(&mut outputs[0])?, mask)?,
        Transform::Check => {
            return stages
                .monitor
                .check(bits(inputs[0])?, bits(inputs[1])?, iteration)
                .map(Some)
        }
    }
    Ok(None)
}

/// Executes a compiled dataflow graph over a set of stages.
pub struct Engine {
    graph: Graph,
    plan: Plan,
    stages: Stages,
    predicate: Box<dyn Predicate>,
    iteration: IterationState,
    states: Vec<NodeState>,
    slots: Vec<Option<FrameBuffer>>,
    fired: Vec<bool>,
    reference: Vec<Bit>,
    events: BinaryHeap<Reverse<Scheduled>>,
    seq: u64,
    cycles: u64,
    outcome: Option<TrialOutcome>,
}

impl Engine {
    /// Validate the stages, check every task's ports against them and compile the plan.
    pub fn new(
        graph: Graph,
        stages: Stages,
        predicate: Box<dyn Predicate>,
        iteration: IterationConfig,
    ) -> Result<Self, Error> {
        let tasks: Vec<(&str, Transform)> = graph
            .nodes
            .iter()
            .flatten()
            .filter_map(|n| match n.kind {
                NodeKind::Task(t) => Some((n.name.as_str(), t)),
                _ => None,
            })
            .collect();
        let gains = tasks.iter().any(|&(_, t)| t == Transform::AddNoiseWithGains);
        stages.validate(gains)?;
        if iteration.max_passes == 0 {
            return Err(Error::Config("max_passes must be at least 1".into()));
        }

        for required in [Transform::Generate, Transform::Check] {
            if tasks.iter().filter(|&&(_, t)| t == required).count() != 1 {
                return Err(Error::Config(format!(
                    "graph needs exactly one `{}` task",
                    required.name()
                )));
            }
        }
        for node in graph.nodes.iter().flatten() {
            let NodeKind::Task(t) = node.kind else {
                continue;
            };
            let (inputs, outputs) = t.ports(&stages);
            for (declared, expected) in node.inputs.iter().zip(&inputs).chain(node.outputs.iter().zip(&outputs)) {
                if declared.size != expected.size || declared.kind != expected.kind {
                    return Err(Error::ContractViolation {
                        producer: node.name.clone(),
                        consumer: node.name.clone(),
                        what: "task port size",
                        expected: expected.size,
                        actual: declared.size,
                    });
                }
            }
        }

        let width = stages.batch_width();
        let plan = Plan::compile(&graph, width)?;
        let states = graph
            .nodes
            .iter()
            .map(|n| n.as_ref().map_or(NodeState::Stateless, |n| NodeState::for_node(n, width)))
            .collect();
        debug!(
            nodes = graph.node_count(),
            edges = plan.edges.len(),
            feedback = plan.feedback.is_some(),
            batch_width = width,
            "dataflow engine built"
        );
        Ok(Self {
            slots: vec![None; plan.edges.len()],
            fired: vec![false; graph.nodes.len()],
            reference: vec![0; stages.info_bits() * width],
            iteration: IterationState::new(width, iteration.max_passes, iteration.convergence_depth),
            events: BinaryHeap::new(),
            seq: 0,
            cycles: 0,
            outcome: None,
            graph,
            plan,
            stages,
            predicate,
            states,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn stages(&self) -> &Stages {
        &self.stages
    }

    /// Loop bookkeeping of the last trial.
    pub fn iteration(&self) -> &IterationState {
        &self.iteration
    }

    /// Reference bits of the last trial.
    pub fn reference(&self) -> &[Bit] {
        &self.reference
    }

    /// Cycles elapsed in the last trial.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn reseed(&mut self, seed: u64) {
        self.stages.reseed(seed);
    }

    pub fn set_noise(&mut self, sigma: f32) {
        self.stages.set_noise(sigma);
    }

    fn schedule(&mut self, time: u64, event: Event) {
        self.seq += 1;
        self.events.push(Reverse(Scheduled {
            time,
            seq: self.seq,
            event,
        }));
    }

    fn name(&self, id: NodeId) -> String {
        self.graph.node(id).map_or_else(String::new, |n| n.name.clone())
    }

    /// Run one trial to completion.
    pub fn run_trial(&mut self) -> Result<TrialOutcome, Error> {
        self.stages.reset();
        self.iteration.reset();
        for state in self.states.iter_mut() {
            state.reset();
        }
        self.slots.fill(None);
        self.fired.fill(false);
        self.events.clear();
        self.seq = 0;
        self.cycles = 0;
        self.outcome = None;

        let sources: Vec<NodeId> = self
            .plan
            .order
            .iter()
            .copied()
            .filter(|id| self.plan.node_inputs[id.0].is_empty())
            .collect();
        for id in sources {
            self.schedule(0, Event::Fire(id));
        }

        while let Some(Reverse(Scheduled { time, event, .. })) = self.events.pop() {
            self.cycles = time;
            match event {
                Event::Deliver { edge, token } => self.deliver(time, edge, token)?,
                Event::Fire(id) => self.fire(time, id)?,
            }
        }

        match self.outcome.take() {
            Some(outcome) => Ok(outcome),
            None => Err(Error::Stalled {
                pending: self.pending(),
            }),
        }
    }

    fn deliver(&mut self, time: u64, edge: usize, token: FrameBuffer) -> Result<(), Error> {
        let (from, to) = {
            let e = &self.plan.edges[edge];
            (e.from_node, e.to_node)
        };
        if self.slots[edge].is_some() {
            return Err(Error::Overrun {
                producer: self.name(from),
                consumer: self.name(to),
            });
        }
        self.slots[edge] = Some(token);
        self.schedule(time, Event::Fire(to));
        Ok(())
    }

    fn filled(&self, id: NodeId, port: usize) -> bool {
        self.plan.node_inputs[id.0]
            .get(port)
            .copied()
            .flatten()
            .is_some_and(|e| self.slots[e].is_some())
    }

    fn ready(&self, id: NodeId, kind: &NodeKind) -> bool {
        let ports = self.plan.node_inputs[id.0].len();
        match kind {
            NodeKind::Funnel => (0..ports).any(|p| self.filled(id, p)),
            NodeKind::Router(selector) => {
                let fired = match self.states[id.0] {
                    NodeState::Router { fired } => fired,
                    _ => 0,
                };
                self.filled(id, selector.select(fired))
            }
            _ => {
                // Retained inputs stay filled; a node fed only by retained
                // inputs fires once per trial.
                let fresh = !self.fired[id.0]
                    || self
                        .graph
                        .node(id)
                        .is_some_and(|n| n.inputs.iter().any(|p| !p.retained));
                fresh && (0..ports).all(|p| self.filled(id, p))
            }
        }
    }

    fn take(&mut self, id: NodeId, port: usize) -> Result<FrameBuffer, Error> {
        match self.plan.node_inputs[id.0].get(port).copied().flatten() {
            Some(edge) => self.slots[edge].take(),
            None => None,
        }
        .ok_or_else(|| Error::Stalled {
            pending: vec![self.name(id)],
        })
    }

    fn fire(&mut self, time: u64, id: NodeId) -> Result<(), Error> {
        let Some(node) = self.graph.node(id) else {
            return Ok(());
        };
        let kind = node.kind.clone();
        let latency = node.latency;
        if !self.ready(id, &kind) {
            return Ok(());
        }

        let width = self.plan.batch_width;
        let outputs: Vec<(usize, FrameBuffer)> = match kind {
            NodeKind::Task(transform) => self.fire_task(id, transform)?,
            NodeKind::Duplicator => {
                let token = self.take(id, 0)?;
                let n = self.plan.node_outputs[id.0].len();
                (0..n).map(|p| (p, token.clone())).collect()
            }
            NodeKind::Funnel => {
                let ports = self.plan.node_inputs[id.0].len();
                let port = (0..ports).find(|&p| self.filled(id, p)).unwrap_or(0);
                vec![(0, self.take(id, port)?)]
            }
            NodeKind::Router(selector) => {
                let NodeState::Router { fired } = &mut self.states[id.0] else {
                    return Err(GraphError::InvalidNode.into());
                };
                let port = selector.select(*fired);
                *fired += 1;
                vec![(0, self.take(id, port)?)]
            }
            NodeKind::Predicate => self.fire_predicate(id)?,
            NodeKind::Constant => {
                self.take(id, 0)?;
                let out = self
                    .graph
                    .node(id)
                    .and_then(|n| n.outputs.first())
                    .map(|p| FrameBuffer::zeroed(p.kind, p.size * width))
                    .ok_or(GraphError::InvalidPort)?;
                vec![(0, out)]
            }
        };
        self.fired[id.0] = true;

        for (port, token) in outputs {
            // Unconnected outputs drop their token.
            if let Some(edge) = self.plan.node_outputs[id.0][port] {
                self.schedule(time + latency, Event::Deliver { edge, token });
            }
        }
        Ok(())
    }

    fn fire_task(&mut self, id: NodeId, transform: Transform) -> Result<Vec<(usize, FrameBuffer)>, Error> {
        let edges: Vec<usize> = self.plan.node_inputs[id.0].iter().flatten().copied().collect();
        let Engine {
            graph,
            stages,
            iteration,
            states,
            slots,
            reference,
            outcome,
            ..
        } = self;
        let NodeState::Task { outputs } = &mut states[id.0] else {
            return Err(GraphError::InvalidNode.into());
        };
        let inputs: Vec<&FrameBuffer> = edges.iter().filter_map(|&e| slots[e].as_ref()).collect();
        if let Some(result) = execute(transform, stages, iteration, &inputs, outputs)? {
            *outcome = Some(result);
        }
        if transform == Transform::Generate {
            reference.copy_from_slice(bits(&outputs[0])?);
        }
        let produced = outputs.iter().cloned().enumerate().collect();

        if let Some(node) = graph.node(id) {
            for (port, &edge) in node.inputs.iter().zip(&edges) {
                if !port.retained {
                    slots[edge] = None;
                }
            }
        }
        Ok(produced)
    }

    fn fire_predicate(&mut self, id: NodeId) -> Result<Vec<(usize, FrameBuffer)>, Error> {
        let lanes = self.plan.node_inputs[id.0].len();
        let tokens = (0..lanes)
            .map(|p| self.take(id, p))
            .collect::<Result<Vec<_>, _>>()?;
        let width = self.plan.batch_width;
        let Engine {
            iteration,
            predicate,
            reference,
            ..
        } = self;
        let reference: &[Bit] = reference;
        let decided = bits(&tokens[0])?;
        let stride = decided.len() / width;
        iteration.record_pass(|f| predicate.should_stop(frame(decided, f, stride), frame(reference, f, stride)));

        // Continue lanes are outputs 0..n, exit lanes n..2n.
        let offset = if iteration.is_finished() {
            assert_invariant(
                ITERATION_TERMINATES,
                iteration.is_finished(),
                "loop exits once every frame is final",
                Some("predicate"),
            );
            lanes
        } else {
            0
        };
        Ok(tokens.into_iter().enumerate().map(|(i, t)| (offset + i, t)).collect())
    }

    /// Nodes holding tokens they have not consumed.
    fn pending(&self) -> Vec<String> {
        self.graph
            .nodes
            .iter()
            .flatten()
            .filter(|n| {
                self.plan.node_inputs[n.id.0]
                    .iter()
                    .zip(&n.inputs)
                    .any(|(e, p)| !p.retained && e.is_some_and(|e| self.slots[e].is_some()))
            })
            .map(|n| n.name.clone())
            .collect()
    }
}

impl Backend for Engine {
    fn batch_width(&self) -> usize {
        self.stages.batch_width()
    }

    fn info_bits(&self) -> usize {
        self.stages.info_bits()
    }

    fn reseed(&mut self, seed: u64) {
        Engine::reseed(self, seed);
    }

    fn set_noise(&mut self, sigma: f32) {
        Engine::set_noise(self, sigma);
    }

    fn run_trial(&mut self) -> Result<TrialOutcome, Error> {
        Engine::run_trial(self)
    }
}

impl ChainBuilder {
    /// Build the dataflow backend instead of a threaded chain, wired as the
    /// standard iterative graph.
    pub fn build_engine(self, merge: crate::dsl::ExtrinsicMerge) -> Result<Engine, Error> {
        let (stages, predicate, iteration, gains) = self.into_stages()?;
        let graph = crate::dsl::iterative_graph(&stages, crate::dsl::IterativeWiring { merge, gains })?;
        Engine::new(graph, stages, predicate, iteration)
    }
}
