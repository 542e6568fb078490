//! Graph module: correct-by-construction dataflow graphs for iterative chains.
//!
//! Forward edges must stay acyclic. The single feedback loop of an iterative
//! chain is one designated back edge, checked when it is added to close a cycle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use crate::chain::Stages;
use crate::error::{Error, GraphError};
use crate::frame::ElementKind;
use crate::invariant_ppt::{assert_invariant, GRAPH_LEGALITY, GRAPH_REJECTS_INVALID};
use crate::module::Module;

/// Unique identifier for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Index of a port on one side of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub usize);

/// A typed, fixed-size port.
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    /// Position on its side of the node.
    pub id: PortId,
    /// Element kind of the tokens it carries.
    pub kind: ElementKind,
    /// Elements per frame.
    pub size: usize,
    /// Input only: the token stays latched after the node fires, so every loop
    /// pass reuses it.
    pub retained: bool,
}

impl Port {
    fn new(id: usize, kind: ElementKind, size: usize) -> Self {
        Self {
            id: PortId(id),
            kind,
            size,
            retained: false,
        }
    }

    fn retained(mut self) -> Self {
        self.retained = true;
        self
    }
}

/// An edge connecting an output port to an input port.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// The source node ID.
    pub from_node: NodeId,
    /// The source port ID.
    pub from_port: PortId,
    /// The destination node ID.
    pub to_node: NodeId,
    /// The destination port ID.
    pub to_port: PortId,
    /// Element kind carried along the edge.
    pub kind: ElementKind,
}

/// A module transform run by a task node.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    /// Source: emits the reference bits.
    Generate,
    /// Encoder.
    Encode,
    /// Modem, primary transform.
    Modulate,
    /// Channel, plain noise.
    AddNoise,
    /// Channel, noise plus per-sample gains on a second output.
    AddNoiseWithGains,
    /// Modem, secondary transform.
    Filter,
    /// Modem, demodulation with decoder feedback.
    DemodulateExtrinsic,
    /// Modem, demodulation with gains and decoder feedback.
    DemodulateWithGainsExtrinsic,
    /// Decoder, soft output.
    DecodeSiso,
    /// Decoder, hard output.
    DecodeSiho,
    /// Monitor: reference and decoded bits in, trial outcome out.
    Check,
}

impl Transform {
    /// Default node name.
    pub fn name(self) -> &'static str {
        match self {
            Transform::Generate => "generate",
            Transform::Encode => "encode",
            Transform::Modulate => "modulate",
            Transform::AddNoise => "add_noise",
            Transform::AddNoiseWithGains => "add_noise_with_gains",
            Transform::Filter => "filter",
            Transform::DemodulateExtrinsic => "demodulate_extrinsic",
            Transform::DemodulateWithGainsExtrinsic => "demodulate_with_gains_extrinsic",
            Transform::DecodeSiso => "decode_siso",
            Transform::DecodeSiho => "decode_siho",
            Transform::Check => "check",
        }
    }

    /// Whether the transform runs inside the feedback loop and honors the
    /// per-frame activity mask.
    pub fn in_loop(self) -> bool {
        matches!(
            self,
            Transform::DemodulateExtrinsic
                | Transform::DemodulateWithGainsExtrinsic
                | Transform::DecodeSiso
                | Transform::DecodeSiho
        )
    }

    /// Input and output ports, sized from the contracts of `stages`.
    pub fn ports(self, stages: &Stages) -> (Vec<Port>, Vec<Port>) {
        use ElementKind::{Bit, Real, Symbol};
        let src = stages.source.contract();
        let enc = stages.encoder.contract();
        let modem = stages.modem.contract();
        let chn = stages.channel.contract();
        let dec = stages.decoder.contract();
        let mon = stages.monitor.contract();
        match self {
            Transform::Generate => (vec![], vec![Port::new(0, Bit, src.post())]),
            Transform::Encode => (vec![Port::new(0, Bit, enc.pre())], vec![Port::new(0, Bit, enc.post())]),
            Transform::Modulate => (
                vec![Port::new(0, Bit, modem.pre())],
                vec![Port::new(0, Symbol, modem.post())],
            ),
            Transform::AddNoise => (
                vec![Port::new(0, Symbol, chn.pre())],
                vec![Port::new(0, Symbol, chn.post())],
            ),
            Transform::AddNoiseWithGains => (
                vec![Port::new(0, Symbol, chn.pre())],
                vec![Port::new(0, Symbol, chn.post()), Port::new(1, Real, chn.post())],
            ),
            Transform::Filter => (
                vec![Port::new(0, Symbol, modem.post())],
                vec![Port::new(0, Symbol, modem.post_secondary())],
            ),
            Transform::DemodulateExtrinsic => (
                vec![
                    Port::new(0, Symbol, modem.post_secondary()).retained(),
                    Port::new(1, Real, modem.pre()),
                ],
                vec![Port::new(0, Real, modem.pre())],
            ),
            Transform::DemodulateWithGainsExtrinsic => (
                vec![
                    Port::new(0, Symbol, modem.post_secondary()).retained(),
                    Port::new(1, Real, modem.post_secondary()).retained(),
                    Port::new(2, Real, modem.pre()),
                ],
                vec![Port::new(0, Real, modem.pre())],
            ),
            Transform::DecodeSiso => (
                vec![Port::new(0, Real, dec.pre())],
                vec![Port::new(0, Real, dec.post_secondary())],
            ),
            Transform::DecodeSiho => (vec![Port::new(0, Real, dec.pre())], vec![Port::new(0, Bit, dec.post())]),
            Transform::Check => (vec![Port::new(0, Bit, mon.pre()), Port::new(1, Bit, mon.post())], vec![]),
        }
    }
}

/// Router selection policy, driven by how often the router already fired this trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// Always the same input.
    Fixed(usize),
    /// Input `first` on the first firing of a trial, `then` afterwards.
    FirstThen {
        /// Input selected on the first firing.
        first: usize,
        /// Input selected on every later firing.
        then: usize,
    },
}

impl Selector {
    /// Input port selected after `fired` earlier firings.
    pub fn select(self, fired: usize) -> usize {
        match self {
            Selector::Fixed(port) => port,
            Selector::FirstThen { first, then } => {
                if fired == 0 {
                    first
                } else {
                    then
                }
            }
        }
    }
}

/// What a node does when it fires.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A module transform.
    Task(Transform),
    /// One input copied to every output.
    Duplicator,
    /// Whichever input holds a token is forwarded, lowest port first.
    Funnel,
    /// The input chosen by the selector is forwarded.
    Router(Selector),
    /// Per-frame stopping check. `n` input lanes, outputs `0..n` continue the
    /// loop, outputs `n..2n` leave it. Lane 0 carries the hard decisions.
    Predicate,
    /// Emits a zeroed token each time its trigger input receives one.
    Constant,
}

impl NodeKind {
    /// Wiring primitives move tokens without running a module.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, NodeKind::Task(_))
    }
}

/// A node in the graph.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// The unique ID of this node.
    pub id: NodeId,
    /// Name used in errors and by the builder.
    pub name: String,
    /// The input ports of this node.
    pub inputs: Vec<Port>,
    /// The output ports of this node.
    pub outputs: Vec<Port>,
    /// What the node does.
    pub kind: NodeKind,
    /// Cycles between firing and output delivery.
    pub latency: u64,
}

/// The dataflow graph: a DAG of forward edges plus at most one feedback edge.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// All nodes in the graph (None for removed nodes).
    pub nodes: Vec<Option<NodeData>>,
    /// Forward edges.
    pub edges: Vec<Edge>,
    /// The designated back edge closing the iteration loop.
    pub feedback: Option<Edge>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn add_node(&mut self, name: &str, kind: NodeKind, inputs: Vec<Port>, outputs: Vec<Port>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let latency = if kind.is_primitive() { 0 } else { 1 };
        self.nodes.push(Some(NodeData {
            id,
            name: name.to_string(),
            inputs,
            outputs,
            kind,
            latency,
        }));
        id
    }

    /// Add a task node with ports sized from `stages`.
    pub fn add_task(&mut self, name: &str, transform: Transform, stages: &Stages) -> NodeId {
        let (inputs, outputs) = transform.ports(stages);
        self.add_node(name, NodeKind::Task(transform), inputs, outputs)
    }

    /// Fan one producer out to `n` consumers.
    pub fn add_duplicator(&mut self, name: &str, kind: ElementKind, size: usize, n: usize) -> NodeId {
        let outputs = (0..n).map(|i| Port::new(i, kind, size)).collect();
        self.add_node(name, NodeKind::Duplicator, vec![Port::new(0, kind, size)], outputs)
    }

    /// Merge `n` producers into one consumer port.
    pub fn add_funnel(&mut self, name: &str, kind: ElementKind, size: usize, n: usize) -> NodeId {
        let inputs = (0..n).map(|i| Port::new(i, kind, size)).collect();
        self.add_node(name, NodeKind::Funnel, inputs, vec![Port::new(0, kind, size)])
    }

    /// Select one of `n` producers per firing.
    pub fn add_router(&mut self, name: &str, kind: ElementKind, size: usize, n: usize, selector: Selector) -> NodeId {
        let inputs = (0..n).map(|i| Port::new(i, kind, size)).collect();
        self.add_node(name, NodeKind::Router(selector), inputs, vec![Port::new(0, kind, size)])
    }

    /// Stopping check over `decided_size` hard bits per frame plus extra `lanes`
    /// carried through the loop alongside them.
    pub fn add_predicate(&mut self, name: &str, decided_size: usize, lanes: &[(ElementKind, usize)]) -> NodeId {
        let all: Vec<(ElementKind, usize)> = std::iter::once((ElementKind::Bit, decided_size))
            .chain(lanes.iter().copied())
            .collect();
        let inputs = all.iter().enumerate().map(|(i, &(k, s))| Port::new(i, k, s)).collect();
        let outputs = all
            .iter()
            .chain(all.iter())
            .enumerate()
            .map(|(i, &(k, s))| Port::new(i, k, s))
            .collect();
        self.add_node(name, NodeKind::Predicate, inputs, outputs)
    }

    /// Zero source fired by a trigger token.
    pub fn add_constant(&mut self, name: &str, trigger: (ElementKind, usize), output: (ElementKind, usize)) -> NodeId {
        self.add_node(
            name,
            NodeKind::Constant,
            vec![Port::new(0, trigger.0, trigger.1)],
            vec![Port::new(0, output.0, output.1)],
        )
    }

    /// Look up a live node.
    pub fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }

    /// Find a live node by name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().flatten().find(|n| n.name == name).map(|n| n.id)
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    /// Set the firing latency of a node, in cycles.
    pub fn set_latency(&mut self, id: NodeId, cycles: u64) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id.0)
            .and_then(|n| n.as_mut())
            .ok_or(GraphError::InvalidNode)?;
        node.latency = cycles;
        Ok(())
    }

    /// Forward edges plus the feedback edge.
    pub fn all_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().chain(self.feedback.iter())
    }

    /// Checks shared by forward and feedback edges: endpoints, kind, size and
    /// single connection per port.
    fn check_endpoints(&self, edge: &Edge) -> Result<(), Error> {
        let from = self.node(edge.from_node).ok_or(GraphError::InvalidNode)?;
        let to = self.node(edge.to_node).ok_or(GraphError::InvalidNode)?;

        let out = from.outputs.get(edge.from_port.0).ok_or(GraphError::InvalidPort)?;
        let input = to.inputs.get(edge.to_port.0).ok_or(GraphError::InvalidPort)?;

        if edge.kind != out.kind || edge.kind != input.kind {
            return Err(GraphError::KindMismatch.into());
        }

        if out.size != input.size {
            return Err(if to.kind.is_primitive() {
                Error::ShapeMismatch {
                    primitive: to.name.clone(),
                    port: edge.to_port.0,
                    expected: input.size,
                    actual: out.size,
                }
            } else if from.kind.is_primitive() {
                Error::ShapeMismatch {
                    primitive: from.name.clone(),
                    port: edge.from_port.0,
                    expected: input.size,
                    actual: out.size,
                }
            } else {
                Error::ContractViolation {
                    producer: from.name.clone(),
                    consumer: to.name.clone(),
                    what: "frame size",
                    expected: input.size,
                    actual: out.size,
                }
            });
        }

        // One producer per input, one consumer per output: fan-out goes through a duplicator.
        if self.all_edges().any(|e| {
            (e.to_node == edge.to_node && e.to_port == edge.to_port)
                || (e.from_node == edge.from_node && e.from_port == edge.from_port)
        }) {
            return Err(GraphError::PortAlreadyConnected.into());
        }
        Ok(())
    }

    /// Add a forward edge, validating endpoints, kinds, sizes and acyclicity.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), Error> {
        self.check_endpoints(&edge)?;

        if self.would_create_cycle(&edge) {
            assert_invariant(
                GRAPH_REJECTS_INVALID,
                self.would_create_cycle(&edge),
                "Cycle detected, rejecting",
                Some("add_edge"),
            );
            return Err(GraphError::CycleDetected.into());
        }

        self.edges.push(edge);

        assert_invariant(
            GRAPH_LEGALITY,
            self.inputs_singly_driven(),
            "Edge added, every input still has at most one producer",
            Some("add_edge"),
        );
        Ok(())
    }

    /// Designate the back edge of the iteration loop. It must close a cycle
    /// through the forward edges, and there can be only one.
    pub fn add_feedback_edge(&mut self, edge: Edge) -> Result<(), Error> {
        if self.feedback.is_some() {
            return Err(GraphError::FeedbackAlreadyDesignated.into());
        }
        self.check_endpoints(&edge)?;
        if !self.would_create_cycle(&edge) {
            return Err(GraphError::FeedbackWithoutCycle.into());
        }
        self.feedback = Some(edge);
        assert_invariant(
            GRAPH_LEGALITY,
            self.inputs_singly_driven(),
            "Feedback edge added, every input still has at most one producer",
            Some("add_feedback_edge"),
        );
        Ok(())
    }

    /// Remove a node and all edges connected to it.
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<(), GraphError> {
        if node_id.0 >= self.nodes.len() {
            return Err(GraphError::InvalidNode);
        }
        self.nodes[node_id.0] = None;
        self.edges
            .retain(|e| e.from_node != node_id && e.to_node != node_id);
        if self
            .feedback
            .as_ref()
            .is_some_and(|e| e.from_node == node_id || e.to_node == node_id)
        {
            self.feedback = None;
        }
        Ok(())
    }

    fn inputs_singly_driven(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.all_edges().all(|e| seen.insert((e.to_node, e.to_port)))
    }

    fn would_create_cycle(&self, edge: &Edge) -> bool {
        // The edge closes a cycle iff `to_node` already reaches `from_node`.
        let mut visited = vec![false; self.nodes.len()];
        self.dfs(edge.to_node, edge.from_node, &mut visited)
    }

    fn dfs(&self, current: NodeId, target: NodeId, visited: &mut [bool]) -> bool {
        if current == target {
            return true;
        }
        if visited[current.0] {
            return false;
        }
        visited[current.0] = true;
        for edge in &self.edges {
            if edge.from_node == current && self.dfs(edge.to_node, target, visited) {
                return true;
            }
        }
        false
    }
}
