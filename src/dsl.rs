//! DSL module: builder API for dataflow graphs.

use crate::chain::Stages;
use crate::error::{Error, GraphError};
use crate::frame::ElementKind;
use crate::graph::{Edge, Graph, NodeId, PortId, Selector, Transform};
use std::collections::HashMap;

/// Handle to a node in the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(pub NodeId);

/// The graph builder. Edge kinds are inferred from the producer port.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
    node_names: HashMap<String, NodeId>,
}

impl GraphBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn named(&mut self, name: &str, id: NodeId) -> NodeHandle {
        self.node_names.insert(name.to_string(), id);
        NodeHandle(id)
    }

    /// Add a task node named after its transform.
    pub fn task(&mut self, transform: Transform, stages: &Stages) -> NodeHandle {
        self.task_named(transform.name(), transform, stages)
    }

    /// Add a task node under an explicit name.
    pub fn task_named(&mut self, name: &str, transform: Transform, stages: &Stages) -> NodeHandle {
        let id = self.graph.add_task(name, transform, stages);
        self.named(name, id)
    }

    pub fn duplicator(&mut self, name: &str, kind: ElementKind, size: usize, n: usize) -> NodeHandle {
        let id = self.graph.add_duplicator(name, kind, size, n);
        self.named(name, id)
    }

    pub fn funnel(&mut self, name: &str, kind: ElementKind, size: usize, n: usize) -> NodeHandle {
        let id = self.graph.add_funnel(name, kind, size, n);
        self.named(name, id)
    }

    pub fn router(&mut self, name: &str, kind: ElementKind, size: usize, n: usize, selector: Selector) -> NodeHandle {
        let id = self.graph.add_router(name, kind, size, n, selector);
        self.named(name, id)
    }

    pub fn predicate(&mut self, name: &str, decided_size: usize, lanes: &[(ElementKind, usize)]) -> NodeHandle {
        let id = self.graph.add_predicate(name, decided_size, lanes);
        self.named(name, id)
    }

    pub fn constant(
        &mut self,
        name: &str,
        trigger: (ElementKind, usize),
        output: (ElementKind, usize),
    ) -> NodeHandle {
        let id = self.graph.add_constant(name, trigger, output);
        self.named(name, id)
    }

    /// Look up a node by name.
    pub fn handle(&self, name: &str) -> Result<NodeHandle, Error> {
        self.node_names
            .get(name)
            .map(|&id| NodeHandle(id))
            .ok_or_else(|| Error::Config(format!("no node named `{name}`")))
    }

    fn edge(&self, from: NodeHandle, from_port: usize, to: NodeHandle, to_port: usize) -> Result<Edge, Error> {
        let kind = self
            .graph
            .node(from.0)
            .ok_or(GraphError::InvalidNode)?
            .outputs
            .get(from_port)
            .ok_or(GraphError::InvalidPort)?
            .kind;
        Ok(Edge {
            from_node: from.0,
            from_port: PortId(from_port),
            to_node: to.0,
            to_port: PortId(to_port),
            kind,
        })
    }

    /// Connect two ports with a forward edge.
    pub fn connect(&mut self, from: NodeHandle, from_port: usize, to: NodeHandle, to_port: usize) -> Result<(), Error> {
        let edge = self.edge(from, from_port, to, to_port)?;
        self.graph.add_edge(edge)
    }

    /// Connect two named nodes.
    pub fn connect_named(&mut self, from: &str, from_port: usize, to: &str, to_port: usize) -> Result<(), Error> {
        let (from, to) = (self.handle(from)?, self.handle(to)?);
        self.connect(from, from_port, to, to_port)
    }

    /// Close the iteration loop.
    pub fn feedback(&mut self, from: NodeHandle, from_port: usize, to: NodeHandle, to_port: usize) -> Result<(), Error> {
        let edge = self.edge(from, from_port, to, to_port)?;
        self.graph.add_feedback_edge(edge)
    }

    /// Build the graph.
    pub fn build(self) -> Graph {
        self.graph
    }
}

/// How the "no prior" and fed-back extrinsic values reach the demodulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtrinsicMerge {
    /// A router taking the zero source first, the feedback afterwards.
    #[default]
    Router,
    /// A funnel forwarding whichever of the two arrives.
    Funnel,
}

/// Options for [`iterative_graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IterativeWiring {
    pub merge: ExtrinsicMerge,
    /// Use the with-gains channel and demodulator variants.
    pub gains: bool,
}

/// The standard iterative chain as a dataflow graph.
///
/// ```text
/// generate -> fork_reference -> encode -> modulate -> add_noise -> filter -> fork_filtered
/// fork_filtered -> demodulate (latched) | no_prior -> merge -> demodulate
/// demodulate -> fork_llrs -> decode_siso, decode_siho -> stop
/// stop (continue, extrinsic) ~> merge          stop (exit, decisions) -> check
/// fork_reference -> check
/// ```
pub fn iterative_graph(stages: &Stages, wiring: IterativeWiring) -> Result<Graph, Error> {
    use ElementKind::{Bit, Real, Symbol};
    stages.validate(wiring.gains)?;
    let k = stages.info_bits();
    let modem = stages.modem.contract();
    let (n, filtered) = (modem.pre(), modem.post_secondary());
    let extrinsic = stages.decoder.contract().post_secondary();

    let mut b = GraphBuilder::new();
    let source = b.task(Transform::Generate, stages);
    let fork_u = b.duplicator("fork_reference", Bit, k, 2);
    let encode = b.task(Transform::Encode, stages);
    let modulate = b.task(Transform::Modulate, stages);
    let channel = if wiring.gains {
        b.task(Transform::AddNoiseWithGains, stages)
    } else {
        b.task(Transform::AddNoise, stages)
    };
    let filter = b.task(Transform::Filter, stages);
    let fork_y = b.duplicator("fork_filtered", Symbol, filtered, 2);
    let zero = b.constant("no_prior", (Symbol, filtered), (Real, n));
    let merge = match wiring.merge {
        ExtrinsicMerge::Router => b.router("merge", Real, n, 2, Selector::FirstThen { first: 0, then: 1 }),
        ExtrinsicMerge::Funnel => b.funnel("merge", Real, n, 2),
    };
    let (demodulate, ext_port) = if wiring.gains {
        (b.task(Transform::DemodulateWithGainsExtrinsic, stages), 2)
    } else {
        (b.task(Transform::DemodulateExtrinsic, stages), 1)
    };
    let fork_l = b.duplicator("fork_llrs", Real, n, 2);
    let siso = b.task(Transform::DecodeSiso, stages);
    let siho = b.task(Transform::DecodeSiho, stages);
    let stop = b.predicate("stop", k, &[(Real, extrinsic)]);
    let check = b.task(Transform::Check, stages);

    b.connect(source, 0, fork_u, 0)?;
    b.connect(fork_u, 0, encode, 0)?;
    b.connect(fork_u, 1, check, 0)?;
    b.connect(encode, 0, modulate, 0)?;
    b.connect(modulate, 0, channel, 0)?;
    b.connect(channel, 0, filter, 0)?;
    if wiring.gains {
        b.connect(channel, 1, demodulate, 1)?;
    }
    b.connect(filter, 0, fork_y, 0)?;
    b.connect(fork_y, 0, demodulate, 0)?;
    b.connect(fork_y, 1, zero, 0)?;
    b.connect(zero, 0, merge, 0)?;
    b.connect(merge, 0, demodulate, ext_port)?;
    b.connect(demodulate, 0, fork_l, 0)?;
    b.connect(fork_l, 0, siso, 0)?;
    b.connect(fork_l, 1, siho, 0)?;
    b.connect(siho, 0, stop, 0)?;
    b.connect(siso, 0, stop, 1)?;
    // Exit lane 0 carries the final decisions; continue lane 1 the extrinsic.
    b.connect(stop, 2, check, 1)?;
    b.feedback(stop, 1, merge, 1)?;
    Ok(b.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::repetition_stages;

    #[test]
    fn dsl_equivalence() {
        let stages = repetition_stages(4, 2, 1);
        let mut builder = GraphBuilder::new();
        let src = builder.task(Transform::Generate, &stages);
        let enc = builder.task(Transform::Encode, &stages);
        builder.connect(src, 0, enc, 0).unwrap();
        let dsl_graph = builder.build();

        let mut manual_graph = Graph::new();
        let m_src = manual_graph.add_task("generate", Transform::Generate, &stages);
        let m_enc = manual_graph.add_task("encode", Transform::Encode, &stages);
        manual_graph
            .add_edge(Edge {
                from_node: m_src,
                from_port: PortId(0),
                to_node: m_enc,
                to_port: PortId(0),
                kind: ElementKind::Bit,
            })
            .unwrap();

        assert_eq!(dsl_graph.nodes.len(), manual_graph.nodes.len());
        assert_eq!(dsl_graph.edges, manual_graph.edges);
    }

    #[test]
    fn connect_named_rejects_unknown_nodes() {
        let mut builder = GraphBuilder::new();
        let err = builder.connect_named("nowhere", 0, "else", 0).unwrap_err();
        assert_eq!(err, Error::Config("no node named `nowhere`".into()));
    }

    #[test]
    fn task_to_task_mismatch_is_contract_violation() {
        // Encoder emits 8 coded bits but the mismatched encoder expects 4 info bits.
        let stages = repetition_stages(4, 2, 1);
        let mut builder = GraphBuilder::new();
        let enc = builder.task_named("enc_a", Transform::Encode, &stages);
        let enc2 = builder.task_named("enc_b", Transform::Encode, &stages);
        let err = builder.connect(enc, 0, enc2, 0).unwrap_err();
        assert_eq!(
            err,
            Error::ContractViolation {
                producer: "enc_a".into(),
                consumer: "enc_b".into(),
                what: "frame size",
                expected: 4,
                actual: 8,
            }
        );
    }

    #[test]
    fn standard_graph_has_one_feedback_edge() {
        let stages = repetition_stages(4, 3, 2);
        let graph = iterative_graph(&stages, IterativeWiring::default()).unwrap();
        let fb = graph.feedback.as_ref().unwrap();
        assert_eq!(fb.from_node, graph.find("stop").unwrap());
        assert_eq!(fb.to_node, graph.find("merge").unwrap());
        assert_eq!(graph.node_count(), 15);
    }
}
