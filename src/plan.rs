//! Plan module: compile a dataflow graph into an execution plan.

use crate::error::PlanError;
use crate::graph::{Edge, Graph, NodeId, NodeKind};
use crate::invariant_ppt::{assert_invariant, PLAN_SOUNDNESS, SINGLE_FEEDBACK_LOOP};
use std::collections::VecDeque;

/// The compiled plan: forward order, edge table and port bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Live nodes in forward topological order.
    pub order: Vec<NodeId>,
    /// Forward edges followed by the feedback edge, if any.
    pub edges: Vec<Edge>,
    /// Index of the feedback edge in `edges`.
    pub feedback: Option<usize>,
    /// Per node, per input port: the edge feeding it.
    pub node_inputs: Vec<Vec<Option<usize>>>,
    /// Per node, per output port: the edge it drives, if connected.
    pub node_outputs: Vec<Vec<Option<usize>>>,
    pub batch_width: usize,
}

impl Plan {
    /// Create a plan from a graph.
    pub fn compile(graph: &Graph, batch_width: usize) -> Result<Self, PlanError> {
        if batch_width == 0 {
            return Err(PlanError::ZeroBatchWidth);
        }
        let order = topo_sort(graph)?;

        let mut edges = graph.edges.clone();
        let feedback = graph.feedback.clone().map(|e| {
            edges.push(e);
            edges.len() - 1
        });

        let mut node_inputs: Vec<Vec<Option<usize>>> = graph
            .nodes
            .iter()
            .map(|n| n.as_ref().map_or_else(Vec::new, |n| vec![None; n.inputs.len()]))
            .collect();
        let mut node_outputs: Vec<Vec<Option<usize>>> = graph
            .nodes
            .iter()
            .map(|n| n.as_ref().map_or_else(Vec::new, |n| vec![None; n.outputs.len()]))
            .collect();
        for (i, edge) in edges.iter().enumerate() {
            node_inputs[edge.to_node.0][edge.to_port.0] = Some(i);
            node_outputs[edge.from_node.0][edge.from_port.0] = Some(i);
        }

        for node in graph.nodes.iter().flatten() {
            if let Some(port) = node_inputs[node.id.0].iter().position(Option::is_none) {
                return Err(PlanError::UnconnectedInput {
                    node: node.name.clone(),
                    port,
                });
            }
        }

        // Exactly one predicate per feedback edge, and it must drive that edge
        // from its continue side.
        let predicates: Vec<_> = graph
            .nodes
            .iter()
            .flatten()
            .filter(|n| n.kind == NodeKind::Predicate)
            .collect();
        match &graph.feedback {
            None => {
                if let Some(p) = predicates.first() {
                    return Err(PlanError::MissingFeedback(p.name.clone()));
                }
            }
            Some(edge) => {
                let gated = predicates
                    .iter()
                    .any(|p| p.id == edge.from_node && edge.from_port.0 < p.inputs.len());
                if !gated {
                    return Err(PlanError::FeedbackNotGated);
                }
                if let Some(p) = predicates.iter().find(|p| p.id != edge.from_node) {
                    return Err(PlanError::MissingFeedback(p.name.clone()));
                }
            }
        }

        assert_invariant(
            PLAN_SOUNDNESS,
            order.len() == graph.node_count(),
            "Plan orders every live node exactly once",
            Some("compile"),
        );
        assert_invariant(
            SINGLE_FEEDBACK_LOOP,
            predicates.len() == usize::from(feedback.is_some()),
            "At most one loop, gated by its predicate",
            Some("compile"),
        );

        Ok(Self {
            order,
            edges,
            feedback,
            node_inputs,
            node_outputs,
            batch_width,
        })
    }
}

/// Topological sort of live nodes over forward edges.
fn topo_sort(graph: &Graph) -> Result<Vec<NodeId>, PlanError> {
    let mut in_degree = vec![0; graph.nodes.len()];
    let mut adj: Vec<Vec<NodeId>> = vec![vec![]; graph.nodes.len()];

    for edge in &graph.edges {
        adj[edge.from_node.0].push(edge.to_node);
        in_degree[edge.to_node.0] += 1;
    }

    let mut queue = VecDeque::new();
    for node in graph.nodes.iter().flatten() {
        if in_degree[node.id.0] == 0 {
            queue.push_back(node.id);
        }
    }

    let mut order = Vec::new();
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &neighbor in &adj[node.0] {
            in_degree[neighbor.0] -= 1;
            if in_degree[neighbor.0] == 0 {
                queue.push_back(neighbor);
            }
        }
    }

    if order.len() == graph.node_count() {
        Ok(order)
    } else {
        Err(PlanError::CycleDetected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{iterative_graph, IterativeWiring};
    use crate::frame::ElementKind;
    use crate::graph::{PortId, Transform};
    use crate::harness::repetition_stages;

    #[test]
    fn plan_stability() {
        let stages = repetition_stages(4, 3, 2);
        let graph = iterative_graph(&stages, IterativeWiring::default()).unwrap();
        let plan1 = Plan::compile(&graph, 2).unwrap();
        let plan2 = Plan::compile(&graph, 2).unwrap();
        assert_eq!(plan1, plan2);
        assert_eq!(plan1.order[0], graph.find("generate").unwrap());
        assert_eq!(plan1.feedback, Some(plan1.edges.len() - 1));
    }

    #[test]
    fn zero_batch_width_rejected() {
        let graph = Graph::new();
        assert_eq!(Plan::compile(&graph, 0), Err(PlanError::ZeroBatchWidth));
    }

    #[test]
    fn unconnected_input_named() {
        let mut graph = Graph::new();
        let a = graph.add_duplicator("a", ElementKind::Real, 4, 1);
        let b = graph.add_duplicator("b", ElementKind::Real, 4, 2);
        graph
            .add_edge(Edge {
                from_node: a,
                from_port: PortId(0),
                to_node: b,
                to_port: PortId(0),
                kind: ElementKind::Real,
            })
            .unwrap();
        assert_eq!(
            Plan::compile(&graph, 1),
            Err(PlanError::UnconnectedInput {
                node: "a".into(),
                port: 0,
            })
        );
    }

    #[test]
    fn predicate_without_feedback_rejected() {
        let stages = repetition_stages(4, 3, 1);
        let mut graph = Graph::new();
        let src = graph.add_task("generate", Transform::Generate, &stages);
        let stop = graph.add_predicate("stop", 4, &[]);
        graph
            .add_edge(Edge {
                from_node: src,
                from_port: PortId(0),
                to_node: stop,
                to_port: PortId(0),
                kind: ElementKind::Bit,
            })
            .unwrap();
        assert_eq!(
            Plan::compile(&graph, 1),
            Err(PlanError::MissingFeedback("stop".into()))
        );
    }

    #[test]
    fn feedback_from_exit_side_not_gated() {
        let stages = repetition_stages(4, 3, 1);
        let mut graph = iterative_graph(&stages, IterativeWiring::default()).unwrap();
        let fb = graph.feedback.take().unwrap();
        // Exit lane 1 instead of continue lane 1.
        graph.feedback = Some(Edge {
            from_port: PortId(3),
            ..fb
        });
        assert_eq!(Plan::compile(&graph, 1), Err(PlanError::FeedbackNotGated));
    }
}
