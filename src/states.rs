//! Per-node runtime state for the dataflow engine.

use crate::frame::FrameBuffer;
use crate::graph::{NodeData, NodeKind};

/// Mutable state carried by a node across the firings of one trial.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    /// Task node: its output buffers persist across firings, so frames the
    /// activity mask skips keep their last value.
    Task {
        /// One buffer per output port.
        outputs: Vec<FrameBuffer>,
    },
    /// Router: firings so far this trial, fed to its selector.
    Router {
        /// Number of firings since the trial started.
        fired: usize,
    },
    /// Duplicator, funnel, predicate or constant.
    Stateless,
}

impl NodeState {
    /// Initial state for `node` at the given batch width.
    pub fn for_node(node: &NodeData, batch_width: usize) -> Self {
        match node.kind {
            NodeKind::Task(_) => NodeState::Task {
                outputs: node
                    .outputs
                    .iter()
                    .map(|p| FrameBuffer::zeroed(p.kind, p.size * batch_width))
                    .collect(),
            },
            NodeKind::Router(_) => NodeState::Router { fired: 0 },
            _ => NodeState::Stateless,
        }
    }

    /// Back to the start-of-trial state without reallocating.
    pub fn reset(&mut self) {
        match self {
            NodeState::Task { outputs } => {
                for buf in outputs.iter_mut() {
                    match buf {
                        FrameBuffer::Bits(b) => b.fill(0),
                        FrameBuffer::Reals(r) => r.fill(0.0),
                    }
                }
            }
            NodeState::Router { fired } => *fired = 0,
            NodeState::Stateless => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ElementKind;
    use crate::graph::{Graph, Selector};

    #[test]
    fn router_counter_resets() {
        let mut graph = Graph::new();
        let id = graph.add_router("r", ElementKind::Real, 4, 2, Selector::Fixed(0));
        let node = graph.node(id).unwrap();
        let mut state = NodeState::for_node(node, 3);
        if let NodeState::Router { fired } = &mut state {
            *fired = 5;
        }
        state.reset();
        assert_eq!(state, NodeState::Router { fired: 0 });
    }

    #[test]
    fn primitives_are_stateless() {
        let mut graph = Graph::new();
        let id = graph.add_duplicator("d", ElementKind::Bit, 4, 2);
        assert_eq!(NodeState::for_node(graph.node(id).unwrap(), 1), NodeState::Stateless);
    }
}
