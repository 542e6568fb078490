use itersim::error::{Error, GraphError};
use itersim::frame::ElementKind;
use itersim::graph::{Edge, Graph, NodeId, PortId, Selector};
use proptest::prelude::*;

fn edge(from: usize, from_port: usize, to: usize, to_port: usize) -> Edge {
    Edge {
        from_node: NodeId(from),
        from_port: PortId(from_port),
        to_node: NodeId(to),
        to_port: PortId(to_port),
        kind: ElementKind::Real,
    }
}

/// Alternating funnels and routers with `n` inputs each, so any pair of nodes
/// can be wired on a fresh input port.
fn mesh(n: usize) -> Graph {
    let mut graph = Graph::new();
    for i in 0..n {
        if i % 2 == 0 {
            graph.add_funnel(&format!("f{i}"), ElementKind::Real, 4, n);
        } else {
            graph.add_router(&format!("r{i}"), ElementKind::Real, 4, n, Selector::Fixed(0));
        }
    }
    graph
}

fn is_acyclic(n: usize, edges: &[Edge]) -> bool {
    let mut in_degree = vec![0; n];
    for e in edges {
        in_degree[e.to_node.0] += 1;
    }
    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut seen = 0;
    while let Some(i) = ready.pop() {
        seen += 1;
        for e in edges.iter().filter(|e| e.from_node.0 == i) {
            in_degree[e.to_node.0] -= 1;
            if in_degree[e.to_node.0] == 0 {
                ready.push(e.to_node.0);
            }
        }
    }
    seen == n
}

proptest! {
    #[test]
    fn accepted_edges_keep_the_graph_acyclic(
        n in 2usize..8,
        pairs in prop::collection::vec((0usize..8, 0usize..8), 0..24),
    ) {
        let mut graph = mesh(n);
        for (a, b) in pairs {
            let (a, b) = (a % n, b % n);
            let result = graph.add_edge(edge(a, 0, b, a));
            if a == b {
                prop_assert!(result.is_err());
            }
        }
        prop_assert!(is_acyclic(n, &graph.edges));
        // One output port per node, so at most one accepted edge each.
        prop_assert!(graph.edges.len() < n);
    }

    #[test]
    fn forward_chain_then_back_edge(len in 2usize..10) {
        let mut graph = Graph::new();
        let ids: Vec<NodeId> = (0..len)
            .map(|i| graph.add_funnel(&format!("n{i}"), ElementKind::Real, 4, 2))
            .collect();
        for w in ids.windows(2) {
            prop_assert!(graph.add_edge(edge(w[0].0, 0, w[1].0, 0)).is_ok());
        }
        let back = edge(ids[len - 1].0, 0, ids[0].0, 1);
        prop_assert_eq!(graph.add_edge(back.clone()), Err(Error::Graph(GraphError::CycleDetected)));
        prop_assert!(graph.add_feedback_edge(back).is_ok());
        prop_assert_eq!(graph.all_edges().count(), len);
    }

    #[test]
    fn removal_never_leaves_dangling_edges(len in 2usize..10, victim in 0usize..10) {
        let mut graph = Graph::new();
        let ids: Vec<NodeId> = (0..len)
            .map(|i| graph.add_duplicator(&format!("d{i}"), ElementKind::Bit, 2, 1))
            .collect();
        for w in ids.windows(2) {
            graph
                .add_edge(Edge {
                    from_node: w[0],
                    from_port: PortId(0),
                    to_node: w[1],
                    to_port: PortId(0),
                    kind: ElementKind::Bit,
                })
                .unwrap();
        }
        let victim = NodeId(victim % len);
        graph.remove_node(victim).unwrap();
        prop_assert!(graph.edges.iter().all(|e| e.from_node != victim && e.to_node != victim));
        prop_assert_eq!(graph.node_count(), len - 1);
    }
}
