use itersim::dsl::{iterative_graph, ExtrinsicMerge, GraphBuilder, IterativeWiring};
use itersim::error::Error;
use itersim::frame::ElementKind;
use itersim::graph::{NodeKind, Selector, Transform};
use itersim::harness::{repetition_builder, repetition_stages};
use itersim::stages::AwgnChannel;
use itersim::{Engine, Genie, IterationConfig};

fn cap(max_passes: usize) -> IterationConfig {
    IterationConfig {
        max_passes,
        convergence_depth: 1,
    }
}

#[test]
fn engine_matches_chain_trial_by_trial() {
    for merge in [ExtrinsicMerge::Router, ExtrinsicMerge::Funnel] {
        let mut chain = repetition_builder(12, 3, 4).iteration(cap(5)).build().unwrap();
        let mut engine = repetition_builder(12, 3, 4).iteration(cap(5)).build_engine(merge).unwrap();
        chain.set_noise(1.1);
        engine.set_noise(1.1);
        for seed in 0..20 {
            chain.reseed(seed);
            engine.reseed(seed);
            let expected = chain.run_trial().unwrap();
            let actual = engine.run_trial().unwrap();
            assert_eq!(actual, expected, "seed {seed}, {merge:?}");
            assert_eq!(engine.reference(), chain.reference());
        }
    }
}

#[test]
fn gains_variant_matches_chain() {
    let builder = || {
        repetition_builder(8, 2, 2)
            .channel(AwgnChannel::new(16, 2, 0).with_fading())
            .gains(true)
            .iteration(cap(3))
    };
    let mut chain = builder().build().unwrap();
    let mut engine = builder().build_engine(ExtrinsicMerge::Router).unwrap();
    assert!(engine.graph().find("add_noise_with_gains").is_some());
    chain.set_noise(0.8);
    engine.set_noise(0.8);
    for seed in 0..10 {
        chain.reseed(seed);
        engine.reseed(seed);
        assert_eq!(engine.run_trial().unwrap(), chain.run_trial().unwrap());
    }
}

#[test]
fn latency_changes_timing_not_results() {
    let stages = repetition_stages(8, 3, 2);
    let graph = iterative_graph(&stages, IterativeWiring::default()).unwrap();
    let mut fast = Engine::new(graph.clone(), stages, Box::new(Genie), cap(4)).unwrap();

    let stages = repetition_stages(8, 3, 2);
    let mut slow_graph = graph;
    let decoder = slow_graph.find("decode_siho").unwrap();
    slow_graph.set_latency(decoder, 10).unwrap();
    let mut slow = Engine::new(slow_graph, stages, Box::new(Genie), cap(4)).unwrap();

    fast.set_noise(0.7);
    slow.set_noise(0.7);
    fast.reseed(1);
    slow.reseed(1);
    assert_eq!(fast.run_trial().unwrap(), slow.run_trial().unwrap());
    assert!(slow.cycles() > fast.cycles());
}

#[test]
fn router_that_never_selects_the_zero_source_stalls() {
    let stages = repetition_stages(4, 2, 1);
    let mut graph = iterative_graph(&stages, IterativeWiring::default()).unwrap();
    let merge = graph.find("merge").unwrap();
    if let Some(node) = graph.nodes[merge.0].as_mut() {
        node.kind = NodeKind::Router(Selector::Fixed(1));
    }
    let mut engine = Engine::new(graph, stages, Box::new(Genie), cap(3)).unwrap();
    assert_eq!(
        engine.run_trial().unwrap_err(),
        Error::Stalled {
            pending: vec!["merge".into(), "check".into()],
        }
    );
}

#[test]
fn graph_without_monitor_input_is_rejected() {
    let stages = repetition_stages(4, 2, 1);
    let mut builder = GraphBuilder::new();
    let source = builder.task(Transform::Generate, &stages);
    builder.task(Transform::Check, &stages);
    let fork = builder.duplicator("fork", ElementKind::Bit, 4, 1);
    builder.connect(source, 0, fork, 0).unwrap();
    builder.connect_named("fork", 0, "check", 0).unwrap();
    let err = Engine::new(builder.build(), stages, Box::new(Genie), cap(1)).err().unwrap();
    assert_eq!(
        err,
        Error::Plan(itersim::PlanError::UnconnectedInput {
            node: "check".into(),
            port: 1,
        })
    );
}

#[test]
fn open_loop_graph_runs_without_predicate() {
    // Reference straight into both monitor inputs: never an error, zero passes.
    let stages = repetition_stages(4, 2, 2);
    let mut builder = GraphBuilder::new();
    let source = builder.task(Transform::Generate, &stages);
    let fork = builder.duplicator("fork", ElementKind::Bit, 4, 2);
    let check = builder.task(Transform::Check, &stages);
    builder.connect(source, 0, fork, 0).unwrap();
    builder.connect(fork, 0, check, 0).unwrap();
    builder.connect(fork, 1, check, 1).unwrap();
    let mut engine = Engine::new(builder.build(), stages, Box::new(Genie), cap(1)).unwrap();
    let out = engine.run_trial().unwrap();
    assert_eq!(out.frame_errors(), 0);
    assert_eq!(out.pass_counts(), vec![0, 0]);
    assert_eq!(engine.cycles(), 1);
}
