use criterion::{black_box, criterion_group, criterion_main, Criterion};
use itersim::dsl::ExtrinsicMerge;
use itersim::harness::repetition_builder;
use itersim::IterationConfig;

const ITERATION: IterationConfig = IterationConfig {
    max_passes: 8,
    convergence_depth: 1,
};

fn bench_chain_trial(c: &mut Criterion) {
    let mut chain = repetition_builder(64, 3, 16).iteration(ITERATION).build().unwrap();
    chain.set_noise(0.9);
    let mut seed = 0;

    c.bench_function("chain_trial_64x3_w16", |b| {
        b.iter(|| {
            seed += 1;
            chain.reseed(seed);
            black_box(chain.run_trial().unwrap());
        })
    });
}

fn bench_engine_trial(c: &mut Criterion) {
    for (name, merge) in [
        ("engine_trial_router", ExtrinsicMerge::Router),
        ("engine_trial_funnel", ExtrinsicMerge::Funnel),
    ] {
        let mut engine = repetition_builder(64, 3, 16)
            .iteration(ITERATION)
            .build_engine(merge)
            .unwrap();
        engine.set_noise(0.9);
        let mut seed = 0;

        c.bench_function(name, |b| {
            b.iter(|| {
                seed += 1;
                engine.reseed(seed);
                black_box(engine.run_trial().unwrap());
            })
        });
    }
}

criterion_group!(benches, bench_chain_trial, bench_engine_trial);
criterion_main!(benches);
