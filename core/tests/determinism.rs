//! THE MOST IMPORTANT TEST IN THE PROJECT.
//!
//! Same model, same seed: the parameter samples, trajectories and outcome
//! totals must be bit-identical, whatever the thread count.
//! Any divergence is a blocker: do not merge until fixed.

use cohort_core::model::{CohortModel, ModelDefinition, ModelOutput};

fn definition(seed: u64, n_samples: usize) -> ModelDefinition {
    let mut def = ModelDefinition::from_json(include_str!("../../data/markov_cohort.json"))
        .expect("example model parses");
    def.config.seed = seed;
    def.config.n_samples = n_samples;
    def
}

fn run(seed: u64, n_samples: usize) -> ModelOutput {
    CohortModel::build(&definition(seed, n_samples))
        .expect("model builds")
        .run()
        .expect("model runs")
}

#[test]
fn same_seed_produces_identical_runs() {
    const SEED: u64 = 0xDEAD_BEEF_CAFE_1234;

    let a = run(SEED, 40);
    let b = run(SEED, 40);

    assert_eq!(a.pairs, b.pairs);
    for (i, (x, y)) in a.parameters.samples().iter().zip(b.parameters.samples()).enumerate() {
        assert_eq!(x, y, "parameter sample {i} diverged");
    }
    for (i, (x, y)) in a.trajectories.iter().zip(&b.trajectories).enumerate() {
        assert_eq!(x, y, "trajectory of pair {:?} diverged", a.pairs[i]);
    }
    assert_eq!(a.outcomes, b.outcomes);
}

#[test]
fn thread_count_does_not_change_results() {
    const SEED: u64 = 7;

    let single = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .unwrap()
        .install(|| run(SEED, 30));
    let many = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .unwrap()
        .install(|| run(SEED, 30));

    assert_eq!(single.outcomes, many.outcomes);
    assert_eq!(single.trajectories, many.trajectories);
}

#[test]
fn more_samples_leave_earlier_samples_unchanged() {
    let small = run(99, 10);
    let large = run(99, 25);

    for (x, y) in small.parameters.samples().iter().zip(large.parameters.samples()) {
        assert_eq!(x, y);
    }
}

#[test]
fn different_seeds_produce_different_samples() {
    let a = run(1, 5);
    let b = run(2, 5);
    assert_ne!(a.parameters.samples(), b.parameters.samples());
}
