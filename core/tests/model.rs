//! End-to-end runs of the example SOC vs New model.

use approx::assert_relative_eq;
use cohort_core::{
    cea::CeaTable,
    distribution::{Family, OneOrMany, ParamSpec, Quantity},
    error::SimError,
    model::{CohortModel, ModelDefinition},
    output::{LIFE_YEARS, QALYS, TOTAL_COST},
};

const N_SAMPLES: usize = 20;

fn definition() -> ModelDefinition {
    let mut def = ModelDefinition::from_json(include_str!("../../data/markov_cohort.json"))
        .expect("example model parses");
    def.config.n_samples = N_SAMPLES;
    def
}

fn value(rows: &[&cohort_core::output::OutcomeRow], sample: usize, strategy_id: u32) -> f64 {
    rows.iter()
        .find(|r| r.sample == sample && r.strategy_id == strategy_id)
        .map(|r| r.value)
        .unwrap()
}

#[test]
fn example_model_produces_complete_tables() {
    let _ = env_logger::builder().is_test(true).try_init();
    let model = CohortModel::build(&definition()).unwrap();
    let out = model.run().unwrap();

    let n_pairs = N_SAMPLES * 2;
    assert_eq!(out.pairs.len(), n_pairs);
    assert_eq!(out.trajectories.len(), n_pairs);
    // qalys, life_years, drug, medical, total
    assert_eq!(out.outcomes.len(), n_pairs * 5);
    assert_eq!(out.occupancy_rows().len(), n_pairs * 86 * 4);

    for traj in &out.trajectories {
        assert_eq!(traj.at(0).to_vec(), vec![1.0, 0.0, 0.0, 0.0]);
        let dead = traj.state(3);
        for t in 1..=85 {
            assert!(dead[t] > dead[t - 1]);
            assert_relative_eq!(traj.at(t).sum(), 1.0, epsilon = 1e-7);
        }
    }
}

#[test]
fn total_cost_is_the_sum_of_categories_and_qalys_trail_life_years() {
    let out = CohortModel::build(&definition()).unwrap().run().unwrap();
    let qalys: Vec<_> = out.outcomes_for(QALYS).collect();
    let ly: Vec<_> = out.outcomes_for(LIFE_YEARS).collect();
    let drug: Vec<_> = out.outcomes_for("drug").collect();
    let medical: Vec<_> = out.outcomes_for("medical").collect();
    let total: Vec<_> = out.outcomes_for(TOTAL_COST).collect();

    for s in 0..N_SAMPLES {
        for k in [1, 2] {
            assert_relative_eq!(
                value(&total, s, k),
                value(&drug, s, k) + value(&medical, s, k),
                max_relative = 1e-12
            );
            assert!(value(&qalys, s, k) < value(&ly, s, k));
        }
    }
}

#[test]
fn new_treatment_buys_qalys_at_a_cost() {
    let def = definition();
    let model = CohortModel::build(&def).unwrap();
    let out = model.run().unwrap();
    let table = CeaTable::from_outcomes(&out.outcomes, model.units().strategies()).unwrap();
    let summary = table.summarize();

    assert_eq!(summary[0].name, "SOC");
    assert!(summary[1].outcomes[QALYS].mean > summary[0].outcomes[QALYS].mean);
    assert!(summary[1].outcomes[TOTAL_COST].mean > summary[0].outcomes[TOTAL_COST].mean);
}

#[test]
fn unit_relative_risk_gives_identical_trajectories() {
    let mut def = definition();
    let rr = def.parameters.iter_mut().find(|p| p.name == "rr_new").unwrap();
    *rr = ParamSpec::new("rr_new", Family::Fixed { value: OneOrMany::One(Quantity::Value(1.0)) });

    let out = CohortModel::build(&def).unwrap().run().unwrap();
    let qalys: Vec<_> = out.outcomes_for(QALYS).collect();
    for s in 0..N_SAMPLES {
        let soc = out.trajectory(s, 1, 1).unwrap();
        let new = out.trajectory(s, 2, 1).unwrap();
        assert_eq!(soc, new, "trajectories differ for sample {s}");
        assert_eq!(value(&qalys, s, 1), value(&qalys, s, 2));
    }
}

#[test]
fn malformed_definitions_fail_before_sampling() {
    let mut def = definition();
    def.outcome.transitions.pop();
    assert!(matches!(
        CohortModel::build(&def),
        Err(SimError::DimensionMismatch { expected: 4, actual: 3, .. })
    ));

    let mut def = definition();
    def.outcome.bindings.clear();
    assert!(matches!(CohortModel::build(&def), Err(SimError::UnknownParameter { .. })));

    let mut def = definition();
    def.config.n_samples = 0;
    assert!(matches!(CohortModel::build(&def), Err(SimError::InvalidConfig(_))));

    let mut def = definition();
    def.config.state_names[2] = "S1".into();
    assert!(matches!(CohortModel::build(&def), Err(SimError::InvalidConfig(_))));
}

#[test]
fn quadrature_choice_is_threaded_through_the_config() {
    let mut left = definition();
    left.config.n_samples = 3;
    let mut right = left.clone();
    right.config.quadrature = "right_riemann".parse().unwrap();

    let l = CohortModel::build(&left).unwrap().run().unwrap();
    let r = CohortModel::build(&right).unwrap().run().unwrap();
    let lq: f64 = l.outcomes_for(LIFE_YEARS).map(|o| o.value).sum();
    let rq: f64 = r.outcomes_for(LIFE_YEARS).map(|o| o.value).sum();
    // Right Riemann values each cycle at its end, after some deaths.
    assert!(rq < lq);
}
