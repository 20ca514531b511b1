use approx::assert_relative_eq;
use cohort_core::{
    config::ModelConfig,
    engine::{CohortEngine, MatrixSchedule},
    error::SimError,
    tpmatrix::TransitionMatrix,
    types::PairKey,
};

const TOL: f64 = 1e-9;

/// Mean transition probabilities of the four-state H / S1 / S2 / D model.
fn soc_matrix() -> TransitionMatrix {
    TransitionMatrix::from_counts(
        &[
            vec![848.0, 150.0, 0.0, 2.0],
            vec![450.0, 355.0, 95.0, 5.0],
            vec![0.0, 0.0, 784.0, 16.0],
            vec![0.0, 0.0, 0.0, 23.0],
        ],
        TOL,
    )
    .unwrap()
}

fn engine() -> CohortEngine {
    CohortEngine::from_config(&ModelConfig::default_test())
}

#[test]
fn death_accumulates_monotonically_and_mass_is_conserved() {
    let engine = engine();
    let traj = engine
        .simulate(&[1.0, 0.0, 0.0, 0.0], &MatrixSchedule::homogeneous(soc_matrix()))
        .unwrap();

    assert_eq!(traj.n_cycles(), 85);
    assert_eq!(traj.n_states(), 4);
    let dead = traj.state(3);
    for t in 1..=traj.n_cycles() {
        assert!(dead[t] > dead[t - 1], "D did not increase at cycle {t}");
        assert!(dead[t] <= 1.0);
    }
    for t in 0..=traj.n_cycles() {
        assert_relative_eq!(traj.at(t).sum(), 1.0, epsilon = engine.drift_tolerance());
        assert!(traj.at(t).iter().all(|p| *p >= 0.0));
    }
}

#[test]
fn cycle_zero_is_the_initial_occupancy() {
    let initial = [0.6, 0.3, 0.1, 0.0];
    let traj = engine().simulate(&initial, &MatrixSchedule::homogeneous(soc_matrix())).unwrap();
    assert_eq!(traj.at(0).to_vec(), initial.to_vec());
}

#[test]
fn first_cycle_is_initial_times_matrix() {
    let m = soc_matrix();
    let traj = engine().simulate(&[1.0, 0.0, 0.0, 0.0], &MatrixSchedule::homogeneous(m.clone())).unwrap();
    for j in 0..4 {
        assert_relative_eq!(traj.at(1)[j], m.get(0, j), epsilon = 1e-15);
    }
}

#[test]
fn identity_matrix_leaves_occupancy_unchanged() {
    let initial = [0.25, 0.25, 0.5, 0.0];
    let traj = engine()
        .simulate(&initial, &MatrixSchedule::homogeneous(TransitionMatrix::identity(4)))
        .unwrap();
    for t in 0..=traj.n_cycles() {
        assert_eq!(traj.at(t).to_vec(), initial.to_vec());
    }
}

#[test]
fn simulation_is_idempotent() {
    let schedule = MatrixSchedule::homogeneous(soc_matrix());
    let a = engine().simulate(&[1.0, 0.0, 0.0, 0.0], &schedule).unwrap();
    let b = engine().simulate(&[1.0, 0.0, 0.0, 0.0], &schedule).unwrap();
    assert_eq!(a, b);
}

#[test]
fn fully_absorbed_cohort_keeps_running_to_the_horizon() {
    let engine = CohortEngine::new(10, 1, TOL);
    let die = TransitionMatrix::from_rows(&[vec![0.0, 1.0], vec![0.0, 1.0]], TOL).unwrap();
    let traj = engine.simulate(&[1.0, 0.0], &MatrixSchedule::homogeneous(die)).unwrap();
    assert_eq!(traj.n_cycles(), 10);
    for t in 1..=10 {
        assert_eq!(traj.at(t).to_vec(), vec![0.0, 1.0]);
    }
}

#[test]
fn non_absorbing_dead_state_is_rejected_before_the_loop() {
    let engine = CohortEngine::new(5, 1, TOL);
    let leaky = TransitionMatrix::from_rows(&[vec![0.9, 0.1], vec![0.1, 0.9]], TOL).unwrap();
    let err = engine.simulate(&[1.0, 0.0], &MatrixSchedule::homogeneous(leaky)).unwrap_err();
    assert!(matches!(err, SimError::NonAbsorbingDeadState { state: 1 }));
}

#[test]
fn initial_occupancy_must_match_and_sum_to_one() {
    let schedule = MatrixSchedule::homogeneous(soc_matrix());
    let err = engine().simulate(&[1.0, 0.0], &schedule).unwrap_err();
    assert!(matches!(err, SimError::DimensionMismatch { expected: 4, actual: 2, .. }));

    let err = engine().simulate(&[0.5, 0.2, 0.0, 0.0], &schedule).unwrap_err();
    assert!(matches!(err, SimError::OccupancyDrift { cycle: 0, .. }));
}

#[test]
fn piecewise_schedule_switches_matrix_at_its_start_cycle() {
    let stay = TransitionMatrix::identity(2);
    let die = TransitionMatrix::from_rows(&[vec![0.5, 0.5], vec![0.0, 1.0]], TOL).unwrap();
    let schedule = MatrixSchedule::piecewise(vec![0, 3], vec![stay, die]).unwrap();
    assert!(!schedule.is_homogeneous());
    assert_eq!(schedule.at(2).get(0, 0), 1.0);
    assert_eq!(schedule.at(3).get(0, 0), 0.5);
    assert_eq!(schedule.at(50).get(0, 0), 0.5);

    let traj = CohortEngine::new(5, 1, TOL).simulate(&[1.0, 0.0], &schedule).unwrap();
    assert_eq!(traj.state(0).to_vec(), vec![1.0, 1.0, 1.0, 1.0, 0.5, 0.25]);
}

#[test]
fn piecewise_schedule_must_start_at_zero_and_increase() {
    let m = || TransitionMatrix::identity(2);
    assert!(MatrixSchedule::piecewise(vec![1], vec![m()]).is_err());
    assert!(MatrixSchedule::piecewise(vec![0, 2, 2], vec![m(), m(), m()]).is_err());
    assert!(MatrixSchedule::piecewise(vec![0], vec![m(), m()]).is_err());
    assert!(MatrixSchedule::piecewise(vec![0, 1], vec![m(), TransitionMatrix::identity(3)]).is_err());
}

#[test]
fn batch_errors_name_the_failing_pair() {
    let engine = CohortEngine::new(5, 1, TOL);
    let good = MatrixSchedule::homogeneous(TransitionMatrix::identity(2));
    let leaky = MatrixSchedule::homogeneous(
        TransitionMatrix::from_rows(&[vec![0.9, 0.1], vec![0.2, 0.8]], TOL).unwrap(),
    );
    let key = |sample, strategy_id| PairKey { sample, unit: 0, strategy_id, patient_id: 1 };

    let ok = engine.simulate_batch(&[1.0, 0.0], &[(key(0, 1), &good), (key(1, 1), &good)]).unwrap();
    assert_eq!(ok.len(), 2);

    let err = engine
        .simulate_batch(&[1.0, 0.0], &[(key(0, 1), &good), (key(7, 2), &leaky)])
        .unwrap_err();
    match &err {
        SimError::Pair { sample, strategy_id, patient_id, .. } => {
            assert_eq!((*sample, *strategy_id, *patient_id), (7, 2, 1));
        }
        other => panic!("expected pair context, got {other}"),
    }
    assert!(matches!(err.root(), SimError::NonAbsorbingDeadState { state: 1 }));
}
