use approx::assert_relative_eq;
use cohort_core::{
    error::SimError,
    tpmatrix::{complete_row, prob_to_rate, rate_to_prob, TransitionMatrix},
};
use ndarray::array;

const TOL: f64 = 1e-9;

#[test]
fn complement_fills_the_residual() {
    let p = complete_row(&[0.15, 0.0, 0.02], 0, TOL).unwrap();
    assert_relative_eq!(p, 0.83, epsilon = 1e-12);
}

#[test]
fn negative_residual_is_an_error_not_clamped() {
    let err = complete_row(&[0.6, 0.45], 1, TOL).unwrap_err();
    match err {
        SimError::NegativeResidualProbability { row, residual } => {
            assert_eq!(row, 1);
            assert_relative_eq!(residual, -0.05, epsilon = 1e-12);
        }
        other => panic!("expected NegativeResidualProbability, got {other}"),
    }
}

#[test]
fn residual_within_tolerance_is_round_off() {
    let p = complete_row(&[0.5, 0.5 + 1e-12], 0, TOL).unwrap();
    assert_eq!(p, 0.0);
}

#[test]
fn with_complements_builds_a_valid_matrix() {
    let m = TransitionMatrix::with_complements(
        &[
            vec![None, Some(0.15), Some(0.0), Some(0.02)],
            vec![Some(0.1), None, Some(0.05), Some(0.01)],
            vec![Some(0.0), Some(0.0), None, Some(0.2)],
            vec![Some(0.0), Some(0.0), Some(0.0), Some(1.0)],
        ],
        TOL,
    )
    .unwrap();
    assert_relative_eq!(m.get(0, 0), 0.83, epsilon = 1e-12);
    assert_relative_eq!(m.get(1, 1), 0.84, epsilon = 1e-12);
    assert_relative_eq!(m.get(2, 2), 0.8, epsilon = 1e-12);
    assert!(m.is_absorbing(3, TOL));
    assert!(!m.is_absorbing(0, TOL));
}

#[test]
fn two_complements_in_a_row_are_rejected() {
    let err = TransitionMatrix::with_complements(&[vec![None, None], vec![Some(0.0), Some(1.0)]], TOL).unwrap_err();
    assert!(matches!(err, SimError::InvalidConfig(_)));
}

#[test]
fn rows_that_do_not_sum_to_one_are_rejected() {
    let err = TransitionMatrix::from_rows(&[vec![0.5, 0.4], vec![0.0, 1.0]], TOL).unwrap_err();
    assert!(matches!(err, SimError::NonStochasticMatrix { row: 0, .. }));
}

#[test]
fn entries_outside_unit_interval_are_rejected() {
    let err = TransitionMatrix::from_rows(&[vec![1.2, -0.2], vec![0.0, 1.0]], TOL).unwrap_err();
    assert!(matches!(err, SimError::ProbabilityOutOfRange { row: 0, col: 0, .. }));
}

#[test]
fn ragged_rows_are_a_dimension_mismatch() {
    let err = TransitionMatrix::from_rows(&[vec![1.0, 0.0], vec![1.0]], TOL).unwrap_err();
    assert!(matches!(err, SimError::DimensionMismatch { expected: 2, actual: 1, .. }));
}

#[test]
fn counts_are_row_normalized() {
    let m = TransitionMatrix::from_counts(&[vec![848.0, 150.0, 0.0, 2.0], vec![0.0, 0.0, 0.0, 23.0], vec![1.0, 1.0, 2.0, 0.0], vec![0.0, 0.0, 0.0, 5.0]], TOL)
        .unwrap();
    assert_relative_eq!(m.get(0, 0), 0.848);
    assert_relative_eq!(m.get(2, 2), 0.5);
    assert_eq!(m.get(1, 3), 1.0);
}

#[test]
fn relative_risk_scales_cells_and_recomputes_the_diagonal() {
    let m = TransitionMatrix::from_rows(
        &[vec![0.7, 0.2, 0.1], vec![0.0, 0.9, 0.1], vec![0.0, 0.0, 1.0]],
        TOL,
    )
    .unwrap();
    let treated = m.apply_rr(0.5, &[(0, 1), (0, 2), (1, 2)], TOL).unwrap();
    assert_relative_eq!(treated.get(0, 1), 0.1, epsilon = 1e-12);
    assert_relative_eq!(treated.get(0, 2), 0.05, epsilon = 1e-12);
    assert_relative_eq!(treated.get(0, 0), 0.85, epsilon = 1e-12);
    assert_relative_eq!(treated.get(1, 1), 0.95, epsilon = 1e-12);
    assert_eq!(treated.row(2), m.row(2));

    // Unit relative risk leaves the matrix unchanged.
    let same = m.apply_rr(1.0, &[(0, 1), (0, 2), (1, 2)], TOL).unwrap();
    for i in 0..3 {
        for j in 0..3 {
            assert_relative_eq!(same.get(i, j), m.get(i, j), epsilon = 1e-15);
        }
    }
}

#[test]
fn relative_risk_that_overflows_a_row_is_reported() {
    let m = TransitionMatrix::from_rows(&[vec![0.4, 0.6], vec![0.0, 1.0]], TOL).unwrap();
    let err = m.apply_rr(2.0, &[(0, 1)], TOL).unwrap_err();
    assert!(matches!(err, SimError::NegativeResidualProbability { row: 0, .. }));
}

#[test]
fn relative_risk_on_the_diagonal_is_rejected() {
    let m = TransitionMatrix::identity(2);
    assert!(matches!(m.apply_rr(0.5, &[(1, 1)], TOL), Err(SimError::InvalidConfig(_))));
}

#[test]
fn rate_matrix_converts_to_cycle_probabilities() {
    // Single competing exit: P(stay) = exp(-rate * dt).
    let q = array![[-0.3, 0.2, 0.1], [0.0, -0.5, 0.5], [0.0, 0.0, 0.0]];
    let m = TransitionMatrix::from_rate_matrix(&q, 1.0, TOL).unwrap();
    assert_relative_eq!(m.get(0, 0), (-0.3f64).exp(), epsilon = 1e-10);
    assert_relative_eq!(m.get(1, 1), (-0.5f64).exp(), epsilon = 1e-10);
    assert_relative_eq!(m.get(1, 2), 1.0 - (-0.5f64).exp(), epsilon = 1e-10);
    assert!(m.is_absorbing(2, TOL));
    for i in 0..3 {
        assert_relative_eq!(m.row(i).sum(), 1.0, epsilon = 1e-10);
    }
}

#[test]
fn rate_matrix_rows_must_sum_to_zero() {
    let q = array![[-0.3, 0.2], [0.0, 0.0]];
    assert!(matches!(TransitionMatrix::from_rate_matrix(&q, 1.0, TOL), Err(SimError::InvalidConfig(_))));
}

#[test]
fn non_finite_rates_are_rejected() {
    let inf = array![[f64::NEG_INFINITY, f64::INFINITY], [0.0, 0.0]];
    assert!(matches!(TransitionMatrix::from_rate_matrix(&inf, 1.0, TOL), Err(SimError::InvalidConfig(_))));

    let nan = array![[f64::NAN, 0.0], [0.0, 0.0]];
    assert!(matches!(TransitionMatrix::from_rate_matrix(&nan, 1.0, TOL), Err(SimError::InvalidConfig(_))));

    let q = array![[-0.3, 0.3], [0.0, 0.0]];
    assert!(TransitionMatrix::from_rate_matrix(&q, f64::INFINITY, TOL).is_err());
}

#[test]
fn rate_and_probability_are_inverse() {
    let p = rate_to_prob(0.2, 0.5);
    assert_relative_eq!(p, 1.0 - (-0.1f64).exp());
    assert_relative_eq!(prob_to_rate(p, 0.5), 0.2, epsilon = 1e-12);
}
