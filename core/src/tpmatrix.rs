//! Transition probability matrices.
//!
//! INVARIANTS (checked by `TransitionMatrix::new`, never repaired):
//!   - The matrix is square.
//!   - Every entry lies in [0, 1].
//!   - Every row sums to 1 within the configured tolerance.
//!
//! A residual ("complement") entry is computed as 1 minus the rest of its
//! row after every other entry is resolved. A negative residual means the
//! parameterization is inconsistent and is reported, not clipped.

use crate::{
    error::{SimError, SimResult},
    types::StateIndex,
};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionMatrix {
    probs: Array2<f64>,
}

impl TransitionMatrix {
    pub fn new(probs: Array2<f64>, tolerance: f64) -> SimResult<Self> {
        let m = Self { probs };
        m.validate(tolerance)?;
        Ok(m)
    }

    pub fn from_rows(rows: &[Vec<f64>], tolerance: f64) -> SimResult<Self> {
        let n = rows.len();
        let mut probs = Array2::zeros((n, n));
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n {
                return Err(SimError::DimensionMismatch {
                    what:     format!("row {i} of transition matrix"),
                    expected: n,
                    actual:   row.len(),
                });
            }
            for (j, v) in row.iter().enumerate() {
                probs[[i, j]] = *v;
            }
        }
        Self::new(probs, tolerance)
    }

    /// Row-normalized transition counts (the mean of a row-wise Dirichlet).
    pub fn from_counts(counts: &[Vec<f64>], tolerance: f64) -> SimResult<Self> {
        let rows = counts
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let total: f64 = row.iter().sum();
                if !(total > 0.0) || row.iter().any(|c| *c < 0.0) {
                    return Err(SimError::InvalidDistributionParameters {
                        param:  format!("counts row {i}"),
                        family: "dirichlet",
                        reason: "counts must be non-negative with a positive total".into(),
                    });
                }
                Ok(row.iter().map(|c| c / total).collect())
            })
            .collect::<SimResult<Vec<Vec<f64>>>>()?;
        Self::from_rows(&rows, tolerance)
    }

    /// Build from rows where `None` marks the residual entry of that row.
    /// Each row may hold at most one residual.
    pub fn with_complements(rows: &[Vec<Option<f64>>], tolerance: f64) -> SimResult<Self> {
        let n = rows.len();
        let mut probs = Array2::zeros((n, n));
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n {
                return Err(SimError::DimensionMismatch {
                    what:     format!("row {i} of transition matrix"),
                    expected: n,
                    actual:   row.len(),
                });
            }
            let holes: Vec<usize> = (0..n).filter(|&j| row[j].is_none()).collect();
            if holes.len() > 1 {
                return Err(SimError::InvalidConfig(format!("row {i} has {} complement entries", holes.len())));
            }
            let known: Vec<f64> = row.iter().flatten().copied().collect();
            for (j, v) in row.iter().enumerate() {
                probs[[i, j]] = v.unwrap_or(0.0);
            }
            if let Some(&j) = holes.first() {
                probs[[i, j]] = complete_row(&known, i, tolerance)?;
            }
        }
        Self::new(probs, tolerance)
    }

    pub fn identity(n_states: usize) -> Self {
        Self { probs: Array2::eye(n_states) }
    }

    /// Probabilities over one cycle of length `dt` from a transition
    /// intensity matrix (off-diagonal rates, rows summing to zero).
    pub fn from_rate_matrix(q: &Array2<f64>, dt: f64, tolerance: f64) -> SimResult<Self> {
        let (r, c) = q.dim();
        if r != c {
            return Err(SimError::DimensionMismatch { what: "rate matrix columns".into(), expected: r, actual: c });
        }
        if !(dt.is_finite() && dt >= 0.0) {
            return Err(SimError::InvalidConfig(format!("rate matrix step {dt} must be finite and non-negative")));
        }
        for (i, row) in q.axis_iter(Axis(0)).enumerate() {
            if let Some(j) = row.iter().position(|v| !v.is_finite()) {
                return Err(SimError::InvalidConfig(format!("rate matrix entry ({i}, {j}) is {}", row[j])));
            }
            let sum: f64 = row.sum();
            if !(sum.abs() <= tolerance.max(1e-9) * (1.0 + row.iter().map(|v| v.abs()).sum::<f64>())) {
                return Err(SimError::InvalidConfig(format!("rate matrix row {i} sums to {sum}, expected 0")));
            }
        }
        let mut p = expm(&(q * dt));
        // exp(Q dt) is a stochastic matrix; round-off can leave tiny negatives.
        p.mapv_inplace(|v| if v < 0.0 && v > -tolerance { 0.0 } else { v });
        Self::new(p, tolerance)
    }

    pub fn n_states(&self) -> usize {
        self.probs.nrows()
    }

    pub fn get(&self, from: StateIndex, to: StateIndex) -> f64 {
        self.probs[[from, to]]
    }

    pub fn row(&self, from: StateIndex) -> ArrayView1<'_, f64> {
        self.probs.row(from)
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.probs
    }

    /// True when all mass in `state` stays there.
    pub fn is_absorbing(&self, state: StateIndex, tolerance: f64) -> bool {
        state < self.n_states() && (self.probs[[state, state]] - 1.0).abs() <= tolerance
    }

    /// Multiply the given entries by `rr` and recompute the diagonal of
    /// every touched row as its complement.
    pub fn apply_rr(&self, rr: f64, cells: &[(StateIndex, StateIndex)], tolerance: f64) -> SimResult<Self> {
        let n = self.n_states();
        let mut probs = self.probs.clone();
        let mut touched = vec![false; n];
        for &(i, j) in cells {
            if i >= n || j >= n || i == j {
                return Err(SimError::InvalidConfig(format!(
                    "relative risk cell ({i}, {j}) must be off-diagonal and inside a {n}x{n} matrix"
                )));
            }
            probs[[i, j]] *= rr;
            touched[i] = true;
        }
        for (i, _) in touched.iter().enumerate().filter(|(_, t)| **t) {
            let others: Vec<f64> = (0..n).filter(|&j| j != i).map(|j| probs[[i, j]]).collect();
            probs[[i, i]] = complete_row(&others, i, tolerance)?;
        }
        Self::new(probs, tolerance)
    }

    pub fn validate(&self, tolerance: f64) -> SimResult<()> {
        let (r, c) = self.probs.dim();
        if r != c {
            return Err(SimError::DimensionMismatch {
                what:     "transition matrix columns".into(),
                expected: r,
                actual:   c,
            });
        }
        for (i, row) in self.probs.axis_iter(Axis(0)).enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if !(-tolerance..=1.0 + tolerance).contains(&v) {
                    return Err(SimError::ProbabilityOutOfRange { row: i, col: j, value: v });
                }
            }
            let sum = row.sum();
            if !((sum - 1.0).abs() <= tolerance) {
                return Err(SimError::NonStochasticMatrix { row: i, sum });
            }
        }
        Ok(())
    }
}

/// Residual `1 - sum(others)` for row `row`.
///
/// A residual within `tolerance` below zero is round-off and becomes 0;
/// anything further below is `NegativeResidualProbability`.
pub fn complete_row(others: &[f64], row: StateIndex, tolerance: f64) -> SimResult<f64> {
    let residual = 1.0 - others.iter().sum::<f64>();
    if residual.is_nan() {
        return Err(SimError::NonFiniteValue { what: format!("residual of row {row}") });
    }
    if residual < -tolerance {
        return Err(SimError::NegativeResidualProbability { row, residual });
    }
    Ok(residual.max(0.0))
}

/// Probability of at least one event in `time` at constant `rate`.
pub fn rate_to_prob(rate: f64, time: f64) -> f64 {
    1.0 - (-rate * time).exp()
}

/// Constant rate implied by an event probability over `time`.
pub fn prob_to_rate(prob: f64, time: f64) -> f64 {
    -(1.0 - prob).ln() / time
}

/// Matrix exponential by scaling and squaring with a Taylor series.
fn expm(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let norm = a
        .axis_iter(Axis(0))
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max);
    let squarings = if norm > 0.5 { (norm / 0.5).log2().ceil() as i32 } else { 0 };
    let scaled = a / 2f64.powi(squarings);

    let mut result = Array2::<f64>::eye(n);
    let mut term = Array2::<f64>::eye(n);
    for k in 1..=20 {
        term = term.dot(&scaled) / k as f64;
        result += &term;
    }
    for _ in 0..squarings {
        result = result.dot(&result);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn expm_of_zero_is_identity() {
        let z = Array2::<f64>::zeros((3, 3));
        assert_eq!(expm(&z), Array2::<f64>::eye(3));
    }

    #[test]
    fn expm_matches_scalar_exponential_on_diagonal() {
        let a = array![[-2.0, 0.0], [0.0, 0.5]];
        let e = expm(&a);
        assert!((e[[0, 0]] - (-2.0f64).exp()).abs() < 1e-12);
        assert!((e[[1, 1]] - 0.5f64.exp()).abs() < 1e-12);
        assert!(e[[0, 1]].abs() < 1e-15);
    }
}
