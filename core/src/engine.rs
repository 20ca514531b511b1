//! The cohort transition engine: the heart of the kernel.
//!
//! EXECUTION (per analysis unit × PSA sample):
//!   1. Validate the initial occupancy and the matrix schedule.
//!   2. For t in 0..n_cycles: occupancy[t + 1] = occupancy[t] · P(t).
//!   3. Validate the whole trajectory for accumulated drift.
//!
//! RULES:
//!   - The engine never stops early. A fully absorbed cohort keeps
//!     evolving (a no-op) until n_cycles.
//!   - Cycle t + 1 depends only on cycle t; pairs are independent and run
//!     in parallel with no shared mutable state.
//!   - The full trajectory is retained; integration needs every cycle.

use crate::{
    config::ModelConfig,
    error::{SimError, SimResult},
    tpmatrix::TransitionMatrix,
    types::{Cycle, PairKey, StateIndex},
};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Piecewise-constant transition matrices indexed by cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixSchedule {
    starts:   Vec<Cycle>,
    matrices: Vec<TransitionMatrix>,
}

impl MatrixSchedule {
    /// The same matrix every cycle.
    pub fn homogeneous(matrix: TransitionMatrix) -> Self {
        Self { starts: vec![0], matrices: vec![matrix] }
    }

    /// One matrix per cycle; cycles past the end reuse the last matrix.
    pub fn by_cycle(matrices: Vec<TransitionMatrix>) -> SimResult<Self> {
        let starts = (0..matrices.len()).collect();
        Self::piecewise(starts, matrices)
    }

    /// `matrices[i]` applies from cycle `starts[i]` until the next start.
    pub fn piecewise(starts: Vec<Cycle>, matrices: Vec<TransitionMatrix>) -> SimResult<Self> {
        if matrices.is_empty() || starts.len() != matrices.len() {
            return Err(SimError::DimensionMismatch {
                what:     "matrix schedule starts".into(),
                expected: matrices.len(),
                actual:   starts.len(),
            });
        }
        if starts[0] != 0 || starts.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SimError::InvalidConfig(
                "matrix schedule must start at cycle 0 and increase strictly".into(),
            ));
        }
        let n = matrices[0].n_states();
        if let Some(bad) = matrices.iter().find(|m| m.n_states() != n) {
            return Err(SimError::DimensionMismatch {
                what:     "states of scheduled matrix".into(),
                expected: n,
                actual:   bad.n_states(),
            });
        }
        Ok(Self { starts, matrices })
    }

    pub fn n_states(&self) -> usize {
        self.matrices[0].n_states()
    }

    pub fn is_homogeneous(&self) -> bool {
        self.matrices.len() == 1
    }

    pub fn matrices(&self) -> &[TransitionMatrix] {
        &self.matrices
    }

    /// The matrix that moves the cohort from `cycle` to `cycle + 1`.
    pub fn at(&self, cycle: Cycle) -> &TransitionMatrix {
        let i = self.starts.partition_point(|&s| s <= cycle);
        &self.matrices[i - 1]
    }
}

/// State-occupancy probabilities for cycles `0..=n_cycles`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// Rows are cycles, columns are states.
    occupancy: Array2<f64>,
}

impl Trajectory {
    pub fn n_cycles(&self) -> Cycle {
        self.occupancy.nrows() - 1
    }

    pub fn n_states(&self) -> usize {
        self.occupancy.ncols()
    }

    pub fn at(&self, cycle: Cycle) -> ArrayView1<'_, f64> {
        self.occupancy.row(cycle)
    }

    /// Occupancy of one state across all cycles.
    pub fn state(&self, state: StateIndex) -> ArrayView1<'_, f64> {
        self.occupancy.column(state)
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.occupancy
    }

    /// Every cycle must be a probability vector within `tolerance`.
    pub fn validate(&self, tolerance: f64) -> SimResult<()> {
        for (cycle, row) in self.occupancy.axis_iter(Axis(0)).enumerate() {
            let sum = row.sum();
            if !((sum - 1.0).abs() <= tolerance) || row.iter().any(|p| *p < -tolerance) {
                return Err(SimError::OccupancyDrift { cycle, sum });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CohortEngine {
    pub n_cycles:   Cycle,
    pub dead_state: StateIndex,
    pub tolerance:  f64,
}

impl CohortEngine {
    pub fn new(n_cycles: Cycle, dead_state: StateIndex, tolerance: f64) -> Self {
        Self { n_cycles, dead_state, tolerance }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(config.n_cycles, config.dead_state(), config.tolerance)
    }

    /// Drift allowed across a whole trajectory: each product by a row-
    /// stochastic matrix may move the total by up to `tolerance`.
    pub fn drift_tolerance(&self) -> f64 {
        self.tolerance * (self.n_cycles as f64 + 1.0)
    }

    /// Checks that do not depend on the cycle loop.
    pub fn check_inputs(&self, initial: &[f64], schedule: &MatrixSchedule) -> SimResult<()> {
        let n = schedule.n_states();
        if initial.len() != n {
            return Err(SimError::DimensionMismatch {
                what:     "initial occupancy".into(),
                expected: n,
                actual:   initial.len(),
            });
        }
        let sum: f64 = initial.iter().sum();
        if !((sum - 1.0).abs() <= self.tolerance) || initial.iter().any(|p| *p < 0.0) {
            return Err(SimError::OccupancyDrift { cycle: 0, sum });
        }
        for m in schedule.matrices() {
            if !m.is_absorbing(self.dead_state, self.tolerance) {
                return Err(SimError::NonAbsorbingDeadState { state: self.dead_state });
            }
        }
        Ok(())
    }

    /// Run the chain for `n_cycles` cycles.
    pub fn simulate(&self, initial: &[f64], schedule: &MatrixSchedule) -> SimResult<Trajectory> {
        self.check_inputs(initial, schedule)?;

        let n = schedule.n_states();
        let mut occupancy = Array2::<f64>::zeros((self.n_cycles + 1, n));
        let mut current = Array1::from(initial.to_vec());
        occupancy.row_mut(0).assign(&current);
        for t in 0..self.n_cycles {
            current = current.dot(schedule.at(t).as_array());
            occupancy.row_mut(t + 1).assign(&current);
        }

        let trajectory = Trajectory { occupancy };
        trajectory.validate(self.drift_tolerance())?;
        Ok(trajectory)
    }

    /// Simulate every pair in parallel. The first failure aborts the batch
    /// and names the pair that caused it.
    pub fn simulate_batch(
        &self,
        initial: &[f64],
        pairs: &[(PairKey, &MatrixSchedule)],
    ) -> SimResult<Vec<Trajectory>> {
        let trajectories = pairs
            .par_iter()
            .map(|(key, schedule)| self.simulate(initial, schedule).map_err(|e| e.for_pair(key)))
            .collect::<SimResult<Vec<_>>>()?;
        log::debug!(
            "simulated {} trajectories over {} cycles",
            trajectories.len(),
            self.n_cycles
        );
        Ok(trajectories)
    }
}
