//! Run configuration, threaded explicitly through every stage.
//!
//! There is no ambient state: the seed, horizon, discounting and
//! quadrature of a run all live here and are passed to the sampler,
//! transformer, engine and integrator by reference.

use crate::{
    error::{SimError, SimResult},
    integrate::Quadrature,
    types::{Cycle, StateIndex},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscountRates {
    pub qalys: f64,
    pub costs: f64,
}

impl Default for DiscountRates {
    fn default() -> Self {
        Self { qalys: 0.03, costs: 0.03 }
    }
}

fn default_cycle_length() -> f64 {
    1.0
}

fn default_tolerance() -> f64 {
    1e-9
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Master seed for every PSA stream.
    pub seed:              u64,
    pub n_samples:         usize,
    pub n_cycles:          Cycle,
    /// Cycle length in years.
    #[serde(default = "default_cycle_length")]
    pub cycle_length:      f64,
    pub state_names:       Vec<String>,
    /// Absorbing state; defaults to the last state.
    #[serde(default)]
    pub dead_state:        Option<StateIndex>,
    /// Defaults to unit mass in state 0.
    #[serde(default)]
    pub initial_occupancy: Option<Vec<f64>>,
    #[serde(default)]
    pub discount:          DiscountRates,
    #[serde(default)]
    pub quadrature:        Quadrature,
    #[serde(default = "default_tolerance")]
    pub tolerance:         f64,
    /// Also report undiscounted-weight life-years.
    #[serde(default = "enabled")]
    pub life_years:        bool,
}

impl ModelConfig {
    pub fn n_states(&self) -> usize {
        self.state_names.len()
    }

    pub fn dead_state(&self) -> StateIndex {
        self.dead_state.unwrap_or_else(|| self.n_states().saturating_sub(1))
    }

    /// States other than the absorbing one, in order.
    pub fn alive_states(&self) -> Vec<StateIndex> {
        let dead = self.dead_state();
        (0..self.n_states()).filter(|&s| s != dead).collect()
    }

    pub fn initial_occupancy(&self) -> Vec<f64> {
        self.initial_occupancy.clone().unwrap_or_else(|| {
            let mut v = vec![0.0; self.n_states()];
            if let Some(first) = v.first_mut() {
                *first = 1.0;
            }
            v
        })
    }

    /// Model time in years of grid points 0..=n_cycles.
    pub fn grid_times(&self) -> Vec<f64> {
        (0..=self.n_cycles).map(|k| k as f64 * self.cycle_length).collect()
    }

    /// Fail fast on anything that would otherwise surface mid-run.
    pub fn validate(&self) -> SimResult<()> {
        let n = self.n_states();
        if n < 2 {
            return Err(SimError::InvalidConfig("a model needs at least two states".into()));
        }
        let mut names = BTreeSet::new();
        if let Some(dup) = self.state_names.iter().find(|name| !names.insert(name.as_str())) {
            return Err(SimError::InvalidConfig(format!("state name '{dup}' appears more than once")));
        }
        if self.n_samples == 0 {
            return Err(SimError::InvalidConfig("n_samples must be positive".into()));
        }
        if !(self.cycle_length > 0.0 && self.cycle_length.is_finite()) {
            return Err(SimError::InvalidConfig(format!("cycle_length {} must be positive", self.cycle_length)));
        }
        if !(self.tolerance > 0.0 && self.tolerance < 1e-3) {
            return Err(SimError::InvalidConfig(format!("tolerance {} must lie in (0, 1e-3)", self.tolerance)));
        }
        for (what, rate) in [("qalys", self.discount.qalys), ("costs", self.discount.costs)] {
            if !(rate > -1.0 && rate.is_finite()) {
                return Err(SimError::InvalidConfig(format!("discount rate for {what} must exceed -1, got {rate}")));
            }
        }
        if self.dead_state() >= n {
            return Err(SimError::InvalidConfig(format!("dead_state {} is not one of {n} states", self.dead_state())));
        }
        let initial = self.initial_occupancy();
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
        Ok(())
    }

    /// Config with hardcoded defaults for use in tests: the four-state
    /// healthy / sick / sicker / dead model over 85 annual cycles.
    pub fn default_test() -> Self {
        Self {
            seed:              42,
            n_samples:         100,
            n_cycles:          85,
            cycle_length:      1.0,
            state_names:       vec!["H".into(), "S1".into(), "S2".into(), "D".into()],
            dead_state:        Some(3),
            initial_occupancy: None,
            discount:          DiscountRates::default(),
            quadrature:        Quadrature::LeftRiemann,
            tolerance:         1e-9,
            life_years:        true,
        }
    }
}
