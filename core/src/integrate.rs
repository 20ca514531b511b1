//! Outcome integrator: discounted QALYs, life-years and costs.
//!
//! Grid point k sits at model time t_k = k * cycle_length (years). The
//! value at a grid point is the occupancy-weighted state value, scaled by
//! the discount factor (1 + r)^(-t_k). Quadrature over the n_cycles
//! intervals:
//!
//!   left_riemann   sum_{k=0}^{n-1} v_k * dt
//!   right_riemann  sum_{k=1}^{n}   v_k * dt
//!   trapezoidal    sum_{k=0}^{n-1} (v_k + v_{k+1}) / 2 * dt
//!
//! State values are annual rates (QALYs or costs per year in the state).

use crate::{
    engine::Trajectory,
    error::{SimError, SimResult},
    types::{Cycle, StateIndex},
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quadrature {
    #[default]
    LeftRiemann,
    RightRiemann,
    Trapezoidal,
}

impl Quadrature {
    pub fn name(&self) -> &'static str {
        match self {
            Quadrature::LeftRiemann  => "left_riemann",
            Quadrature::RightRiemann => "right_riemann",
            Quadrature::Trapezoidal  => "trapezoidal",
        }
    }
}

impl FromStr for Quadrature {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left_riemann"  => Ok(Quadrature::LeftRiemann),
            "right_riemann" => Ok(Quadrature::RightRiemann),
            "trapezoidal"   => Ok(Quadrature::Trapezoidal),
            other => Err(SimError::UnknownQuadrature { name: other.to_string() }),
        }
    }
}

/// How a state value accrues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueMethod {
    /// Weighted length of stay: integrated over the trajectory.
    #[default]
    Wlos,
    /// A one-time value at model start, weighted by initial occupancy.
    Starting,
}

/// Per-state values, constant or indexed by grid point (calendar cycle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateWeights {
    by_point: Vec<Vec<f64>>,
}

impl StateWeights {
    pub fn constant(values: Vec<f64>) -> Self {
        Self { by_point: vec![values] }
    }

    /// One vector per grid point; points past the end reuse the last one.
    pub fn by_cycle(values: Vec<Vec<f64>>) -> SimResult<Self> {
        let Some(first) = values.first() else {
            return Err(SimError::InvalidConfig("time-varying weights need at least one cycle".into()));
        };
        let n = first.len();
        if let Some(bad) = values.iter().find(|v| v.len() != n) {
            return Err(SimError::DimensionMismatch { what: "state weights".into(), expected: n, actual: bad.len() });
        }
        Ok(Self { by_point: values })
    }

    /// Unit weight on every state but `dead_state`.
    pub fn life_years(n_states: usize, dead_state: StateIndex) -> Self {
        Self::constant((0..n_states).map(|s| if s == dead_state { 0.0 } else { 1.0 }).collect())
    }

    pub fn n_states(&self) -> usize {
        self.by_point[0].len()
    }

    pub fn is_time_varying(&self) -> bool {
        self.by_point.len() > 1
    }

    pub fn at(&self, point: Cycle) -> &[f64] {
        &self.by_point[point.min(self.by_point.len() - 1)]
    }
}

/// (1 + rate)^(-time).
pub fn discount_factor(rate: f64, time: f64) -> f64 {
    (1.0 + rate).powf(-time)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Integrator {
    pub quadrature:   Quadrature,
    pub cycle_length: f64,
}

impl Integrator {
    pub fn new(quadrature: Quadrature, cycle_length: f64) -> Self {
        Self { quadrature, cycle_length }
    }

    /// Total discounted value of `weights` along `trajectory`.
    pub fn integrate(
        &self,
        trajectory: &Trajectory,
        weights: &StateWeights,
        method: ValueMethod,
        discount_rate: f64,
    ) -> SimResult<f64> {
        if weights.n_states() != trajectory.n_states() {
            return Err(SimError::DimensionMismatch {
                what:     "state weights".into(),
                expected: trajectory.n_states(),
                actual:   weights.n_states(),
            });
        }
        let total = match method {
            ValueMethod::Starting => point_value(trajectory, weights, 0),
            ValueMethod::Wlos => {
                let dt = self.cycle_length;
                let n = trajectory.n_cycles();
                let v = |k: Cycle| point_value(trajectory, weights, k) * discount_factor(discount_rate, k as f64 * dt);
                match self.quadrature {
                    Quadrature::LeftRiemann  => (0..n).map(v).sum::<f64>() * dt,
                    Quadrature::RightRiemann => (1..=n).map(v).sum::<f64>() * dt,
                    Quadrature::Trapezoidal  => (0..n).map(|k| (v(k) + v(k + 1)) * 0.5).sum::<f64>() * dt,
                }
            }
        };
        if !total.is_finite() {
            return Err(SimError::NonFiniteValue { what: "integrated outcome".into() });
        }
        Ok(total)
    }
}

fn point_value(trajectory: &Trajectory, weights: &StateWeights, point: Cycle) -> f64 {
    trajectory
        .at(point)
        .iter()
        .zip(weights.at(point))
        .map(|(p, w)| p * w)
        .sum()
}
