//! Kernel output tables, consumed by reporting and the CEA evaluator.

use crate::types::{Cycle, PatientId, SampleIndex, StateIndex, StrategyId};
use serde::{Deserialize, Serialize};

/// Outcome category names used in `OutcomeRow::category`.
pub const QALYS: &str = "qalys";
pub const LIFE_YEARS: &str = "life_years";
/// Sum of every cost category.
pub const TOTAL_COST: &str = "total";

/// One cell of the state-occupancy table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyRow {
    pub strategy_id: StrategyId,
    pub patient_id:  PatientId,
    pub sample:      SampleIndex,
    pub cycle:       Cycle,
    /// Model time in years at the start of `cycle`.
    pub time:        f64,
    pub state:       StateIndex,
    pub prob:        f64,
}

/// One discounted total for an (analysis unit, sample, category).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRow {
    pub strategy_id:    StrategyId,
    pub patient_id:     PatientId,
    pub group_id:       Option<u32>,
    pub sample:         SampleIndex,
    pub category:       String,
    pub discount_rate:  f64,
    pub value:          f64,
    /// Patient weight used when averaging over patients.
    pub patient_weight: f64,
}

/// Mean and central 95% interval of a set of draws.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean:  f64,
    pub lower: f64,
    pub upper: f64,
}

impl Summary {
    pub fn from_draws(draws: &[f64]) -> Self {
        if draws.is_empty() {
            return Self { mean: f64::NAN, lower: f64::NAN, upper: f64::NAN };
        }
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let mut sorted = draws.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Self {
            mean,
            lower: quantile_sorted(&sorted, 0.025),
            upper: quantile_sorted(&sorted, 0.975),
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} ({:.2}, {:.2})", self.mean, self.lower, self.upper)
    }
}

/// Linear-interpolation quantile of already sorted values.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = h.ceil() as usize;
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}
