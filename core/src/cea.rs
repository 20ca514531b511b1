//! Cost-effectiveness evaluation of integrated outcomes.
//!
//! Per-patient totals are first reduced to a (sample × strategy) table by
//! a patient-weighted mean. Everything else works on those tables:
//!
//!   NMB(s, k)      = wtp * QALYs(s, k) - cost(s, k)
//!   CEAC(k, wtp)   = P(strategy k has the highest NMB)
//!   CEAF(wtp)      = strategy with the highest expected NMB, with its CEAC
//!   EVPI(wtp)      = E[max_k NMB] - max_k E[NMB]
//!
//! Ties on NMB go to the strategy listed first.

use crate::{
    error::{SimError, SimResult},
    output::{OutcomeRow, Summary, QALYS, TOTAL_COST},
    types::StrategyId,
    units::Strategy,
};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Differences smaller than this count as zero when labelling dominance.
const DOMINANCE_EPS: f64 = 1e-12;

/// Per-sample, per-strategy means of every outcome category.
#[derive(Debug, Clone)]
pub struct CeaTable {
    strategies: Vec<Strategy>,
    /// category -> (sample × strategy)
    categories: BTreeMap<String, Array2<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySummary {
    pub strategy_id: StrategyId,
    pub name:        String,
    /// Keyed by outcome category.
    pub outcomes:    BTreeMap<String, Summary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Icer {
    Ratio { value: f64 },
    /// More QALYs for no more cost.
    Dominant,
    /// No more QALYs for more cost.
    Dominated,
    NoDifference,
}

impl std::fmt::Display for Icer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Icer::Ratio { value } => write!(f, "{value:.0}"),
            Icer::Dominant => write!(f, "dominant"),
            Icer::Dominated => write!(f, "dominated"),
            Icer::NoDifference => write!(f, "no difference"),
        }
    }
}

/// Label the mean increments of a strategy over its comparator.
pub fn classify_icer(d_qalys: f64, d_costs: f64) -> Icer {
    let q_zero = d_qalys.abs() < DOMINANCE_EPS;
    let c_zero = d_costs.abs() < DOMINANCE_EPS;
    match (q_zero, c_zero) {
        (true, true) => Icer::NoDifference,
        // Equal effect: cost alone decides.
        (true, false) if d_costs > 0.0 => Icer::Dominated,
        (true, false) => Icer::Dominant,
        _ if d_qalys >= 0.0 && d_costs <= 0.0 => Icer::Dominant,
        _ if d_qalys <= 0.0 && d_costs >= 0.0 => Icer::Dominated,
        _ => Icer::Ratio { value: d_costs / d_qalys },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcerRow {
    pub strategy_id:   StrategyId,
    pub comparator_id: StrategyId,
    pub d_qalys:       Summary,
    pub d_costs:       Summary,
    pub icer:          Icer,
    /// Incremental net monetary benefit at `wtp`.
    pub wtp:           f64,
    pub inmb:          Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CeacPoint {
    pub wtp:         f64,
    pub strategy_id: StrategyId,
    pub probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvpiPoint {
    pub wtp:  f64,
    pub evpi: f64,
}

impl CeaTable {
    /// Reduce outcome rows to patient-weighted means per (sample, strategy).
    /// Every strategy must have rows for every sample.
    pub fn from_outcomes(outcomes: &[OutcomeRow], strategies: &[Strategy]) -> SimResult<Self> {
        if strategies.is_empty() {
            return Err(SimError::InvalidConfig("cost-effectiveness needs at least one strategy".into()));
        }
        let n_samples = outcomes.iter().map(|r| r.sample + 1).max().unwrap_or(0);
        if n_samples == 0 {
            return Err(SimError::InvalidConfig("no outcome rows to evaluate".into()));
        }
        let column: BTreeMap<StrategyId, usize> = strategies
            .iter()
            .enumerate()
            .map(|(k, s)| (s.strategy_id, k))
            .collect();

        // category -> (weighted sums, weights)
        let mut acc: BTreeMap<&str, (Array2<f64>, Array2<f64>)> = BTreeMap::new();
        for row in outcomes {
            let k = *column.get(&row.strategy_id).ok_or_else(|| {
                SimError::InvalidConfig(format!("outcome row for unknown strategy {}", row.strategy_id))
            })?;
            let (sums, weights) = acc.entry(row.category.as_str()).or_insert_with(|| {
                (
                    Array2::zeros((n_samples, strategies.len())),
                    Array2::zeros((n_samples, strategies.len())),
                )
            });
            sums[[row.sample, k]] += row.patient_weight * row.value;
            weights[[row.sample, k]] += row.patient_weight;
        }

        let mut categories = BTreeMap::new();
        for (name, (sums, weights)) in acc {
            if let Some(((s, k), _)) = weights.indexed_iter().find(|(_, w)| !(**w > 0.0)) {
                return Err(SimError::InvalidConfig(format!(
                    "no weighted '{name}' outcome for sample {s}, strategy {}",
                    strategies[k].strategy_id
                )));
            }
            categories.insert(name.to_string(), sums / weights);
        }
        for required in [QALYS, TOTAL_COST] {
            if !categories.contains_key(required) {
                return Err(SimError::InvalidConfig(format!("missing '{required}' outcomes")));
            }
        }
        log::debug!(
            "cost-effectiveness table: {n_samples} samples x {} strategies, {} categories",
            strategies.len(),
            categories.len()
        );
        Ok(Self { strategies: strategies.to_vec(), categories })
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn n_samples(&self) -> usize {
        self.qalys().nrows()
    }

    pub fn category(&self, name: &str) -> Option<&Array2<f64>> {
        self.categories.get(name)
    }

    pub fn qalys(&self) -> &Array2<f64> {
        &self.categories[QALYS]
    }

    pub fn costs(&self) -> &Array2<f64> {
        &self.categories[TOTAL_COST]
    }

    fn column_of(&self, id: StrategyId) -> SimResult<usize> {
        self.strategies
            .iter()
            .position(|s| s.strategy_id == id)
            .ok_or_else(|| SimError::InvalidConfig(format!("unknown strategy {id}")))
    }

    /// Net monetary benefit per (sample, strategy).
    pub fn nmb(&self, wtp: f64) -> Array2<f64> {
        self.qalys() * wtp - self.costs()
    }

    pub fn summarize(&self) -> Vec<StrategySummary> {
        self.strategies
            .iter()
            .enumerate()
            .map(|(k, s)| StrategySummary {
                strategy_id: s.strategy_id,
                name:        s.name.clone(),
                outcomes:    self
                    .categories
                    .iter()
                    .map(|(name, table)| (name.clone(), summarize_column(table.column(k))))
                    .collect(),
            })
            .collect()
    }

    /// Increments of every other strategy over `comparator`.
    pub fn pairwise_icers(&self, comparator: StrategyId, wtp: f64) -> SimResult<Vec<IcerRow>> {
        let c = self.column_of(comparator)?;
        let (q, cost) = (self.qalys(), self.costs());
        Ok(self
            .strategies
            .iter()
            .enumerate()
            .filter(|(k, _)| *k != c)
            .map(|(k, s)| {
                let dq = &q.column(k) - &q.column(c);
                let dc = &cost.column(k) - &cost.column(c);
                let inmb = &dq * wtp - &dc;
                let d_qalys = summarize_column(dq.view());
                let d_costs = summarize_column(dc.view());
                IcerRow {
                    strategy_id: s.strategy_id,
                    comparator_id: comparator,
                    icer: classify_icer(d_qalys.mean, d_costs.mean),
                    d_qalys,
                    d_costs,
                    wtp,
                    inmb: summarize_column(inmb.view()),
                }
            })
            .collect())
    }

    /// Probability that each strategy is the most cost-effective.
    pub fn ceac(&self, wtps: &[f64]) -> Vec<CeacPoint> {
        let mut out = Vec::with_capacity(wtps.len() * self.strategies.len());
        for &wtp in wtps {
            let wins = self.wins(&self.nmb(wtp));
            let n = self.n_samples() as f64;
            out.extend(self.strategies.iter().zip(wins).map(|(s, w)| CeacPoint {
                wtp,
                strategy_id: s.strategy_id,
                probability: w as f64 / n,
            }));
        }
        out
    }

    /// Probability that incremental NMB over `comparator` is positive.
    pub fn pairwise_ceac(&self, comparator: StrategyId, wtps: &[f64]) -> SimResult<Vec<CeacPoint>> {
        let c = self.column_of(comparator)?;
        let mut out = Vec::new();
        for &wtp in wtps {
            let nmb = self.nmb(wtp);
            for (k, s) in self.strategies.iter().enumerate().filter(|(k, _)| *k != c) {
                let positive = nmb
                    .column(k)
                    .iter()
                    .zip(nmb.column(c))
                    .filter(|(a, b)| *a - *b > 0.0)
                    .count();
                out.push(CeacPoint {
                    wtp,
                    strategy_id: s.strategy_id,
                    probability: positive as f64 / self.n_samples() as f64,
                });
            }
        }
        Ok(out)
    }

    /// The strategy with the highest expected NMB at each WTP, with the
    /// probability that it is the most cost-effective.
    pub fn ceaf(&self, wtps: &[f64]) -> Vec<CeacPoint> {
        wtps.iter()
            .map(|&wtp| {
                let nmb = self.nmb(wtp);
                let k = argmax(nmb.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(0)).view());
                let wins = self.wins(&nmb);
                CeacPoint {
                    wtp,
                    strategy_id: self.strategies[k].strategy_id,
                    probability: wins[k] as f64 / self.n_samples() as f64,
                }
            })
            .collect()
    }

    /// Expected value of perfect information per decision.
    pub fn evpi(&self, wtps: &[f64]) -> Vec<EvpiPoint> {
        wtps.iter()
            .map(|&wtp| {
                let nmb = self.nmb(wtp);
                let perfect = nmb
                    .axis_iter(Axis(0))
                    .map(|row| row.fold(f64::NEG_INFINITY, |m, &v| m.max(v)))
                    .sum::<f64>()
                    / self.n_samples() as f64;
                let current = nmb
                    .mean_axis(Axis(0))
                    .map(|m| m.fold(f64::NEG_INFINITY, |a, &v| a.max(v)))
                    .unwrap_or(0.0);
                EvpiPoint { wtp, evpi: (perfect - current).max(0.0) }
            })
            .collect()
    }

    /// How many samples each strategy has the highest NMB in.
    fn wins(&self, nmb: &Array2<f64>) -> Vec<usize> {
        let mut wins = vec![0; self.strategies.len()];
        for row in nmb.axis_iter(Axis(0)) {
            wins[argmax(row)] += 1;
        }
        wins
    }
}

fn argmax(values: ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

fn summarize_column(column: ArrayView1<'_, f64>) -> Summary {
    Summary::from_draws(&column.to_vec())
}

/// Evenly spaced willingness-to-pay grid from `min` to `max` inclusive.
pub fn wtp_grid(min: f64, max: f64, steps: usize) -> Vec<f64> {
    if steps < 2 {
        return vec![min];
    }
    let step = (max - min) / (steps - 1) as f64;
    (0..steps).map(|i| min + i as f64 * step).collect()
}
