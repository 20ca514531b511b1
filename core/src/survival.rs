//! Parametric survival curves and partitioned survival.
//!
//! Curves are parameterized on the time scale of the model (years).
//! A hazard ratio applies under proportional hazards: S'(t) = S(t)^hr.

use crate::{
    engine::MatrixSchedule,
    error::{SimError, SimResult},
    tpmatrix::TransitionMatrix,
    types::Cycle,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dist", rename_all = "snake_case")]
pub enum SurvivalCurve {
    /// S(t) = exp(-rate * t)
    Exponential { rate: f64 },
    /// S(t) = exp(-(t / scale)^shape)
    Weibull { shape: f64, scale: f64 },
    /// S(t) = exp(-rate / shape * (exp(shape * t) - 1))
    Gompertz { shape: f64, rate: f64 },
    /// S(t) = 1 / (1 + (t / scale)^shape)
    LogLogistic { shape: f64, scale: f64 },
    /// S(t) = 1 - Phi((ln t - meanlog) / sdlog)
    LogNormal { meanlog: f64, sdlog: f64 },
    /// `base` with its hazard multiplied by `hr`.
    HazardScaled { base: Box<SurvivalCurve>, hr: f64 },
}

impl SurvivalCurve {
    pub fn name(&self) -> &'static str {
        match self {
            SurvivalCurve::Exponential { .. }  => "exponential",
            SurvivalCurve::Weibull { .. }      => "weibull",
            SurvivalCurve::Gompertz { .. }     => "gompertz",
            SurvivalCurve::LogLogistic { .. }  => "log_logistic",
            SurvivalCurve::LogNormal { .. }    => "log_normal",
            SurvivalCurve::HazardScaled { .. } => "hazard_scaled",
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        let bad = |reason: &str| {
            Err(SimError::InvalidDistributionParameters {
                param:  "survival curve".into(),
                family: self.name(),
                reason: reason.into(),
            })
        };
        match self {
            SurvivalCurve::Exponential { rate } if !(*rate >= 0.0) => bad("rate must be non-negative"),
            SurvivalCurve::Weibull { shape, scale } | SurvivalCurve::LogLogistic { shape, scale }
                if !(*shape > 0.0 && *scale > 0.0) =>
            {
                bad("shape and scale must be positive")
            }
            SurvivalCurve::Gompertz { shape, rate } if !(shape.is_finite() && *rate > 0.0) => {
                bad("rate must be positive and shape finite")
            }
            SurvivalCurve::LogNormal { meanlog, sdlog } if !(meanlog.is_finite() && *sdlog > 0.0) => {
                bad("sdlog must be positive")
            }
            SurvivalCurve::HazardScaled { base, hr } => {
                if !(*hr >= 0.0 && hr.is_finite()) {
                    return bad("hazard ratio must be non-negative");
                }
                base.validate()
            }
            _ => Ok(()),
        }
    }

    /// Probability of surviving past `t`.
    pub fn survival(&self, t: f64) -> f64 {
        if t <= 0.0 {
            return 1.0;
        }
        match self {
            SurvivalCurve::Exponential { rate } => (-rate * t).exp(),
            SurvivalCurve::Weibull { shape, scale } => (-(t / scale).powf(*shape)).exp(),
            SurvivalCurve::Gompertz { shape, rate } => {
                if shape.abs() < 1e-12 {
                    (-rate * t).exp()
                } else {
                    (-rate / shape * ((shape * t).exp() - 1.0)).exp()
                }
            }
            SurvivalCurve::LogLogistic { shape, scale } => 1.0 / (1.0 + (t / scale).powf(*shape)),
            SurvivalCurve::LogNormal { meanlog, sdlog } => Normal::standard().sf((t.ln() - meanlog) / sdlog),
            SurvivalCurve::HazardScaled { base, hr } => base.survival(t).powf(*hr),
        }
    }

    /// H(t) = -ln S(t).
    pub fn cumulative_hazard(&self, t: f64) -> f64 {
        -self.survival(t).ln()
    }

    pub fn with_hazard_ratio(self, hr: f64) -> Self {
        SurvivalCurve::HazardScaled { base: Box::new(self), hr }
    }
}

/// State probabilities of a stable / progressed / dead model at each time.
/// Progression-free survival is capped at overall survival so the three
/// columns stay a probability vector when the fitted curves cross.
pub fn partitioned_survival(pfs: &SurvivalCurve, os: &SurvivalCurve, times: &[f64]) -> SimResult<Array2<f64>> {
    pfs.validate()?;
    os.validate()?;
    let mut probs = Array2::zeros((times.len(), 3));
    for (i, &t) in times.iter().enumerate() {
        let alive = os.survival(t);
        let stable = pfs.survival(t).min(alive);
        if !(alive.is_finite() && stable.is_finite()) {
            return Err(SimError::NonFiniteValue { what: format!("survival at time {t}") });
        }
        probs[[i, 0]] = stable;
        probs[[i, 1]] = alive - stable;
        probs[[i, 2]] = 1.0 - alive;
    }
    Ok(probs)
}

/// Alive / dead schedule whose cycle-k death probability is the
/// conditional probability 1 - S(t_{k+1}) / S(t_k).
pub fn schedule_from_survival(
    curve: &SurvivalCurve,
    cycle_length: f64,
    n_cycles: Cycle,
    tolerance: f64,
) -> SimResult<MatrixSchedule> {
    curve.validate()?;
    let matrices = (0..n_cycles.max(1))
        .map(|k| {
            let s0 = curve.survival(k as f64 * cycle_length);
            let s1 = curve.survival((k + 1) as f64 * cycle_length);
            let die = if s0 > 0.0 { (1.0 - s1 / s0).clamp(0.0, 1.0) } else { 1.0 };
            if !die.is_finite() {
                return Err(SimError::NonFiniteValue { what: format!("death probability in cycle {k}") });
            }
            TransitionMatrix::with_complements(&[vec![None, Some(die)], vec![Some(0.0), None]], tolerance)
        })
        .collect::<SimResult<Vec<_>>>()?;
    MatrixSchedule::by_cycle(matrices)
}
