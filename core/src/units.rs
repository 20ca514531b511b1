//! Analysis units: the (strategy × patient) rows a model is evaluated on.
//!
//! Covariates are stored column-major so the expression evaluator can
//! gather a whole column for a batch of (sample, unit) combinations.
//! The identifiers are exposed as built-in covariate columns:
//! `strategy_id`, `patient_id`, `group_id`.

use crate::{
    error::{SimError, SimResult},
    types::{PatientId, StrategyId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const BUILTIN_COVARIATES: [&str; 3] = ["strategy_id", "patient_id", "group_id"];

fn unit_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub strategy_id: StrategyId,
    pub name:        String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: PatientId,
    #[serde(default)]
    pub group_id:   Option<u32>,
    #[serde(default = "unit_weight")]
    pub weight:     f64,
    #[serde(default)]
    pub covariates: BTreeMap<String, f64>,
}

impl Patient {
    pub fn new(patient_id: PatientId) -> Self {
        Self { patient_id, group_id: None, weight: 1.0, covariates: BTreeMap::new() }
    }

    pub fn with_covariate(mut self, name: &str, value: f64) -> Self {
        self.covariates.insert(name.to_string(), value);
        self
    }
}

/// One analysis unit. Immutable once placed in a `UnitTable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisUnit {
    pub strategy_id: StrategyId,
    pub patient_id:  PatientId,
    #[serde(default)]
    pub group_id:    Option<u32>,
    #[serde(default = "unit_weight")]
    pub weight:      f64,
    #[serde(default)]
    pub covariates:  BTreeMap<String, f64>,
}

/// Serialized form: strategies and patients, expanded to their cross product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitTableSpec {
    pub strategies: Vec<Strategy>,
    pub patients:   Vec<Patient>,
}

#[derive(Debug, Clone)]
pub struct UnitTable {
    units:      Vec<AnalysisUnit>,
    strategies: Vec<Strategy>,
    names:      Vec<String>,
    columns:    Vec<Vec<f64>>,
}

impl UnitTable {
    /// Cross product of strategies × patients, strategy-major.
    pub fn expand(strategies: Vec<Strategy>, patients: &[Patient]) -> SimResult<Self> {
        let mut units = Vec::with_capacity(strategies.len() * patients.len());
        for s in &strategies {
            for p in patients {
                units.push(AnalysisUnit {
                    strategy_id:   s.strategy_id,
                    patient_id:    p.patient_id,
                    group_id:      p.group_id,
                    weight:        p.weight,
                    covariates:    p.covariates.clone(),
                });
            }
        }
        Self::with_strategies(units, strategies)
    }

    pub fn from_spec(spec: &UnitTableSpec) -> SimResult<Self> {
        Self::expand(spec.strategies.clone(), &spec.patients)
    }

    fn with_strategies(units: Vec<AnalysisUnit>, strategies: Vec<Strategy>) -> SimResult<Self> {
        if units.is_empty() {
            return Err(SimError::InvalidConfig("analysis unit table is empty".into()));
        }

        let mut seen = BTreeSet::new();
        for u in &units {
            if !seen.insert((u.strategy_id, u.patient_id)) {
                return Err(SimError::InvalidConfig(format!(
                    "duplicate analysis unit (strategy {}, patient {})",
                    u.strategy_id, u.patient_id
                )));
            }
            if !(u.weight.is_finite() && u.weight >= 0.0) {
                return Err(SimError::InvalidConfig(format!(
                    "patient {} has invalid weight {}",
                    u.patient_id, u.weight
                )));
            }
        }

        // Every unit must carry the same covariates.
        let user: Vec<String> = units[0].covariates.keys().cloned().collect();
        for u in &units {
            if u.covariates.len() != user.len() || !user.iter().all(|k| u.covariates.contains_key(k)) {
                return Err(SimError::DimensionMismatch {
                    what:     format!(
                        "covariates of (strategy {}, patient {})",
                        u.strategy_id, u.patient_id
                    ),
                    expected: user.len(),
                    actual:   u.covariates.len(),
                });
            }
        }
        if let Some(clash) = user.iter().find(|k| BUILTIN_COVARIATES.contains(&k.as_str())) {
            return Err(SimError::InvalidConfig(format!("covariate '{clash}' shadows a built-in column")));
        }

        let names: Vec<String> = BUILTIN_COVARIATES
            .iter()
            .map(|s| s.to_string())
            .chain(user.iter().cloned())
            .collect();
        let mut columns: Vec<Vec<f64>> = vec![
            units.iter().map(|u| u.strategy_id as f64).collect(),
            units.iter().map(|u| u.patient_id as f64).collect(),
            units.iter().map(|u| u.group_id.unwrap_or(0) as f64).collect(),
        ];
        for k in &user {
            columns.push(units.iter().map(|u| u.covariates[k]).collect());
        }

        Ok(Self { units, strategies, names, columns })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[AnalysisUnit] {
        &self.units
    }

    pub fn get(&self, row: usize) -> &AnalysisUnit {
        &self.units[row]
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn covariate_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn covariate_names(&self) -> &[String] {
        &self.names
    }

    #[inline]
    pub(crate) fn covariate(&self, column: usize, row: usize) -> f64 {
        self.columns[column][row]
    }
}
