use crate::types::{Cycle, PairKey, PatientId, SampleIndex, StateIndex, StrategyId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Invalid {family} parameters for '{param}': {reason}")]
    InvalidDistributionParameters {
        param:  String,
        family: &'static str,
        reason: String,
    },

    #[error("Negative residual probability {residual:.6} in row {row}")]
    NegativeResidualProbability { row: StateIndex, residual: f64 },

    #[error("Row {row} of transition matrix sums to {sum:.12}, expected 1")]
    NonStochasticMatrix { row: StateIndex, sum: f64 },

    #[error("Transition probability [{row}, {col}] = {value} is outside [0, 1]")]
    ProbabilityOutOfRange { row: StateIndex, col: StateIndex, value: f64 },

    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what:     String,
        expected: usize,
        actual:   usize,
    },

    #[error("Unknown parameter '{name}'")]
    UnknownParameter { name: String },

    #[error("Unknown covariate '{name}'")]
    UnknownCovariate { name: String },

    #[error("Unknown quadrature method '{name}' (expected left_riemann, right_riemann or trapezoidal)")]
    UnknownQuadrature { name: String },

    #[error("Index {index:?} out of range for parameter '{name}' with shape {shape}")]
    InvalidIndex {
        name:  String,
        index: Vec<usize>,
        shape: String,
    },

    #[error("Dead state {state} is not absorbing")]
    NonAbsorbingDeadState { state: StateIndex },

    #[error("State occupancy at cycle {cycle} sums to {sum:.12}")]
    OccupancyDrift { cycle: Cycle, sum: f64 },

    #[error("Non-finite value for {what}")]
    NonFiniteValue { what: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("sample {sample}, strategy {strategy_id}, patient {patient_id}: {source}")]
    Pair {
        sample:      SampleIndex,
        strategy_id: StrategyId,
        patient_id:  PatientId,
        #[source]
        source:      Box<SimError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SimError {
    /// Attach the indices of the failing (sample, unit) pair.
    pub fn for_pair(self, key: &PairKey) -> Self {
        SimError::Pair {
            sample:      key.sample,
            strategy_id: key.strategy_id,
            patient_id:  key.patient_id,
            source:      Box::new(self),
        }
    }

    /// The error with any pair context stripped.
    pub fn root(&self) -> &SimError {
        match self {
            SimError::Pair { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;
