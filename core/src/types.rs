//! Shared primitive types used across the kernel.

/// Index of a PSA draw, `0..n_samples`.
pub type SampleIndex = usize;

/// Index of a health state, `0..n_states`. The absorbing state is one of these.
pub type StateIndex = usize;

/// A model cycle. Cycle 0 is the initial occupancy.
pub type Cycle = usize;

pub type StrategyId = u32;
pub type PatientId  = u32;

/// Identifies one (sample, analysis unit) pair within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub sample:      SampleIndex,
    /// Row of the unit in its `UnitTable`.
    pub unit:        usize,
    pub strategy_id: StrategyId,
    pub patient_id:  PatientId,
}
