//! Discrete-time Markov cohort simulation kernel with probabilistic
//! sensitivity analysis.
//!
//! Stages, each a pure function of its inputs and the run's `ModelConfig`:
//!   sampler    parameter distributions → `ParameterSet`
//!   transform  samples × analysis units → transition matrices and weights
//!   engine     matrices → state-occupancy trajectories
//!   integrate  trajectories × weights → discounted totals
//!   cea        totals → cost-effectiveness summaries

pub mod cea;
pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod expr;
pub mod integrate;
pub mod model;
pub mod output;
pub mod rng;
pub mod sampler;
pub mod survival;
pub mod tpmatrix;
pub mod transform;
pub mod types;
pub mod units;
