//! A complete cohort model: sampler → transformer → engine → integrator.
//!
//! PIPELINE (one run):
//!   1. Draw `n_samples` parameter samples.
//!   2. Evaluate the outcome spec for every (sample × unit) pair.
//!   3. Simulate every pair's trajectory.
//!   4. Integrate QALYs, life-years and each cost category.
//!
//! `CohortModel::build` does every check that does not need a draw, so a
//! malformed definition fails before any sampling starts.

use crate::{
    config::ModelConfig,
    distribution::{DerivedSpec, ParamSpec},
    engine::{CohortEngine, Trajectory},
    error::{SimError, SimResult},
    integrate::{Integrator, StateWeights, ValueMethod},
    output::{OccupancyRow, OutcomeRow, LIFE_YEARS, QALYS, TOTAL_COST},
    sampler::{ParameterSampler, ParameterSet},
    transform::{OutcomeSpec, Transformer, UnitParams},
    types::PairKey,
    units::{UnitTable, UnitTableSpec},
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Serialized model definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub config:     ModelConfig,
    #[serde(default)]
    pub derived:    Vec<DerivedSpec>,
    pub parameters: Vec<ParamSpec>,
    pub units:      UnitTableSpec,
    pub outcome:    OutcomeSpec,
}

impl ModelDefinition {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        Ok(Self::from_json(&content)?)
    }

    pub fn from_json(json: &str) -> SimResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

pub struct CohortModel {
    config:      ModelConfig,
    sampler:     ParameterSampler,
    units:       UnitTable,
    transformer: Transformer,
    engine:      CohortEngine,
    integrator:  Integrator,
}

impl CohortModel {
    pub fn build(definition: &ModelDefinition) -> SimResult<Self> {
        let sampler = ParameterSampler::new(&definition.parameters, &definition.derived)?;
        let units = UnitTable::from_spec(&definition.units)?;
        Self::from_parts(definition.config.clone(), sampler, units, &definition.outcome)
    }

    pub fn from_parts(
        config: ModelConfig,
        sampler: ParameterSampler,
        units: UnitTable,
        outcome: &OutcomeSpec,
    ) -> SimResult<Self> {
        config.validate()?;
        let transformer = outcome.compile(&config, sampler.layout(), &units)?;
        let engine = CohortEngine::from_config(&config);
        let integrator = Integrator::new(config.quadrature, config.cycle_length);
        log::info!(
            "model ready: {} states, {} units, {} cycles of {} years",
            config.n_states(),
            units.len(),
            config.n_cycles,
            config.cycle_length
        );
        Ok(Self { config, sampler, units, transformer, engine, integrator })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn units(&self) -> &UnitTable {
        &self.units
    }

    pub fn sampler(&self) -> &ParameterSampler {
        &self.sampler
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    pub fn sample_parameters(&self) -> ParameterSet {
        self.sampler.sample(self.config.n_samples, self.config.seed)
    }

    pub fn transform(&self, params: &ParameterSet) -> SimResult<Vec<UnitParams>> {
        self.transformer.evaluate(params, &self.units, &self.config.grid_times())
    }

    pub fn simulate(&self, unit_params: &[UnitParams]) -> SimResult<Vec<Trajectory>> {
        let pairs: Vec<_> = unit_params.iter().map(|p| (p.key, &p.transitions)).collect();
        self.engine.simulate_batch(&self.config.initial_occupancy(), &pairs)
    }

    /// Outcome rows for every pair: QALYs, optionally life-years, each cost
    /// category and their total.
    pub fn integrate(&self, unit_params: &[UnitParams], trajectories: &[Trajectory]) -> SimResult<Vec<OutcomeRow>> {
        if unit_params.len() != trajectories.len() {
            return Err(SimError::DimensionMismatch {
                what:     "trajectories".into(),
                expected: unit_params.len(),
                actual:   trajectories.len(),
            });
        }
        let life_years = StateWeights::life_years(self.config.n_states(), self.config.dead_state());
        let rows = unit_params
            .par_iter()
            .zip(trajectories)
            .map(|(p, traj)| self.integrate_pair(p, traj, &life_years).map_err(|e| e.for_pair(&p.key)))
            .collect::<SimResult<Vec<Vec<OutcomeRow>>>>()?;
        Ok(rows.into_iter().flatten().collect())
    }

    fn integrate_pair(
        &self,
        params: &UnitParams,
        trajectory: &Trajectory,
        life_years: &StateWeights,
    ) -> SimResult<Vec<OutcomeRow>> {
        let unit = self.units.get(params.key.unit);
        let rates = self.config.discount;
        let row = |category: &str, discount_rate: f64, value: f64| OutcomeRow {
            strategy_id: unit.strategy_id,
            patient_id: unit.patient_id,
            group_id: unit.group_id,
            sample: params.key.sample,
            category: category.to_string(),
            discount_rate,
            value,
            patient_weight: unit.weight,
        };

        let mut rows = Vec::with_capacity(params.costs.len() + 3);
        let qalys = self.integrator.integrate(trajectory, &params.utility, ValueMethod::Wlos, rates.qalys)?;
        rows.push(row(QALYS, rates.qalys, qalys));
        if self.config.life_years {
            let ly = self.integrator.integrate(trajectory, life_years, ValueMethod::Wlos, rates.qalys)?;
            rows.push(row(LIFE_YEARS, rates.qalys, ly));
        }
        let mut total = 0.0;
        for cost in &params.costs {
            let value = self.integrator.integrate(trajectory, &cost.weights, cost.method, rates.costs)?;
            total += value;
            rows.push(row(&cost.name, rates.costs, value));
        }
        rows.push(row(TOTAL_COST, rates.costs, total));
        Ok(rows)
    }

    pub fn run(&self) -> SimResult<ModelOutput> {
        let parameters = self.sample_parameters();
        let unit_params = self.transform(&parameters)?;
        let trajectories = self.simulate(&unit_params)?;
        let outcomes = self.integrate(&unit_params, &trajectories)?;
        log::info!(
            "run complete: {} pairs, {} outcome rows",
            trajectories.len(),
            outcomes.len()
        );
        Ok(ModelOutput {
            parameters,
            pairs: unit_params.iter().map(|p| p.key).collect(),
            trajectories,
            outcomes,
            cycle_length: self.config.cycle_length,
        })
    }
}

/// Everything one run produces.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub parameters:   ParameterSet,
    /// `pairs[i]` identifies `trajectories[i]`.
    pub pairs:        Vec<PairKey>,
    pub trajectories: Vec<Trajectory>,
    pub outcomes:     Vec<OutcomeRow>,
    pub cycle_length: f64,
}

impl ModelOutput {
    /// The state-occupancy table, one row per (pair, cycle, state).
    pub fn occupancy_rows(&self) -> Vec<OccupancyRow> {
        let mut rows = Vec::new();
        for (key, traj) in self.pairs.iter().zip(&self.trajectories) {
            for cycle in 0..=traj.n_cycles() {
                for (state, &prob) in traj.at(cycle).iter().enumerate() {
                    rows.push(OccupancyRow {
                        strategy_id: key.strategy_id,
                        patient_id: key.patient_id,
                        sample: key.sample,
                        cycle,
                        time: cycle as f64 * self.cycle_length,
                        state,
                        prob,
                    });
                }
            }
        }
        rows
    }

    pub fn outcomes_for<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a OutcomeRow> + 'a {
        self.outcomes.iter().filter(move |r| r.category == category)
    }

    pub fn trajectory(&self, sample: usize, strategy_id: u32, patient_id: u32) -> Option<&Trajectory> {
        self.pairs
            .iter()
            .position(|k| k.sample == sample && k.strategy_id == strategy_id && k.patient_id == patient_id)
            .map(|i| &self.trajectories[i])
    }
}
