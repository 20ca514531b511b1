//! Transition parameter transformer.
//!
//! Maps (parameter sample × analysis unit) to a transition matrix
//! schedule, per-state utilities and per-state costs.
//!
//! The `OutcomeSpec` is compiled once into a `Transformer`; all name
//! resolution and dimension checks happen there. Evaluation then runs
//! each formula as one columnar pass over every (sample, unit) row and
//! assembles the per-pair matrices from those columns in parallel.
//!
//! Formulas that read model time are evaluated at every grid point,
//! giving time-inhomogeneous schedules and calendar-indexed weights.

use crate::{
    config::ModelConfig,
    distribution::OneOrMany,
    engine::MatrixSchedule,
    error::{SimError, SimResult},
    expr::{Batch, Binding, Expr, Node, Scope},
    integrate::{StateWeights, ValueMethod},
    output::{LIFE_YEARS, QALYS, TOTAL_COST},
    sampler::{ParamLayout, ParameterSet},
    tpmatrix::TransitionMatrix,
    types::{PairKey, SampleIndex, StateIndex},
    units::UnitTable,
};
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Specification ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placeholder {
    /// `1 - sum(other entries in the row)`.
    Complement,
}

/// One transition matrix entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Value(f64),
    Placeholder(Placeholder),
    Expr(Expr),
}

impl Cell {
    pub fn complement() -> Self {
        Cell::Placeholder(Placeholder::Complement)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Value(v)
    }
}

impl From<Expr> for Cell {
    fn from(e: Expr) -> Self {
        Cell::Expr(e)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSpec {
    /// One value for every alive state, or one per alive state.
    pub values: OneOrMany<Expr>,
    #[serde(default)]
    pub method: ValueMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSpec {
    #[serde(default)]
    pub bindings:    Vec<Binding>,
    pub transitions: Vec<Vec<Cell>>,
    /// Annual utility for every alive state, or one per alive state.
    pub utility:     OneOrMany<Expr>,
    #[serde(default)]
    pub costs:       BTreeMap<String, CostSpec>,
}

// ── Compiled form ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum CompiledCell {
    Value(f64),
    Complement,
    Node(Node),
}

#[derive(Debug, Clone)]
struct CompiledCost {
    name:   String,
    method: ValueMethod,
    nodes:  Vec<Node>,
}

/// Per-pair weights for one cost category.
#[derive(Debug, Clone, PartialEq)]
pub struct CostWeights {
    pub name:    String,
    pub method:  ValueMethod,
    pub weights: StateWeights,
}

/// Everything the engine and integrator need for one pair.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitParams {
    pub key:         PairKey,
    pub transitions: MatrixSchedule,
    pub utility:     StateWeights,
    pub costs:       Vec<CostWeights>,
}

#[derive(Debug, Clone)]
pub struct Transformer {
    n_states:         usize,
    alive:            Vec<StateIndex>,
    tolerance:        f64,
    bindings:         Vec<Node>,
    cells:            Vec<Vec<CompiledCell>>,
    utility:          Vec<Node>,
    costs:            Vec<CompiledCost>,
    transitions_vary: bool,
    weights_vary:     bool,
}

impl OutcomeSpec {
    pub fn compile(
        &self,
        config: &ModelConfig,
        params: &ParamLayout,
        units: &UnitTable,
    ) -> SimResult<Transformer> {
        let n = config.n_states();
        let alive = config.alive_states();
        let mut scope = Scope::new(params, units);

        let bindings = self
            .bindings
            .iter()
            .map(|b| scope.bind(b))
            .collect::<SimResult<Vec<_>>>()?;

        if self.transitions.len() != n {
            return Err(SimError::DimensionMismatch {
                what:     "transition matrix rows".into(),
                expected: n,
                actual:   self.transitions.len(),
            });
        }
        let mut cells = Vec::with_capacity(n);
        for (i, row) in self.transitions.iter().enumerate() {
            if row.len() != n {
                return Err(SimError::DimensionMismatch {
                    what:     format!("row {i} of transition matrix"),
                    expected: n,
                    actual:   row.len(),
                });
            }
            let complements = row.iter().filter(|c| matches!(c, Cell::Placeholder(_))).count();
            if complements > 1 {
                return Err(SimError::InvalidConfig(format!("row {i} has {complements} complement entries")));
            }
            cells.push(
                row.iter()
                    .map(|c| match c {
                        Cell::Value(v) => Ok(CompiledCell::Value(*v)),
                        Cell::Placeholder(Placeholder::Complement) => Ok(CompiledCell::Complement),
                        Cell::Expr(e) => scope.compile(e).map(CompiledCell::Node),
                    })
                    .collect::<SimResult<Vec<_>>>()?,
            );
        }

        let utility = compile_weights(&scope, "utility", &self.utility, alive.len())?;

        let mut costs = Vec::with_capacity(self.costs.len());
        for (name, spec) in &self.costs {
            if [QALYS, LIFE_YEARS, TOTAL_COST].contains(&name.as_str()) {
                return Err(SimError::InvalidConfig(format!("cost category '{name}' is a reserved outcome name")));
            }
            costs.push(CompiledCost {
                name:   name.clone(),
                method: spec.method,
                nodes:  compile_weights(&scope, &format!("cost '{name}'"), &spec.values, alive.len())?,
            });
        }

        let transitions_vary = cells
            .iter()
            .flatten()
            .any(|c| matches!(c, CompiledCell::Node(node) if node.uses_time()));
        let weights_vary = utility.iter().any(Node::uses_time)
            || costs.iter().flat_map(|c| &c.nodes).any(Node::uses_time);

        log::debug!(
            "compiled outcome spec: {} bindings, {} cost categories, time-varying transitions={transitions_vary}, weights={weights_vary}",
            bindings.len(),
            costs.len()
        );

        Ok(Transformer {
            n_states: n,
            alive,
            tolerance: config.tolerance,
            bindings,
            cells,
            utility,
            costs,
            transitions_vary,
            weights_vary,
        })
    }
}

fn compile_weights(
    scope: &Scope<'_>,
    what: &str,
    values: &OneOrMany<Expr>,
    n_alive: usize,
) -> SimResult<Vec<Node>> {
    match values {
        OneOrMany::One(e) => {
            let node = scope.compile(e)?;
            Ok(vec![node; n_alive])
        }
        OneOrMany::Many(es) => {
            if es.len() != n_alive {
                return Err(SimError::DimensionMismatch {
                    what:     format!("{what} values (one per non-absorbing state)"),
                    expected: n_alive,
                    actual:   es.len(),
                });
            }
            es.iter().map(|e| scope.compile(e)).collect()
        }
    }
}

/// Columns of one frame (one model time) for every batch row.
enum Column {
    Const(f64),
    Complement,
    Values(Array1<f64>),
}

struct Frame {
    cells:   Vec<Vec<Column>>,
    utility: Vec<Array1<f64>>,
    costs:   Vec<Vec<Array1<f64>>>,
}

impl Transformer {
    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn transitions_vary(&self) -> bool {
        self.transitions_vary
    }

    pub fn weights_vary(&self) -> bool {
        self.weights_vary
    }

    pub fn cost_names(&self) -> Vec<&str> {
        self.costs.iter().map(|c| c.name.as_str()).collect()
    }

    fn eval_frame(&self, batch: &mut Batch<'_>, with_cells: bool, with_weights: bool) -> Frame {
        batch.vars.clear();
        for node in &self.bindings {
            let column = node.eval(batch);
            batch.vars.push(column);
        }
        let cells = if with_cells {
            self.cells
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|c| match c {
                            CompiledCell::Value(v) => Column::Const(*v),
                            CompiledCell::Complement => Column::Complement,
                            CompiledCell::Node(node) => Column::Values(node.eval(batch)),
                        })
                        .collect()
                })
                .collect()
        } else {
            Vec::new()
        };
        let (utility, costs) = if with_weights {
            (
                self.utility.iter().map(|n| n.eval(batch)).collect(),
                self.costs
                    .iter()
                    .map(|c| c.nodes.iter().map(|n| n.eval(batch)).collect())
                    .collect(),
            )
        } else {
            (Vec::new(), Vec::new())
        };
        Frame { cells, utility, costs }
    }

    fn assemble_matrix(&self, frame: &Frame, row: usize) -> SimResult<TransitionMatrix> {
        let rows: Vec<Vec<Option<f64>>> = frame
            .cells
            .iter()
            .map(|cells| {
                cells
                    .iter()
                    .map(|c| match c {
                        Column::Const(v) => Some(*v),
                        Column::Complement => None,
                        Column::Values(col) => Some(col[row]),
                    })
                    .collect()
            })
            .collect();
        TransitionMatrix::with_complements(&rows, self.tolerance)
    }

    fn assemble_weights(&self, what: &str, columns: &[Array1<f64>], row: usize) -> SimResult<Vec<f64>> {
        let mut w = vec![0.0; self.n_states];
        for (col, &state) in columns.iter().zip(&self.alive) {
            let v = col[row];
            if !v.is_finite() {
                return Err(SimError::NonFiniteValue { what: format!("{what} in state {state}") });
            }
            w[state] = v;
        }
        Ok(w)
    }

    /// Evaluate every (sample × unit) pair. `grid_times` are the model times
    /// of grid points 0..=n_cycles. Rows come back sample-major.
    pub fn evaluate(
        &self,
        params: &ParameterSet,
        units: &UnitTable,
        grid_times: &[f64],
    ) -> SimResult<Vec<UnitParams>> {
        let Some(&t0) = grid_times.first() else {
            return Err(SimError::InvalidConfig("evaluation needs at least one grid point".into()));
        };
        let n_cycles = grid_times.len() - 1;
        let rows: Vec<(SampleIndex, usize)> = (0..params.len())
            .flat_map(|s| (0..units.len()).map(move |u| (s, u)))
            .collect();
        let keys: Vec<PairKey> = rows
            .iter()
            .map(|&(sample, unit)| {
                let u = units.get(unit);
                PairKey { sample, unit, strategy_id: u.strategy_id, patient_id: u.patient_id }
            })
            .collect();

        let frame_times: Vec<f64> = if self.transitions_vary || self.weights_vary {
            grid_times.to_vec()
        } else {
            vec![t0]
        };

        let mut matrices: Vec<Vec<TransitionMatrix>> = vec![Vec::new(); rows.len()];
        let mut utility: Vec<Vec<Vec<f64>>> = vec![Vec::new(); rows.len()];
        let mut costs: Vec<Vec<Vec<Vec<f64>>>> = vec![vec![Vec::new(); self.costs.len()]; rows.len()];

        let mut batch = Batch { params, units, rows: &rows, time: t0, vars: Vec::new() };
        for (k, &time) in frame_times.iter().enumerate() {
            let with_cells = k == 0 || (self.transitions_vary && k < n_cycles);
            let with_weights = k == 0 || self.weights_vary;
            if !with_cells && !with_weights {
                continue;
            }
            batch.time = time;
            let frame = self.eval_frame(&mut batch, with_cells, with_weights);

            if with_cells {
                let built = keys
                    .par_iter()
                    .enumerate()
                    .map(|(r, key)| self.assemble_matrix(&frame, r).map_err(|e| e.for_pair(key)))
                    .collect::<SimResult<Vec<_>>>()?;
                for (acc, m) in matrices.iter_mut().zip(built) {
                    acc.push(m);
                }
            }

            if with_weights {
                for (r, key) in keys.iter().enumerate() {
                    utility[r].push(
                        self.assemble_weights("utility", &frame.utility, r)
                            .map_err(|e| e.for_pair(key))?,
                    );
                    for (c, cost) in self.costs.iter().enumerate() {
                        costs[r][c].push(
                            self.assemble_weights(&format!("cost '{}'", cost.name), &frame.costs[c], r)
                                .map_err(|e| e.for_pair(key))?,
                        );
                    }
                }
            }
        }

        let out = keys
            .into_iter()
            .zip(matrices)
            .zip(utility.into_iter().zip(costs))
            .map(|((key, ms), (u, cs))| {
                Ok(UnitParams {
                    key,
                    transitions: schedule_from(ms)?,
                    utility: weights_from(u)?,
                    costs: self
                        .costs
                        .iter()
                        .zip(cs)
                        .map(|(spec, w)| {
                            Ok(CostWeights { name: spec.name.clone(), method: spec.method, weights: weights_from(w)? })
                        })
                        .collect::<SimResult<Vec<_>>>()?,
                })
            })
            .collect::<SimResult<Vec<_>>>()?;

        log::info!(
            "transformed {} pairs ({} samples x {} units, {} frames)",
            out.len(),
            params.len(),
            units.len(),
            frame_times.len()
        );
        Ok(out)
    }
}

fn schedule_from(mut matrices: Vec<TransitionMatrix>) -> SimResult<MatrixSchedule> {
    if matrices.len() == 1 {
        Ok(MatrixSchedule::homogeneous(matrices.remove(0)))
    } else {
        MatrixSchedule::by_cycle(matrices)
    }
}

fn weights_from(mut by_point: Vec<Vec<f64>>) -> SimResult<StateWeights> {
    if by_point.len() == 1 {
        Ok(StateWeights::constant(by_point.remove(0)))
    } else {
        StateWeights::by_cycle(by_point)
    }
}
