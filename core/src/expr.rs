//! Expression IR for transition, utility and cost formulas.
//!
//! A model's formulas are written as a small typed tree (`Expr`), then
//! compiled once against the parameter layout and covariate names into
//! `Node`s. Compilation resolves every name to a slot, checks element
//! indices against parameter shapes, and records whether the node reads
//! model time. Nothing is looked up by name during evaluation.
//!
//! Evaluation is columnar: one call computes the node for every
//! (sample, unit) row of a `Batch` with elementwise array operations.

use crate::{
    error::{SimError, SimResult},
    sampler::{ParamLayout, ParameterSet},
    types::SampleIndex,
    units::UnitTable,
};
use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    Const { value: f64 },
    /// A sampled parameter; `index` is `[]`, `[i]` or `[row, col]`.
    Param {
        name: String,
        #[serde(default)]
        index: Vec<usize>,
    },
    Covariate { name: String },
    /// A binding declared earlier in the same outcome specification.
    Var { name: String },
    /// Model time in years at the start of the cycle being evaluated.
    Time,
    Add { lhs: Box<Expr>, rhs: Box<Expr> },
    Sub { lhs: Box<Expr>, rhs: Box<Expr> },
    Mul { lhs: Box<Expr>, rhs: Box<Expr> },
    Div { lhs: Box<Expr>, rhs: Box<Expr> },
    Min { lhs: Box<Expr>, rhs: Box<Expr> },
    Max { lhs: Box<Expr>, rhs: Box<Expr> },
    Pow { base: Box<Expr>, exponent: Box<Expr> },
    Exp { arg: Box<Expr> },
    Ln { arg: Box<Expr> },
    /// `1 - exp(-rate * time)`.
    RateToProb { rate: Box<Expr>, time: Box<Expr> },
    /// `then` where the covariate equals `equals`, `otherwise` elsewhere.
    Select {
        covariate: String,
        equals: f64,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `then` once model time reaches `time`, `otherwise` before.
    After {
        time: f64,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub fn constant(value: f64) -> Self {
        Expr::Const { value }
    }

    pub fn param(name: &str) -> Self {
        Expr::Param { name: name.to_string(), index: Vec::new() }
    }

    pub fn param_at(name: &str, index: &[usize]) -> Self {
        Expr::Param { name: name.to_string(), index: index.to_vec() }
    }

    pub fn covariate(name: &str) -> Self {
        Expr::Covariate { name: name.to_string() }
    }

    pub fn var(name: &str) -> Self {
        Expr::Var { name: name.to_string() }
    }

    pub fn exp(self) -> Self {
        Expr::Exp { arg: Box::new(self) }
    }

    pub fn ln(self) -> Self {
        Expr::Ln { arg: Box::new(self) }
    }

    pub fn pow(self, exponent: Expr) -> Self {
        Expr::Pow { base: Box::new(self), exponent: Box::new(exponent) }
    }

    pub fn rate_to_prob(rate: Expr, time: Expr) -> Self {
        Expr::RateToProb { rate: Box::new(rate), time: Box::new(time) }
    }

    pub fn select(covariate: &str, equals: f64, then: Expr, otherwise: Expr) -> Self {
        Expr::Select {
            covariate: covariate.to_string(),
            equals,
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn after(time: f64, then: Expr, otherwise: Expr) -> Self {
        Expr::After { time, then: Box::new(then), otherwise: Box::new(otherwise) }
    }
}

macro_rules! expr_binop {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl std::ops::$trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::$variant { lhs: Box::new(self), rhs: Box::new(rhs) }
            }
        }
    };
}

expr_binop!(Add, add, Add);
expr_binop!(Sub, sub, Sub);
expr_binop!(Mul, mul, Mul);
expr_binop!(Div, div, Div);

/// A named intermediate formula, evaluated once per batch and frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub expr: Expr,
}

impl Binding {
    pub fn new(name: &str, expr: Expr) -> Self {
        Self { name: name.to_string(), expr }
    }
}

// ── Compiled form ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Pow,
    RateToProb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Exp,
    Ln,
}

#[derive(Debug, Clone)]
pub enum Node {
    Const(f64),
    Param { slot: usize, offset: usize },
    Covariate(usize),
    Var { binding: usize, time_dependent: bool },
    Time,
    Binary(BinOp, Box<Node>, Box<Node>),
    Unary(UnOp, Box<Node>),
    Select { covariate: usize, equals: f64, then: Box<Node>, otherwise: Box<Node> },
    After { time: f64, then: Box<Node>, otherwise: Box<Node> },
}

/// Names visible while compiling.
pub struct Scope<'a> {
    pub params:   &'a ParamLayout,
    pub units:    &'a UnitTable,
    /// (name, time_dependent) of the bindings compiled so far.
    pub bindings: Vec<(String, bool)>,
}

impl<'a> Scope<'a> {
    pub fn new(params: &'a ParamLayout, units: &'a UnitTable) -> Self {
        Self { params, units, bindings: Vec::new() }
    }

    pub fn compile(&self, expr: &Expr) -> SimResult<Node> {
        let bin = |op: BinOp, l: &Expr, r: &Expr| -> SimResult<Node> {
            Ok(Node::Binary(op, Box::new(self.compile(l)?), Box::new(self.compile(r)?)))
        };
        match expr {
            Expr::Const { value } => Ok(Node::Const(*value)),
            Expr::Param { name, index } => {
                let slot = self
                    .params
                    .slot(name)
                    .ok_or_else(|| SimError::UnknownParameter { name: name.clone() })?;
                let shape = self.params.shape(slot);
                let offset = shape.flat_index(index).ok_or_else(|| SimError::InvalidIndex {
                    name:  name.clone(),
                    index: index.clone(),
                    shape: shape.to_string(),
                })?;
                Ok(Node::Param { slot, offset })
            }
            Expr::Covariate { name } => self
                .units
                .covariate_index(name)
                .map(Node::Covariate)
                .ok_or_else(|| SimError::UnknownCovariate { name: name.clone() }),
            Expr::Var { name } => self
                .bindings
                .iter()
                .position(|(n, _)| n == name)
                .map(|binding| Node::Var { binding, time_dependent: self.bindings[binding].1 })
                .ok_or_else(|| SimError::UnknownParameter { name: name.clone() }),
            Expr::Time => Ok(Node::Time),
            Expr::Add { lhs, rhs } => bin(BinOp::Add, lhs, rhs),
            Expr::Sub { lhs, rhs } => bin(BinOp::Sub, lhs, rhs),
            Expr::Mul { lhs, rhs } => bin(BinOp::Mul, lhs, rhs),
            Expr::Div { lhs, rhs } => bin(BinOp::Div, lhs, rhs),
            Expr::Min { lhs, rhs } => bin(BinOp::Min, lhs, rhs),
            Expr::Max { lhs, rhs } => bin(BinOp::Max, lhs, rhs),
            Expr::Pow { base, exponent } => bin(BinOp::Pow, base, exponent),
            Expr::RateToProb { rate, time } => bin(BinOp::RateToProb, rate, time),
            Expr::Exp { arg } => Ok(Node::Unary(UnOp::Exp, Box::new(self.compile(arg)?))),
            Expr::Ln { arg } => Ok(Node::Unary(UnOp::Ln, Box::new(self.compile(arg)?))),
            Expr::Select { covariate, equals, then, otherwise } => Ok(Node::Select {
                covariate: self
                    .units
                    .covariate_index(covariate)
                    .ok_or_else(|| SimError::UnknownCovariate { name: covariate.clone() })?,
                equals:    *equals,
                then:      Box::new(self.compile(then)?),
                otherwise: Box::new(self.compile(otherwise)?),
            }),
            Expr::After { time, then, otherwise } => Ok(Node::After {
                time:      *time,
                then:      Box::new(self.compile(then)?),
                otherwise: Box::new(self.compile(otherwise)?),
            }),
        }
    }

    /// Compile a binding and make it visible to later expressions.
    pub fn bind(&mut self, binding: &Binding) -> SimResult<Node> {
        if self.bindings.iter().any(|(n, _)| n == &binding.name) {
            return Err(SimError::InvalidConfig(format!("binding '{}' is declared twice", binding.name)));
        }
        let node = self.compile(&binding.expr)?;
        self.bindings.push((binding.name.clone(), node.uses_time()));
        Ok(node)
    }
}

/// The rows and frame a node is evaluated over.
pub struct Batch<'a> {
    pub params: &'a ParameterSet,
    pub units:  &'a UnitTable,
    /// (sample, unit row) per batch row.
    pub rows:   &'a [(SampleIndex, usize)],
    /// Model time of this frame.
    pub time:   f64,
    /// Columns of the bindings evaluated so far in this frame.
    pub vars:   Vec<Array1<f64>>,
}

impl Batch<'_> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Node {
    pub fn uses_time(&self) -> bool {
        match self {
            Node::Time | Node::After { .. } => true,
            Node::Var { time_dependent, .. } => *time_dependent,
            Node::Const(_) | Node::Param { .. } | Node::Covariate(_) => false,
            Node::Binary(_, l, r) => l.uses_time() || r.uses_time(),
            Node::Unary(_, a) => a.uses_time(),
            Node::Select { then, otherwise, .. } => then.uses_time() || otherwise.uses_time(),
        }
    }

    /// Evaluate for every row of the batch.
    pub fn eval(&self, batch: &Batch<'_>) -> Array1<f64> {
        let n = batch.len();
        match self {
            Node::Const(v) => Array1::from_elem(n, *v),
            Node::Param { slot, offset } => batch
                .rows
                .iter()
                .map(|&(s, _)| batch.params.element(s, *slot, *offset))
                .collect(),
            Node::Covariate(col) => batch
                .rows
                .iter()
                .map(|&(_, u)| batch.units.covariate(*col, u))
                .collect(),
            Node::Var { binding, .. } => batch.vars[*binding].clone(),
            Node::Time => Array1::from_elem(n, batch.time),
            Node::Binary(op, l, r) => {
                let mut a = l.eval(batch);
                let b = r.eval(batch);
                match op {
                    BinOp::Add => a += &b,
                    BinOp::Sub => a -= &b,
                    BinOp::Mul => a *= &b,
                    BinOp::Div => a /= &b,
                    BinOp::Min => Zip::from(&mut a).and(&b).for_each(|x, &y| *x = x.min(y)),
                    BinOp::Max => Zip::from(&mut a).and(&b).for_each(|x, &y| *x = x.max(y)),
                    BinOp::Pow => Zip::from(&mut a).and(&b).for_each(|x, &y| *x = x.powf(y)),
                    BinOp::RateToProb => {
                        Zip::from(&mut a).and(&b).for_each(|x, &t| *x = 1.0 - (-*x * t).exp())
                    }
                }
                a
            }
            Node::Unary(op, arg) => {
                let mut a = arg.eval(batch);
                match op {
                    UnOp::Exp => a.mapv_inplace(f64::exp),
                    UnOp::Ln => a.mapv_inplace(f64::ln),
                }
                a
            }
            Node::Select { covariate, equals, then, otherwise } => {
                let mut a = then.eval(batch);
                let b = otherwise.eval(batch);
                for (i, &(_, u)) in batch.rows.iter().enumerate() {
                    if batch.units.covariate(*covariate, u) != *equals {
                        a[i] = b[i];
                    }
                }
                a
            }
            Node::After { time, then, otherwise } => {
                if batch.time >= *time {
                    then.eval(batch)
                } else {
                    otherwise.eval(batch)
                }
            }
        }
    }
}
