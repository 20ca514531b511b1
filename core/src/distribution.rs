//! Distribution specifications for probabilistic sensitivity analysis.
//!
//! A `ParamSpec` names one model parameter and the family it is drawn
//! from. Family arguments are either literals or the names of derived
//! quantities (see `DerivedSpec`), so that e.g. a log-normal standard
//! error can be computed once from two confidence bounds and reused.
//!
//! Specifications are resolved into `Draw` values when the sampler is
//! constructed. All feasibility checks happen there: a mean/sd pair that
//! implies a negative beta shape is rejected before any sample is drawn.

use crate::{
    error::{SimError, SimResult},
    rng::SampleRng,
};
use rand_distr::{Beta, Gamma, LogNormal, Normal, Open01, Uniform};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal as StdNormal};
use std::collections::BTreeMap;

// ── Specification types ──────────────────────────────────────────────────────

/// A distribution argument: a literal or the name of a derived quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Value(f64),
    Named(String),
}

impl From<f64> for Quantity {
    fn from(v: f64) -> Self {
        Quantity::Value(v)
    }
}

impl From<&str> for Quantity {
    fn from(name: &str) -> Self {
        Quantity::Named(name.to_string())
    }
}

/// A scalar argument or one argument per element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(v) => std::slice::from_ref(v),
            OneOrMany::Many(vs) => vs,
        }
    }

    pub fn is_many(&self) -> bool {
        matches!(self, OneOrMany::Many(_))
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(v: T) -> Self {
        OneOrMany::One(v)
    }
}

fn unit_scale() -> Quantity {
    Quantity::Value(1.0)
}

fn zero_shift() -> Quantity {
    Quantity::Value(0.0)
}

/// Supported families. Beta and gamma take a mean and standard deviation
/// and are converted to shape parameters by the method of moments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Family {
    Fixed {
        value: OneOrMany<Quantity>,
    },
    Normal {
        mean: OneOrMany<Quantity>,
        sd:   OneOrMany<Quantity>,
    },
    LogNormal {
        meanlog: OneOrMany<Quantity>,
        sdlog:   OneOrMany<Quantity>,
    },
    Gamma {
        mean: OneOrMany<Quantity>,
        sd:   OneOrMany<Quantity>,
    },
    Beta {
        mean: OneOrMany<Quantity>,
        sd:   OneOrMany<Quantity>,
    },
    Uniform {
        min: OneOrMany<Quantity>,
        max: OneOrMany<Quantity>,
    },
    /// One Dirichlet per row of a transition-count matrix.
    Dirichlet {
        alpha: Vec<Vec<Quantity>>,
    },
    /// `of * scale + shift`, reusing the draw of an earlier parameter.
    Linked {
        of: String,
        #[serde(default = "unit_scale")]
        scale: Quantity,
        #[serde(default = "zero_shift")]
        shift: Quantity,
    },
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::Fixed { .. }     => "fixed",
            Family::Normal { .. }    => "normal",
            Family::LogNormal { .. } => "log_normal",
            Family::Gamma { .. }     => "gamma",
            Family::Beta { .. }      => "beta",
            Family::Uniform { .. }   => "uniform",
            Family::Dirichlet { .. } => "dirichlet",
            Family::Linked { .. }    => "linked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(flatten)]
    pub family: Family,
}

impl ParamSpec {
    pub fn new(name: &str, family: Family) -> Self {
        Self { name: name.to_string(), family }
    }
}

fn default_level() -> f64 {
    0.95
}

/// Intermediate quantities computed once when the sampler is built.
/// They are never returned in a `ParameterSample`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DerivedExpr {
    Const { value: f64 },
    Ln { of: Quantity },
    Exp { of: Quantity },
    Product { of: Vec<Quantity> },
    Ratio { num: Quantity, den: Quantity },
    /// Standard error implied by a symmetric normal confidence interval.
    SeFromCi {
        lower: Quantity,
        upper: Quantity,
        #[serde(default)]
        log_scale: bool,
        #[serde(default = "default_level")]
        level: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedSpec {
    pub name: String,
    #[serde(flatten)]
    pub expr: DerivedExpr,
}

impl DerivedSpec {
    pub fn new(name: &str, expr: DerivedExpr) -> Self {
        Self { name: name.to_string(), expr }
    }
}

// ── Shapes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    Scalar,
    Vector(usize),
    Matrix(usize, usize),
}

impl Shape {
    pub fn len(&self) -> usize {
        match *self {
            Shape::Scalar       => 1,
            Shape::Vector(n)    => n,
            Shape::Matrix(r, c) => r * c,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major offset of `index`, or None when the index does not fit.
    pub fn flat_index(&self, index: &[usize]) -> Option<usize> {
        match (*self, index) {
            (Shape::Scalar, [])                           => Some(0),
            (Shape::Vector(n), [i]) if *i < n             => Some(*i),
            (Shape::Matrix(r, c), [i, j]) if *i < r && *j < c => Some(i * c + j),
            _ => None,
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shape::Scalar       => write!(f, "scalar"),
            Shape::Vector(n)    => write!(f, "vector[{n}]"),
            Shape::Matrix(r, c) => write!(f, "matrix[{r}x{c}]"),
        }
    }
}

// ── Resolved draws ───────────────────────────────────────────────────────────

/// A validated, ready-to-sample family with numeric arguments.
#[derive(Debug, Clone)]
pub(crate) enum Draw {
    Fixed(Vec<f64>),
    Normal(Vec<Normal<f64>>),
    LogNormal(Vec<LogNormal<f64>>),
    Gamma(Vec<Gamma<f64>>),
    Beta(Vec<Beta<f64>>),
    Uniform(Vec<Uniform<f64>>),
    /// `None` marks a zero count, which always yields probability zero.
    Dirichlet(Vec<Vec<Option<DirichletCell>>>),
    Linked { slot: usize, scale: f64, shift: f64 },
}

impl Draw {
    /// Draw the flattened (row-major) values of one parameter.
    /// `earlier` holds the values already drawn for this sample.
    pub(crate) fn draw(&self, rng: &mut SampleRng, earlier: &[Vec<f64>]) -> Vec<f64> {
        match self {
            Draw::Fixed(values) => values.clone(),
            Draw::Normal(ds)    => ds.iter().map(|d| rng.draw(d)).collect(),
            Draw::LogNormal(ds) => ds.iter().map(|d| rng.draw(d)).collect(),
            Draw::Gamma(ds)     => ds.iter().map(|d| rng.draw(d)).collect(),
            Draw::Beta(ds)      => ds.iter().map(|d| rng.draw(d)).collect(),
            Draw::Uniform(ds)   => ds.iter().map(|d| rng.draw(d)).collect(),
            Draw::Dirichlet(rows) => {
                let mut out = Vec::with_capacity(rows.iter().map(Vec::len).sum());
                for row in rows {
                    let logs: Vec<f64> = row
                        .iter()
                        .map(|cell| cell.as_ref().map_or(f64::NEG_INFINITY, |cell| cell.log_draw(rng)))
                        .collect();
                    // Normalise in log space: tiny counts underflow as plain gamma draws.
                    let max = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let weights: Vec<f64> = logs.iter().map(|l| (l - max).exp()).collect();
                    let total: f64 = weights.iter().sum();
                    out.extend(weights.iter().map(|w| w / total));
                }
                out
            }
            Draw::Linked { slot, scale, shift } => {
                earlier[*slot].iter().map(|v| v * scale + shift).collect()
            }
        }
    }
}

/// One positive Dirichlet count, drawn as the log of a Gamma(alpha) variate
/// via `Gamma(alpha + 1) * U^(1 / alpha)`.
#[derive(Debug, Clone)]
pub(crate) struct DirichletCell {
    boosted:   Gamma<f64>,
    inv_alpha: f64,
}

impl DirichletCell {
    fn new(alpha: f64) -> Result<Self, rand_distr::GammaError> {
        let inv_alpha = 1.0 / alpha;
        if !inv_alpha.is_finite() {
            return Err(rand_distr::GammaError::ShapeTooSmall);
        }
        Ok(Self { boosted: Gamma::new(alpha + 1.0, 1.0)?, inv_alpha })
    }

    fn log_draw(&self, rng: &mut SampleRng) -> f64 {
        let g = rng.draw(&self.boosted);
        let u: f64 = rng.draw(&Open01);
        g.ln() + u.ln() * self.inv_alpha
    }
}

/// Resolve a `Quantity` against the derived-quantity table.
pub(crate) fn resolve(q: &Quantity, derived: &BTreeMap<String, f64>) -> SimResult<f64> {
    match q {
        Quantity::Value(v) => Ok(*v),
        Quantity::Named(name) => derived
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownParameter { name: name.clone() }),
    }
}

/// Evaluate one derived expression.
pub(crate) fn evaluate_derived(
    spec: &DerivedSpec,
    derived: &BTreeMap<String, f64>,
) -> SimResult<f64> {
    let r = |q: &Quantity| resolve(q, derived);
    let value = match &spec.expr {
        DerivedExpr::Const { value }     => *value,
        DerivedExpr::Ln { of }           => r(of)?.ln(),
        DerivedExpr::Exp { of }          => r(of)?.exp(),
        DerivedExpr::Product { of }      => of.iter().map(r).product::<SimResult<f64>>()?,
        DerivedExpr::Ratio { num, den }  => r(num)? / r(den)?,
        DerivedExpr::SeFromCi { lower, upper, log_scale, level } => {
            if !(*level > 0.0 && *level < 1.0) {
                return Err(SimError::InvalidConfig(format!(
                    "confidence level {level} for '{}' must lie in (0, 1)",
                    spec.name
                )));
            }
            let (lo, hi) = if *log_scale {
                (r(lower)?.ln(), r(upper)?.ln())
            } else {
                (r(lower)?, r(upper)?)
            };
            let z = StdNormal::standard().inverse_cdf(0.5 + level / 2.0);
            (hi - lo) / (2.0 * z)
        }
    };
    if !value.is_finite() {
        return Err(SimError::NonFiniteValue { what: format!("derived quantity '{}'", spec.name) });
    }
    Ok(value)
}

/// Pair up two argument lists, broadcasting a scalar against a vector.
fn zip_args(
    param: &str,
    family: &'static str,
    a: &OneOrMany<Quantity>,
    b: &OneOrMany<Quantity>,
    derived: &BTreeMap<String, f64>,
) -> SimResult<(Shape, Vec<(f64, f64)>)> {
    let (a, b) = (a.as_slice(), b.as_slice());
    let n = a.len().max(b.len());
    if (a.len() != n && a.len() != 1) || (b.len() != n && b.len() != 1) {
        return Err(SimError::DimensionMismatch {
            what:     format!("{family} arguments of '{param}'"),
            expected: n,
            actual:   a.len().min(b.len()),
        });
    }
    let mut pairs = Vec::with_capacity(n);
    for i in 0..n {
        let x = resolve(&a[if a.len() == 1 { 0 } else { i }], derived)?;
        let y = resolve(&b[if b.len() == 1 { 0 } else { i }], derived)?;
        pairs.push((x, y));
    }
    Ok((shape_of(a.len().max(b.len()), a.len() > 1 || b.len() > 1), pairs))
}

fn shape_of(n: usize, many: bool) -> Shape {
    if many || n != 1 { Shape::Vector(n) } else { Shape::Scalar }
}

fn invalid(param: &str, family: &'static str, reason: String) -> SimError {
    SimError::InvalidDistributionParameters { param: param.to_string(), family, reason }
}

/// Method-of-moments gamma: returns (shape, scale).
pub fn gamma_from_moments(mean: f64, sd: f64) -> Option<(f64, f64)> {
    if !(mean > 0.0 && sd > 0.0 && mean.is_finite() && sd.is_finite()) {
        return None;
    }
    let var = sd * sd;
    Some((mean * mean / var, var / mean))
}

/// Method-of-moments beta: returns (alpha, beta).
pub fn beta_from_moments(mean: f64, sd: f64) -> Option<(f64, f64)> {
    if !(mean > 0.0 && mean < 1.0 && sd > 0.0 && sd.is_finite()) {
        return None;
    }
    let alpha = mean * (mean * (1.0 - mean) / (sd * sd) - 1.0);
    let beta = alpha * (1.0 - mean) / mean;
    (alpha > 0.0 && beta > 0.0).then_some((alpha, beta))
}

/// Validate a spec and turn it into a `Draw` plus the output shape.
/// `earlier` maps already-declared parameter names to (slot, shape).
pub(crate) fn build_draw(
    spec: &ParamSpec,
    derived: &BTreeMap<String, f64>,
    earlier: &BTreeMap<String, (usize, Shape)>,
) -> SimResult<(Shape, Draw)> {
    let name = spec.name.as_str();
    let family = spec.family.name();
    match &spec.family {
        Family::Fixed { value } => {
            let values = value
                .as_slice()
                .iter()
                .map(|q| resolve(q, derived))
                .collect::<SimResult<Vec<f64>>>()?;
            Ok((shape_of(values.len(), value.is_many()), Draw::Fixed(values)))
        }
        Family::Normal { mean, sd } => {
            let (shape, args) = zip_args(name, family, mean, sd, derived)?;
            let ds = args
                .into_iter()
                .map(|(m, s)| {
                    Normal::new(m, s).map_err(|e| invalid(name, family, format!("mean={m}, sd={s}: {e}")))
                })
                .collect::<SimResult<Vec<_>>>()?;
            Ok((shape, Draw::Normal(ds)))
        }
        Family::LogNormal { meanlog, sdlog } => {
            let (shape, args) = zip_args(name, family, meanlog, sdlog, derived)?;
            let ds = args
                .into_iter()
                .map(|(m, s)| {
                    LogNormal::new(m, s)
                        .map_err(|e| invalid(name, family, format!("meanlog={m}, sdlog={s}: {e}")))
                })
                .collect::<SimResult<Vec<_>>>()?;
            Ok((shape, Draw::LogNormal(ds)))
        }
        Family::Gamma { mean, sd } => {
            let (shape, args) = zip_args(name, family, mean, sd, derived)?;
            let ds = args
                .into_iter()
                .map(|(m, s)| {
                    let (k, theta) = gamma_from_moments(m, s).ok_or_else(|| {
                        invalid(name, family, format!("mean={m}, sd={s} must both be positive"))
                    })?;
                    Gamma::new(k, theta).map_err(|e| invalid(name, family, e.to_string()))
                })
                .collect::<SimResult<Vec<_>>>()?;
            Ok((shape, Draw::Gamma(ds)))
        }
        Family::Beta { mean, sd } => {
            let (shape, args) = zip_args(name, family, mean, sd, derived)?;
            let ds = args
                .into_iter()
                .map(|(m, s)| {
                    let (a, b) = beta_from_moments(m, s).ok_or_else(|| {
                        invalid(
                            name,
                            family,
                            format!("mean={m}, sd={s} implies a non-positive shape parameter"),
                        )
                    })?;
                    Beta::new(a, b).map_err(|e| invalid(name, family, e.to_string()))
                })
                .collect::<SimResult<Vec<_>>>()?;
            Ok((shape, Draw::Beta(ds)))
        }
        Family::Uniform { min, max } => {
            let (shape, args) = zip_args(name, family, min, max, derived)?;
            let ds = args
                .into_iter()
                .map(|(lo, hi)| {
                    // Uniform::new panics on an empty range.
                    if !(lo < hi && lo.is_finite() && hi.is_finite()) {
                        return Err(invalid(name, family, format!("min={lo} must be below max={hi}")));
                    }
                    Ok(Uniform::new(lo, hi))
                })
                .collect::<SimResult<Vec<_>>>()?;
            Ok((shape, Draw::Uniform(ds)))
        }
        Family::Dirichlet { alpha } => {
            let n_rows = alpha.len();
            let n_cols = alpha.first().map_or(0, Vec::len);
            if n_rows == 0 || n_cols < 2 {
                return Err(invalid(name, family, "needs at least one row of two or more counts".into()));
            }
            let mut rows = Vec::with_capacity(n_rows);
            for (i, row) in alpha.iter().enumerate() {
                if row.len() != n_cols {
                    return Err(SimError::DimensionMismatch {
                        what:     format!("row {i} of dirichlet counts '{name}'"),
                        expected: n_cols,
                        actual:   row.len(),
                    });
                }
                let counts = row
                    .iter()
                    .map(|q| resolve(q, derived))
                    .collect::<SimResult<Vec<f64>>>()?;
                if counts.iter().any(|c| !c.is_finite() || *c < 0.0) {
                    return Err(invalid(name, family, format!("row {i} has a negative or non-finite count")));
                }
                if counts.iter().all(|c| *c == 0.0) {
                    return Err(invalid(name, family, format!("row {i} has no positive count")));
                }
                let gammas = counts
                    .into_iter()
                    .map(|c| {
                        if c > 0.0 {
                            DirichletCell::new(c)
                                .map(Some)
                                .map_err(|e| invalid(name, family, e.to_string()))
                        } else {
                            Ok(None)
                        }
                    })
                    .collect::<SimResult<Vec<_>>>()?;
                rows.push(gammas);
            }
            Ok((Shape::Matrix(n_rows, n_cols), Draw::Dirichlet(rows)))
        }
        Family::Linked { of, scale, shift } => {
            let (slot, shape) = earlier
                .get(of)
                .copied()
                .ok_or_else(|| SimError::UnknownParameter { name: of.clone() })?;
            Ok((
                shape,
                Draw::Linked {
                    slot,
                    scale: resolve(scale, derived)?,
                    shift: resolve(shift, derived)?,
                },
            ))
        }
    }
}
