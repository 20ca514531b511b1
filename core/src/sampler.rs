//! Parameter sampler: one joint parameter set per PSA iteration.
//!
//! RULES:
//!   - Specifications are validated once, in `ParameterSampler::new`.
//!     An infeasible family aborts construction; it would recur on
//!     every sample otherwise.
//!   - Derived quantities are evaluated once, in declaration order.
//!   - Within a sample, parameters are drawn in declaration order from
//!     that sample's own stream. `linked` parameters reuse an earlier
//!     draw and consume no randomness.

use crate::{
    distribution::{build_draw, evaluate_derived, DerivedSpec, Draw, ParamSpec, Shape},
    error::{SimError, SimResult},
    output::Summary,
    rng::{RngBank, SampleRng},
    types::SampleIndex,
};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The value of one parameter in one sample, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamValue {
    pub shape: Shape,
    pub data:  Vec<f64>,
}

impl ParamValue {
    pub fn scalar(&self) -> Option<f64> {
        match self.shape {
            Shape::Scalar => self.data.first().copied(),
            _ => None,
        }
    }

    pub fn at(&self, index: &[usize]) -> Option<f64> {
        self.shape.flat_index(index).map(|i| self.data[i])
    }

    pub fn as_matrix(&self) -> Option<Array2<f64>> {
        match self.shape {
            Shape::Matrix(r, c) => Array2::from_shape_vec((r, c), self.data.clone()).ok(),
            _ => None,
        }
    }
}

/// One PSA draw. Values are indexed by parameter slot; use
/// `ParameterSet::value` for lookup by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSample {
    pub sample: SampleIndex,
    pub values: Vec<ParamValue>,
}

/// Slot layout shared by a sampler and every set it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamLayout {
    names:  Vec<String>,
    shapes: Vec<Shape>,
    index:  BTreeMap<String, usize>,
}

impl ParamLayout {
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn shape(&self, slot: usize) -> Shape {
        self.shapes[slot]
    }

    pub fn name(&self, slot: usize) -> &str {
        &self.names[slot]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

struct Slot {
    shape: Shape,
    draw:  Draw,
}

pub struct ParameterSampler {
    layout:  Arc<ParamLayout>,
    slots:   Vec<Slot>,
    derived: BTreeMap<String, f64>,
}

impl ParameterSampler {
    pub fn new(params: &[ParamSpec], derived: &[DerivedSpec]) -> SimResult<Self> {
        let mut derived_values = BTreeMap::new();
        for spec in derived {
            let value = evaluate_derived(spec, &derived_values)?;
            log::debug!("derived {} = {value:.6}", spec.name);
            derived_values.insert(spec.name.clone(), value);
        }

        let mut earlier: BTreeMap<String, (usize, Shape)> = BTreeMap::new();
        let mut slots = Vec::with_capacity(params.len());
        let mut names = Vec::with_capacity(params.len());
        for (slot, spec) in params.iter().enumerate() {
            if earlier.contains_key(&spec.name) || derived_values.contains_key(&spec.name) {
                return Err(SimError::InvalidConfig(format!(
                    "parameter '{}' is declared twice",
                    spec.name
                )));
            }
            let (shape, draw) = build_draw(spec, &derived_values, &earlier)?;
            earlier.insert(spec.name.clone(), (slot, shape));
            names.push(spec.name.clone());
            slots.push(Slot { shape, draw });
        }

        let layout = ParamLayout {
            shapes: slots.iter().map(|s| s.shape).collect(),
            index:  earlier.into_iter().map(|(k, (slot, _))| (k, slot)).collect(),
            names,
        };
        log::info!(
            "parameter sampler ready: {} parameters, {} derived quantities",
            layout.len(),
            derived_values.len()
        );
        Ok(Self { layout: Arc::new(layout), slots, derived: derived_values })
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    /// Value of a derived quantity, for diagnostics.
    pub fn derived(&self, name: &str) -> Option<f64> {
        self.derived.get(name).copied()
    }

    /// Draw one sample from the given stream.
    pub fn draw(&self, rng: &mut SampleRng) -> ParameterSample {
        let mut values: Vec<Vec<f64>> = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let drawn = slot.draw.draw(rng, &values);
            values.push(drawn);
        }
        ParameterSample {
            sample: rng.sample,
            values: values
                .into_iter()
                .zip(&self.slots)
                .map(|(data, slot)| ParamValue { shape: slot.shape, data })
                .collect(),
        }
    }

    /// Draw `n` independent samples. Each sample uses its own stream, so
    /// the result does not depend on how rayon schedules the work.
    pub fn sample(&self, n: usize, seed: u64) -> ParameterSet {
        let bank = RngBank::new(seed);
        let samples: Vec<ParameterSample> = (0..n)
            .into_par_iter()
            .map(|i| self.draw(&mut bank.for_sample(i)))
            .collect();
        log::info!("drew {n} parameter samples (seed={seed})");
        ParameterSet { layout: Arc::clone(&self.layout), samples }
    }
}

/// All PSA samples of one run. Read-only once drawn.
#[derive(Debug, Clone)]
pub struct ParameterSet {
    layout:  Arc<ParamLayout>,
    samples: Vec<ParameterSample>,
}

impl ParameterSet {
    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[ParameterSample] {
        &self.samples
    }

    pub fn get(&self, sample: SampleIndex) -> Option<&ParameterSample> {
        self.samples.get(sample)
    }

    pub fn value(&self, sample: SampleIndex, name: &str) -> Option<&ParamValue> {
        let slot = self.layout.slot(name)?;
        self.samples.get(sample).map(|s| &s.values[slot])
    }

    /// Element `offset` of parameter `slot` in `sample`.
    #[inline]
    pub(crate) fn element(&self, sample: SampleIndex, slot: usize, offset: usize) -> f64 {
        self.samples[sample].values[slot].data[offset]
    }

    /// Mean and 95% interval of each element of a parameter across samples.
    pub fn summary(&self, name: &str) -> Option<Vec<Summary>> {
        let slot = self.layout.slot(name)?;
        let len = self.layout.shape(slot).len();
        Some(
            (0..len)
                .map(|offset| {
                    let draws: Vec<f64> = self
                        .samples
                        .iter()
                        .map(|s| s.values[slot].data[offset])
                        .collect();
                    Summary::from_draws(&draws)
                })
                .collect(),
        )
    }
}
