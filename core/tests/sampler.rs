use approx::assert_relative_eq;
use cohort_core::{
    distribution::{
        beta_from_moments, gamma_from_moments, DerivedExpr, DerivedSpec, Family, OneOrMany,
        ParamSpec, Quantity, Shape,
    },
    error::SimError,
    rng::RngBank,
    sampler::ParameterSampler,
};

fn scalar(v: f64) -> OneOrMany<Quantity> {
    OneOrMany::One(Quantity::Value(v))
}

fn vector(vs: &[f64]) -> OneOrMany<Quantity> {
    OneOrMany::Many(vs.iter().map(|v| Quantity::Value(*v)).collect())
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

#[test]
fn fixed_parameters_are_constant_across_samples() {
    let sampler = ParameterSampler::new(
        &[ParamSpec::new("c_soc", Family::Fixed { value: scalar(2000.0) })],
        &[],
    )
    .unwrap();
    let set = sampler.sample(20, 1);
    assert_eq!(set.len(), 20);
    for s in 0..set.len() {
        assert_eq!(set.value(s, "c_soc").unwrap().scalar(), Some(2000.0));
    }
}

#[test]
fn gamma_and_beta_match_their_moments() {
    let sampler = ParameterSampler::new(
        &[
            ParamSpec::new("cost", Family::Gamma { mean: scalar(2000.0), sd: scalar(2000.0) }),
            ParamSpec::new("u", Family::Beta { mean: scalar(0.75), sd: scalar(0.05) }),
        ],
        &[],
    )
    .unwrap();
    let set = sampler.sample(5000, 11);
    let cost: Vec<f64> = (0..set.len()).map(|s| set.value(s, "cost").unwrap().data[0]).collect();
    let u: Vec<f64> = (0..set.len()).map(|s| set.value(s, "u").unwrap().data[0]).collect();

    assert!(cost.iter().all(|c| *c > 0.0));
    assert!(u.iter().all(|x| *x > 0.0 && *x < 1.0));
    assert_relative_eq!(mean(&cost), 2000.0, max_relative = 0.05);
    assert_relative_eq!(mean(&u), 0.75, max_relative = 0.01);
}

#[test]
fn infeasible_beta_is_rejected_at_construction() {
    let err = ParameterSampler::new(
        &[ParamSpec::new("u", Family::Beta { mean: scalar(0.5), sd: scalar(0.6) })],
        &[],
    )
    .err()
    .expect("beta with sd too large must fail");
    assert!(
        matches!(err, SimError::InvalidDistributionParameters { ref param, family: "beta", .. } if param == "u"),
        "unexpected error: {err}"
    );
}

#[test]
fn non_positive_gamma_mean_is_rejected() {
    let err = ParameterSampler::new(
        &[ParamSpec::new("c", Family::Gamma { mean: scalar(-1.0), sd: scalar(1.0) })],
        &[],
    )
    .err()
    .unwrap();
    assert!(matches!(err, SimError::InvalidDistributionParameters { family: "gamma", .. }));
}

#[test]
fn empty_uniform_range_is_rejected() {
    let err = ParameterSampler::new(
        &[ParamSpec::new("x", Family::Uniform { min: scalar(2.0), max: scalar(2.0) })],
        &[],
    )
    .err()
    .unwrap();
    assert!(matches!(err, SimError::InvalidDistributionParameters { family: "uniform", .. }));
}

#[test]
fn vector_arguments_of_different_lengths_are_a_dimension_mismatch() {
    let err = ParameterSampler::new(
        &[ParamSpec::new("c", Family::Gamma { mean: vector(&[1.0, 2.0, 3.0]), sd: vector(&[1.0, 2.0]) })],
        &[],
    )
    .err()
    .unwrap();
    assert!(matches!(err, SimError::DimensionMismatch { .. }));
}

#[test]
fn scalar_sd_broadcasts_over_vector_mean() {
    let sampler = ParameterSampler::new(
        &[ParamSpec::new("u", Family::Beta { mean: vector(&[0.8, 0.6, 0.4]), sd: scalar(0.02) })],
        &[],
    )
    .unwrap();
    assert_eq!(sampler.layout().shape(0), Shape::Vector(3));
    let set = sampler.sample(10, 3);
    assert_eq!(set.value(0, "u").unwrap().data.len(), 3);
    assert_eq!(set.summary("u").unwrap().len(), 3);
}

#[test]
fn dirichlet_rows_sum_to_one_and_zero_counts_stay_zero() {
    let alpha = vec![
        vec![848.0, 150.0, 0.0, 2.0],
        vec![450.0, 355.0, 95.0, 5.0],
        vec![0.0, 0.0, 784.0, 16.0],
        vec![0.0, 0.0, 0.0, 23.0],
    ];
    let spec = ParamSpec::new(
        "p",
        Family::Dirichlet {
            alpha: alpha.iter().map(|r| r.iter().map(|c| Quantity::Value(*c)).collect()).collect(),
        },
    );
    let sampler = ParameterSampler::new(&[spec], &[]).unwrap();
    assert_eq!(sampler.layout().shape(0), Shape::Matrix(4, 4));

    let set = sampler.sample(200, 5);
    for s in 0..set.len() {
        let p = set.value(s, "p").unwrap().as_matrix().unwrap();
        for (i, row) in p.rows().into_iter().enumerate() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-12);
            for (j, count) in alpha[i].iter().enumerate() {
                if *count == 0.0 {
                    assert_eq!(row[j], 0.0, "zero count at ({i}, {j}) produced mass");
                }
            }
        }
        assert_eq!(p[[3, 3]], 1.0);
    }

    let summary = set.summary("p").unwrap();
    assert_relative_eq!(summary[0].mean, 848.0 / 1000.0, max_relative = 0.01);
}

#[test]
fn dirichlet_with_tiny_counts_stays_a_probability_vector() {
    // Plain gamma draws at these shapes underflow to exactly zero.
    let spec = ParamSpec::new(
        "p",
        Family::Dirichlet {
            alpha: [[0.002, 0.002, 0.0], [1e-3, 0.0, 1e-3]]
                .iter()
                .map(|r| r.iter().map(|c| Quantity::Value(*c)).collect())
                .collect(),
        },
    );
    let sampler = ParameterSampler::new(&[spec], &[]).unwrap();
    let set = sampler.sample(500, 1);
    for s in 0..set.len() {
        let p = set.value(s, "p").unwrap().as_matrix().unwrap();
        for row in p.rows() {
            assert!(row.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)), "sample {s}: {row}");
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
        assert_eq!(p[[1, 1]], 0.0);
    }
    // Symmetric counts: each cell is the winner about half the time.
    let summary = set.summary("p").unwrap();
    assert_relative_eq!(summary[0].mean, 0.5, epsilon = 0.1);
}

#[test]
fn dirichlet_row_without_positive_count_is_rejected() {
    let spec = ParamSpec::new(
        "p",
        Family::Dirichlet { alpha: vec![vec![Quantity::Value(0.0), Quantity::Value(0.0)]] },
    );
    let err = ParameterSampler::new(&[spec], &[]).err().unwrap();
    assert!(matches!(err, SimError::InvalidDistributionParameters { family: "dirichlet", .. }));
}

#[test]
fn derived_quantities_feed_distribution_arguments() {
    let derived = [
        DerivedSpec::new("log_rr", DerivedExpr::Ln { of: Quantity::Value(0.8) }),
        DerivedSpec::new(
            "se_log_rr",
            DerivedExpr::SeFromCi {
                lower:     Quantity::Value(0.71),
                upper:     Quantity::Value(0.9),
                log_scale: true,
                level:     0.95,
            },
        ),
    ];
    let sampler = ParameterSampler::new(
        &[ParamSpec::new(
            "rr",
            Family::LogNormal { meanlog: OneOrMany::One("log_rr".into()), sdlog: OneOrMany::One("se_log_rr".into()) },
        )],
        &derived,
    )
    .unwrap();

    let expected_se = (0.9f64.ln() - 0.71f64.ln()) / (2.0 * 1.959963984540054);
    assert_relative_eq!(sampler.derived("se_log_rr").unwrap(), expected_se, max_relative = 1e-12);
    assert_relative_eq!(sampler.derived("log_rr").unwrap(), 0.8f64.ln());

    let set = sampler.sample(4000, 8);
    let logs: Vec<f64> = (0..set.len()).map(|s| set.value(s, "rr").unwrap().data[0].ln()).collect();
    assert_relative_eq!(mean(&logs), 0.8f64.ln(), epsilon = 0.01);
}

#[test]
fn unknown_derived_name_is_reported() {
    let err = ParameterSampler::new(
        &[ParamSpec::new("x", Family::Normal { mean: OneOrMany::One("missing".into()), sd: scalar(1.0) })],
        &[],
    )
    .err()
    .unwrap();
    assert!(matches!(err, SimError::UnknownParameter { ref name } if name == "missing"));
}

#[test]
fn linked_parameter_reuses_the_earlier_draw() {
    let sampler = ParameterSampler::new(
        &[
            ParamSpec::new("base", Family::Normal { mean: scalar(10.0), sd: scalar(2.0) }),
            ParamSpec::new(
                "shifted",
                Family::Linked { of: "base".into(), scale: Quantity::Value(2.0), shift: Quantity::Value(1.0) },
            ),
        ],
        &[],
    )
    .unwrap();
    let set = sampler.sample(50, 21);
    for s in 0..set.len() {
        let base = set.value(s, "base").unwrap().data[0];
        let shifted = set.value(s, "shifted").unwrap().data[0];
        assert_relative_eq!(shifted, 2.0 * base + 1.0);
    }
}

#[test]
fn duplicate_parameter_names_are_rejected() {
    let err = ParameterSampler::new(
        &[
            ParamSpec::new("x", Family::Fixed { value: scalar(1.0) }),
            ParamSpec::new("x", Family::Fixed { value: scalar(2.0) }),
        ],
        &[],
    )
    .err()
    .unwrap();
    assert!(matches!(err, SimError::InvalidConfig(_)));
}

#[test]
fn draw_from_one_stream_matches_the_batch() {
    let sampler = ParameterSampler::new(
        &[ParamSpec::new("x", Family::Uniform { min: scalar(0.0), max: scalar(1.0) })],
        &[],
    )
    .unwrap();
    let set = sampler.sample(8, 1234);
    let bank = RngBank::new(1234);
    for s in 0..8 {
        assert_eq!(&sampler.draw(&mut bank.for_sample(s)), set.get(s).unwrap());
    }
}

#[test]
fn moment_conversions() {
    let (shape, scale) = gamma_from_moments(2000.0, 1000.0).unwrap();
    assert_relative_eq!(shape * scale, 2000.0);
    assert_relative_eq!(shape * scale * scale, 1000.0 * 1000.0, max_relative = 1e-12);

    let (a, b) = beta_from_moments(0.75, 0.05).unwrap();
    assert_relative_eq!(a / (a + b), 0.75);
    assert!(beta_from_moments(0.5, 0.6).is_none());
    assert!(gamma_from_moments(0.0, 1.0).is_none());
}

#[test]
fn standard_error_from_a_confidence_interval() {
    let derived = [
        DerivedSpec::new(
            "se90",
            DerivedExpr::SeFromCi {
                lower:     Quantity::Value(10.0),
                upper:     Quantity::Value(20.0),
                log_scale: false,
                level:     0.9,
            },
        ),
        DerivedSpec::new(
            "se99",
            DerivedExpr::SeFromCi {
                lower:     Quantity::Value(-1.0),
                upper:     Quantity::Value(1.0),
                log_scale: false,
                level:     0.99,
            },
        ),
    ];
    let sampler = ParameterSampler::new(&[], &derived).unwrap();
    assert_relative_eq!(sampler.derived("se90").unwrap(), 10.0 / (2.0 * 1.6448536269514722), max_relative = 1e-12);
    assert_relative_eq!(sampler.derived("se99").unwrap(), 2.0 / (2.0 * 2.5758293035489004), max_relative = 1e-12);
}
