//! Unnormalized log posterior over the probability simplex.

use itertools::izip;

use crate::dataset::{Observation, WeightModel};

/// Multinomial log likelihood of all observations at `weights`.
///
/// Datasets without any output are skipped. For a dataset with a single
/// known input that is part of the universe, the input is removed from the
/// possible outputs and the remaining weights are renormalized.
/// Terms with a positive count but zero probability are dropped instead of
/// producing `-inf`.
pub fn log_likelihood(model: &WeightModel, weights: &[f64]) -> f64 {
    assert!(weights.len() == model.dim());
    let mut scratch = vec![0f64; weights.len()];
    model
        .observations()
        .iter()
        .filter(|obs| obs.total > 0)
        .map(|obs| observation_logp(obs, weights, &mut scratch))
        .sum()
}

fn observation_logp(obs: &Observation, weights: &[f64], scratch: &mut [f64]) -> f64 {
    let probs = match obs.excluded {
        Some(k) => {
            exclude_input(weights, k, scratch);
            &*scratch
        }
        None => weights,
    };
    multinomial_logp(&obs.counts, probs)
}

/// Write the output distribution of a dataset whose input is item `k`.
pub(crate) fn exclude_input(weights: &[f64], k: usize, out: &mut [f64]) {
    let rest = 1. - weights[k];
    out.iter_mut()
        .zip(weights.iter())
        .for_each(|(out, &w)| *out = if rest > 0. { w / rest } else { 0. });
    out[k] = 0.;

    let sum: f64 = out.iter().sum();
    if sum > 0. {
        out.iter_mut().for_each(|p| *p /= sum);
    }
}

fn multinomial_logp(counts: &[u64], probs: &[f64]) -> f64 {
    izip!(counts, probs)
        .filter(|&(&count, &prob)| count > 0 && prob > 0.)
        .map(|(&count, &prob)| count as f64 * prob.ln())
        .sum()
}

/// Dirichlet prior on the weights, without its normalizing constant.
#[derive(Debug, Clone, PartialEq)]
pub struct DirichletPrior {
    alpha: Box<[f64]>,
}

impl DirichletPrior {
    pub fn new(alpha: impl Into<Box<[f64]>>) -> Self {
        Self {
            alpha: alpha.into(),
        }
    }

    pub fn symmetric(dim: usize, alpha: f64) -> Self {
        Self::new(vec![alpha; dim])
    }

    /// Flat prior over the simplex.
    pub fn uniform(dim: usize) -> Self {
        Self::symmetric(dim, 1.)
    }

    pub fn alpha(&self) -> &[f64] {
        &self.alpha
    }

    pub fn dim(&self) -> usize {
        self.alpha.len()
    }

    pub fn logp(&self, weights: &[f64]) -> f64 {
        assert!(weights.len() == self.alpha.len());
        izip!(self.alpha.iter(), weights)
            .filter(|&(&alpha, &w)| w > 0. && alpha > 0.)
            .map(|(&alpha, &w)| (alpha - 1.) * w.ln())
            .sum()
    }
}

/// Likelihood and prior of one model, evaluated together.
#[derive(Debug, Clone)]
pub struct Posterior<'model> {
    model: &'model WeightModel,
    prior: DirichletPrior,
}

impl<'model> Posterior<'model> {
    pub fn new(model: &'model WeightModel, prior: DirichletPrior) -> Self {
        assert!(model.dim() == prior.dim());
        Self { model, prior }
    }

    pub fn dim(&self) -> usize {
        self.model.dim()
    }

    pub fn prior(&self) -> &DirichletPrior {
        &self.prior
    }

    pub fn logp(&self, weights: &[f64]) -> f64 {
        log_likelihood(self.model, weights) + self.prior.logp(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{build_model, Dataset};
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    #[test]
    fn unknown_input_uses_weights_directly() {
        let model = build_model(&[Dataset::new([("a", 2), ("b", 1)])]).unwrap();
        let logp = log_likelihood(&model, &[0.6, 0.4]);
        assert_abs_diff_eq!(logp, 2. * 0.6f64.ln() + 0.4f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn single_input_is_excluded() {
        let model = build_model(&[
            Dataset::new([("a", 5)]),
            Dataset::new([("b", 3), ("c", 1)]).with_inputs(["a"]),
        ])
        .unwrap();
        let weights = [0.5, 0.3, 0.2];
        let expected = 5. * 0.5f64.ln() + 3. * 0.6f64.ln() + 0.4f64.ln();
        assert_abs_diff_eq!(log_likelihood(&model, &weights), expected, epsilon = 1e-12);
    }

    #[test]
    fn input_outside_universe_is_ignored() {
        let with_input =
            build_model(&[Dataset::new([("tul", 3), ("xoph", 2)]).with_inputs(["esh"])]).unwrap();
        let without = build_model(&[Dataset::new([("tul", 3), ("xoph", 2)])]).unwrap();
        let weights = [0.3, 0.7];
        assert_eq!(
            log_likelihood(&with_input, &weights),
            log_likelihood(&without, &weights)
        );
    }

    #[test]
    fn multiple_inputs_use_weights_directly() {
        let multiple =
            build_model(&[Dataset::new([("a", 1), ("b", 4)]).with_inputs(["a", "b"])]).unwrap();
        let unknown = build_model(&[Dataset::new([("a", 1), ("b", 4)])]).unwrap();
        let weights = [0.25, 0.75];
        assert_eq!(
            log_likelihood(&multiple, &weights),
            log_likelihood(&unknown, &weights)
        );

        let obs = &multiple.observations()[0];
        assert_eq!(obs.excluded, None);
        assert_eq!(
            multiple.assumptions().notes,
            ["Dataset 0: 2 inputs declared, 'a' recorded as used, no input excluded from outputs"]
        );
    }

    #[test]
    fn empty_datasets_and_impossible_terms_are_skipped() {
        let model = build_model(&[
            Dataset::new([("a", 0), ("b", 0)]),
            Dataset::new([("a", 2)]),
        ])
        .unwrap();
        assert_abs_diff_eq!(log_likelihood(&model, &[0.5, 0.5]), 2. * 0.5f64.ln());
        assert_eq!(log_likelihood(&model, &[0., 1.]), 0.);
    }

    #[test]
    fn dominant_input_weight_is_penalized() {
        let datasets = [
            Dataset::new([("a", 10)]),
            Dataset::new([("b", 10), ("c", 10)]).with_inputs(["a"]),
        ];
        let model = build_model(&datasets).unwrap();
        let balanced = log_likelihood(&model, &[0.4, 0.3, 0.3]);
        let skewed = log_likelihood(&model, &[0.98, 0.0199, 0.0001]);
        assert!(skewed < balanced);

        let near_one = log_likelihood(&model, &[1. - 1e-9, 1e-9 - 1e-12, 1e-12]);
        assert!(near_one < skewed);
    }

    #[test]
    fn exclusion_renormalizes() {
        let mut out = [0.; 4];
        exclude_input(&[0.1, 0.2, 0.3, 0.4], 2, &mut out);
        assert_eq!(out[2], 0.);
        assert_abs_diff_eq!(out.iter().sum::<f64>(), 1., epsilon = 1e-15);
        assert_abs_diff_eq!(out[3], 0.4 / 0.7, epsilon = 1e-12);
    }

    #[test]
    fn flat_prior_is_constant() {
        let prior = DirichletPrior::uniform(3);
        assert_eq!(prior.logp(&[0.2, 0.3, 0.5]), 0.);
        assert_eq!(prior.logp(&[0.9, 0.05, 0.05]), 0.);

        let prior = DirichletPrior::symmetric(2, 3.);
        assert_abs_diff_eq!(
            prior.logp(&[0.5, 0.5]),
            4. * 0.5f64.ln(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(prior.logp(&[0., 1.]), 0.);
    }

    proptest! {
        #[test]
        fn likelihood_is_finite_inside_simplex(a in 0.01f64..1., b in 0.01f64..1., c in 0.01f64..1.) {
            let sum = a + b + c;
            let weights = [a / sum, b / sum, c / sum];
            let model = build_model(&[
                Dataset::new([("x", 3), ("y", 1)]),
                Dataset::new([("y", 2), ("z", 5)]).with_inputs(["x"]),
            ]).unwrap();
            let logp = log_likelihood(&model, &weights);
            prop_assert!(logp.is_finite());
            prop_assert!(logp <= 0.);
        }
    }
}
