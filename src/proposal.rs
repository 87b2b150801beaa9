use rand::Rng;
use rand_distr::{Distribution, Gamma, Normal};

use crate::likelihood::DirichletPrior;

/// Weights are kept this far away from 0 and 1 inside the proposal.
pub const WEIGHT_EPS: f64 = 1e-10;

/// Random walk in logit space, mapped back onto the simplex.
///
/// Every coordinate is moved independently, pushed through the sigmoid and
/// the vector is renormalized. The Jacobian of that map is not part of the
/// acceptance ratio, so the proposal is only approximately symmetric.
#[derive(Debug, Clone, Copy)]
pub struct LogitProposal {
    noise: Normal<f64>,
}

impl LogitProposal {
    pub fn new(scale: f64) -> anyhow::Result<Self> {
        let noise = Normal::new(0., scale)
            .map_err(|err| anyhow::anyhow!("Invalid proposal scale {scale}: {err}"))?;
        Ok(Self { noise })
    }

    pub fn scale(&self) -> f64 {
        self.noise.std_dev()
    }

    /// Write a candidate for `current` into `out`.
    pub fn propose<R: Rng + ?Sized>(&self, rng: &mut R, current: &[f64], out: &mut [f64]) {
        assert!(current.len() == out.len());
        out.iter_mut().zip(current.iter()).for_each(|(out, &w)| {
            let step = logit(clamp_weight(w)) + self.noise.sample(rng);
            *out = clamp_weight(sigmoid(step));
        });
        normalize(out);
    }
}

fn clamp_weight(w: f64) -> f64 {
    w.clamp(WEIGHT_EPS, 1. - WEIGHT_EPS)
}

fn logit(p: f64) -> f64 {
    (p / (1. - p)).ln()
}

fn sigmoid(x: f64) -> f64 {
    1. / (1. + (-x).exp())
}

/// Rescale to sum to one, or fall back to the uniform vector.
pub(crate) fn normalize(weights: &mut [f64]) {
    let sum: f64 = weights.iter().sum();
    if sum > 0. && sum.is_finite() {
        weights.iter_mut().for_each(|w| *w /= sum);
    } else {
        let uniform = 1. / weights.len() as f64;
        weights.iter_mut().for_each(|w| *w = uniform);
    }
}

/// Draw a starting point from the prior via normalized Gamma variates.
pub fn sample_dirichlet<R: Rng + ?Sized>(
    rng: &mut R,
    prior: &DirichletPrior,
    out: &mut [f64],
) -> anyhow::Result<()> {
    assert!(out.len() == prior.dim());
    for (out, &alpha) in out.iter_mut().zip(prior.alpha()) {
        let gamma = Gamma::new(alpha, 1.)
            .map_err(|err| anyhow::anyhow!("Invalid Dirichlet concentration {alpha}: {err}"))?;
        *out = gamma.sample(rng);
    }
    normalize(out);
    Ok(())
}
