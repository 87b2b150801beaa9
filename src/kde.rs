//! Gaussian kernel density estimates, for plotting posterior draws.

use multiversion::multiversion;
use serde::Serialize;

use crate::summary::quantile_sorted;

/// Bandwidth used when the samples carry no spread at all.
const MIN_BANDWIDTH: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DensityPoint {
    pub x: f64,
    pub y: f64,
}

fn std_dev(samples: &[f64]) -> f64 {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (n - 1.);
    var.sqrt()
}

/// Silverman's rule of thumb, `0.9 * min(sd, IQR / 1.34) * n^(-1/5)`.
///
/// Falls back to a tenth of the sample range if the rule gives no usable
/// value.
pub fn silverman_bandwidth(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return f64::NAN;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    bandwidth_sorted(&sorted)
}

fn bandwidth_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    let iqr = quantile_sorted(sorted, 0.75) - quantile_sorted(sorted, 0.25);
    let spread = std_dev(sorted).min(iqr / 1.34);
    let h = 0.9 * spread * (n as f64).powf(-0.2);
    if h.is_finite() && h > 0. {
        return h;
    }
    let range = sorted[n - 1] - sorted[0];
    if range > 0. {
        range / 10.
    } else {
        MIN_BANDWIDTH
    }
}

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
fn kernel_sum(samples: &[f64], x: f64, inv_h: f64) -> f64 {
    let mut sum = 0f64;
    for &sample in samples {
        let u = (x - sample) * inv_h;
        sum += (-0.5 * u * u).exp();
    }
    sum
}

/// Evaluate the density on `num_points` evenly spaced locations.
///
/// The grid extends a tenth of the sample range past both ends. If all
/// samples are equal the grid is widened by three bandwidths instead.
pub fn compute_kde(samples: &[f64], num_points: usize) -> Vec<DensityPoint> {
    if samples.is_empty() || num_points == 0 {
        return Vec::new();
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    let h = bandwidth_sorted(&sorted);

    let (min, max) = (sorted[0], sorted[sorted.len() - 1]);
    let range = max - min;
    // 10% of the range collapses to nothing for identical samples, so pad
    // by three bandwidths there to keep the kernel's bulk on the grid.
    let pad = if range > 0. { 0.1 * range } else { 3. * h };
    let (start, end) = (min - pad, max + pad);
    let step = if num_points > 1 {
        (end - start) / (num_points - 1) as f64
    } else {
        0.
    };

    let norm = sorted.len() as f64 * h * (2. * std::f64::consts::PI).sqrt();
    let inv_h = 1. / h;
    (0..num_points)
        .map(|i| {
            let x = start + i as f64 * step;
            DensityPoint {
                x,
                y: kernel_sum(&sorted, x, inv_h) / norm,
            }
        })
        .collect()
}
