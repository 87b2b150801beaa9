//! Point estimates and credible intervals from pooled posterior draws.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CredibleInterval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStatistics {
    pub median: f64,
    /// Stand-in for the posterior mode. This is the median, no mode search
    /// is performed.
    #[serde(rename = "map")]
    pub map_approx: f64,
    pub credible_interval: CredibleInterval,
}

impl SummaryStatistics {
    /// Summary of a posterior that puts all mass on a single value.
    pub fn point_mass(value: f64) -> Self {
        SummaryStatistics {
            median: value,
            map_approx: value,
            credible_interval: CredibleInterval {
                lower: value,
                upper: value,
            },
        }
    }

    fn scale(&mut self, factor: f64) {
        self.median *= factor;
        self.map_approx *= factor;
        self.credible_interval.lower *= factor;
        self.credible_interval.upper *= factor;
    }
}

fn sorted(samples: &[f64]) -> Vec<f64> {
    let mut sorted = samples.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    sorted
}

/// Median of the samples, NaN if there are none.
pub fn median(samples: &[f64]) -> f64 {
    let sorted = sorted(samples);
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        _ if n % 2 == 0 => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.,
        _ => sorted[n / 2],
    }
}

/// Linearly interpolated quantile of already sorted values.
///
/// Matches R's default (type 7) definition.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let pos = q.clamp(0., 1.) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = pos - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

pub fn quantile(samples: &[f64], q: f64) -> f64 {
    quantile_sorted(&sorted(samples), q)
}

/// Central interval holding `level` of the posterior mass.
pub fn credible_interval(samples: &[f64], level: f64) -> CredibleInterval {
    let sorted = sorted(samples);
    let tail = (1. - level) / 2.;
    CredibleInterval {
        lower: quantile_sorted(&sorted, tail),
        upper: quantile_sorted(&sorted, 1. - tail),
    }
}

pub fn summarize(samples: &[f64], level: f64) -> SummaryStatistics {
    let median = median(samples);
    SummaryStatistics {
        median,
        map_approx: median,
        credible_interval: credible_interval(samples, level),
    }
}

/// Rescale all summaries so the medians sum to one.
///
/// Only the point estimates are touched, the samples stay as drawn.
pub fn normalize_summaries<'a>(stats: impl IntoIterator<Item = &'a mut SummaryStatistics>) {
    let mut stats: Vec<_> = stats.into_iter().collect();
    let total: f64 = stats.iter().map(|stat| stat.median).sum();
    if total > 0. && total.is_finite() && total != 1. {
        let factor = 1. / total;
        stats.iter_mut().for_each(|stat| stat.scale(factor));
    }
}
