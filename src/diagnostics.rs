//! Convergence checks for the pooled chains.
//!
//! Two methods are available. [`DiagnosticsMethod::Heuristic`] reports the
//! raw draw count as the effective sample size and a fixed R-hat of one.
//! [`DiagnosticsMethod::GelmanRubin`] computes split R-hat across chains and
//! an autocorrelation based effective sample size.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Effective sample size a well mixed item needs to exceed.
pub const MIN_ESS: f64 = 400.;
/// Largest R-hat accepted as converged.
pub const MAX_RHAT: f64 = 1.1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticsMethod {
    #[default]
    Heuristic,
    GelmanRubin,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ItemDiagnostics {
    pub rhat: f64,
    pub ess: f64,
    pub converged: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverallDiagnostics {
    pub converged: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceDiagnostics {
    pub method: DiagnosticsMethod,
    pub items: BTreeMap<String, ItemDiagnostics>,
    pub overall: OverallDiagnostics,
}

impl ConvergenceDiagnostics {
    /// Diagnostics for a model with a single item, which needs no sampling.
    pub fn trivially_converged(item: &str, num_draws: usize) -> Self {
        let mut items = BTreeMap::new();
        items.insert(
            item.to_string(),
            ItemDiagnostics {
                rhat: 1.,
                ess: num_draws as f64,
                converged: true,
            },
        );
        ConvergenceDiagnostics {
            method: DiagnosticsMethod::Heuristic,
            items,
            overall: OverallDiagnostics {
                converged: true,
                warnings: Vec::new(),
            },
        }
    }
}

/// Check every item. `draws(i)` yields the per-chain draws of item `i`.
pub fn diagnose<'a, F>(items: &[String], draws: F, method: DiagnosticsMethod) -> ConvergenceDiagnostics
where
    F: Fn(usize) -> Vec<&'a [f64]>,
{
    let mut result = ConvergenceDiagnostics {
        method,
        ..Default::default()
    };
    for (i, item) in items.iter().enumerate() {
        let chains = draws(i);
        let diag = match method {
            DiagnosticsMethod::Heuristic => heuristic(&chains),
            DiagnosticsMethod::GelmanRubin => gelman_rubin(&chains),
        };
        if !(diag.ess > MIN_ESS) {
            result.overall.warnings.push(format!(
                "Low effective sample size for {item}: {:.0} (need more than {MIN_ESS})",
                diag.ess
            ));
        }
        if !(diag.rhat < MAX_RHAT) {
            result.overall.warnings.push(format!(
                "High R-hat for {item}: {:.3} (should be below {MAX_RHAT})",
                diag.rhat
            ));
        }
        result.items.insert(item.clone(), diag);
    }
    result.overall.converged = result.items.values().all(|diag| diag.converged);
    result
}

fn heuristic(chains: &[&[f64]]) -> ItemDiagnostics {
    let ess = chains.iter().map(|chain| chain.len()).sum::<usize>() as f64;
    let rhat = 1.;
    ItemDiagnostics {
        rhat,
        ess,
        converged: ess > MIN_ESS && rhat < MAX_RHAT,
    }
}

fn mean_var(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (n - 1.);
    (mean, var)
}

/// Biased autocovariance at `lag`.
fn autocovariance(values: &[f64], mean: f64, lag: usize) -> f64 {
    let n = values.len();
    values[..n - lag]
        .iter()
        .zip(&values[lag..])
        .map(|(a, b)| (a - mean) * (b - mean))
        .sum::<f64>()
        / n as f64
}

fn gelman_rubin(chains: &[&[f64]]) -> ItemDiagnostics {
    let half = chains.iter().map(|chain| chain.len() / 2).min().unwrap_or(0);
    if half < 2 {
        return ItemDiagnostics {
            rhat: f64::NAN,
            ess: 0.,
            converged: false,
        };
    }
    // Split every chain in two halves of equal length. The middle draw of
    // odd chains is dropped.
    let splits: Vec<&[f64]> = chains
        .iter()
        .flat_map(|chain| {
            let end = chain.len();
            [&chain[..half], &chain[end - half..]]
        })
        .collect();

    let m = splits.len() as f64;
    let n = half as f64;
    let stats: Vec<(f64, f64)> = splits.iter().map(|split| mean_var(split)).collect();
    let within = stats.iter().map(|(_, var)| var).sum::<f64>() / m;
    let means: Vec<f64> = stats.iter().map(|(mean, _)| *mean).collect();
    let (_, var_means) = mean_var(&means);
    let between = n * var_means;
    let var_plus = (n - 1.) / n * within + between / n;

    if within <= 0. {
        let rhat = if between <= 0. { 1. } else { f64::INFINITY };
        let ess = m * n;
        return ItemDiagnostics {
            rhat,
            ess,
            converged: ess > MIN_ESS && rhat < MAX_RHAT,
        };
    }
    let rhat = (var_plus / within).sqrt();

    // Geyer's initial positive sequence on the chain averaged autocorrelation.
    let rho = |lag: usize| {
        let acov = splits
            .iter()
            .zip(&stats)
            .map(|(split, (mean, _))| autocovariance(split, *mean, lag))
            .sum::<f64>()
            / m;
        1. - (within - acov) / var_plus
    };
    let mut tau = -1.;
    let mut lag = 0;
    while lag + 1 < half {
        let pair = rho(lag) + rho(lag + 1);
        if pair <= 0. {
            break;
        }
        tau += 2. * pair;
        lag += 2;
    }
    let total = m * n;
    let ess = total / tau.max(1. / total.log10());

    ItemDiagnostics {
        rhat,
        ess,
        converged: ess > MIN_ESS && rhat < MAX_RHAT,
    }
}
