use std::collections::BTreeMap;

use itertools::Itertools;
use serde::Serialize;
use tracing::warn;

use crate::{
    chain::AcceptanceStats,
    dataset::{ModelAssumptions, WeightModel},
    diagnostics::{diagnose, ConvergenceDiagnostics},
    kde::{compute_kde, DensityPoint},
    sampler::{ChainOutput, SamplerSettings},
    summary::{normalize_summaries, summarize, SummaryStatistics},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceMetadata {
    pub num_items: usize,
    pub num_datasets: usize,
    pub num_samples: u64,
    pub num_chains: usize,
    pub burn_in: u64,
    pub proposal_scale: f64,
    pub credible_level: f64,
    pub seed: u64,
    /// Item ids in the order they were first seen as outputs.
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSummary {
    pub chain: u64,
    #[serde(flatten)]
    pub stats: AcceptanceStats,
    pub acceptance_rate: f64,
}

/// Everything one inference run produces.
///
/// Maps are keyed by item id. Samples are the draws of all chains,
/// concatenated in chain order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResult {
    pub posterior_samples: BTreeMap<String, Vec<f64>>,
    pub summary_statistics: BTreeMap<String, SummaryStatistics>,
    pub densities: BTreeMap<String, Vec<DensityPoint>>,
    pub convergence_diagnostics: ConvergenceDiagnostics,
    pub model_assumptions: ModelAssumptions,
    pub chains: Vec<ChainSummary>,
    pub metadata: InferenceMetadata,
}

impl InferenceResult {
    pub(crate) fn from_chains(
        model: &WeightModel,
        settings: &SamplerSettings,
        num_datasets: usize,
        chains: &[ChainOutput],
    ) -> Self {
        let items = model.items();
        let pooled = (0..items.len())
            .map(|i| {
                chains
                    .iter()
                    .flat_map(|chain| chain.draws[i].iter().copied())
                    .collect_vec()
            })
            .collect_vec();

        let mut summaries = pooled
            .iter()
            .map(|samples| summarize(samples, settings.credible_level))
            .collect_vec();
        normalize_summaries(summaries.iter_mut());

        let densities = pooled
            .iter()
            .map(|samples| compute_kde(samples, settings.kde_points))
            .collect_vec();

        let diagnostics = diagnose(
            items,
            |i| chains.iter().map(|chain| &chain.draws[i][..]).collect(),
            settings.diagnostics,
        );
        for warning in diagnostics.overall.warnings.iter() {
            warn!("{warning}");
        }

        let chain_summaries = chains
            .iter()
            .map(|chain| ChainSummary {
                chain: chain.chain_id,
                stats: chain.stats,
                acceptance_rate: chain.stats.acceptance_rate(),
            })
            .collect();

        InferenceResult {
            posterior_samples: items.iter().cloned().zip(pooled).collect(),
            summary_statistics: items.iter().cloned().zip(summaries).collect(),
            densities: items.iter().cloned().zip(densities).collect(),
            convergence_diagnostics: diagnostics,
            model_assumptions: model.assumptions().clone(),
            chains: chain_summaries,
            metadata: InferenceMetadata::new(model, settings, num_datasets),
        }
    }

    /// Result for a universe of one item, which gets all the weight.
    pub(crate) fn point_mass(
        model: &WeightModel,
        settings: &SamplerSettings,
        num_datasets: usize,
    ) -> Self {
        let item = model.items()[0].clone();
        let num_draws = settings.num_chains * settings.num_samples as usize;
        let samples = vec![1f64; num_draws];
        let density = compute_kde(&samples, settings.kde_points);

        InferenceResult {
            posterior_samples: BTreeMap::from([(item.clone(), samples)]),
            summary_statistics: BTreeMap::from([(item.clone(), SummaryStatistics::point_mass(1.))]),
            densities: BTreeMap::from([(item.clone(), density)]),
            convergence_diagnostics: ConvergenceDiagnostics::trivially_converged(&item, num_draws),
            model_assumptions: model.assumptions().clone(),
            chains: Vec::new(),
            metadata: InferenceMetadata::new(model, settings, num_datasets),
        }
    }

    pub fn items(&self) -> &[String] {
        &self.metadata.items
    }

    pub fn samples(&self, item: &str) -> Option<&[f64]> {
        self.posterior_samples.get(item).map(Vec::as_slice)
    }

    pub fn summary(&self, item: &str) -> Option<&SummaryStatistics> {
        self.summary_statistics.get(item)
    }
}

impl InferenceMetadata {
    fn new(model: &WeightModel, settings: &SamplerSettings, num_datasets: usize) -> Self {
        InferenceMetadata {
            num_items: model.dim(),
            num_datasets,
            num_samples: settings.num_samples,
            num_chains: settings.num_chains,
            burn_in: settings.burn_in,
            proposal_scale: settings.proposal_scale,
            credible_level: settings.credible_level,
            seed: settings.seed,
            items: model.items().to_vec(),
        }
    }
}
