//! Bayesian estimates of categorical item weights from observed counts.
//!
//! Each [`Dataset`] lists how often every item came out of a process,
//! optionally together with the items that went in. Inputs can not be
//! outputs of the same observation, which the likelihood takes into account.
//! [`run_inference`] samples the posterior over the weight simplex with
//! random-walk Metropolis chains and returns the draws together with
//! summaries, density estimates and convergence checks.
//!
//! ```no_run
//! use weight_posterior::{run_inference, Dataset, SamplerSettings};
//!
//! let datasets = [Dataset::new([("tul", 2030), ("xoph", 2007)]).with_inputs(["esh"])];
//! let result = run_inference(&datasets, SamplerSettings::default(), None)?;
//! println!("{:?}", result.summary("tul"));
//! # Ok::<(), weight_posterior::InferenceError>(())
//! ```

pub(crate) mod chain;
pub(crate) mod dataset;
pub(crate) mod diagnostics;
pub(crate) mod error;
pub(crate) mod kde;
pub(crate) mod likelihood;
pub(crate) mod proposal;
pub(crate) mod result;
pub(crate) mod sampler;
pub(crate) mod summary;

pub use chain::{AcceptanceStats, Chain, ChainPhase, MetropolisChain, StepInfo};
pub use dataset::{
    build_model, validate_datasets, Dataset, DatasetAssumption, InputItem, InputMode, ItemCount,
    ModelAssumptions, Observation, WeightModel,
};
pub use diagnostics::{
    diagnose, ConvergenceDiagnostics, DiagnosticsMethod, ItemDiagnostics, OverallDiagnostics,
    MAX_RHAT, MIN_ESS,
};
pub use error::InferenceError;
pub use kde::{compute_kde, silverman_bandwidth, DensityPoint};
pub use likelihood::{log_likelihood, DirichletPrior, Posterior};
pub use proposal::{sample_dirichlet, LogitProposal, WEIGHT_EPS};
pub use result::{ChainSummary, InferenceMetadata, InferenceResult};
pub use sampler::{
    run_inference, CancelToken, ChainOutput, InferenceSession, Phase, Progress, ProgressCallback,
    SamplerSettings, MAX_TOTAL_DRAWS,
};
pub use summary::{
    credible_interval, median, normalize_summaries, quantile, summarize, CredibleInterval,
    SummaryStatistics,
};
