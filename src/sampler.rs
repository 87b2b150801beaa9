use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::{ScopeFifo, ThreadPoolBuilder};
use serde::Deserialize;
use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, Sender},
        Arc,
    },
    time::Instant,
};
use tracing::{debug, info};

use crate::{
    chain::{AcceptanceStats, Chain, ChainPhase, MetropolisChain},
    dataset::{build_model, Dataset, WeightModel},
    diagnostics::DiagnosticsMethod,
    error::{self, InferenceError},
    likelihood::{DirichletPrior, Posterior},
    proposal::LogitProposal,
    result::InferenceResult,
};

/// Share of the progress range used by the chains. The rest is left for
/// summaries and diagnostics.
const SAMPLING_PERCENT: f64 = 90.;
const SUMMARY_PERCENT: f64 = 95.;
const MAX_INIT_TRIES: usize = 100;

/// Settings for an inference run
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SamplerSettings {
    /// Number of recorded draws per chain.
    pub num_samples: u64,
    pub num_chains: usize,
    /// Number of discarded draws at the start of every chain.
    pub burn_in: u64,
    /// Standard deviation of the logit-space random walk.
    pub proposal_scale: f64,
    /// Mass of the reported credible intervals.
    pub credible_level: f64,
    /// Concentration of the symmetric Dirichlet prior.
    pub prior_alpha: f64,
    pub seed: u64,
    /// Chains report progress and check for cancellation this often.
    pub yield_every: u64,
    /// Worker threads for the chains. Zero uses one per chain.
    pub num_threads: usize,
    /// Grid size of the density estimates.
    pub kde_points: usize,
    pub diagnostics: DiagnosticsMethod,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            num_samples: 2000,
            num_chains: 2,
            burn_in: 500,
            proposal_scale: 0.1,
            credible_level: 0.95,
            prior_alpha: 1.,
            seed: 0,
            yield_every: 50,
            num_threads: 0,
            kde_points: 100,
            diagnostics: DiagnosticsMethod::default(),
        }
    }
}

/// Upper bound on burn-in plus recorded steps summed over all chains.
pub const MAX_TOTAL_DRAWS: u64 = 100_000_000;

impl SamplerSettings {
    pub fn validate(&self) -> error::Result<()> {
        let invalid = |msg: String| Err(InferenceError::InvalidSettings(msg));
        if self.num_chains == 0 {
            return invalid("numChains must be at least 1".into());
        }
        if self.num_samples == 0 {
            return invalid("numSamples must be at least 1".into());
        }
        if !(self.proposal_scale.is_finite() && self.proposal_scale > 0.) {
            return invalid(format!(
                "proposalScale must be positive, got {}",
                self.proposal_scale
            ));
        }
        if !(self.prior_alpha.is_finite() && self.prior_alpha > 0.) {
            return invalid(format!(
                "priorAlpha must be positive, got {}",
                self.prior_alpha
            ));
        }
        if !(self.credible_level > 0. && self.credible_level < 1.) {
            return invalid(format!(
                "credibleLevel must be in (0, 1), got {}",
                self.credible_level
            ));
        }
        if self.yield_every == 0 {
            return invalid("yieldEvery must be at least 1".into());
        }
        let total = self
            .burn_in
            .checked_add(self.num_samples)
            .and_then(|per_chain| per_chain.checked_mul(self.num_chains as u64));
        match total {
            Some(total) if total <= MAX_TOTAL_DRAWS => Ok(()),
            _ => invalid(format!(
                "numChains * (burnIn + numSamples) must not exceed {MAX_TOTAL_DRAWS}, \
                 got {} chains of {} + {} draws",
                self.num_chains, self.burn_in, self.num_samples
            )),
        }
    }

    fn draws_per_chain(&self) -> u64 {
        self.burn_in + self.num_samples
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    BurnIn,
    Sampling,
    Summarizing,
    Done,
}

/// Progress of an inference run, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub struct Progress {
    pub phase: Phase,
    pub percent: f64,
}

pub struct ProgressCallback {
    pub callback: Box<dyn FnMut(Progress) + Send>,
}

impl ProgressCallback {
    pub fn new(callback: impl FnMut(Progress) + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Forward progress events into a channel.
    pub fn channel() -> (Self, Receiver<Progress>) {
        let (tx, rx) = channel();
        let callback = Self::new(move |progress| {
            // The receiving end may have lost interest.
            let _ = tx.send(progress);
        });
        (callback, rx)
    }
}

/// Reports progress without ever going backwards.
struct ProgressReporter {
    callback: Option<ProgressCallback>,
    last: Option<Progress>,
}

impl ProgressReporter {
    fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            last: None,
        }
    }

    fn report(&mut self, phase: Phase, percent: f64) {
        let percent = percent.clamp(0., 100.);
        if let Some(last) = self.last {
            if percent < last.percent || (percent == last.percent && phase == last.phase) {
                return;
            }
        }
        let progress = Progress { phase, percent };
        self.last = Some(progress);
        if let Some(ProgressCallback { callback }) = &mut self.callback {
            callback(progress);
        }
    }
}

/// Cooperative cancellation, checked by every chain at each yield point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Draws of one chain after burn-in, one vector per item.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub chain_id: u64,
    pub draws: Vec<Vec<f64>>,
    pub stats: AcceptanceStats,
}

enum ChainMessage {
    Advanced {
        chain: usize,
        finished_draws: u64,
        tuning: bool,
    },
    Finished {
        chain: usize,
        result: Result<ChainOutput>,
    },
}

struct ChainRun<'model> {
    model: &'model WeightModel,
    settings: &'model SamplerSettings,
    chain_id: u64,
    cancel: &'model CancelToken,
    stop: &'model CancelToken,
    messages: Sender<ChainMessage>,
}

impl ChainRun<'_> {
    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.stop.is_cancelled()
    }

    fn report(&self, finished_draws: u64, tuning: bool) {
        // The controller only goes away once every chain is done.
        let _ = self.messages.send(ChainMessage::Advanced {
            chain: self.chain_id as usize,
            finished_draws,
            tuning,
        });
    }

    fn sample(&self) -> Result<ChainOutput> {
        let settings = self.settings;
        let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
        rng.set_stream(self.chain_id);

        let prior = DirichletPrior::symmetric(self.model.dim(), settings.prior_alpha);
        let posterior = Posterior::new(self.model, prior);
        let proposal = LogitProposal::new(settings.proposal_scale)?;
        let mut chain = MetropolisChain::new(
            posterior,
            proposal,
            settings.burn_in,
            settings.num_samples,
            rng,
            self.chain_id,
        );

        let mut error = None;
        for _ in 0..MAX_INIT_TRIES {
            match chain.init_from_prior() {
                Ok(()) => {
                    error = None;
                    break;
                }
                Err(err) => error = Some(err),
            }
        }
        if let Some(error) = error {
            return Err(error.context("All initialization points failed"));
        }
        self.report(0, settings.burn_in > 0);

        let mut draws = vec![Vec::with_capacity(settings.num_samples as usize); chain.dim()];
        let mut finished = 0;
        while chain.phase() != ChainPhase::Done {
            let info = chain.step()?;
            if !info.tuning {
                draws
                    .iter_mut()
                    .zip(chain.position())
                    .for_each(|(draws, &w)| draws.push(w));
            }
            finished += 1;

            let phase_end = chain.phase() == ChainPhase::Done || finished == settings.burn_in;
            if finished % settings.yield_every == 0 || phase_end {
                if self.should_stop() {
                    return Err(InferenceError::Cancelled.into());
                }
                self.report(finished, chain.phase() == ChainPhase::BurnIn);
            }
        }

        let stats = *chain.stats();
        debug!(
            chain = self.chain_id,
            acceptance_rate = stats.acceptance_rate(),
            burn_in_accepted = stats.burn_in_accepted,
            "Chain finished"
        );
        Ok(ChainOutput {
            chain_id: self.chain_id,
            draws,
            stats,
        })
    }

    fn start<'scope>(self, scope: &ScopeFifo<'scope>)
    where
        Self: 'scope,
    {
        scope.spawn_fifo(move |_| {
            let chain = self.chain_id as usize;
            let result = self
                .sample()
                .with_context(|| format!("Chain {chain} failed"));
            let _ = self.messages.send(ChainMessage::Finished { chain, result });
        });
    }
}

#[derive(Debug, Clone, Copy)]
struct ChainProgress {
    finished_draws: u64,
    tuning: bool,
}

/// Run all chains on a thread pool and collect their draws in chain order.
fn sample_chains(
    model: &WeightModel,
    settings: &SamplerSettings,
    reporter: &mut ProgressReporter,
    cancel: &CancelToken,
) -> Result<Vec<ChainOutput>> {
    let num_chains = settings.num_chains;
    let num_threads = match settings.num_threads {
        0 => num_chains,
        n => n,
    };
    let pool = ThreadPoolBuilder::new()
        .num_threads(num_threads + 1) // One more thread because the controller also uses one
        .thread_name(|i| format!("weight-chain-{}", i))
        .build()
        .context("Could not start thread pool")?;

    // Stops the remaining chains as soon as one of them fails.
    let stop = CancelToken::new();
    let total_draws = (settings.draws_per_chain() * num_chains as u64).max(1) as f64;

    pool.scope_fifo(|scope| {
        let (messages_tx, messages_rx) = channel();
        for chain_id in 0..num_chains {
            ChainRun {
                model,
                settings,
                chain_id: chain_id as u64,
                cancel,
                stop: &stop,
                messages: messages_tx.clone(),
            }
            .start(scope);
        }
        drop(messages_tx);

        let mut progress = vec![
            ChainProgress {
                finished_draws: 0,
                tuning: settings.burn_in > 0,
            };
            num_chains
        ];
        let mut outputs: Vec<Option<ChainOutput>> = vec![None; num_chains];
        let mut first_error = None;

        // Ends once every chain has dropped its sender.
        for message in messages_rx.iter() {
            match message {
                ChainMessage::Advanced {
                    chain,
                    finished_draws,
                    tuning,
                } => {
                    progress[chain] = ChainProgress {
                        finished_draws,
                        tuning,
                    };
                }
                ChainMessage::Finished { chain, result } => match result {
                    Ok(output) => {
                        progress[chain].finished_draws = settings.draws_per_chain();
                        progress[chain].tuning = false;
                        outputs[chain] = Some(output);
                    }
                    Err(err) => {
                        stop.cancel();
                        first_error.get_or_insert(err);
                    }
                },
            }
            if first_error.is_none() {
                let finished: u64 = progress.iter().map(|chain| chain.finished_draws).sum();
                let phase = if progress.iter().any(|chain| chain.tuning) {
                    Phase::BurnIn
                } else {
                    Phase::Sampling
                };
                reporter.report(phase, SAMPLING_PERCENT * finished as f64 / total_draws);
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        outputs
            .into_iter()
            .enumerate()
            .map(|(chain, output)| output.with_context(|| format!("Chain {chain} did not report")))
            .collect()
    })
}

/// One inference run over a batch of datasets.
///
/// Holds everything a run needs, so nothing about a run lives in global
/// state.
pub struct InferenceSession<'a> {
    datasets: &'a [Dataset],
    settings: SamplerSettings,
    progress: Option<ProgressCallback>,
    cancel: CancelToken,
}

impl<'a> InferenceSession<'a> {
    pub fn new(datasets: &'a [Dataset], settings: SamplerSettings) -> Self {
        Self {
            datasets,
            settings,
            progress: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A token that cancels this session when triggered.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    pub fn run(self) -> error::Result<InferenceResult> {
        let settings = self.settings;
        settings.validate()?;
        let model = build_model(self.datasets)?;
        let mut reporter = ProgressReporter::new(self.progress);
        reporter.report(Phase::Initializing, 0.);

        info!(
            num_items = model.dim(),
            num_datasets = self.datasets.len(),
            num_chains = settings.num_chains,
            num_samples = settings.num_samples,
            burn_in = settings.burn_in,
            "Starting inference"
        );
        let start = Instant::now();

        if model.dim() == 1 {
            let result = InferenceResult::point_mass(&model, &settings, self.datasets.len());
            reporter.report(Phase::Done, 100.);
            return Ok(result);
        }

        let chains = sample_chains(&model, &settings, &mut reporter, &self.cancel)
            .map_err(InferenceError::from_sampling)?;

        reporter.report(Phase::Summarizing, SUMMARY_PERCENT);
        let result = InferenceResult::from_chains(&model, &settings, self.datasets.len(), &chains);
        reporter.report(Phase::Done, 100.);

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            converged = result.convergence_diagnostics.overall.converged,
            "Inference finished"
        );
        Ok(result)
    }
}

/// Estimate the item weights behind `datasets`.
pub fn run_inference(
    datasets: &[Dataset],
    settings: SamplerSettings,
    progress: Option<ProgressCallback>,
) -> error::Result<InferenceResult> {
    let mut session = InferenceSession::new(datasets, settings);
    if let Some(progress) = progress {
        session = session.with_progress(progress);
    }
    session.run()
}

impl Debug for ProgressCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressCallback").finish_non_exhaustive()
    }
}
