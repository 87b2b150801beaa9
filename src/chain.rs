use anyhow::{bail, Result};
use rand::Rng;
use serde::Serialize;

use crate::{
    likelihood::Posterior,
    proposal::{sample_dirichlet, LogitProposal},
};

/// Where a chain is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChainPhase {
    Idle,
    BurnIn,
    Sampling,
    Done,
}

/// Result of a single Metropolis step.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct StepInfo {
    pub chain: u64,
    /// Index of the step within its phase.
    pub draw: u64,
    pub accepted: bool,
    pub tuning: bool,
    pub logp: f64,
}

/// Accept counts of one chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptanceStats {
    pub burn_in_proposed: u64,
    pub burn_in_accepted: u64,
    pub proposed: u64,
    pub accepted: u64,
}

impl AcceptanceStats {
    fn record(&mut self, tuning: bool, accepted: bool) {
        if tuning {
            self.burn_in_proposed += 1;
            self.burn_in_accepted += accepted as u64;
        } else {
            self.proposed += 1;
            self.accepted += accepted as u64;
        }
    }

    /// Acceptance rate after burn-in.
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposed == 0 {
            return 0.;
        }
        self.accepted as f64 / self.proposed as f64
    }
}

/// Draw samples from the weight posterior with random-walk Metropolis.
pub trait Chain {
    /// Initialize the chain to a position. This must be called before
    /// calling `step`.
    fn set_position(&mut self, position: &[f64]) -> Result<()>;

    /// Advance the chain by one Metropolis step.
    fn step(&mut self) -> Result<StepInfo>;

    /// The current state of the chain.
    fn position(&self) -> &[f64];

    fn phase(&self) -> ChainPhase;

    fn dim(&self) -> usize;
}

pub struct MetropolisChain<'model, R: Rng> {
    posterior: Posterior<'model>,
    proposal: LogitProposal,
    rng: R,
    chain: u64,
    position: Box<[f64]>,
    candidate: Box<[f64]>,
    logp: f64,
    phase: ChainPhase,
    num_burn_in: u64,
    num_samples: u64,
    draw_count: u64,
    stats: AcceptanceStats,
}

impl<'model, R: Rng> MetropolisChain<'model, R> {
    pub fn new(
        posterior: Posterior<'model>,
        proposal: LogitProposal,
        num_burn_in: u64,
        num_samples: u64,
        rng: R,
        chain: u64,
    ) -> Self {
        let dim = posterior.dim();
        MetropolisChain {
            posterior,
            proposal,
            rng,
            chain,
            position: vec![0f64; dim].into(),
            candidate: vec![0f64; dim].into(),
            logp: f64::NEG_INFINITY,
            phase: ChainPhase::Idle,
            num_burn_in,
            num_samples,
            draw_count: 0,
            stats: AcceptanceStats::default(),
        }
    }

    /// Start from a draw of the Dirichlet prior.
    pub fn init_from_prior(&mut self) -> Result<()> {
        let mut init = vec![0f64; self.dim()];
        sample_dirichlet(&mut self.rng, self.posterior.prior(), &mut init)?;
        self.set_position(&init)
    }

    pub fn stats(&self) -> &AcceptanceStats {
        &self.stats
    }

    pub fn chain(&self) -> u64 {
        self.chain
    }

    pub fn logp(&self) -> f64 {
        self.logp
    }

    fn advance_phase(&mut self) {
        loop {
            let next = match self.phase {
                ChainPhase::BurnIn if self.draw_count == self.num_burn_in => ChainPhase::Sampling,
                ChainPhase::Sampling if self.draw_count == self.num_samples => ChainPhase::Done,
                _ => return,
            };
            self.phase = next;
            self.draw_count = 0;
        }
    }
}

impl<R: Rng> Chain for MetropolisChain<'_, R> {
    fn set_position(&mut self, position: &[f64]) -> Result<()> {
        if position.len() != self.dim() {
            bail!(
                "Initial position has length {}, expected {}",
                position.len(),
                self.dim()
            );
        }
        let logp = self.posterior.logp(position);
        if !logp.is_finite() {
            bail!("Log posterior at initial position is not finite: {logp}");
        }
        self.position.copy_from_slice(position);
        self.logp = logp;
        self.phase = ChainPhase::BurnIn;
        self.draw_count = 0;
        self.advance_phase();
        Ok(())
    }

    fn step(&mut self) -> Result<StepInfo> {
        let tuning = match self.phase {
            ChainPhase::BurnIn => true,
            ChainPhase::Sampling => false,
            ChainPhase::Idle => bail!("Chain {} has not been initialized", self.chain),
            ChainPhase::Done => bail!("Chain {} has no draws left", self.chain),
        };

        self.proposal
            .propose(&mut self.rng, &self.position, &mut self.candidate);
        let candidate_logp = self.posterior.logp(&self.candidate);
        let log_u = self.rng.random::<f64>().ln();
        let accepted = log_u < candidate_logp - self.logp;
        if accepted {
            std::mem::swap(&mut self.position, &mut self.candidate);
            self.logp = candidate_logp;
        }
        self.stats.record(tuning, accepted);

        let info = StepInfo {
            chain: self.chain,
            draw: self.draw_count,
            accepted,
            tuning,
            logp: self.logp,
        };
        self.draw_count += 1;
        self.advance_phase();
        Ok(info)
    }

    fn position(&self) -> &[f64] {
        &self.position
    }

    fn phase(&self) -> ChainPhase {
        self.phase
    }

    fn dim(&self) -> usize {
        self.posterior.dim()
    }
}
