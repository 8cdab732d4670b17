//! Markov-chain marginalization.
//!
//! Random-walk Metropolis over the negative log-likelihood: several
//! independent chains run in parallel, each with a pre-run phase whose
//! per-parameter proposal scales adapt toward a target acceptance rate,
//! followed by the sampling phase. Reports per-parameter marginal
//! statistics and the global mode across all chains.

use crate::optimizer::{clamp_params, ObjectiveFn};
use kf_core::{ChainConfig, Error, MinimizerStatus, ModeResult, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Acceptance rate the pre-run adapts toward.
const TARGET_ACCEPT: f64 = 0.234;

/// One Metropolis chain after sampling.
#[derive(Debug, Clone)]
pub struct MarginalChain {
    /// Post-prerun draws.
    pub draws: Vec<Vec<f64>>,
    /// Acceptance rate over the sampling phase.
    pub accept_rate: f64,
    /// Best point seen anywhere in this chain.
    pub best: Vec<f64>,
    /// Objective value at the chain best.
    pub best_fval: f64,
    /// Objective evaluations spent by this chain.
    pub n_eval: usize,
}

/// Result of a multi-chain marginalization run.
#[derive(Debug, Clone)]
pub struct Marginalization {
    /// Individual chains.
    pub chains: Vec<MarginalChain>,
    /// Per-parameter marginal means, pooled across chains.
    pub means: Vec<f64>,
    /// Per-parameter marginal standard deviations, pooled across chains.
    pub stds: Vec<f64>,
    /// Global mode across all chains.
    pub best: Vec<f64>,
    /// Objective value at the global mode.
    pub best_fval: f64,
}

impl Marginalization {
    /// Total number of post-prerun draws.
    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(|c| c.draws.len()).sum()
    }

    /// The global mode as a [`ModeResult`].
    pub fn mode_result(&self) -> ModeResult {
        ModeResult {
            parameters: self.best.clone(),
            fval: self.best_fval,
            code: MinimizerStatus::SUCCESS.code(),
            converged: true,
            n_eval: self.chains.iter().map(|c| c.n_eval).sum(),
            message: "marginalization completed".to_string(),
        }
    }
}

fn run_chain(
    objective: &(dyn ObjectiveFn + Sync),
    init: &[f64],
    bounds: &[(f64, f64)],
    config: &ChainConfig,
    seed: u64,
) -> Result<MarginalChain> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| Error::Computation(format!("Invalid proposal distribution: {e}")))?;

    let n = init.len();
    let mut scales: Vec<f64> =
        bounds.iter().map(|&(lo, hi)| if hi > lo { 0.1 * (hi - lo) } else { 0.0 }).collect();

    let mut current = clamp_params(init, bounds);
    let mut current_f = objective.eval(&current)?;
    let mut best = current.clone();
    let mut best_f = current_f;
    let mut n_eval = 1usize;

    let propose = |current: &[f64], scales: &[f64], rng: &mut StdRng| -> Vec<f64> {
        let raw: Vec<f64> = current
            .iter()
            .zip(scales.iter())
            .map(|(&x, &s)| x + s * normal.sample(rng))
            .collect();
        clamp_params(&raw, bounds)
    };

    // Pre-run: adapt proposal scales every n_update iterations.
    let mut window_accepted = 0usize;
    for iter in 0..config.n_prerun {
        let proposal = propose(&current, &scales, &mut rng);
        let proposal_f = objective.eval(&proposal)?;
        n_eval += 1;

        let accept = proposal_f.is_finite()
            && (proposal_f <= current_f
                || rng.random::<f64>() < (current_f - proposal_f).exp());
        if accept {
            current = proposal;
            current_f = proposal_f;
            window_accepted += 1;
            if current_f < best_f {
                best = current.clone();
                best_f = current_f;
            }
        }

        if config.n_update > 0 && (iter + 1) % config.n_update == 0 {
            let rate = window_accepted as f64 / config.n_update as f64;
            let factor = if rate > TARGET_ACCEPT { 1.1 } else { 0.9 };
            for s in scales.iter_mut().take(n) {
                *s *= factor;
            }
            window_accepted = 0;
        }
    }

    // Sampling phase: scales frozen, draws recorded.
    let mut draws = Vec::with_capacity(config.n_run);
    let mut accepted = 0usize;
    for _ in 0..config.n_run {
        let proposal = propose(&current, &scales, &mut rng);
        let proposal_f = objective.eval(&proposal)?;
        n_eval += 1;

        if proposal_f.is_finite()
            && (proposal_f <= current_f
                || rng.random::<f64>() < (current_f - proposal_f).exp())
        {
            current = proposal;
            current_f = proposal_f;
            accepted += 1;
            if current_f < best_f {
                best = current.clone();
                best_f = current_f;
            }
        }
        draws.push(current.clone());
    }

    let accept_rate =
        if config.n_run > 0 { accepted as f64 / config.n_run as f64 } else { 0.0 };

    Ok(MarginalChain { draws, accept_rate, best, best_fval: best_f, n_eval })
}

/// Run the full multi-chain marginalization.
///
/// Chain `i` is seeded `config.seed + i` and the chains run in parallel.
pub fn marginalize(
    objective: &(dyn ObjectiveFn + Sync),
    init: &[f64],
    bounds: &[(f64, f64)],
    config: &ChainConfig,
) -> Result<Marginalization> {
    use rayon::prelude::*;

    if init.len() != bounds.len() {
        return Err(Error::Validation(format!(
            "Parameter and bounds length mismatch: {} != {}",
            init.len(),
            bounds.len()
        )));
    }
    if config.n_chains == 0 {
        return Err(Error::Validation("marginalize: n_chains must be positive".to_string()));
    }

    let chains: Vec<Result<MarginalChain>> = (0..config.n_chains)
        .into_par_iter()
        .map(|chain_id| {
            let chain_seed = config.seed.wrapping_add(chain_id as u64);
            run_chain(objective, init, bounds, config, chain_seed)
        })
        .collect();
    let chains: Vec<MarginalChain> = chains.into_iter().collect::<Result<Vec<_>>>()?;

    let n = init.len();
    let total: usize = chains.iter().map(|c| c.draws.len()).sum();
    let mut means = vec![0.0; n];
    let mut stds = vec![0.0; n];
    if total > 0 {
        for chain in &chains {
            for draw in &chain.draws {
                for (m, &x) in means.iter_mut().zip(draw.iter()) {
                    *m += x;
                }
            }
        }
        for m in means.iter_mut() {
            *m /= total as f64;
        }
        for chain in &chains {
            for draw in &chain.draws {
                for ((s, &m), &x) in stds.iter_mut().zip(means.iter()).zip(draw.iter()) {
                    *s += (x - m) * (x - m);
                }
            }
        }
        for s in stds.iter_mut() {
            *s = (*s / total as f64).sqrt();
        }
    }

    let best_chain = chains
        .iter()
        .min_by(|a, b| a.best_fval.partial_cmp(&b.best_fval).unwrap_or(std::cmp::Ordering::Equal))
        .ok_or_else(|| Error::Computation("marginalize: no chains produced".to_string()))?;

    Ok(Marginalization {
        best: best_chain.best.clone(),
        best_fval: best_chain.best_fval,
        means,
        stds,
        chains,
    })
}
