//! Collaborator traits for kinfit
//!
//! The fit orchestrator drives a likelihood model and a detector model
//! through these seams only. The orchestrator owns canonical state
//! (particles, missing energy, the permutation table) and passes fresh
//! references into model calls; models hold no back-references into the
//! orchestrator.

use crate::particles::{ParticleCollection, ParticleType};
use crate::types::{ChainConfig, IntegrationMethod, MissingEnergy, ModeResult};
use crate::Result;

/// Detector/resolution model, specified only at its readiness boundary.
pub trait DetectorModel {
    /// Whether the detector description is complete and usable.
    fn status(&self) -> bool;

    /// Detector name (e.g. "ATLAS-like", "toy").
    fn name(&self) -> &str;
}

/// The likelihood model contract consumed by the fit orchestrator.
///
/// A model is reconfigured once per permutation: the orchestrator pushes
/// the missing-energy triple, then calls [`initialize`] with the permuted
/// particle view. Initialization may depend on the missing energy (e.g.
/// parameter-range adjustment), so the ordering is load-bearing.
///
/// [`initialize`]: LikelihoodModel::initialize
pub trait LikelihoodModel {
    /// Set the missing transverse energy components and the scalar sum.
    fn set_missing_energy(&mut self, met: MissingEnergy);

    /// Re-initialize internal state against the given permuted particles.
    fn initialize(&mut self, particles: &ParticleCollection) -> Result<()>;

    /// Clear the sticky NaN flag.
    fn clear_nan_flag(&mut self);

    /// Whether any density evaluation since the last clear was non-finite.
    fn is_nan(&self) -> bool;

    /// Initial parameter guess for the current permutation.
    fn initial_parameters(&self) -> Vec<f64>;

    /// Box bounds per parameter.
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// One deterministic mode-finding pass from `initial`.
    fn run_deterministic(&mut self, initial: &[f64]) -> Result<ModeResult>;

    /// One stochastic (annealing) mode-finding pass from `initial`.
    fn run_stochastic(&mut self, initial: &[f64]) -> Result<ModeResult>;

    /// Full Markov-chain marginalization under the given budgets.
    fn run_markov_chain(&mut self, config: &ChainConfig) -> Result<ModeResult>;

    /// Best-fit parameters of the most recent pass.
    fn best_fit_parameters(&self) -> Vec<f64>;

    /// Uncertainties of the best-fit parameters (empty if unavailable).
    fn best_fit_uncertainties(&self) -> Vec<f64>;

    /// Objective value at the best-fit point.
    fn best_fit_value(&self) -> f64;

    /// Whether `value` of parameter `index` sits at its bound.
    fn parameter_at_limit(&self, index: usize, value: f64) -> bool;

    /// Whether `params` lie inside the valid transfer-function domain.
    fn transfer_functions_valid(&self, params: &[f64]) -> bool;

    /// Whether flavor tagging is enabled for this model.
    fn uses_flavor_tagging(&self) -> bool {
        false
    }

    /// Compute permutation-dependent flavor-tag information.
    fn compute_flavor_tags(&mut self, _particles: &ParticleCollection) {}

    /// Position groups whose exchange leaves the likelihood invariant.
    ///
    /// Consumed by the orchestrator to prune the permutation table; this
    /// replaces the model reaching back into the table itself.
    fn invariant_position_groups(&self) -> Vec<(ParticleType, Vec<usize>)> {
        Vec::new()
    }

    /// Whether a normalization integral is requested after the fit.
    fn requests_normalization(&self) -> bool {
        false
    }

    /// Compute the normalization integral. Never affects fit status.
    fn normalize(&mut self, _method: IntegrationMethod) -> Result<f64> {
        Ok(1.0)
    }
}
