//! Base likelihood plumbing.
//!
//! [`EventDensity`] is the seam to the physics: a user-supplied density
//! over the fit parameters for one permuted event. [`BaseLikelihood`]
//! wraps a density and implements the full [`LikelihoodModel`] contract:
//! strategy wiring (deterministic, annealing, Markov chain), sticky
//! NaN-flag bookkeeping, best-fit storage, and Hessian-based parameter
//! uncertainties at the mode.

use crate::anneal::{AnnealConfig, Annealer};
use crate::mcmc;
use crate::optimizer::{BoundedLbfgs, LbfgsConfig, ObjectiveFn};
use kf_core::traits::LikelihoodModel;
use kf_core::{
    ChainConfig, Error, IntegrationMethod, MissingEnergy, ModeResult, ParticleCollection,
    ParticleType, Result,
};
use nalgebra::DMatrix;
use std::sync::atomic::{AtomicBool, Ordering};

/// Objective value substituted when the density is non-finite, so the
/// optimizer can keep moving while the NaN flag records the incident.
const NAN_PENALTY: f64 = 1e30;

/// The physics part of a likelihood: a density over the fit parameters
/// for one permuted event. Out of scope for this engine beyond this
/// boundary.
pub trait EventDensity: Send + Sync {
    /// Number of fit parameters.
    fn dim(&self) -> usize;

    /// Box bounds per parameter.
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Initial parameter guess for the configured permutation.
    fn initial_parameters(&self) -> Vec<f64>;

    /// Negative log-likelihood at `params`.
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Whether `params` lie inside the transfer-function domain.
    fn transfer_functions_valid(&self, _params: &[f64]) -> bool {
        true
    }

    /// Reconfigure against a permuted particle view. The missing energy
    /// is supplied here because parameter-range adjustment may use it.
    fn configure(&mut self, particles: &ParticleCollection, met: MissingEnergy) -> Result<()>;

    /// Whether flavor tagging is enabled.
    fn uses_flavor_tagging(&self) -> bool {
        false
    }

    /// Compute permutation-dependent flavor-tag information.
    fn compute_flavor_tags(&mut self, _particles: &ParticleCollection) {}

    /// Position groups whose exchange leaves the density invariant.
    fn invariant_position_groups(&self) -> Vec<(ParticleType, Vec<usize>)> {
        Vec::new()
    }

    /// Whether a normalization integral is requested after the fit.
    fn requests_normalization(&self) -> bool {
        false
    }
}

/// Objective adapter: routes density evaluations to the optimizer
/// strategies and latches the NaN flag on any non-finite value.
struct DensityObjective<'a, D: EventDensity> {
    density: &'a D,
    nan_flag: &'a AtomicBool,
}

impl<D: EventDensity> ObjectiveFn for DensityObjective<'_, D> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let value = self.density.nll(params)?;
        if value.is_finite() {
            Ok(value)
        } else {
            self.nan_flag.store(true, Ordering::Relaxed);
            Ok(NAN_PENALTY)
        }
    }
}

/// [`LikelihoodModel`] implementation over an [`EventDensity`].
pub struct BaseLikelihood<D: EventDensity> {
    density: D,
    met: MissingEnergy,
    nan_flag: AtomicBool,
    best: Vec<f64>,
    best_fval: f64,
    uncertainties: Vec<f64>,
    lbfgs_config: LbfgsConfig,
    anneal_config: AnnealConfig,
}

impl<D: EventDensity> BaseLikelihood<D> {
    /// Wrap a density with default strategy configurations.
    pub fn new(density: D) -> Self {
        Self {
            density,
            met: MissingEnergy::default(),
            nan_flag: AtomicBool::new(false),
            best: Vec::new(),
            best_fval: f64::NAN,
            uncertainties: Vec::new(),
            lbfgs_config: LbfgsConfig::default(),
            anneal_config: AnnealConfig::default(),
        }
    }

    /// Override the deterministic-minimizer configuration.
    pub fn with_lbfgs_config(mut self, config: LbfgsConfig) -> Self {
        self.lbfgs_config = config;
        self
    }

    /// Override the annealing schedule.
    pub fn with_anneal_config(mut self, config: AnnealConfig) -> Self {
        self.anneal_config = config;
        self
    }

    /// The wrapped density.
    pub fn density(&self) -> &D {
        &self.density
    }

    /// Uncertainties from the inverse Hessian at `params`.
    ///
    /// Damped Cholesky solve; falls back to the diagonal approximation
    /// when the Hessian is not positive definite.
    fn mode_uncertainties(
        &self,
        objective: &DensityObjective<'_, D>,
        params: &[f64],
    ) -> Result<Vec<f64>> {
        let n = params.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let grad_center = objective.gradient(params)?;
        let mut hessian = DMatrix::zeros(n, n);
        for j in 0..n {
            let eps = 1e-4 * params[j].abs().max(1.0);
            let mut plus = params.to_vec();
            plus[j] += eps;
            let grad_plus = objective.gradient(&plus)?;
            for i in 0..n {
                hessian[(i, j)] = (grad_plus[i] - grad_center[i]) / eps;
            }
        }
        // Symmetrise: H = (H + H^T) / 2
        let ht = hessian.transpose();
        hessian = (&hessian + &ht) * 0.5;

        if let Some(covariance) = invert_hessian(&hessian, n) {
            let mut ok = true;
            let mut uncertainties = Vec::with_capacity(n);
            for i in 0..n {
                let var = covariance[(i, i)];
                if var.is_finite() && var > 0.0 {
                    uncertainties.push(var.sqrt());
                } else {
                    ok = false;
                    break;
                }
            }
            if ok {
                return Ok(uncertainties);
            }
        }

        log::warn!("Hessian inversion failed, using diagonal approximation");
        Ok((0..n)
            .map(|i| {
                let denom = hessian[(i, i)].abs().max(1e-12);
                1.0 / denom.sqrt()
            })
            .collect())
    }

    fn store_result(&mut self, result: &ModeResult, uncertainties: Vec<f64>) {
        self.best = result.parameters.clone();
        self.best_fval = result.fval;
        self.uncertainties = uncertainties;
    }
}

/// Invert the Hessian via damped Cholesky; `None` when hopeless.
fn invert_hessian(hessian: &DMatrix<f64>, n: usize) -> Option<DMatrix<f64>> {
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut damped = hessian.clone();
    let mut damping = 0.0_f64;
    let max_attempts = 10;

    for attempt in 0..max_attempts {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(damped.clone()) {
            return Some(chol.solve(&identity));
        }
        if attempt + 1 == max_attempts {
            break;
        }
        let next = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        let add = next - damping;
        for i in 0..n {
            damped[(i, i)] += add;
        }
        damping = next;
    }

    let cov = damped.lu().try_inverse()?;
    for i in 0..n {
        let v = cov[(i, i)];
        if !(v.is_finite() && v > 0.0) {
            return None;
        }
    }
    Some(cov)
}

impl<D: EventDensity> LikelihoodModel for BaseLikelihood<D> {
    fn set_missing_energy(&mut self, met: MissingEnergy) {
        self.met = met;
    }

    fn initialize(&mut self, particles: &ParticleCollection) -> Result<()> {
        self.density.configure(particles, self.met)?;
        self.best = self.density.initial_parameters();
        self.best_fval = f64::NAN;
        self.uncertainties.clear();
        Ok(())
    }

    fn clear_nan_flag(&mut self) {
        self.nan_flag.store(false, Ordering::Relaxed);
    }

    fn is_nan(&self) -> bool {
        self.nan_flag.load(Ordering::Relaxed)
    }

    fn initial_parameters(&self) -> Vec<f64> {
        self.density.initial_parameters()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.density.parameter_bounds()
    }

    fn run_deterministic(&mut self, initial: &[f64]) -> Result<ModeResult> {
        let (result, uncertainties) = {
            let objective = DensityObjective { density: &self.density, nan_flag: &self.nan_flag };
            let minimizer = BoundedLbfgs::new(self.lbfgs_config.clone());
            let bounds = self.density.parameter_bounds();
            let result = minimizer.minimize(&objective, initial, &bounds)?;
            let uncertainties = self.mode_uncertainties(&objective, &result.parameters)?;
            (result, uncertainties)
        };
        self.store_result(&result, uncertainties);
        Ok(result)
    }

    fn run_stochastic(&mut self, initial: &[f64]) -> Result<ModeResult> {
        let result = {
            let objective = DensityObjective { density: &self.density, nan_flag: &self.nan_flag };
            let annealer = Annealer::new(self.anneal_config.clone());
            let bounds = self.density.parameter_bounds();
            annealer.minimize(&objective, initial, &bounds)?
        };
        // No curvature information from a stochastic pass.
        self.store_result(&result, Vec::new());
        Ok(result)
    }

    fn run_markov_chain(&mut self, config: &ChainConfig) -> Result<ModeResult> {
        let (result, stds) = {
            let objective = DensityObjective { density: &self.density, nan_flag: &self.nan_flag };
            let bounds = self.density.parameter_bounds();
            let initial = self.density.initial_parameters();
            let marginalization = mcmc::marginalize(&objective, &initial, &bounds, config)?;
            (marginalization.mode_result(), marginalization.stds.clone())
        };
        self.store_result(&result, stds);
        Ok(result)
    }

    fn best_fit_parameters(&self) -> Vec<f64> {
        self.best.clone()
    }

    fn best_fit_uncertainties(&self) -> Vec<f64> {
        self.uncertainties.clone()
    }

    fn best_fit_value(&self) -> f64 {
        self.best_fval
    }

    fn parameter_at_limit(&self, index: usize, value: f64) -> bool {
        let bounds = self.density.parameter_bounds();
        match bounds.get(index) {
            Some(&(lo, hi)) => (value - lo).abs() < 1e-10 || (value - hi).abs() < 1e-10,
            None => false,
        }
    }

    fn transfer_functions_valid(&self, params: &[f64]) -> bool {
        self.density.transfer_functions_valid(params)
    }

    fn uses_flavor_tagging(&self) -> bool {
        self.density.uses_flavor_tagging()
    }

    fn compute_flavor_tags(&mut self, particles: &ParticleCollection) {
        self.density.compute_flavor_tags(particles);
    }

    fn invariant_position_groups(&self) -> Vec<(ParticleType, Vec<usize>)> {
        self.density.invariant_position_groups()
    }

    fn requests_normalization(&self) -> bool {
        self.density.requests_normalization()
    }

    fn normalize(&mut self, method: IntegrationMethod) -> Result<f64> {
        let bounds = self.density.parameter_bounds();
        let n = bounds.len();
        if n == 0 {
            return Ok(1.0);
        }
        let volume: f64 = bounds.iter().map(|&(lo, hi)| (hi - lo).max(0.0)).product();
        if volume == 0.0 {
            return Err(Error::Computation(
                "normalize: parameter box has zero volume".to_string(),
            ));
        }
        let objective = DensityObjective { density: &self.density, nan_flag: &self.nan_flag };

        let mean = match method {
            IntegrationMethod::MonteCarlo => {
                use rand::rngs::StdRng;
                use rand::{Rng, SeedableRng};
                let n_samples = 10_000usize;
                let mut rng = StdRng::seed_from_u64(0x6b66);
                let mut sum = 0.0;
                for _ in 0..n_samples {
                    let point: Vec<f64> = bounds
                        .iter()
                        .map(|&(lo, hi)| lo + (hi - lo) * rng.random::<f64>())
                        .collect();
                    let value = objective.eval(&point)?;
                    sum += (-value).exp();
                }
                sum / n_samples as f64
            }
            IntegrationMethod::Grid => {
                // Per-dimension resolution capped so the grid stays small.
                let points_per_dim =
                    ((4096.0_f64).powf(1.0 / n as f64).floor() as usize).clamp(2, 64);
                let total = points_per_dim.pow(n as u32);
                let mut sum = 0.0;
                for flat in 0..total {
                    let mut remainder = flat;
                    let point: Vec<f64> = bounds
                        .iter()
                        .map(|&(lo, hi)| {
                            let idx = remainder % points_per_dim;
                            remainder /= points_per_dim;
                            lo + (hi - lo) * (idx as f64 + 0.5) / points_per_dim as f64
                        })
                        .collect();
                    sum += (-objective.eval(&point)?).exp();
                }
                sum / total as f64
            }
        };

        Ok(volume * mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Quadratic toy density: NLL = sum (x_i - center_i)^2, with an
    /// optional NaN region and a transfer-function window.
    pub(crate) struct QuadraticDensity {
        pub center: Vec<f64>,
        pub bounds: Vec<(f64, f64)>,
        pub init: Vec<f64>,
        pub nan_above: Option<f64>,
        pub tf_valid: bool,
    }

    impl QuadraticDensity {
        pub fn new(center: Vec<f64>) -> Self {
            let n = center.len();
            Self {
                center,
                bounds: vec![(-10.0, 10.0); n],
                init: vec![0.0; n],
                nan_above: None,
                tf_valid: true,
            }
        }
    }

    impl EventDensity for QuadraticDensity {
        fn dim(&self) -> usize {
            self.center.len()
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            self.bounds.clone()
        }

        fn initial_parameters(&self) -> Vec<f64> {
            self.init.clone()
        }

        fn nll(&self, params: &[f64]) -> Result<f64> {
            if let Some(limit) = self.nan_above {
                if params.iter().any(|&x| x > limit) {
                    return Ok(f64::NAN);
                }
            }
            Ok(params
                .iter()
                .zip(self.center.iter())
                .map(|(&x, &c)| (x - c) * (x - c))
                .sum())
        }

        fn transfer_functions_valid(&self, _params: &[f64]) -> bool {
            self.tf_valid
        }

        fn configure(&mut self, _particles: &ParticleCollection, _met: MissingEnergy) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_deterministic_pass_stores_best() {
        let mut likelihood = BaseLikelihood::new(QuadraticDensity::new(vec![1.5, -0.5]));
        likelihood.initialize(&ParticleCollection::new()).unwrap();

        let init = likelihood.initial_parameters();
        let result = likelihood.run_deterministic(&init).unwrap();

        assert_eq!(result.code, 0);
        assert_relative_eq!(likelihood.best_fit_parameters()[0], 1.5, epsilon = 1e-4);
        assert_relative_eq!(likelihood.best_fit_parameters()[1], -0.5, epsilon = 1e-4);
        // NLL = sum (x-c)^2 has Hessian diag 2: sigma = 1/sqrt(2).
        let unc = likelihood.best_fit_uncertainties();
        assert_relative_eq!(unc[0], 1.0 / 2.0_f64.sqrt(), epsilon = 0.05);
        assert!(!likelihood.is_nan());
    }

    #[test]
    fn test_nan_flag_latches() {
        let mut density = QuadraticDensity::new(vec![0.0]);
        density.nan_above = Some(0.5);
        let mut likelihood = BaseLikelihood::new(density);
        likelihood.initialize(&ParticleCollection::new()).unwrap();

        // Start inside the NaN region so evaluation trips the flag.
        let _ = likelihood.run_stochastic(&[5.0]);
        assert!(likelihood.is_nan());

        likelihood.clear_nan_flag();
        assert!(!likelihood.is_nan());
    }

    #[test]
    fn test_parameter_at_limit() {
        let likelihood = BaseLikelihood::new(QuadraticDensity::new(vec![0.0, 0.0]));
        assert!(likelihood.parameter_at_limit(0, -10.0));
        assert!(likelihood.parameter_at_limit(1, 10.0));
        assert!(!likelihood.parameter_at_limit(0, 0.0));
        assert!(!likelihood.parameter_at_limit(5, 0.0));
    }

    #[test]
    fn test_markov_chain_stores_marginal_widths() {
        let mut likelihood = BaseLikelihood::new(QuadraticDensity::new(vec![2.0]));
        likelihood.initialize(&ParticleCollection::new()).unwrap();

        let config = ChainConfig { n_chains: 2, n_prerun: 300, n_run: 800, n_update: 100, seed: 5 };
        let result = likelihood.run_markov_chain(&config).unwrap();
        assert!(result.converged);
        assert!(result.fval < 0.1);
        // NLL = (x-2)^2 is a Gaussian with sigma = 1/sqrt(2).
        let stds = likelihood.best_fit_uncertainties();
        assert!(stds[0] > 0.3 && stds[0] < 1.5, "marginal std {} implausible", stds[0]);
    }

    #[test]
    fn test_normalization_gaussian() {
        let mut density = QuadraticDensity::new(vec![0.0]);
        density.bounds = vec![(-10.0, 10.0)];
        let mut likelihood = BaseLikelihood::new(density);
        likelihood.initialize(&ParticleCollection::new()).unwrap();
        let init = likelihood.initial_parameters();
        likelihood.run_deterministic(&init).unwrap();

        // Integral of exp(-x^2) over the real line is sqrt(pi); the box
        // covers essentially all of it.
        let grid = likelihood.normalize(IntegrationMethod::Grid).unwrap();
        assert_relative_eq!(grid, std::f64::consts::PI.sqrt(), epsilon = 0.05);

        let mc = likelihood.normalize(IntegrationMethod::MonteCarlo).unwrap();
        assert_relative_eq!(mc, std::f64::consts::PI.sqrt(), epsilon = 0.3);
    }
}
