//! Fit orchestration.
//!
//! Drives the likelihood model over the permutation space: permutation
//! activation, model reconfiguration, strategy dispatch with staged
//! fallback, and classification of the fit quality into a status code
//! plus named diagnostic flags.

use crate::permutations::PermutationTable;
use kf_core::{
    ChainConfig, ConvergenceFlags, DetectorModel, Error, FitSummary, IntegrationMethod,
    LikelihoodModel, MinimizationMethod, MinimizerStatus, MissingEnergy, ParticleCollection,
    Result,
};

/// The fit orchestrator.
///
/// Owns canonical state (particles, missing energy, the permutation
/// table) and passes fresh references into model calls; configuration
/// (method, fallback toggle, chain budgets) persists across events.
/// One in-flight fit at a time: the type is not reentrant.
pub struct Fitter<L: LikelihoodModel, D: DetectorModel> {
    likelihood: Option<L>,
    detector: Option<D>,
    particles: Option<ParticleCollection>,
    permutations: PermutationTable,
    met: MissingEnergy,
    method: MinimizationMethod,
    minimizer_status: MinimizerStatus,
    flags: ConvergenceFlags,
    annealing_fallback: bool,
    chain_config: ChainConfig,
}

impl<L: LikelihoodModel, D: DetectorModel> Default for Fitter<L, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: LikelihoodModel, D: DetectorModel> Fitter<L, D> {
    /// An orchestrator with no collaborators wired yet.
    pub fn new() -> Self {
        Self {
            likelihood: None,
            detector: None,
            particles: None,
            permutations: PermutationTable::new(),
            met: MissingEnergy::default(),
            method: MinimizationMethod::default(),
            minimizer_status: MinimizerStatus::SUCCESS,
            flags: ConvergenceFlags::default(),
            annealing_fallback: true,
            chain_config: ChainConfig::default(),
        }
    }

    /// Set the measured particles for this event.
    ///
    /// Rebuilds the permutation table, prunes physically-invariant
    /// permutations (if a likelihood is wired), and activates
    /// permutation 0.
    pub fn set_particles(&mut self, particles: ParticleCollection) -> Result<()> {
        self.permutations.reset();
        self.permutations.rebuild(&particles);
        if let Some(likelihood) = &self.likelihood {
            for (ptype, positions) in likelihood.invariant_position_groups() {
                self.permutations.remove_invariant(ptype, &positions);
            }
        }
        if !self.permutations.activate(0) {
            return Err(Error::Validation(
                "set_particles: no valid permutation for this particle set".to_string(),
            ));
        }
        self.particles = Some(particles);
        Ok(())
    }

    /// Set the missing transverse energy components and scalar sum,
    /// once per event before fitting.
    pub fn set_missing_energy_and_sum_et(&mut self, x: f64, y: f64, sum_et: f64) {
        self.met = MissingEnergy { x, y, sum_et };
    }

    /// Wire the detector model.
    pub fn set_detector(&mut self, detector: D) {
        self.detector = Some(detector);
    }

    /// Wire the likelihood model.
    ///
    /// If particles are already set, invariant permutations are pruned
    /// against the new model.
    pub fn set_likelihood(&mut self, likelihood: L) -> Result<()> {
        if self.particles.is_some() {
            for (ptype, positions) in likelihood.invariant_position_groups() {
                self.permutations.remove_invariant(ptype, &positions);
            }
            if !self.permutations.activate(0) {
                return Err(Error::Validation(
                    "set_likelihood: invariant pruning left no permutation".to_string(),
                ));
            }
        }
        self.likelihood = Some(likelihood);
        Ok(())
    }

    /// Choose the primary mode-finding strategy.
    pub fn set_minimization_method(&mut self, method: MinimizationMethod) {
        self.method = method;
    }

    /// Enable or disable the stochastic rescue pass after a failed
    /// deterministic pass. Enabled by default.
    pub fn set_annealing_fallback(&mut self, enabled: bool) {
        self.annealing_fallback = enabled;
    }

    /// Markov-chain iteration budgets, mutable for configuration.
    pub fn chain_config_mut(&mut self) -> &mut ChainConfig {
        &mut self.chain_config
    }

    /// Status code of the last deterministic pass (after classification).
    pub fn minimizer_status(&self) -> MinimizerStatus {
        self.minimizer_status
    }

    /// Diagnostic flags of the last `fit_one` call.
    pub fn convergence_flags(&self) -> ConvergenceFlags {
        self.flags
    }

    /// The permutation table (e.g. to query the permutation count).
    pub fn permutations(&self) -> &PermutationTable {
        &self.permutations
    }

    /// The wired likelihood model.
    pub fn likelihood(&self) -> Option<&L> {
        self.likelihood.as_ref()
    }

    /// Precondition check: particles present, likelihood wired, detector
    /// present and ready. Fails without side effects.
    pub fn status(&self) -> Result<()> {
        if self.particles.is_none() {
            return Err(Error::Validation("Set of measured particles not defined".to_string()));
        }
        if self.likelihood.is_none() {
            return Err(Error::Validation("No likelihood model defined".to_string()));
        }
        match &self.detector {
            None => Err(Error::Validation("No detector defined".to_string())),
            Some(detector) if !detector.status() => Err(Error::Validation(format!(
                "Detector '{}' is not ready",
                detector.name()
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Fit a single permutation.
    ///
    /// `Ok(())` means the permutation was *processed*, not that the fit
    /// converged: callers judge quality from [`Fitter::minimizer_status`]
    /// and [`Fitter::convergence_flags`]. Precondition violations
    /// (missing collaborators, index out of range) fail fast with no
    /// state advanced.
    pub fn fit_one(&mut self, index: usize) -> Result<()> {
        self.status()?;
        if !self.permutations.activate(index) {
            return Err(Error::Validation(format!(
                "fit_one: permutation index {index} out of range ({} available)",
                self.permutations.count()
            )));
        }

        self.flags.clear();
        let view = self
            .permutations
            .active_view()
            .cloned()
            .ok_or_else(|| Error::Computation("fit_one: no active permuted view".to_string()))?;
        let met = self.met;
        let likelihood = self
            .likelihood
            .as_mut()
            .ok_or_else(|| Error::Validation("No likelihood model defined".to_string()))?;

        // Initialization may adjust parameter ranges from the missing
        // energy, so the MET must be pushed first.
        likelihood.set_missing_energy(met);
        likelihood.initialize(&view)?;
        likelihood.clear_nan_flag();

        // Tag assignment is permutation-dependent.
        if likelihood.uses_flavor_tagging() {
            likelihood.compute_flavor_tags(&view);
        }

        match self.method {
            MinimizationMethod::MarkovChain => {
                let result = likelihood.run_markov_chain(&self.chain_config)?;
                self.minimizer_status = result.status();
            }
            MinimizationMethod::SimulatedAnnealing => {
                let initial = likelihood.initial_parameters();
                let result = likelihood.run_stochastic(&initial)?;
                self.minimizer_status = result.status();
            }
            MinimizationMethod::Deterministic => {
                let initial = likelihood.initial_parameters();
                let result = likelihood.run_deterministic(&initial)?;
                self.minimizer_status = result.status();

                // Pre-retry classification: a boundary-pinned or NaN
                // "success" is demoted so the rescue path triggers.
                if self.minimizer_status.is_success() {
                    let best = likelihood.best_fit_parameters();
                    if best.iter().enumerate().any(|(i, &v)| likelihood.parameter_at_limit(i, v))
                    {
                        self.minimizer_status = MinimizerStatus::AT_LIMIT_BEFORE_RETRY;
                    }
                }
                if likelihood.is_nan() {
                    self.minimizer_status = MinimizerStatus::NAN_BEFORE_RETRY;
                }

                if !self.minimizer_status.is_success() {
                    log::debug!(
                        "deterministic pass failed (code {}), re-running",
                        self.minimizer_status.code()
                    );
                    let seed = if self.annealing_fallback {
                        likelihood.clear_nan_flag();
                        likelihood.run_stochastic(&initial)?;
                        likelihood.best_fit_parameters()
                    } else {
                        initial.clone()
                    };
                    let retried = likelihood.run_deterministic(&seed)?;
                    self.minimizer_status = retried.status();
                    if self.minimizer_status == MinimizerStatus::NOT_CONVERGED {
                        self.flags.did_not_converge = true;
                    }
                }
            }
        }

        // Final classification on the final best-fit point. NaN takes
        // precedence over every other diagnostic.
        if self.minimizer_status.is_success() {
            let best = likelihood.best_fit_parameters();
            if best.iter().enumerate().any(|(i, &v)| likelihood.parameter_at_limit(i, v)) {
                self.minimizer_status = MinimizerStatus::AT_LIMIT;
                self.flags.parameter_at_limit = true;
            }
        }
        if likelihood.is_nan() {
            self.minimizer_status = MinimizerStatus::NAN_RESULT;
            self.flags.aborted_due_to_nan = true;
        } else {
            let best = likelihood.best_fit_parameters();
            if !likelihood.transfer_functions_valid(&best) {
                self.minimizer_status = MinimizerStatus::INVALID_TRANSFER_FUNCTION;
                self.flags.invalid_transfer_function = true;
            }
        }

        // Optional normalization; never touches the status.
        if likelihood.requests_normalization() {
            if let Err(e) = likelihood.normalize(IntegrationMethod::MonteCarlo) {
                log::warn!("Normalization integral failed: {e}");
            }
        }

        Ok(())
    }

    /// Fit every permutation.
    ///
    /// Each permutation gets a Markov-chain marginalization followed
    /// unconditionally by a deterministic refinement seeded from the
    /// chain's best point; the last deterministic status is recorded.
    /// Stops with an error only when a permutation fails to activate.
    /// Deliberately computes no per-permutation [`ConvergenceFlags`]
    /// (unlike [`Fitter::fit_one`]); callers needing classification fit
    /// each index individually.
    pub fn fit_all(&mut self) -> Result<()> {
        self.status()?;

        for index in 0..self.permutations.count() {
            if !self.permutations.activate(index) {
                return Err(Error::Computation(format!(
                    "fit_all: failed to activate permutation {index}"
                )));
            }
            let view = self
                .permutations
                .active_view()
                .cloned()
                .ok_or_else(|| {
                    Error::Computation("fit_all: no active permuted view".to_string())
                })?;
            let met = self.met;
            let likelihood = self
                .likelihood
                .as_mut()
                .ok_or_else(|| Error::Validation("No likelihood model defined".to_string()))?;

            likelihood.set_missing_energy(met);
            likelihood.initialize(&view)?;
            likelihood.clear_nan_flag();

            likelihood.run_markov_chain(&self.chain_config)?;
            let seed = likelihood.best_fit_parameters();
            let result = likelihood.run_deterministic(&seed)?;
            self.minimizer_status = result.status();
        }

        Ok(())
    }

    /// Snapshot of the active permutation's outcome, or `None` before
    /// any fit.
    pub fn summary(&self) -> Option<FitSummary> {
        let likelihood = self.likelihood.as_ref()?;
        let permutation = self.permutations.active_index()?;
        Some(FitSummary {
            permutation,
            parameters: likelihood.best_fit_parameters(),
            uncertainties: likelihood.best_fit_uncertainties(),
            fval: likelihood.best_fit_value(),
            status_code: self.minimizer_status.code(),
            convergence_bits: self.flags.bits(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_core::{ModeResult, Particle, ParticleType};
    use std::collections::VecDeque;

    struct ToyDetector {
        ready: bool,
    }

    impl DetectorModel for ToyDetector {
        fn status(&self) -> bool {
            self.ready
        }

        fn name(&self) -> &str {
            "toy"
        }
    }

    /// Scripted likelihood: deterministic passes pop status codes from a
    /// queue; NaN/at-limit/transfer behavior is toggled per test.
    #[derive(Default)]
    struct ScriptedLikelihood {
        det_codes: VecDeque<i32>,
        n_deterministic: usize,
        n_stochastic: usize,
        n_chain: usize,
        n_initialize: usize,
        nan: bool,
        set_nan_on_det_run: Option<usize>,
        at_limit: bool,
        tf_valid: bool,
        best: Vec<f64>,
    }

    impl ScriptedLikelihood {
        fn clean() -> Self {
            Self {
                det_codes: VecDeque::new(),
                tf_valid: true,
                best: vec![0.5, 0.5],
                ..Self::default()
            }
        }

        fn with_codes(codes: &[i32]) -> Self {
            let mut script = Self::clean();
            script.det_codes = codes.iter().copied().collect();
            script
        }

        fn mode_result(&self, code: i32) -> ModeResult {
            ModeResult {
                parameters: self.best.clone(),
                fval: -1.0,
                code,
                converged: code == 0,
                n_eval: 1,
                message: String::new(),
            }
        }
    }

    impl LikelihoodModel for ScriptedLikelihood {
        fn set_missing_energy(&mut self, _met: MissingEnergy) {}

        fn initialize(&mut self, _particles: &ParticleCollection) -> kf_core::Result<()> {
            self.n_initialize += 1;
            Ok(())
        }

        fn clear_nan_flag(&mut self) {
            self.nan = false;
        }

        fn is_nan(&self) -> bool {
            self.nan
        }

        fn initial_parameters(&self) -> Vec<f64> {
            vec![0.0, 0.0]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(0.0, 1.0); 2]
        }

        fn run_deterministic(&mut self, _initial: &[f64]) -> kf_core::Result<ModeResult> {
            self.n_deterministic += 1;
            if self.set_nan_on_det_run == Some(self.n_deterministic) {
                self.nan = true;
            }
            let code = self.det_codes.pop_front().unwrap_or(0);
            Ok(self.mode_result(code))
        }

        fn run_stochastic(&mut self, _initial: &[f64]) -> kf_core::Result<ModeResult> {
            self.n_stochastic += 1;
            Ok(self.mode_result(0))
        }

        fn run_markov_chain(&mut self, _config: &ChainConfig) -> kf_core::Result<ModeResult> {
            self.n_chain += 1;
            Ok(self.mode_result(0))
        }

        fn best_fit_parameters(&self) -> Vec<f64> {
            self.best.clone()
        }

        fn best_fit_uncertainties(&self) -> Vec<f64> {
            Vec::new()
        }

        fn best_fit_value(&self) -> f64 {
            -1.0
        }

        fn parameter_at_limit(&self, _index: usize, _value: f64) -> bool {
            self.at_limit
        }

        fn transfer_functions_valid(&self, _params: &[f64]) -> bool {
            self.tf_valid
        }
    }

    fn two_jet_event() -> ParticleCollection {
        let mut particles = ParticleCollection::new();
        particles.add(ParticleType::Jet, Particle::new(50.0, 0.1, 0.0, 55.0));
        particles.add(ParticleType::Jet, Particle::new(40.0, -0.2, 1.0, 45.0));
        particles
    }

    fn wired_fitter(script: ScriptedLikelihood) -> Fitter<ScriptedLikelihood, ToyDetector> {
        let mut fitter = Fitter::new();
        fitter.set_detector(ToyDetector { ready: true });
        fitter.set_likelihood(script).unwrap();
        fitter.set_particles(two_jet_event()).unwrap();
        fitter.set_missing_energy_and_sum_et(20.0, -5.0, 300.0);
        fitter
    }

    #[test]
    fn test_fit_one_without_particles_fails_without_side_effects() {
        let mut fitter: Fitter<ScriptedLikelihood, ToyDetector> = Fitter::new();
        fitter.set_detector(ToyDetector { ready: true });
        fitter.set_likelihood(ScriptedLikelihood::clean()).unwrap();

        let before = fitter.minimizer_status();
        assert!(fitter.fit_one(0).is_err());
        assert_eq!(fitter.minimizer_status(), before);
        assert_eq!(fitter.likelihood().unwrap().n_deterministic, 0);
    }

    #[test]
    fn test_fit_one_with_unready_detector_fails() {
        let mut fitter = wired_fitter(ScriptedLikelihood::clean());
        fitter.set_detector(ToyDetector { ready: false });
        assert!(fitter.fit_one(0).is_err());
    }

    #[test]
    fn test_fit_one_out_of_range_index_fails() {
        let mut fitter = wired_fitter(ScriptedLikelihood::clean());
        assert_eq!(fitter.permutations().count(), 2);
        assert!(fitter.fit_one(2).is_err());
    }

    #[test]
    fn test_clean_fit_has_zero_status_and_flags() {
        let mut fitter = wired_fitter(ScriptedLikelihood::clean());
        fitter.fit_one(0).unwrap();

        assert_eq!(fitter.minimizer_status(), MinimizerStatus::SUCCESS);
        assert!(fitter.convergence_flags().is_clean());
        assert_eq!(fitter.convergence_flags().bits(), 0);
        let likelihood = fitter.likelihood().unwrap();
        assert_eq!(likelihood.n_deterministic, 1);
        assert_eq!(likelihood.n_stochastic, 0);
        assert_eq!(likelihood.n_initialize, 1);
    }

    #[test]
    fn test_failed_pass_triggers_rescue_exactly_once() {
        let mut fitter = wired_fitter(ScriptedLikelihood::with_codes(&[4, 0]));
        fitter.fit_one(0).unwrap();

        let likelihood = fitter.likelihood().unwrap();
        assert_eq!(likelihood.n_stochastic, 1, "rescue pass must run exactly once");
        assert_eq!(likelihood.n_deterministic, 2, "deterministic pass must re-run exactly once");
        assert_eq!(fitter.minimizer_status(), MinimizerStatus::SUCCESS);
        assert!(fitter.convergence_flags().is_clean());
    }

    #[test]
    fn test_disabled_fallback_skips_rescue() {
        let mut fitter = wired_fitter(ScriptedLikelihood::with_codes(&[4, 0]));
        fitter.set_annealing_fallback(false);
        fitter.fit_one(0).unwrap();

        let likelihood = fitter.likelihood().unwrap();
        assert_eq!(likelihood.n_stochastic, 0);
        assert_eq!(likelihood.n_deterministic, 2);
    }

    #[test]
    fn test_persistent_non_convergence_sets_flag() {
        let mut fitter = wired_fitter(ScriptedLikelihood::with_codes(&[4, 4]));
        fitter.fit_one(0).unwrap();

        assert_eq!(fitter.minimizer_status(), MinimizerStatus::NOT_CONVERGED);
        assert!(fitter.convergence_flags().did_not_converge);
    }

    #[test]
    fn test_at_limit_demotes_success_and_retries() {
        let mut script = ScriptedLikelihood::with_codes(&[0, 0]);
        script.at_limit = true;
        let mut fitter = wired_fitter(script);
        fitter.fit_one(0).unwrap();

        // Pre-retry 500 triggers the rescue; final result still pinned,
        // so classification lands on 501 with the flag set.
        let likelihood = fitter.likelihood().unwrap();
        assert_eq!(likelihood.n_stochastic, 1);
        assert_eq!(likelihood.n_deterministic, 2);
        assert_eq!(fitter.minimizer_status(), MinimizerStatus::AT_LIMIT);
        assert!(fitter.convergence_flags().parameter_at_limit);
    }

    #[test]
    fn test_nan_takes_precedence_over_at_limit() {
        let mut script = ScriptedLikelihood::with_codes(&[0, 0]);
        script.at_limit = true;
        // NaN appears during the retried deterministic pass, after the
        // rescue cleared the first one.
        script.set_nan_on_det_run = Some(2);
        let mut fitter = wired_fitter(script);
        fitter.fit_one(0).unwrap();

        assert_eq!(fitter.minimizer_status(), MinimizerStatus::NAN_RESULT);
        assert!(fitter.convergence_flags().aborted_due_to_nan);
        // At-limit alone must not be the verdict.
        assert_ne!(fitter.minimizer_status(), MinimizerStatus::AT_LIMIT);
    }

    #[test]
    fn test_invalid_transfer_function_classified() {
        let mut script = ScriptedLikelihood::clean();
        script.tf_valid = false;
        let mut fitter = wired_fitter(script);
        fitter.fit_one(0).unwrap();

        assert_eq!(fitter.minimizer_status(), MinimizerStatus::INVALID_TRANSFER_FUNCTION);
        assert!(fitter.convergence_flags().invalid_transfer_function);
    }

    #[test]
    fn test_markov_chain_mode_skips_deterministic() {
        let mut fitter = wired_fitter(ScriptedLikelihood::clean());
        fitter.set_minimization_method(MinimizationMethod::MarkovChain);
        fitter.fit_one(0).unwrap();

        let likelihood = fitter.likelihood().unwrap();
        assert_eq!(likelihood.n_chain, 1);
        assert_eq!(likelihood.n_deterministic, 0);
        assert_eq!(likelihood.n_stochastic, 0);
    }

    #[test]
    fn test_annealing_mode_runs_stochastic_only() {
        let mut fitter = wired_fitter(ScriptedLikelihood::clean());
        fitter.set_minimization_method(MinimizationMethod::SimulatedAnnealing);
        fitter.fit_one(0).unwrap();

        let likelihood = fitter.likelihood().unwrap();
        assert_eq!(likelihood.n_stochastic, 1);
        assert_eq!(likelihood.n_deterministic, 0);
    }

    #[test]
    fn test_fit_all_sweeps_every_permutation() {
        let mut fitter = wired_fitter(ScriptedLikelihood::clean());
        fitter.fit_all().unwrap();

        let likelihood = fitter.likelihood().unwrap();
        // Two jets: 2 permutations, each marginalized then refined.
        assert_eq!(likelihood.n_chain, 2);
        assert_eq!(likelihood.n_deterministic, 2);
        assert_eq!(likelihood.n_initialize, 2);
    }

    #[test]
    fn test_flags_reset_between_fits() {
        let mut fitter = wired_fitter(ScriptedLikelihood::with_codes(&[4, 4, 0]));
        fitter.fit_one(0).unwrap();
        assert!(fitter.convergence_flags().did_not_converge);

        fitter.fit_one(1).unwrap();
        assert!(fitter.convergence_flags().is_clean());
    }

    #[test]
    fn test_summary_snapshot() {
        let mut fitter = wired_fitter(ScriptedLikelihood::clean());
        fitter.fit_one(1).unwrap();

        let summary = fitter.summary().unwrap();
        assert_eq!(summary.permutation, 1);
        assert_eq!(summary.status_code, 0);
        assert_eq!(summary.convergence_bits, 0);
        assert_eq!(summary.parameters, vec![0.5, 0.5]);
    }
}
