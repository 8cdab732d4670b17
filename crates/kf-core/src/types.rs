//! Common data types for kinfit

use serde::{Deserialize, Serialize};

/// Mode-finding strategy used for the primary optimization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MinimizationMethod {
    /// Gradient-based bounded quasi-Newton minimizer (default).
    #[default]
    Deterministic,
    /// Simulated annealing only, no deterministic pass.
    SimulatedAnnealing,
    /// Full Markov-chain marginalization, no deterministic fallback.
    MarkovChain,
}

/// Raw status code of the deterministic minimizer, after classification.
///
/// The code taxonomy, in ascending precedence of override:
/// nominal success, optimizer non-convergence, parameter at limit before
/// the retry, parameter at limit in the final result, NaN before the
/// retry, NaN in the final result (highest precedence), transfer-function
/// domain violation in the final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimizerStatus(pub i32);

impl MinimizerStatus {
    /// Nominal success.
    pub const SUCCESS: Self = Self(0);
    /// The optimizer itself reported non-convergence.
    pub const NOT_CONVERGED: Self = Self(4);
    /// A parameter sat at its bound before the rescue retry.
    pub const AT_LIMIT_BEFORE_RETRY: Self = Self(500);
    /// A parameter sits at its bound in the final result.
    pub const AT_LIMIT: Self = Self(501);
    /// The model reported a NaN result before the rescue retry.
    pub const NAN_BEFORE_RETRY: Self = Self(508);
    /// The model reported a NaN result in the final result.
    pub const NAN_RESULT: Self = Self(509);
    /// The final parameters fall outside the transfer-function domain.
    pub const INVALID_TRANSFER_FUNCTION: Self = Self(510);

    /// Whether the code signals a clean fit.
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// The raw numeric code.
    pub fn code(self) -> i32 {
        self.0
    }
}

impl Default for MinimizerStatus {
    fn default() -> Self {
        Self::SUCCESS
    }
}

/// Named per-fit diagnostic flags, accumulated during a single fit.
///
/// The legacy bitmask representation is produced only at the serialization
/// boundary via [`ConvergenceFlags::bits`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceFlags {
    /// Final deterministic pass still reported non-convergence.
    pub did_not_converge: bool,
    /// At least one fitted parameter sits at its bound.
    pub parameter_at_limit: bool,
    /// The fit produced a NaN; invalidates all other diagnostics.
    pub aborted_due_to_nan: bool,
    /// Best-fit point lies outside the transfer-function domain.
    pub invalid_transfer_function: bool,
}

/// Bit assigned to `did_not_converge` in [`ConvergenceFlags::bits`].
pub const DID_NOT_CONVERGE_BIT: u32 = 1 << 0;
/// Bit assigned to `parameter_at_limit`.
pub const PARAMETER_AT_LIMIT_BIT: u32 = 1 << 1;
/// Bit assigned to `aborted_due_to_nan`.
pub const ABORTED_DUE_TO_NAN_BIT: u32 = 1 << 2;
/// Bit assigned to `invalid_transfer_function`.
pub const INVALID_TRANSFER_FUNCTION_BIT: u32 = 1 << 3;

impl ConvergenceFlags {
    /// All flags cleared.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// True when no degradation was recorded.
    pub fn is_clean(self) -> bool {
        self == Self::default()
    }

    /// Combine the named flags into the legacy bitmask.
    pub fn bits(self) -> u32 {
        let mut mask = 0;
        if self.did_not_converge {
            mask |= DID_NOT_CONVERGE_BIT;
        }
        if self.parameter_at_limit {
            mask |= PARAMETER_AT_LIMIT_BIT;
        }
        if self.aborted_due_to_nan {
            mask |= ABORTED_DUE_TO_NAN_BIT;
        }
        if self.invalid_transfer_function {
            mask |= INVALID_TRANSFER_FUNCTION_BIT;
        }
        mask
    }
}

/// Result of one mode-finding pass, uniform across strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeResult {
    /// Best parameters found by this pass.
    pub parameters: Vec<f64>,
    /// Objective value at the best point.
    pub fval: f64,
    /// Raw status code (0 success, 4 non-convergence for the
    /// deterministic strategy; stochastic strategies report 0).
    pub code: i32,
    /// Whether the strategy considers the pass converged.
    pub converged: bool,
    /// Number of objective evaluations.
    pub n_eval: usize,
    /// Human-readable termination message.
    pub message: String,
}

impl ModeResult {
    /// Status code as a typed value.
    pub fn status(&self) -> MinimizerStatus {
        MinimizerStatus(self.code)
    }
}

impl std::fmt::Display for ModeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ModeResult(fval={:.6}, code={}, n_eval={}, converged={})",
            self.fval, self.code, self.n_eval, self.converged
        )
    }
}

/// Iteration budgets for the Markov-chain marginalization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Number of independent chains.
    pub n_chains: usize,
    /// Pre-run (adaptation) iterations per chain.
    pub n_prerun: usize,
    /// Sampling iterations per chain.
    pub n_run: usize,
    /// Proposal-scale update period during the pre-run.
    pub n_update: usize,
    /// Base RNG seed; chain `i` uses `seed + i`.
    pub seed: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self { n_chains: 5, n_prerun: 1000, n_run: 2000, n_update: 100, seed: 0 }
    }
}

/// Missing transverse energy: x/y components and the scalar sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MissingEnergy {
    /// x component of the transverse momentum imbalance.
    pub x: f64,
    /// y component of the transverse momentum imbalance.
    pub y: f64,
    /// Scalar sum of transverse energy.
    pub sum_et: f64,
}

impl MissingEnergy {
    /// Magnitude of the transverse imbalance.
    pub fn magnitude(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Bayesian integration method for the optional normalization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationMethod {
    /// Plain Monte Carlo sampling over the parameter box.
    MonteCarlo,
    /// Coarse deterministic grid.
    Grid,
}

/// Serializable snapshot of one permutation's fit outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitSummary {
    /// Index of the fitted permutation.
    pub permutation: usize,
    /// Best-fit parameters.
    pub parameters: Vec<f64>,
    /// Parameter uncertainties (empty if unavailable).
    pub uncertainties: Vec<f64>,
    /// Objective value at the best point.
    pub fval: f64,
    /// Final deterministic status code.
    pub status_code: i32,
    /// Diagnostic flags as a bitmask.
    pub convergence_bits: u32,
}
