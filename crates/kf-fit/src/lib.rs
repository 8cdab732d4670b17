//! Kinematic fit engine.
//!
//! Orchestrates likelihood fits over jet-parton assignment permutations:
//! a [`permutations::PermutationTable`] enumerates within-category
//! orderings of a measured event, and the [`fitter::Fitter`] drives a
//! [`kf_core::LikelihoodModel`] over them with deterministic (bounded
//! L-BFGS), simulated-annealing, and Markov-chain strategies, plus a
//! staged rescue path and status-code classification of each outcome.
//!
//! The [`likelihood::BaseLikelihood`] adapter turns any
//! [`likelihood::EventDensity`] (the physics: a negative log-likelihood
//! over bounded parameters) into a full model with all three strategies
//! and Hessian-based uncertainties wired in.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod anneal;
pub mod fitter;
pub mod likelihood;
pub mod mcmc;
pub mod optimizer;
pub mod permutations;

pub use anneal::{AnnealConfig, Annealer};
pub use fitter::Fitter;
pub use likelihood::{BaseLikelihood, EventDensity};
pub use mcmc::{marginalize, Marginalization};
pub use optimizer::{BoundedLbfgs, LbfgsConfig, ObjectiveFn};
pub use permutations::PermutationTable;
