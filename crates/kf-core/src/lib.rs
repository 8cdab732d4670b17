//! # kf-core
//!
//! Shared data model for the kinfit kinematic likelihood fitter:
//! error type, fit status taxonomy, the particle data model, and the
//! collaborator traits (likelihood model, detector model) consumed by
//! the fit orchestrator.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error type and `Result` alias.
pub mod error;
/// Particle data model (categorized object sets).
pub mod particles;
/// Collaborator traits: likelihood and detector models.
pub mod traits;
/// Status codes, diagnostic flags, strategy result types.
pub mod types;

pub use error::{Error, Result};
pub use particles::{Particle, ParticleCollection, ParticleType};
pub use traits::{DetectorModel, LikelihoodModel};
pub use types::{
    ChainConfig, ConvergenceFlags, FitSummary, IntegrationMethod, MinimizationMethod,
    MinimizerStatus, MissingEnergy, ModeResult,
};
