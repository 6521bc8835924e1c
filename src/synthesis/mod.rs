//! Gradient-based time-series synthesis.
//!
//! A synthesized signal is the minimizer of the squared distance between
//! its scattering statistics and the target's, driven by guarded L-BFGS
//! over the flattened signal with analytic gradients from the model's
//! backward pass.
pub mod cache;
pub mod convergence;
pub mod errors;
pub mod generate;
pub mod loss;
pub mod run;
pub mod solver;
pub mod types;

pub use convergence::{ConvergenceGuard, StopReason};
pub use errors::{SynthResult, SynthesisError};
pub use generate::{generate, GenOptions};
pub use loss::{DeglitchingLoss, MseLossScat};
pub use run::{run_synthesis, LineSearcher, OptimOptions, SynthOutcome};
pub use solver::SynthesisProblem;
pub use types::{Cost, FnEvalMap, Grad, Theta, DEFAULT_LBFGS_MEM};
