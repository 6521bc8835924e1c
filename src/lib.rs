//! scatcov — wavelet scattering covariance analysis and synthesis.
//!
//! Purpose
//! -------
//! Compute scattering covariance statistics of real time series and
//! synthesize new series matching those statistics by gradient descent.
//! The crate covers the full path: wavelet filter banks and the cascaded
//! scattering transform, moment layers (marginal, covariance,
//! scale-invariant reductions), self-describing coefficient tensors, exact
//! adjoints for every stage, and a guarded L-BFGS synthesis driver with
//! on-disk result caching.
//!
//! Key behaviors
//! -------------
//! - [`analysis::analyze`] maps a `(B, N, T)` signal to a canonically sorted
//!   [`describe::DescribedTensor`] under a chosen model variant.
//! - [`synthesis::generate`] runs seeded, parallel L-BFGS realizations whose
//!   scattering statistics match a target's.
//! - Every forward computation carries an exact backward pass; synthesis
//!   gradients are analytic, never numerical.
//!
//! Conventions
//! -----------
//! - Signals are real `(batch, channel, time)` tensors; statistics are
//!   complex `(batch, coefficient, 1-or-time)` tensors.
//! - Scales are indexed globally across layers by the
//!   [`scattering::ScaleIndexer`]; the low-pass path of a layer sorts last.
//! - Errors are explicit enums per area, converted upward at module
//!   boundaries; no panics on user input.

pub mod analysis;
pub mod describe;
pub mod model;
pub mod moments;
pub mod scattering;
pub mod synthesis;

pub use analysis::{analyze, compute_sigma2, self_similarity_score, ScoreBreakdown};
pub use describe::{CType, CoeffRow, DescribedTensor, Description, RowFilter};
pub use model::{ChunkedModel, Model, ModelError, ModelType, Normalize, ScatCovConfig};
pub use synthesis::{generate, GenOptions, OptimOptions, StopReason, SynthOutcome, SynthesisError};
