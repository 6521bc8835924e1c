//! moments — time-averaged statistics on scattering coefficients.
//!
//! Purpose
//! -------
//! Turn the cascade's per-layer coefficient tensors into the averaged
//! statistics the model variants expose: order-1 marginals, `q`-th moment
//! marginals, cross-scale covariances, and the scale-invariant reduction of
//! the latter. Every layer ships the exact adjoint of its forward map so the
//! synthesis gradient can flow through it.
//!
//! Conventions
//! -----------
//! - Forward maps consume [`ScatteringTape`](crate::scattering::ScatteringTape)
//!   layers `(B, N, P, T)` and emit `(B, M, 1)` complex statistics.
//! - Backward maps consume a cotangent on the statistics and accumulate into
//!   per-layer cotangent tensors shaped like the tape.
//! - Description construction and the forward loop share the same iteration,
//!   so rows and values agree position by position.
pub mod cov;
pub mod cov_invariant;
pub mod order1;
pub mod scat;

pub use cov::{ChannelMode, Cov, CovMode};
pub use cov_invariant::CovScaleInvariant;
pub use order1::Order1Moments;
pub use scat::ScatCoefficients;

/// Time-averaging estimator used by the moment layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimator {
    /// Plain mean over the time axis.
    Mean,
    /// Divide second-moment accumulations by `T - 1` instead of `T`.
    Unbiased,
}

impl Estimator {
    /// Denominator for a sum of `t` terms; `second_moment` selects the
    /// bias-corrected divisor under [`Estimator::Unbiased`].
    pub fn denom(&self, t: usize, second_moment: bool) -> f64 {
        match self {
            Estimator::Mean => t as f64,
            Estimator::Unbiased => {
                if second_moment && t > 1 {
                    (t - 1) as f64
                } else {
                    t as f64
                }
            }
        }
    }
}

impl std::str::FromStr for Estimator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mean" => Ok(Estimator::Mean),
            "unbiased" => Ok(Estimator::Unbiased),
            _ => Err(format!("Unknown estimator '{s}'")),
        }
    }
}
