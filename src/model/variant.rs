//! Closed configuration enums for the model layer.
use std::str::FromStr;

use crate::model::errors::ModelError;

/// Which representation the model computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Time-resolved scattering coefficients of every order, no averaging.
    None,
    /// Marginal moments `E{|Sx|^q}` over all paths and exponents.
    Scat,
    /// Order-1 moments plus all covariance blocks.
    Cov,
    /// Order-1 moments, non-invariant covariance rows, and the
    /// scale-invariant reduction of the rest.
    CovReduced,
    /// Order-1 moments, order-2 marginals, and all covariance blocks.
    ScatCov,
}

impl FromStr for ModelType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "raw" => Ok(ModelType::None),
            "scat" => Ok(ModelType::Scat),
            "cov" => Ok(ModelType::Cov),
            "covreduced" => Ok(ModelType::CovReduced),
            "scat+cov" | "scatcov" => Ok(ModelType::ScatCov),
            _ => Err(ModelError::UnknownModelType { name: s.to_string() }),
        }
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelType::None => "none",
            ModelType::Scat => "scat",
            ModelType::Cov => "cov",
            ModelType::CovReduced => "covreduced",
            ModelType::ScatCov => "scat+cov",
        };
        write!(f, "{name}")
    }
}

/// First-layer power-spectrum normalization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalize {
    /// Estimate `sigma^2` from the analyzed batch itself.
    EachPs,
    /// Divide by a supplied `sigma^2` (e.g. computed from a target signal).
    BatchPs,
}

impl FromStr for Normalize {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eachps" | "each_ps" => Ok(Normalize::EachPs),
            "batchps" | "batch_ps" => Ok(Normalize::BatchPs),
            _ => Err(ModelError::UnknownNormalization { name: s.to_string() }),
        }
    }
}

/// Floating-point width of the caller's data.
///
/// All computation runs in f64; `Single` records that inputs arrived as f32
/// (upcast on entry) so outputs can be narrowed again on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Single,
    Double,
}
