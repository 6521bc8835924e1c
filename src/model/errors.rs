use crate::{describe::DescribeError, scattering::ScatteringError};

/// Result alias for model construction and evaluation.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while configuring or running a scattering covariance model.
///
/// Configuration problems fail at construction with the offending value in
/// the message, never mid-run. Shape problems guard the data boundaries of
/// `forward`/`backward`.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    // ---- Configuration ----
    /// Unrecognized model variant name.
    UnknownModelType {
        name: String,
    },
    /// Unrecognized normalization mode name.
    UnknownNormalization {
        name: String,
    },
    /// Unrecognized channel pairing mode name.
    UnknownChannelMode {
        name: String,
    },
    /// The reduced covariance variant only makes sense on normalized
    /// spectra.
    CovReducedNeedsNormalization,
    /// A covariance variant was requested with an unsupported layer count.
    UnsupportedLayerCount {
        variant: &'static str,
        r: usize,
    },
    /// Octave counts were neither configured nor derivable.
    MissingOctaves,
    /// Batch normalization was configured but no `sigma^2` was supplied.
    MissingSigma,
    /// A moment exponent must be finite and positive.
    InvalidMomentExponent {
        q: f64,
    },
    /// Chunk counts must be at least one.
    InvalidChunks {
        nchunks: usize,
    },
    /// A per-layer list does not match the configured layer count.
    LayerListMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    // ---- Data boundaries ----
    /// Input signal tensor has an unusable shape.
    InputShape {
        context: &'static str,
        expected: String,
        found: String,
    },

    // ---- Propagated areas ----
    Scattering(ScatteringError),
    Describe(DescribeError),
}

impl std::error::Error for ModelError {}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::UnknownModelType { name } => {
                write!(
                    f,
                    "Unknown model type '{name}': expected one of none, scat, cov, covreduced, \
                     scat+cov"
                )
            }
            ModelError::UnknownNormalization { name } => {
                write!(f, "Unknown normalization '{name}': expected eachps or batchps")
            }
            ModelError::UnknownChannelMode { name } => {
                write!(f, "Unknown channel mode '{name}': expected full, diag or offdiag")
            }
            ModelError::CovReducedNeedsNormalization => {
                write!(f, "Model type covreduced requires a power-spectrum normalization")
            }
            ModelError::UnsupportedLayerCount { variant, r } => {
                write!(f, "Model type {variant} supports exactly 2 layers, got r = {r}")
            }
            ModelError::MissingOctaves => {
                write!(f, "Octave counts are unset and no signal length is available to derive them")
            }
            ModelError::MissingSigma => {
                write!(f, "Normalization batchps requires a precomputed sigma^2 tensor")
            }
            ModelError::InvalidMomentExponent { q } => {
                write!(f, "Invalid moment exponent {q}: must be finite and positive")
            }
            ModelError::InvalidChunks { nchunks } => {
                write!(f, "Invalid chunk count {nchunks}: must be at least one")
            }
            ModelError::LayerListMismatch { name, expected, found } => {
                write!(f, "Parameter '{name}' needs {expected} per-layer entries, found {found}")
            }
            ModelError::InputShape { context, expected, found } => {
                write!(f, "Bad input shape in {context}: expected {expected}, found {found}")
            }
            ModelError::Scattering(err) => write!(f, "{err}"),
            ModelError::Describe(err) => write!(f, "{err}"),
        }
    }
}

impl From<ScatteringError> for ModelError {
    fn from(err: ScatteringError) -> Self {
        ModelError::Scattering(err)
    }
}

impl From<DescribeError> for ModelError {
    fn from(err: DescribeError) -> Self {
        ModelError::Describe(err)
    }
}
