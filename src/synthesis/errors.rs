use argmin::core::{ArgminError, Error};

use crate::{describe::DescribeError, model::ModelError};

/// Result alias for synthesis operations.
pub type SynthResult<T> = Result<T, SynthesisError>;

/// Errors raised by the gradient-descent synthesis driver and its cache.
///
/// Non-finite losses and gradients are detected explicitly so divergence is
/// never silent; an early stop via the convergence guard is a successful
/// termination, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisError {
    // ---- Options ----
    /// The loss tolerance must be finite and non-negative.
    InvalidTolerance {
        tol: f64,
    },
    /// Invalid line searcher name.
    InvalidLineSearch {
        name: String,
        reason: &'static str,
    },
    /// L-BFGS memory must be at least 1.
    InvalidLBFGSMem {
        mem: usize,
    },
    /// At least one realization must be requested.
    NoRealizations,

    // ---- Problem evaluation ----
    /// The loss evaluated to a non-finite value.
    NonFiniteLoss {
        value: f64,
    },
    /// A gradient coordinate evaluated to a non-finite value.
    NonFiniteGradient {
        index: usize,
        value: f64,
    },
    /// The candidate and target coefficient vectors disagree in length.
    TargetLengthMismatch {
        expected: usize,
        found: usize,
    },

    // ---- Outcome ----
    /// The optimizer returned no best parameter.
    MissingBestParam,

    // ---- Cache ----
    /// Another worker already wrote this realization file.
    CacheCollision {
        path: String,
    },
    /// Filesystem failure while reading or writing cached realizations.
    Io {
        path: String,
        text: String,
    },
    /// A cached file does not parse back into a signal.
    CacheFormat {
        path: String,
        text: String,
    },

    // ---- Argmin ----
    /// Wrapper for argmin::InvalidParameter
    InvalidParameter {
        text: String,
    },
    /// Wrapper for argmin::NotInitialized
    NotInitialized {
        text: String,
    },
    /// Wrapper for argmin::ConditionViolated
    ConditionViolated {
        text: String,
    },
    /// Wrapper for argmin::PotentialBug
    PotentialBug {
        text: String,
    },
    /// Wrapper for other argmin::Error types
    BackendError {
        text: String,
    },

    // ---- Propagated areas ----
    Model(ModelError),
    Describe(DescribeError),
}

impl std::error::Error for SynthesisError {}

impl std::fmt::Display for SynthesisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthesisError::InvalidTolerance { tol } => {
                write!(f, "Invalid loss tolerance {tol}: must be finite and non-negative")
            }
            SynthesisError::InvalidLineSearch { name, reason } => {
                write!(f, "Invalid line searcher '{name}': {reason}")
            }
            SynthesisError::InvalidLBFGSMem { mem } => {
                write!(f, "Invalid L-BFGS memory {mem}: must be at least 1")
            }
            SynthesisError::NoRealizations => {
                write!(f, "At least one synthesis realization must be requested")
            }
            SynthesisError::NonFiniteLoss { value } => {
                write!(f, "Synthesis loss is non-finite: {value}")
            }
            SynthesisError::NonFiniteGradient { index, value } => {
                write!(f, "Non-finite gradient at index {index}: {value}")
            }
            SynthesisError::TargetLengthMismatch { expected, found } => {
                write!(
                    f,
                    "Target statistics carry {found} coefficients but the model produces {expected}"
                )
            }
            SynthesisError::MissingBestParam => {
                write!(f, "Optimizer returned no best parameter")
            }
            SynthesisError::CacheCollision { path } => {
                write!(f, "Cache collision: '{path}' already exists")
            }
            SynthesisError::Io { path, text } => {
                write!(f, "I/O failure on '{path}': {text}")
            }
            SynthesisError::CacheFormat { path, text } => {
                write!(f, "Cached file '{path}' does not parse: {text}")
            }
            SynthesisError::InvalidParameter { text } => {
                write!(f, "Invalid parameter: {text}")
            }
            SynthesisError::NotInitialized { text } => {
                write!(f, "Not initialized: {text}")
            }
            SynthesisError::ConditionViolated { text } => {
                write!(f, "Condition violated: {text}")
            }
            SynthesisError::PotentialBug { text } => {
                write!(f, "Potential bug: {text}")
            }
            SynthesisError::BackendError { text } => {
                write!(f, "Backend error: {text}")
            }
            SynthesisError::Model(err) => write!(f, "{err}"),
            SynthesisError::Describe(err) => write!(f, "{err}"),
        }
    }
}

impl From<ModelError> for SynthesisError {
    fn from(err: ModelError) -> Self {
        SynthesisError::Model(err)
    }
}

impl From<DescribeError> for SynthesisError {
    fn from(err: DescribeError) -> Self {
        SynthesisError::Describe(err)
    }
}

impl From<Error> for SynthesisError {
    fn from(original_err: Error) -> Self {
        // problem evaluation errors round-trip through argmin unchanged
        match original_err.downcast::<SynthesisError>() {
            Ok(synth_err) => synth_err,
            Err(err) => match err.downcast::<ArgminError>() {
                Ok(argmin_err) => match argmin_err {
                    ArgminError::InvalidParameter { text } => {
                        SynthesisError::InvalidParameter { text }
                    }
                    ArgminError::NotInitialized { text } => SynthesisError::NotInitialized { text },
                    ArgminError::ConditionViolated { text } => {
                        SynthesisError::ConditionViolated { text }
                    }
                    ArgminError::PotentialBug { text } => SynthesisError::PotentialBug { text },
                    other => SynthesisError::BackendError { text: other.to_string() },
                },
                Err(err) => SynthesisError::BackendError { text: err.to_string() },
            },
        }
    }
}
