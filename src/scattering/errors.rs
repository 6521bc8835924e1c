/// Crate-wide result alias for scattering operations.
pub type ScatResult<T> = Result<T, ScatteringError>;

/// Errors raised while building or applying the wavelet scattering stack.
///
/// Construction errors (`InvalidLayerCount`, `EmptyScaleGrid`, unsupported
/// wavelet names, ...) are raised at model-build time, never mid-computation.
/// Shape errors guard every tensor boundary of the cascade.
#[derive(Debug, Clone, PartialEq)]
pub enum ScatteringError {
    // ---- Scale indexer ----
    /// The number of convolution layers must be at least one.
    InvalidLayerCount {
        r: usize,
    },
    /// A layer owns no band-pass scales (`J * Q == 0`).
    EmptyScaleGrid {
        layer: usize,
        octaves: usize,
        voices: usize,
    },
    /// A per-layer parameter list does not have one entry per layer.
    LayerListMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    /// A path index is outside the enumerated range.
    PathIndexOutOfRange {
        index: usize,
        n_paths: usize,
    },

    // ---- Filter bank ----
    /// Unrecognized wavelet family name.
    UnsupportedWavelet {
        name: String,
        reason: &'static str,
    },
    /// Unrecognized filter normalization name.
    UnsupportedNorm {
        name: String,
        reason: &'static str,
    },
    /// The mother wavelet center frequency must lie in (0, 0.5].
    InvalidHighFreq {
        value: f64,
    },
    /// Signal length too short to carry the requested filter bank.
    InvalidSignalLength {
        t: usize,
    },

    // ---- Cascade / adjoint ----
    /// A tensor handed to the cascade does not have the expected shape.
    ShapeMismatch {
        context: &'static str,
        expected: (usize, usize, usize, usize),
        found: (usize, usize, usize, usize),
    },

    // ---- Scale-invariant reduction ----
    /// The invariant reduction requires equal voice counts across layers.
    VoiceMismatch {
        q1: usize,
        q2: usize,
    },
}

impl std::error::Error for ScatteringError {}

impl std::fmt::Display for ScatteringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScatteringError::InvalidLayerCount { r } => {
                write!(f, "Invalid layer count {r}: at least one convolution layer is required")
            }
            ScatteringError::EmptyScaleGrid { layer, octaves, voices } => {
                write!(
                    f,
                    "Layer {layer} has an empty scale grid: J = {octaves}, Q = {voices} \
                     (J * Q must be > 0)"
                )
            }
            ScatteringError::LayerListMismatch { name, expected, found } => {
                write!(f, "Parameter '{name}' needs {expected} per-layer entries, found {found}")
            }
            ScatteringError::PathIndexOutOfRange { index, n_paths } => {
                write!(f, "Path index {index} out of range: {n_paths} paths enumerated")
            }
            ScatteringError::UnsupportedWavelet { name, reason } => {
                write!(f, "Unsupported wavelet family '{name}': {reason}")
            }
            ScatteringError::UnsupportedNorm { name, reason } => {
                write!(f, "Unsupported filter normalization '{name}': {reason}")
            }
            ScatteringError::InvalidHighFreq { value } => {
                write!(f, "Invalid center frequency {value}: must lie in (0, 0.5]")
            }
            ScatteringError::InvalidSignalLength { t } => {
                write!(f, "Signal length {t} is too short for the requested filter bank")
            }
            ScatteringError::ShapeMismatch { context, expected, found } => {
                write!(f, "Shape mismatch in {context}: expected {expected:?}, found {found:?}")
            }
            ScatteringError::VoiceMismatch { q1, q2 } => {
                write!(
                    f,
                    "Scale-invariant reduction requires equal voice counts, found Q1 = {q1}, \
                     Q2 = {q2}"
                )
            }
        }
    }
}
