//! Model configuration with per-layer broadcasting.
use crate::{
    describe::CType,
    model::{
        errors::{ModelError, ModelResult},
        variant::{ModelType, Normalize, Precision},
    },
    moments::{ChannelMode, CovMode, Estimator},
    scattering::{WaveletFamily, WaveletNorm},
};

/// A parameter given once for all layers or once per layer.
#[derive(Debug, Clone)]
pub enum Layered<T> {
    Scalar(T),
    PerLayer(Vec<T>),
}

impl<T: Clone> Layered<T> {
    /// One value per layer; a per-layer list must have exactly `r` entries.
    pub fn expand(&self, name: &'static str, r: usize) -> ModelResult<Vec<T>> {
        match self {
            Layered::Scalar(v) => Ok(vec![v.clone(); r]),
            Layered::PerLayer(vs) => {
                if vs.len() != r {
                    return Err(ModelError::LayerListMismatch {
                        name,
                        expected: r,
                        found: vs.len(),
                    });
                }
                Ok(vs.clone())
            }
        }
    }
}

impl<T> From<T> for Layered<T> {
    fn from(v: T) -> Self {
        Layered::Scalar(v)
    }
}

impl<T> From<Vec<T>> for Layered<T> {
    fn from(vs: Vec<T>) -> Self {
        Layered::PerLayer(vs)
    }
}

/// Full configuration of a scattering covariance model.
///
/// Fields left at their defaults follow the analysis front-end conventions:
/// octaves default to `log2(T) - 3` when unset, moment exponents to
/// `[1.0, 2.0]`.
#[derive(Debug, Clone)]
pub struct ScatCovConfig {
    /// Number of convolution layers.
    pub r: usize,
    /// Octave counts, `None` until derived from the signal length.
    pub octaves: Option<Layered<usize>>,
    /// Voices per octave.
    pub voices: Layered<usize>,
    pub family: Layered<WaveletFamily>,
    pub norm: Layered<WaveletNorm>,
    /// Mother wavelet center frequency.
    pub high_freq: f64,
    /// Moment exponents for marginal variants, `None` for the default list.
    pub qs: Option<Vec<f64>>,
    pub model_type: ModelType,
    pub channel_mode: ChannelMode,
    pub estimator: Estimator,
    pub cov_mode: CovMode,
    /// Memory knob for the covariance scale-pair axis.
    pub nchunks: usize,
    pub normalize: Option<Normalize>,
    /// Retain only these coefficient kinds when set.
    pub keep_c_types: Option<Vec<CType>>,
    /// Subtract the time mean after each modulus (deglitching cross model).
    pub no_mean: bool,
    pub precision: Precision,
}

impl Default for ScatCovConfig {
    fn default() -> Self {
        Self {
            r: 2,
            octaves: None,
            voices: Layered::Scalar(1),
            family: Layered::Scalar(WaveletFamily::Morlet),
            norm: Layered::Scalar(WaveletNorm::L1),
            high_freq: 0.425,
            qs: None,
            model_type: ModelType::Cov,
            channel_mode: ChannelMode::Full,
            estimator: Estimator::Mean,
            cov_mode: CovMode::Raw,
            nchunks: 1,
            normalize: None,
            keep_c_types: None,
            no_mean: false,
            precision: Precision::Double,
        }
    }
}

impl ScatCovConfig {
    /// The configured moment exponents, or the default `[1.0, 2.0]`.
    pub fn qs_or_default(&self) -> Vec<f64> {
        self.qs.clone().unwrap_or_else(|| vec![1.0, 2.0])
    }

    /// Fill unset octaves from the signal length: `max(1, log2(T) - margin)`.
    pub fn with_default_octaves(mut self, t: usize, margin: u32) -> Self {
        if self.octaves.is_none() {
            let log2_t = usize::BITS - 1 - t.leading_zeros();
            let j = log2_t.saturating_sub(margin).max(1) as usize;
            self.octaves = Some(Layered::Scalar(j));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Layered broadcasting and list-length validation.
    // - Default octave derivation from the signal length.
    // -------------------------------------------------------------------------

    #[test]
    fn scalar_broadcasts_and_lists_are_validated() {
        let scalar: Layered<usize> = 5.into();
        assert_eq!(scalar.expand("octaves", 3).expect("broadcast"), vec![5, 5, 5]);
        let list: Layered<usize> = vec![4, 2].into();
        assert_eq!(list.expand("octaves", 2).expect("exact"), vec![4, 2]);
        assert!(matches!(
            list.expand("octaves", 3),
            Err(ModelError::LayerListMismatch { name: "octaves", expected: 3, found: 2 })
        ));
    }

    #[test]
    fn default_octaves_follow_the_signal_length() {
        let cfg = ScatCovConfig::default().with_default_octaves(2048, 3);
        match cfg.octaves.expect("derived") {
            Layered::Scalar(j) => assert_eq!(j, 8), // log2(2048) - 3
            other => panic!("expected scalar octaves, got {other:?}"),
        }
        // tiny signals floor at one octave
        let cfg = ScatCovConfig::default().with_default_octaves(8, 5);
        match cfg.octaves.expect("derived") {
            Layered::Scalar(j) => assert_eq!(j, 1),
            other => panic!("expected scalar octaves, got {other:?}"),
        }
    }
}
