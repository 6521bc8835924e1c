//! Fourier-domain wavelet filter banks.
//!
//! Each layer of the cascade owns `J * Q` analytic band-pass filters plus one
//! zero-centered Gaussian low-pass, all built directly on the frequency grid
//! of the signal length `T` and periodized over the circle. Band `j` is
//! centered at `xi_j = high_freq * 2^(-j/Q)` with constant-Q bandwidth.
//!
//! Families:
//! - `Morlet`: Gaussian band-pass with the zero-mean correction term.
//! - `Gabor`: plain Gaussian band-pass (no correction).
//!
//! Filters are normalized to exact unit `l1` or `l2` norm, computed from the
//! time-domain filter. Unsupported family/normalization names fail at
//! build time.
use std::str::FromStr;

use num_complex::Complex64;

use crate::scattering::{
    errors::{ScatResult, ScatteringError},
    fft::FourierPlan,
};

/// Supported wavelet families.
///
/// Parsed case-insensitively; unknown names return
/// [`ScatteringError::UnsupportedWavelet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveletFamily {
    Morlet,
    Gabor,
}

impl FromStr for WaveletFamily {
    type Err = ScatteringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "morlet" => Ok(WaveletFamily::Morlet),
            "gabor" => Ok(WaveletFamily::Gabor),
            _ => Err(ScatteringError::UnsupportedWavelet {
                name: s.to_string(),
                reason: "Valid options are case insensitive 'Morlet' or 'Gabor'.",
            }),
        }
    }
}

/// Per-filter normalization policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveletNorm {
    L1,
    L2,
}

impl FromStr for WaveletNorm {
    type Err = ScatteringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "l1" => Ok(WaveletNorm::L1),
            "l2" => Ok(WaveletNorm::L2),
            _ => Err(ScatteringError::UnsupportedNorm {
                name: s.to_string(),
                reason: "Valid options are case insensitive 'l1' or 'l2'.",
            }),
        }
    }
}

// Periodization range; Gaussian tails beyond two wraps are below f64 noise
// for every admissible (xi, sigma).
const PERIODIZATION_WRAPS: i64 = 2;

/// One layer's filter bank: `J * Q` band-pass filters and one low-pass,
/// stored as frequency-domain rows of length `T`.
#[derive(Debug, Clone)]
pub struct FilterBank {
    t: usize,
    n_bands: usize,
    /// Band-pass filters, fine to coarse: row `j` is `psi_hat_j`.
    psi_hat: Vec<Vec<Complex64>>,
    /// Low-pass filter `phi_hat`, real and symmetric on the circle.
    phi_hat: Vec<Complex64>,
    /// Center frequency per band (cycles per sample).
    xis: Vec<f64>,
    /// Squared time-domain l2 norm per filter (bands then low-pass), after
    /// normalization. Used by spectrum diagnostics and tests.
    l2_sq: Vec<f64>,
}

impl FilterBank {
    /// Build the filter bank of one layer.
    ///
    /// # Arguments
    /// - `t`: signal length (frequency grid size).
    /// - `octaves`, `voices`: scale grid of the layer (`J`, `Q`).
    /// - `family`, `norm`: wavelet family and per-filter normalization.
    /// - `high_freq`: center frequency of the mother wavelet; bands are
    ///   geometrically spaced below it.
    /// - `plan`: shared FFT plan of length `t`.
    ///
    /// # Errors
    /// - [`ScatteringError::InvalidHighFreq`] unless `0 < high_freq <= 0.5`.
    /// - [`ScatteringError::InvalidSignalLength`] if `t < 2`.
    pub fn new(
        t: usize, octaves: usize, voices: usize, family: WaveletFamily, norm: WaveletNorm,
        high_freq: f64, plan: &FourierPlan,
    ) -> ScatResult<Self> {
        if !(high_freq > 0.0 && high_freq <= 0.5) || !high_freq.is_finite() {
            return Err(ScatteringError::InvalidHighFreq { value: high_freq });
        }
        if t < 2 {
            return Err(ScatteringError::InvalidSignalLength { t });
        }

        let n_bands = octaves * voices;
        // Constant-Q bandwidth: one inter-scale step wide.
        let band_ratio = 1.0 - 2f64.powf(-1.0 / voices as f64);

        let mut psi_hat = Vec::with_capacity(n_bands);
        let mut xis = Vec::with_capacity(n_bands);
        let mut l2_sq = Vec::with_capacity(n_bands + 1);

        for j in 0..n_bands {
            let xi = high_freq * 2f64.powf(-(j as f64) / voices as f64);
            let sigma = xi * band_ratio;
            xis.push(xi);
            let mut hat: Vec<Complex64> = (0..t)
                .map(|k| Complex64::new(band_pass_hat(k as f64 / t as f64, xi, sigma, family), 0.0))
                .collect();
            let scale = normalization_factor(plan, &hat, norm);
            for v in hat.iter_mut() {
                *v *= scale;
            }
            l2_sq.push(time_l2_sq(plan, &hat));
            psi_hat.push(hat);
        }

        // Low-pass matched to the coarsest band.
        let xi_coarse = high_freq * 2f64.powf(-((n_bands - 1) as f64) / voices as f64);
        let sigma_low = xi_coarse * band_ratio;
        let mut hat: Vec<Complex64> =
            (0..t).map(|k| Complex64::new(low_pass_hat(k as f64 / t as f64, sigma_low), 0.0)).collect();
        let scale = normalization_factor(plan, &hat, norm);
        for v in hat.iter_mut() {
            *v *= scale;
        }
        l2_sq.push(time_l2_sq(plan, &hat));

        Ok(Self { t, n_bands, psi_hat, phi_hat: hat, xis, l2_sq })
    }

    pub fn t(&self) -> usize {
        self.t
    }

    /// Number of band-pass filters (`J * Q`).
    pub fn n_bands(&self) -> usize {
        self.n_bands
    }

    /// Frequency-domain filter for a scale index; `J * Q` selects the
    /// low-pass.
    pub fn filter_hat(&self, scale: usize) -> &[Complex64] {
        if scale == self.n_bands { &self.phi_hat } else { &self.psi_hat[scale] }
    }

    /// Center frequency of a band-pass filter.
    pub fn xi(&self, scale: usize) -> f64 {
        self.xis[scale]
    }

    /// Squared time-domain l2 norm of a filter (bands then low-pass).
    pub fn l2_sq(&self, scale: usize) -> f64 {
        self.l2_sq[scale]
    }
}

// ---- Filter formulas ----

fn gaussian(x: f64, sigma: f64) -> f64 {
    (-x * x / (2.0 * sigma * sigma)).exp()
}

// Periodized analytic band-pass on the frequency circle.
fn band_pass_hat(freq: f64, xi: f64, sigma: f64, family: WaveletFamily) -> f64 {
    let kappa = match family {
        // Zero-mean correction: hat(0) == 0 exactly.
        WaveletFamily::Morlet => gaussian(xi, sigma),
        WaveletFamily::Gabor => 0.0,
    };
    let mut acc = 0.0;
    for m in -PERIODIZATION_WRAPS..=PERIODIZATION_WRAPS {
        let f = freq - m as f64;
        acc += gaussian(f - xi, sigma) - kappa * gaussian(f, sigma);
    }
    acc
}

fn low_pass_hat(freq: f64, sigma: f64) -> f64 {
    let mut acc = 0.0;
    for m in -PERIODIZATION_WRAPS..=PERIODIZATION_WRAPS {
        acc += gaussian(freq - m as f64, sigma);
    }
    acc
}

// ---- Normalization helpers ----

// Exact norms are computed from the time-domain filter, then applied in the
// frequency domain (the transform is linear, so one factor fits both).
fn normalization_factor(plan: &FourierPlan, hat: &[Complex64], norm: WaveletNorm) -> f64 {
    let mut buf = hat.to_vec();
    plan.inverse_inplace(&mut buf);
    let value = match norm {
        WaveletNorm::L1 => buf.iter().map(|v| v.norm()).sum::<f64>(),
        WaveletNorm::L2 => buf.iter().map(|v| v.norm_sqr()).sum::<f64>().sqrt(),
    };
    if value > 0.0 { 1.0 / value } else { 1.0 }
}

fn time_l2_sq(plan: &FourierPlan, hat: &[Complex64]) -> f64 {
    let mut buf = hat.to_vec();
    plan.inverse_inplace(&mut buf);
    buf.iter().map(|v| v.norm_sqr()).sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Name parsing for families and normalizations.
    // - Exact unit norms after construction.
    // - Zero-mean property of the Morlet band-pass.
    // - Geometric spacing of center frequencies.
    //
    // They intentionally DO NOT cover:
    // - Convolution semantics (cascade tests) or white-noise spectra
    //   (integration tests).
    // -------------------------------------------------------------------------

    fn bank(norm: WaveletNorm) -> FilterBank {
        let plan = FourierPlan::new(256);
        FilterBank::new(256, 5, 1, WaveletFamily::Morlet, norm, 0.425, &plan)
            .expect("valid filter bank")
    }

    #[test]
    fn parses_family_and_norm_case_insensitively() {
        assert_eq!("MORLET".parse::<WaveletFamily>().expect("known"), WaveletFamily::Morlet);
        assert_eq!("gabor".parse::<WaveletFamily>().expect("known"), WaveletFamily::Gabor);
        assert!(matches!(
            "battle_lemarie".parse::<WaveletFamily>(),
            Err(ScatteringError::UnsupportedWavelet { .. })
        ));
        assert_eq!("L2".parse::<WaveletNorm>().expect("known"), WaveletNorm::L2);
        assert!(matches!("l3".parse::<WaveletNorm>(), Err(ScatteringError::UnsupportedNorm { .. })));
    }

    #[test]
    fn filters_have_exact_unit_l2_norm() {
        let bank = bank(WaveletNorm::L2);
        for scale in 0..=bank.n_bands() {
            assert!((bank.l2_sq(scale) - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn l1_normalized_filters_have_unit_l1_norm() {
        let plan = FourierPlan::new(128);
        let bank = FilterBank::new(128, 4, 1, WaveletFamily::Morlet, WaveletNorm::L1, 0.425, &plan)
            .expect("valid filter bank");
        for scale in 0..=bank.n_bands() {
            let mut buf = bank.filter_hat(scale).to_vec();
            plan.inverse_inplace(&mut buf);
            let l1: f64 = buf.iter().map(|v| v.norm()).sum();
            assert!((l1 - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn morlet_band_pass_has_zero_mean() {
        let bank = bank(WaveletNorm::L2);
        for scale in 0..bank.n_bands() {
            // hat at frequency zero is the filter's mean
            assert!(bank.filter_hat(scale)[0].norm() < 1e-10);
        }
    }

    #[test]
    fn center_frequencies_are_geometric() {
        let plan = FourierPlan::new(512);
        let bank = FilterBank::new(512, 3, 2, WaveletFamily::Gabor, WaveletNorm::L1, 0.425, &plan)
            .expect("valid filter bank");
        for j in 1..bank.n_bands() {
            let ratio = bank.xi(j) / bank.xi(j - 1);
            assert!((ratio - 2f64.powf(-0.5)).abs() < 1e-12);
        }
    }

    #[test]
    fn invalid_high_freq_is_rejected() {
        let plan = FourierPlan::new(64);
        assert!(matches!(
            FilterBank::new(64, 3, 1, WaveletFamily::Morlet, WaveletNorm::L1, 0.0, &plan),
            Err(ScatteringError::InvalidHighFreq { .. })
        ));
    }
}
