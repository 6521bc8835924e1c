//! Thin wrapper around `rustfft` plans for circular convolutions.
//!
//! All convolutions in the cascade run in the Fourier domain on the full
//! signal length `T`. Forward transforms are unscaled; inverse transforms are
//! scaled by `1/T` so that `inverse(forward(x)) == x`.
use std::sync::Arc;

use ndarray::ArrayView1;
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

/// A pair of forward/inverse FFT plans of a fixed length.
///
/// Plans are reference-counted and cheap to clone; one `FourierPlan` is
/// shared by all filter banks of a model.
#[derive(Clone)]
pub struct FourierPlan {
    len: usize,
    fwd: Arc<dyn Fft<f64>>,
    inv: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for FourierPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FourierPlan").field("len", &self.len).finish()
    }
}

impl FourierPlan {
    pub fn new(len: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let fwd = planner.plan_fft_forward(len);
        let inv = planner.plan_fft_inverse(len);
        Self { len, fwd, inv }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Unscaled forward transform of a complex row.
    pub fn forward(&self, row: ArrayView1<'_, Complex64>) -> Vec<Complex64> {
        let mut buf: Vec<Complex64> = row.iter().copied().collect();
        self.fwd.process(&mut buf);
        buf
    }

    /// Inverse transform with `1/len` scaling, in place.
    pub fn inverse_inplace(&self, buf: &mut [Complex64]) {
        self.inv.process(buf);
        let scale = 1.0 / self.len as f64;
        for v in buf.iter_mut() {
            *v *= scale;
        }
    }

    /// Circular convolution of a row with a frequency-domain filter:
    /// `ifft(fft(row) * filter_hat)`.
    pub fn convolve(&self, row: ArrayView1<'_, Complex64>, filter_hat: &[Complex64]) -> Vec<Complex64> {
        let mut buf = self.forward(row);
        for (v, h) in buf.iter_mut().zip(filter_hat.iter()) {
            *v *= *h;
        }
        self.inverse_inplace(&mut buf);
        buf
    }

    /// Adjoint of [`FourierPlan::convolve`] with respect to the input row:
    /// `ifft(conj(filter_hat) * fft(cotangent))`.
    pub fn convolve_adjoint(
        &self, cotangent: ArrayView1<'_, Complex64>, filter_hat: &[Complex64],
    ) -> Vec<Complex64> {
        let mut buf = self.forward(cotangent);
        for (v, h) in buf.iter_mut().zip(filter_hat.iter()) {
            *v *= h.conj();
        }
        self.inverse_inplace(&mut buf);
        buf
    }
}
