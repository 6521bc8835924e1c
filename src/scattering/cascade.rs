//! The scattering cascade: `Wx, W|Wx|, .., W|..|Wx||`.
//!
//! Purpose
//! -------
//! Apply one wavelet filter bank per order along the time axis, taking the
//! complex modulus between consecutive layers, and retain every layer's
//! pre-modulus output so the moment layers and the backward pass can consume
//! them.
//!
//! Key behaviors
//! -------------
//! - `forward` maps a real `(B, N, T)` signal to per-order complex
//!   coefficient tensors `(B, N, P_o, T)`, one per enumerated path of that
//!   order, recorded on a [`ScatteringTape`].
//! - An optional power-spectrum normalization divides the first-layer output
//!   by `sigma(j)` (estimated on the fly or supplied), before all downstream
//!   moments.
//! - An optional mean subtraction after each modulus supports the
//!   deglitching cross model.
//! - `backward` maps cotangents on every layer's pre-modulus output to an
//!   exact gradient on the input signal. The normalization sigma is treated
//!   as a constant.
//!
//! Invariants & assumptions
//! ------------------------
//! - Path positions inside a layer's output tensor follow the
//!   [`ScaleIndexer`] enumeration order of that order's paths.
//! - All convolutions are circular, via the shared [`FourierPlan`].
//! - The modulus adjoint is defined as zero where the coefficient is zero.
use ndarray::{Array3, Array4, s};
use num_complex::Complex64;

use crate::scattering::{
    errors::{ScatResult, ScatteringError},
    fft::FourierPlan,
    scale_indexer::ScaleIndexer,
    wavelet::{FilterBank, WaveletFamily, WaveletNorm},
};

/// First-layer power-spectrum normalization policy.
#[derive(Debug, Clone, Copy)]
pub enum SpectrumNorm<'a> {
    /// No normalization.
    Off,
    /// Divide by `sqrt(E{|Wx(j)|^2})` estimated from the analyzed batch
    /// itself, per (batch, channel, scale).
    OnTheFly,
    /// Divide by the square root of a supplied `sigma^2` of shape
    /// `(1 or B, N, P1)`.
    Fixed(&'a Array3<f64>),
}

/// Record of a forward pass: per-order pre-modulus outputs (after the
/// first-layer normalization) plus the sigma that was applied.
#[derive(Debug, Clone)]
pub struct ScatteringTape {
    /// `sx[o]` has shape `(B, N, P_{o+1}, T)`.
    pub sx: Vec<Array4<Complex64>>,
    /// The sigma divided out of the first layer, `(1 or B, N, P1)`.
    pub sigma: Option<Array3<f64>>,
}

/// Cascaded wavelet convolutions with modulus between layers.
#[derive(Debug, Clone)]
pub struct ScatteringCascade {
    idx: ScaleIndexer,
    banks: Vec<FilterBank>,
    plan: FourierPlan,
    t: usize,
    /// Subtract the time mean after each modulus (deglitching cross model).
    no_mean: bool,
}

impl ScatteringCascade {
    /// Build the cascade's filter banks, one per layer.
    ///
    /// Fails at build time on unsupported family/normalization parameters or
    /// per-layer list length mismatches.
    pub fn new(
        idx: ScaleIndexer, t: usize, families: &[WaveletFamily], norms: &[WaveletNorm],
        high_freqs: &[f64], no_mean: bool,
    ) -> ScatResult<Self> {
        let r = idx.r();
        for (name, len) in
            [("families", families.len()), ("norms", norms.len()), ("high_freqs", high_freqs.len())]
        {
            if len != r {
                return Err(ScatteringError::LayerListMismatch { name, expected: r, found: len });
            }
        }
        let plan = FourierPlan::new(t);
        let mut banks = Vec::with_capacity(r);
        for layer in 0..r {
            banks.push(FilterBank::new(
                t,
                idx.octave_count(layer),
                idx.voice_count(layer),
                families[layer],
                norms[layer],
                high_freqs[layer],
                &plan,
            )?);
        }
        Ok(Self { idx, banks, plan, t, no_mean })
    }

    pub fn indexer(&self) -> &ScaleIndexer {
        &self.idx
    }

    pub fn bank(&self, layer: usize) -> &FilterBank {
        &self.banks[layer]
    }

    pub fn t(&self) -> usize {
        self.t
    }

    /// Run the cascade on a real signal `(B, N, T)`.
    pub fn forward(&self, x: &Array3<f64>, norm: SpectrumNorm<'_>) -> ScatResult<ScatteringTape> {
        let (b, n, t) = x.dim();
        if t != self.t {
            return Err(ScatteringError::ShapeMismatch {
                context: "cascade input",
                expected: (b, n, 1, self.t),
                found: (b, n, 1, t),
            });
        }

        let r = self.idx.r();
        let mut sx: Vec<Array4<Complex64>> = Vec::with_capacity(r);

        // Layer 1 consumes the raw signal.
        let p1 = self.idx.order_len(1);
        let mut out = Array4::<Complex64>::zeros((b, n, p1, t));
        for bi in 0..b {
            for ni in 0..n {
                let row: Vec<Complex64> =
                    x.slice(s![bi, ni, ..]).iter().map(|&v| Complex64::new(v, 0.0)).collect();
                let row = ndarray::Array1::from(row);
                for (pos, g) in self.idx.order_range(1).enumerate() {
                    let scale = self.idx.path(g)?[0];
                    let conv = self.plan.convolve(row.view(), self.banks[0].filter_hat(scale));
                    out.slice_mut(s![bi, ni, pos, ..]).assign(&ndarray::Array1::from(conv));
                }
            }
        }

        let sigma = self.apply_normalization(&mut out, norm)?;
        sx.push(out);

        // Deeper layers consume the modulus of the previous output.
        for layer in 1..r {
            let modulus = self.modulus_input(&sx[layer - 1]);
            let p_out = self.idx.order_len(layer + 1);
            let mut out = Array4::<Complex64>::zeros((b, n, p_out, t));
            let prev_start = self.idx.order_range(layer).start;
            for (pos, g) in self.idx.order_range(layer + 1).enumerate() {
                let path = self.idx.path(g)?;
                let parent = self
                    .idx
                    .index_of(&path[..layer])
                    .ok_or(ScatteringError::PathIndexOutOfRange { index: g, n_paths: 0 })?
                    - prev_start;
                let scale = path[layer];
                let hat = self.banks[layer].filter_hat(scale);
                for bi in 0..b {
                    for ni in 0..n {
                        let parent_row = modulus.slice(s![bi, ni, parent, ..]);
                        let conv = self.plan.convolve(parent_row, hat);
                        out.slice_mut(s![bi, ni, pos, ..]).assign(&ndarray::Array1::from(conv));
                    }
                }
            }
            sx.push(out);
        }

        Ok(ScatteringTape { sx, sigma })
    }

    /// Map cotangents on every layer's pre-modulus output back to a gradient
    /// on the input signal.
    ///
    /// `cot` must hold one tensor per order, shaped like the tape's `sx`.
    pub fn backward(
        &self, tape: &ScatteringTape, cot: &[Array4<Complex64>],
    ) -> ScatResult<Array3<f64>> {
        let r = self.idx.r();
        let (b, n, _, t) = tape.sx[0].dim();
        for (c, s) in cot.iter().zip(tape.sx.iter()) {
            if c.dim() != s.dim() {
                return Err(ScatteringError::ShapeMismatch {
                    context: "cascade cotangent",
                    expected: s.dim(),
                    found: c.dim(),
                });
            }
        }

        // Accumulated cotangents per layer, combining the direct moment-layer
        // contribution with what flows back from deeper layers.
        let mut g_sx: Vec<Array4<Complex64>> = cot.to_vec();

        for layer in (1..r).rev() {
            // Adjoint of layer `layer+1` convolutions: cotangent on the
            // modulus of the previous layer.
            let mut g_m = Array4::<f64>::zeros(g_sx[layer - 1].dim());
            let prev_start = self.idx.order_range(layer).start;
            for (pos, g) in self.idx.order_range(layer + 1).enumerate() {
                let path = self.idx.path(g)?;
                let parent = self
                    .idx
                    .index_of(&path[..layer])
                    .ok_or(ScatteringError::PathIndexOutOfRange { index: g, n_paths: 0 })?
                    - prev_start;
                let hat = self.banks[layer].filter_hat(path[layer]);
                for bi in 0..b {
                    for ni in 0..n {
                        let adj =
                            self.plan.convolve_adjoint(g_sx[layer].slice(s![bi, ni, pos, ..]), hat);
                        let mut dst = g_m.slice_mut(s![bi, ni, parent, ..]);
                        for (d, a) in dst.iter_mut().zip(adj.iter()) {
                            *d += a.re;
                        }
                    }
                }
            }
            if self.no_mean {
                subtract_time_mean(&mut g_m);
            }
            // Modulus adjoint: scatter the real cotangent onto the complex
            // pre-modulus coefficients along their unit phase.
            let z = &tape.sx[layer - 1];
            let dst = &mut g_sx[layer - 1];
            azip_modulus_adjoint(dst, z, &g_m);
        }

        // Undo the first-layer normalization (sigma is a constant here).
        if let Some(sigma) = &tape.sigma {
            let bs = sigma.dim().0;
            let g1 = &mut g_sx[0];
            for bi in 0..b {
                let bsig = if bs == 1 { 0 } else { bi };
                for ni in 0..n {
                    for p in 0..g1.dim().2 {
                        let s_val = sigma[[bsig, ni, p]];
                        let mut row = g1.slice_mut(s![bi, ni, p, ..]);
                        row.mapv_inplace(|v| v / s_val);
                    }
                }
            }
        }

        // First-layer convolution adjoint onto the real input.
        let mut g_x = Array3::<f64>::zeros((b, n, t));
        for (pos, g) in self.idx.order_range(1).enumerate() {
            let hat = self.banks[0].filter_hat(self.idx.path(g)?[0]);
            for bi in 0..b {
                for ni in 0..n {
                    let adj = self.plan.convolve_adjoint(g_sx[0].slice(s![bi, ni, pos, ..]), hat);
                    let mut dst = g_x.slice_mut(s![bi, ni, ..]);
                    for (d, a) in dst.iter_mut().zip(adj.iter()) {
                        *d += a.re;
                    }
                }
            }
        }
        Ok(g_x)
    }

    // ---- Helper methods ----

    // Modulus (with optional mean subtraction) of a layer output, stored as
    // complex rows so it can feed the next convolution directly.
    fn modulus_input(&self, sx: &Array4<Complex64>) -> Array4<Complex64> {
        let mut m = sx.mapv(|z| Complex64::new(z.norm(), 0.0));
        if self.no_mean {
            let t = m.dim().3.max(1) as f64;
            for mut row in m.rows_mut() {
                let mean = row.sum() / t;
                row.mapv_inplace(|v| v - mean);
            }
        }
        m
    }

    fn apply_normalization(
        &self, out: &mut Array4<Complex64>, norm: SpectrumNorm<'_>,
    ) -> ScatResult<Option<Array3<f64>>> {
        let (b, n, p1, t) = out.dim();
        let sigma = match norm {
            SpectrumNorm::Off => return Ok(None),
            SpectrumNorm::OnTheFly => {
                let mut sigma = Array3::<f64>::zeros((b, n, p1));
                for bi in 0..b {
                    for ni in 0..n {
                        for p in 0..p1 {
                            let power: f64 = out
                                .slice(s![bi, ni, p, ..])
                                .iter()
                                .map(|z| z.norm_sqr())
                                .sum::<f64>()
                                / t as f64;
                            sigma[[bi, ni, p]] = power.sqrt();
                        }
                    }
                }
                sigma
            }
            SpectrumNorm::Fixed(sigma2) => {
                let (bs, ns, ps) = sigma2.dim();
                if (bs != 1 && bs != b) || ns != n || ps != p1 {
                    return Err(ScatteringError::ShapeMismatch {
                        context: "normalization sigma",
                        expected: (1, n, p1, 0),
                        found: (bs, ns, ps, 0),
                    });
                }
                sigma2.mapv(f64::sqrt)
            }
        };
        let bs = sigma.dim().0;
        for bi in 0..b {
            let bsig = if bs == 1 { 0 } else { bi };
            for ni in 0..n {
                for p in 0..p1 {
                    let s_val = sigma[[bsig, ni, p]];
                    let mut row = out.slice_mut(s![bi, ni, p, ..]);
                    row.mapv_inplace(|v| v / s_val);
                }
            }
        }
        Ok(Some(sigma))
    }
}

// g_z += g_m * z / |z|, zero where z == 0.
fn azip_modulus_adjoint(dst: &mut Array4<Complex64>, z: &Array4<Complex64>, g_m: &Array4<f64>) {
    ndarray::Zip::from(dst).and(z).and(g_m).for_each(|d, &zv, &gv| {
        let norm = zv.norm();
        if norm > 0.0 {
            *d += zv * (gv / norm);
        }
    });
}

fn subtract_time_mean(g: &mut Array4<f64>) {
    let t = g.dim().3.max(1) as f64;
    for mut row in g.rows_mut() {
        let mean = row.sum() / t;
        row.mapv_inplace(|v| v - mean);
    }
}
