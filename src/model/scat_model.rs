//! The scattering covariance model: description, forward, backward.
//!
//! Purpose
//! -------
//! Assemble the cascade and the moment layers into one of the closed model
//! variants, with the output description built once at construction so the
//! coefficient table and the computed tensor agree row-for-row by
//! construction.
//!
//! Key behaviors
//! -------------
//! - `forward` maps a real `(B, N, T)` signal to a [`DescribedTensor`] of
//!   the variant; `forward_tape` additionally records the per-layer
//!   pre-modulus outputs.
//! - `backward` maps a cotangent on the output coefficient vector to an
//!   exact gradient on the input, chaining every moment-layer adjoint with
//!   the cascade adjoint. The normalization sigma is a constant in the
//!   backward pass.
//! - `keep_c_types` restricts the output to selected coefficient kinds; the
//!   backward pass scatters reduced cotangents back to the full layout.
//!
//! Invariants & assumptions
//! ------------------------
//! - Segment order inside a variant is fixed: order-1 moments, then (for
//!   scat+cov) order-2 marginals, then covariance blocks ww, wmw, mw; the
//!   reduced variant replaces band-pass covariance rows by their invariant
//!   classes after the non-invariant rows.
//! - Covariance variants require exactly two layers.
use ndarray::{Array3, Array4, s};
use num_complex::Complex64;

use crate::{
    describe::{CType, CoeffRow, Description, DescribedTensor, RowFilter},
    model::{
        config::ScatCovConfig,
        errors::{ModelError, ModelResult},
        variant::{ModelType, Normalize},
    },
    moments::{Cov, CovScaleInvariant, Order1Moments, ScatCoefficients},
    scattering::{ScaleIndexer, ScatteringCascade, ScatteringTape, SpectrumNorm},
};

// Variant-specific machinery alongside the shared cascade and cov layers.
#[derive(Debug, Clone)]
enum VariantOps {
    Raw,
    Scat(ScatCoefficients),
    Cov,
    CovReduced(CovScaleInvariant),
    ScatCov(ScatCoefficients),
}

/// A configured scattering covariance model for fixed `(N, T)`.
#[derive(Debug, Clone)]
pub struct Model {
    model_type: ModelType,
    normalize: Option<Normalize>,
    cascade: ScatteringCascade,
    cov: Cov,
    ops: VariantOps,
    n: usize,
    t: usize,
    full_descri: Description,
    kept: Option<Vec<usize>>,
    descri: Description,
    order1_len: usize,
    block_lens: [usize; 3],
    /// Positions of retained rows inside the covariance block concat
    /// (reduced variant).
    non_inv_positions: Vec<usize>,
    /// Positions of order-2 rows inside the full marginal layout
    /// (scat+cov variant).
    scat2_positions: Vec<usize>,
}

impl Model {
    /// Validate the configuration and build the model for `n` channels and
    /// signal length `t`.
    pub fn new(cfg: &ScatCovConfig, n: usize, t: usize) -> ModelResult<Model> {
        let r = cfg.r;
        let octaves = cfg.octaves.as_ref().ok_or(ModelError::MissingOctaves)?;
        let octaves = octaves.expand("octaves", r)?;
        let voices = cfg.voices.expand("voices", r)?;
        let families = cfg.family.expand("family", r)?;
        let norms = cfg.norm.expand("norm", r)?;
        if cfg.nchunks == 0 {
            return Err(ModelError::InvalidChunks { nchunks: 0 });
        }
        let qs = cfg.qs_or_default();
        for &q in &qs {
            if !q.is_finite() || q <= 0.0 {
                return Err(ModelError::InvalidMomentExponent { q });
            }
        }
        let cov_variant =
            matches!(cfg.model_type, ModelType::Cov | ModelType::CovReduced | ModelType::ScatCov);
        if cov_variant && r != 2 {
            let variant = match cfg.model_type {
                ModelType::Cov => "cov",
                ModelType::CovReduced => "covreduced",
                _ => "scat+cov",
            };
            return Err(ModelError::UnsupportedLayerCount { variant, r });
        }
        if cfg.model_type == ModelType::CovReduced && cfg.normalize.is_none() {
            return Err(ModelError::CovReducedNeedsNormalization);
        }

        let idx = ScaleIndexer::new(r, octaves, voices)?;
        let cascade = ScatteringCascade::new(
            idx,
            t,
            &families,
            &norms,
            &vec![cfg.high_freq; r],
            cfg.no_mean,
        )?;
        let idx = cascade.indexer();
        let cov = Cov::new(cfg.channel_mode, cfg.cov_mode, cfg.estimator, cfg.nchunks);

        let mut block_lens = [0usize; 3];
        let mut non_inv_positions = Vec::new();
        let mut scat2_positions = Vec::new();
        let order1 = Order1Moments::description(idx, n)?;
        let order1_len = order1.len();

        let (ops, full_descri) = match cfg.model_type {
            ModelType::None => (VariantOps::Raw, Self::raw_description(idx, n)?),
            ModelType::Scat => {
                let layer = ScatCoefficients::new(qs.clone(), cfg.estimator);
                let descri = layer.description(idx, n)?;
                (VariantOps::Scat(layer), descri)
            }
            ModelType::Cov => {
                let blocks = Self::cov_blocks(&cov, idx, n, &mut block_lens)?;
                (VariantOps::Cov, Description::concat(&[&order1, &blocks]))
            }
            ModelType::CovReduced => {
                let blocks = Self::cov_blocks(&cov, idx, n, &mut block_lens)?;
                non_inv_positions = (0..blocks.len())
                    .filter(|&i| {
                        let row = &blocks.rows()[i];
                        row.c_type == CType::Ps || row.low == Some(true)
                    })
                    .collect();
                let inv = CovScaleInvariant::new(idx, &blocks)?;
                let descri = Description::concat(&[
                    &order1,
                    &blocks.take(&non_inv_positions),
                    &inv.description(),
                ]);
                (VariantOps::CovReduced(inv), descri)
            }
            ModelType::ScatCov => {
                let layer = ScatCoefficients::new(vec![1.0], cfg.estimator);
                let marginals = layer.description(idx, n)?;
                scat2_positions = marginals.index_where(&RowFilter::new().rl(2));
                let blocks = Self::cov_blocks(&cov, idx, n, &mut block_lens)?;
                let descri =
                    Description::concat(&[&order1, &marginals.take(&scat2_positions), &blocks]);
                (VariantOps::ScatCov(layer), descri)
            }
        };

        let (kept, descri) = match &cfg.keep_c_types {
            Some(kinds) => {
                let positions = full_descri.index_where(&RowFilter::new().c_type_in(kinds));
                let reduced = full_descri.take(&positions);
                (Some(positions), reduced)
            }
            None => (None, full_descri.clone()),
        };

        Ok(Model {
            model_type: cfg.model_type,
            normalize: cfg.normalize,
            cascade,
            cov,
            ops,
            n,
            t,
            full_descri,
            kept,
            descri,
            order1_len,
            block_lens,
            non_inv_positions,
            scat2_positions,
        })
    }

    fn raw_description(idx: &ScaleIndexer, n: usize) -> ModelResult<Description> {
        let mut rows = Vec::new();
        for ni in 0..n {
            for g in 0..idx.n_paths() {
                let scales = idx.scales(g)?;
                let low = idx.is_low_pass(g)?;
                rows.push(CoeffRow {
                    nl: Some(ni),
                    rl: Some(idx.order(g)?),
                    scl: Some(g),
                    jl1: scales[0],
                    j2: scales.get(1).copied().flatten(),
                    real: Some(low),
                    low: Some(low),
                    ..CoeffRow::new(CType::Raw)
                });
            }
        }
        Ok(Description::new(rows))
    }

    fn cov_blocks(
        cov: &Cov, idx: &ScaleIndexer, n: usize, lens: &mut [usize; 3],
    ) -> ModelResult<Description> {
        let ww = cov.description(idx, n, 1, 1)?;
        let wmw = cov.description(idx, n, 1, 2)?;
        let mw = cov.description(idx, n, 2, 2)?;
        *lens = [ww.len(), wmw.len(), mw.len()];
        Ok(Description::concat(&[&ww, &wmw, &mw]))
    }

    // ---- Accessors ----

    pub fn descri(&self) -> &Description {
        &self.descri
    }

    pub fn indexer(&self) -> &ScaleIndexer {
        self.cascade.indexer()
    }

    pub fn n_channels(&self) -> usize {
        self.n
    }

    pub fn t(&self) -> usize {
        self.t
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn normalize(&self) -> Option<Normalize> {
        self.normalize
    }

    /// Time axis of the output tensor: `T` for the time-resolved variant,
    /// 1 for averaged statistics.
    pub fn tdim(&self) -> usize {
        if self.model_type == ModelType::None { self.t } else { 1 }
    }

    /// Number of output coefficients, optionally restricted by a filter.
    pub fn count_coefficients(&self, filter: Option<&RowFilter>) -> usize {
        match filter {
            Some(f) => self.descri.count(f),
            None => self.descri.len(),
        }
    }

    // ---- Forward ----

    /// Evaluate the model, returning the tape alongside the full (pre-keep)
    /// coefficient tensor.
    pub fn forward_tape(
        &self, x: &Array3<f64>, sigma2: Option<&Array3<f64>>,
    ) -> ModelResult<(ScatteringTape, Array3<Complex64>)> {
        let (b, n, t) = x.dim();
        if n != self.n || t != self.t {
            return Err(ModelError::InputShape {
                context: "model forward",
                expected: format!("(B, {}, {})", self.n, self.t),
                found: format!("({b}, {n}, {t})"),
            });
        }
        let norm = match self.normalize {
            None => SpectrumNorm::Off,
            Some(Normalize::EachPs) => SpectrumNorm::OnTheFly,
            Some(Normalize::BatchPs) => {
                SpectrumNorm::Fixed(sigma2.ok_or(ModelError::MissingSigma)?)
            }
        };
        let tape = self.cascade.forward(x, norm)?;
        let values = self.assemble(&tape)?;
        Ok((tape, values))
    }

    /// Evaluate the model into a described tensor.
    pub fn forward(
        &self, x: &Array3<f64>, sigma2: Option<&Array3<f64>>,
    ) -> ModelResult<DescribedTensor> {
        let (_, values) = self.forward_tape(x, sigma2)?;
        let values = self.apply_keep(values);
        Ok(DescribedTensor::new(Some(x.clone()), self.descri.clone(), values)?)
    }

    pub(crate) fn apply_keep(&self, values: Array3<Complex64>) -> Array3<Complex64> {
        match &self.kept {
            None => values,
            Some(positions) => {
                let (b, _, tdim) = values.dim();
                let mut out = Array3::zeros((b, positions.len(), tdim));
                for (k, &i) in positions.iter().enumerate() {
                    out.slice_mut(s![.., k, ..]).assign(&values.slice(s![.., i, ..]));
                }
                out
            }
        }
    }

    fn assemble(&self, tape: &ScatteringTape) -> ModelResult<Array3<Complex64>> {
        let idx = self.cascade.indexer();
        match &self.ops {
            VariantOps::Raw => {
                let (b, n, _, t) = tape.sx[0].dim();
                let k = idx.n_paths();
                let mut out = Array3::zeros((b, n * k, t));
                for ni in 0..n {
                    for g in 0..k {
                        let order = idx.order(g)?;
                        let pos = g - idx.order_range(order).start;
                        out.slice_mut(s![.., ni * k + g, ..])
                            .assign(&tape.sx[order - 1].slice(s![.., ni, pos, ..]));
                    }
                }
                Ok(out)
            }
            VariantOps::Scat(scat) => Ok(scat.forward(idx, tape)?),
            VariantOps::Cov => {
                let order1 = Order1Moments::forward(idx, tape)?;
                let blocks = self.cov_forward(tape)?;
                Ok(concat_coeffs(&[&order1, &blocks]))
            }
            VariantOps::CovReduced(inv) => {
                let order1 = Order1Moments::forward(idx, tape)?;
                let blocks = self.cov_forward(tape)?;
                let invariant = inv.forward(&blocks);
                let non_inv = take_rows(&blocks, &self.non_inv_positions);
                Ok(concat_coeffs(&[&order1, &non_inv, &invariant]))
            }
            VariantOps::ScatCov(scat) => {
                let order1 = Order1Moments::forward(idx, tape)?;
                let marginals = scat.forward(idx, tape)?;
                let scat2 = take_rows(&marginals, &self.scat2_positions);
                let blocks = self.cov_forward(tape)?;
                Ok(concat_coeffs(&[&order1, &scat2, &blocks]))
            }
        }
    }

    fn cov_forward(&self, tape: &ScatteringTape) -> ModelResult<Array3<Complex64>> {
        let idx = self.cascade.indexer();
        let ww = self.cov.forward(idx, tape, 1, 1)?;
        let wmw = self.cov.forward(idx, tape, 1, 2)?;
        let mw = self.cov.forward(idx, tape, 2, 2)?;
        Ok(concat_coeffs(&[&ww, &wmw, &mw]))
    }

    // ---- Backward ----

    /// Map a cotangent on the output coefficients to a gradient on the
    /// input signal.
    pub fn backward(
        &self, tape: &ScatteringTape, cot: &Array3<Complex64>,
    ) -> ModelResult<Array3<f64>> {
        let cot = self.expand_keep(cot);
        let idx = self.cascade.indexer();
        let b = tape.sx[0].dim().0;
        let mut g_sx: Vec<Array4<Complex64>> =
            tape.sx.iter().map(|sx| Array4::zeros(sx.dim())).collect();

        match &self.ops {
            VariantOps::Raw => {
                let k = idx.n_paths();
                for ni in 0..self.n {
                    for g in 0..k {
                        let order = idx.order(g)?;
                        let pos = g - idx.order_range(order).start;
                        let mut dst = g_sx[order - 1].slice_mut(s![.., ni, pos, ..]);
                        let src = cot.slice(s![.., ni * k + g, ..]);
                        dst.zip_mut_with(&src, |d, &c| *d += c);
                    }
                }
            }
            VariantOps::Scat(scat) => {
                scat.backward(idx, tape, &cot, &mut g_sx)?;
            }
            VariantOps::Cov => {
                let o1 = cot.slice(s![.., ..self.order1_len, ..]).to_owned();
                Order1Moments::backward(idx, tape, &o1, &mut g_sx[0])?;
                let blocks = cot.slice(s![.., self.order1_len.., ..]).to_owned();
                self.cov_backward(tape, &blocks, &mut g_sx)?;
            }
            VariantOps::CovReduced(inv) => {
                let o1 = cot.slice(s![.., ..self.order1_len, ..]).to_owned();
                Order1Moments::backward(idx, tape, &o1, &mut g_sx[0])?;
                let n_non_inv = self.non_inv_positions.len();
                let cov_total: usize = self.block_lens.iter().sum();
                let mut cov_cot = Array3::zeros((b, cov_total, 1));
                for (k, &i) in self.non_inv_positions.iter().enumerate() {
                    cov_cot
                        .slice_mut(s![.., i, ..])
                        .assign(&cot.slice(s![.., self.order1_len + k, ..]));
                }
                let inv_cot = cot.slice(s![.., self.order1_len + n_non_inv.., ..]).to_owned();
                let scattered = inv.backward(&inv_cot);
                cov_cot.zip_mut_with(&scattered, |d, &g| *d += g);
                self.cov_backward(tape, &cov_cot, &mut g_sx)?;
            }
            VariantOps::ScatCov(scat) => {
                let o1 = cot.slice(s![.., ..self.order1_len, ..]).to_owned();
                Order1Moments::backward(idx, tape, &o1, &mut g_sx[0])?;
                let full_marginals = idx.n_paths() * self.n;
                let mut scat_cot = Array3::zeros((b, full_marginals, 1));
                for (k, &i) in self.scat2_positions.iter().enumerate() {
                    scat_cot
                        .slice_mut(s![.., i, ..])
                        .assign(&cot.slice(s![.., self.order1_len + k, ..]));
                }
                scat.backward(idx, tape, &scat_cot, &mut g_sx)?;
                let offset = self.order1_len + self.scat2_positions.len();
                let blocks = cot.slice(s![.., offset.., ..]).to_owned();
                self.cov_backward(tape, &blocks, &mut g_sx)?;
            }
        }

        Ok(self.cascade.backward(tape, &g_sx)?)
    }

    fn cov_backward(
        &self, tape: &ScatteringTape, cot: &Array3<Complex64>, g_sx: &mut [Array4<Complex64>],
    ) -> ModelResult<()> {
        let idx = self.cascade.indexer();
        let [ww, wmw, _] = self.block_lens;
        let seg = cot.slice(s![.., ..ww, ..]).to_owned();
        self.cov.backward(idx, tape, 1, 1, &seg, g_sx)?;
        let seg = cot.slice(s![.., ww..ww + wmw, ..]).to_owned();
        self.cov.backward(idx, tape, 1, 2, &seg, g_sx)?;
        let seg = cot.slice(s![.., ww + wmw.., ..]).to_owned();
        self.cov.backward(idx, tape, 2, 2, &seg, g_sx)?;
        Ok(())
    }

    fn expand_keep(&self, cot: &Array3<Complex64>) -> Array3<Complex64> {
        match &self.kept {
            None => cot.clone(),
            Some(positions) => {
                let (b, _, tdim) = cot.dim();
                let mut full = Array3::zeros((b, self.full_descri.len(), tdim));
                for (k, &i) in positions.iter().enumerate() {
                    full.slice_mut(s![.., i, ..]).assign(&cot.slice(s![.., k, ..]));
                }
                full
            }
        }
    }
}

// Concatenate coefficient tensors along the coefficient axis. All parts
// share (B, Tdim) by construction.
pub(crate) fn concat_coeffs(parts: &[&Array3<Complex64>]) -> Array3<Complex64> {
    let (b, _, tdim) = parts[0].dim();
    let total: usize = parts.iter().map(|p| p.dim().1).sum();
    let mut out = Array3::zeros((b, total, tdim));
    let mut offset = 0;
    for part in parts {
        let m = part.dim().1;
        out.slice_mut(s![.., offset..offset + m, ..]).assign(part);
        offset += m;
    }
    out
}

fn take_rows(values: &Array3<Complex64>, positions: &[usize]) -> Array3<Complex64> {
    let (b, _, tdim) = values.dim();
    let mut out = Array3::zeros((b, positions.len(), tdim));
    for (k, &i) in positions.iter().enumerate() {
        out.slice_mut(s![.., k, ..]).assign(&values.slice(s![.., i, ..]));
    }
    out
}
