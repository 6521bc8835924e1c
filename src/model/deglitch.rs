//! Companion model for separating a transient from a noisy recording.
//!
//! Purpose
//! -------
//! Model a candidate transient `nt` inside a recorded signal
//! `x_init = glitch + noise`, given `S` template noise realizations `nks`.
//! Three statistic blocks are evaluated and tagged:
//!
//! - tag 0, `phi(nt)`: the base representation of the candidate itself,
//! - tag 1, `phi(x_init - nt + nk)`: the representation of the deglitched
//!   signal with each template re-injected, averaged over templates,
//! - tag 2, `cross_phi(x_init - nt, nk)`: a two-channel off-diagonal
//!   covariance between the residual and each template (time mean removed
//!   after the modulus), averaged over templates. Driving this block to zero
//!   pushes the residual towards independence from the noise.
//!
//! Per-coefficient weights are the inverse standard deviations of each block
//! over the template set, floored away from zero, computed once at
//! construction together with the block targets.
use ndarray::{Array1, Array3, Axis, s};
use num_complex::Complex64;

use crate::{
    describe::{CoeffRow, Description, DescribedTensor},
    model::{
        chunked::ChunkedModel,
        config::ScatCovConfig,
        errors::{ModelError, ModelResult},
        scat_model::Model,
    },
    moments::ChannelMode,
    scattering::ScatteringTape,
};

const WEIGHT_FLOOR: f64 = 1e-10;

/// Forward record of the three blocks, one tape per evaluated signal.
#[derive(Debug)]
pub struct DeglitchTape {
    t0: ScatteringTape,
    t1: Vec<ScatteringTape>,
    t2: Vec<ScatteringTape>,
}

/// Three-block deglitching model over a single-channel recording.
#[derive(Debug)]
pub struct DeglitchModel {
    base: Model,
    cross: Model,
    x_init: Array3<f64>,
    nks: Array3<f64>,
    descri: Description,
    block_lens: [usize; 3],
    targets: Array3<Complex64>,
    weights: Array1<f64>,
}

impl DeglitchModel {
    /// Build the base and cross models and precompute targets and weights
    /// from the template set.
    ///
    /// `x_init` is `(1, 1, T)`, `nks` is `(S, 1, T)` with `S >= 2` so the
    /// template standard deviations are defined.
    pub fn new(cfg: &ScatCovConfig, x_init: Array3<f64>, nks: Array3<f64>) -> ModelResult<Self> {
        let (bx, n, t) = x_init.dim();
        if bx != 1 || n != 1 {
            return Err(ModelError::InputShape {
                context: "deglitch recording",
                expected: "(1, 1, T)".to_string(),
                found: format!("{:?}", x_init.dim()),
            });
        }
        let (s_count, nn, tn) = nks.dim();
        if nn != 1 || tn != t || s_count < 2 {
            return Err(ModelError::InputShape {
                context: "deglitch templates",
                expected: format!("(S >= 2, 1, {t})"),
                found: format!("{:?}", nks.dim()),
            });
        }

        let base = Model::new(cfg, 1, t)?;
        let cross_cfg = ScatCovConfig {
            channel_mode: ChannelMode::OffDiag,
            no_mean: true,
            normalize: None,
            keep_c_types: None,
            ..cfg.clone()
        };
        let cross = Model::new(&cross_cfg, 2, t)?;

        // Template statistics drive both the targets and the weights.
        let phi_nks = ChunkedModel::new(&base, s_count).forward(&nks, None)?;
        let target0 = phi_nks.mean_batch()?.y().clone();
        let w0 = template_std(phi_nks.y());

        let mut shifted = nks.clone();
        for mut row in shifted.axis_iter_mut(Axis(0)) {
            row.zip_mut_with(&x_init.index_axis(Axis(0), 0), |v, &xv| *v += xv);
        }
        let phi_x_nks = ChunkedModel::new(&base, s_count).forward(&shifted, None)?;
        let w1 = template_std(phi_x_nks.y());
        let target1 = base.forward(&x_init, None)?.y().clone();

        let mut cross_vals = Vec::with_capacity(s_count);
        for si in 0..s_count {
            let stacked = stack_channels(&x_init, &nks.slice(s![si..si + 1, .., ..]).to_owned());
            cross_vals.push(cross.forward(&stacked, None)?);
        }
        let cross_all = DescribedTensor::cat_batch(&cross_vals)?;
        let w2 = template_std(cross_all.y());
        let target2 = Array3::zeros((1, cross.descri().len(), 1));

        let block_lens = [base.descri().len(), base.descri().len(), cross.descri().len()];
        let descri = Description::concat(&[
            &tag_rows(base.descri(), 0),
            &tag_rows(base.descri(), 1),
            &tag_rows(cross.descri(), 2),
        ]);
        let targets = crate::model::scat_model::concat_coeffs(&[&target0, &target1, &target2]);
        let mut weights = Array1::zeros(descri.len());
        for (k, w) in w0.iter().chain(w1.iter()).chain(w2.iter()).enumerate() {
            weights[k] = 1.0 / w.max(WEIGHT_FLOOR);
        }

        Ok(Self { base, cross, x_init, nks, descri, block_lens, targets, weights })
    }

    pub fn descri(&self) -> &Description {
        &self.descri
    }

    /// Cached block targets, `(1, M, 1)` in description order.
    pub fn targets(&self) -> &Array3<Complex64> {
        &self.targets
    }

    /// Inverse template standard deviations per coefficient.
    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    pub fn t(&self) -> usize {
        self.base.t()
    }

    pub fn n_coeffs(&self) -> usize {
        self.descri.len()
    }

    /// Evaluate the three blocks for a candidate transient `(1, 1, T)`.
    pub fn forward_tape(
        &self, nt: &Array3<f64>,
    ) -> ModelResult<(DeglitchTape, Array3<Complex64>)> {
        let s_count = self.nks.dim().0;
        let (t0, v0) = self.base.forward_tape(nt, None)?;

        let residual = {
            let mut res = self.x_init.clone();
            res.zip_mut_with(nt, |v, &n| *v -= n);
            res
        };
        let mut t1 = Vec::with_capacity(s_count);
        let mut v1 = Array3::zeros((1, self.block_lens[1], 1));
        let mut t2 = Vec::with_capacity(s_count);
        let mut v2 = Array3::zeros((1, self.block_lens[2], 1));
        let weight = 1.0 / s_count as f64;
        for si in 0..s_count {
            let nk = self.nks.slice(s![si..si + 1, .., ..]).to_owned();
            let mut deglitched = residual.clone();
            deglitched.zip_mut_with(&nk, |v, &n| *v += n);
            let (tape, vals) = self.base.forward_tape(&deglitched, None)?;
            v1.zip_mut_with(&vals, |acc, &v| *acc += v * weight);
            t1.push(tape);

            let stacked = stack_channels(&residual, &nk);
            let (tape, vals) = self.cross.forward_tape(&stacked, None)?;
            v2.zip_mut_with(&vals, |acc, &v| *acc += v * weight);
            t2.push(tape);
        }

        let values = crate::model::scat_model::concat_coeffs(&[&v0, &v1, &v2]);
        Ok((DeglitchTape { t0, t1, t2 }, values))
    }

    /// Gradient of `Re <cot, forward(nt)>` with respect to `nt`.
    ///
    /// The residual blocks see `nt` through `x_init - nt`, so their
    /// contributions enter with negated sign.
    pub fn backward(
        &self, tape: &DeglitchTape, cot: &Array3<Complex64>,
    ) -> ModelResult<Array3<f64>> {
        let [m0, m1, _] = self.block_lens;
        let s_count = self.nks.dim().0;
        let weight = 1.0 / s_count as f64;

        let c0 = cot.slice(s![.., ..m0, ..]).to_owned();
        let mut grad = self.base.backward(&tape.t0, &c0)?;

        let c1 = cot.slice(s![.., m0..m0 + m1, ..]).mapv(|c| c * weight);
        for t in &tape.t1 {
            let g = self.base.backward(t, &c1)?;
            grad.zip_mut_with(&g, |acc, &v| *acc -= v);
        }

        let c2 = cot.slice(s![.., m0 + m1.., ..]).mapv(|c| c * weight);
        for t in &tape.t2 {
            let g = self.cross.backward(t, &c2)?;
            // channel 0 is the residual; channel 1 is the fixed template
            let g_res = g.slice(s![.., 0..1, ..]);
            grad.zip_mut_with(&g_res, |acc, &v| *acc -= v);
        }
        Ok(grad)
    }
}

// (1, 1, T) + (1, 1, T) -> (1, 2, T)
fn stack_channels(a: &Array3<f64>, b: &Array3<f64>) -> Array3<f64> {
    let t = a.dim().2;
    let mut out = Array3::zeros((1, 2, t));
    out.slice_mut(s![0, 0, ..]).assign(&a.slice(s![0, 0, ..]));
    out.slice_mut(s![0, 1, ..]).assign(&b.slice(s![0, 0, ..]));
    out
}

fn tag_rows(descri: &Description, tag: u8) -> Description {
    Description::new(
        descri
            .iter()
            .map(|row| CoeffRow { loss_tag: Some(tag), ..row.clone() })
            .collect(),
    )
}

// Standard deviation over the batch (template) axis, per coefficient.
fn template_std(values: &Array3<Complex64>) -> Array1<f64> {
    let (s, m, _) = values.dim();
    let mut out = Array1::zeros(m);
    for k in 0..m {
        let mean: Complex64 =
            (0..s).map(|si| values[[si, k, 0]]).sum::<Complex64>() / s as f64;
        let var: f64 = (0..s).map(|si| (values[[si, k, 0]] - mean).norm_sqr()).sum::<f64>()
            / (s - 1) as f64;
        out[k] = var.sqrt();
    }
    out
}
