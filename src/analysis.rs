//! Analysis front-end.
//!
//! Purpose
//! -------
//! Turn a raw time series into its described scattering statistics with one
//! call: shape the input, fill defaulted configuration, build the model,
//! run it (chunked when requested), undo the power-spectrum normalization
//! on the Ps rows when asked, and hand back a canonically sorted
//! [`DescribedTensor`].
//!
//! Key behaviors
//! -------------
//! - Inputs of shape `T`, `(B, T)` and `(B, N, T)` are accepted through the
//!   promotion helpers; internally everything is `(B, N, T)`.
//! - Unset octaves default to `log2(T) - 3`, clamped to at least one.
//! - `nchunks` up to the batch size splits the batch; any excess is
//!   absorbed into the covariance layer's internal chunk count.
use ndarray::{s, Array1, Array2, Array3, Axis};

use crate::{
    describe::{CType, DescribedTensor, RowFilter},
    model::{
        ChunkedModel, Layered, Model, ModelError, ModelResult, ModelType, Normalize, Precision,
        ScatCovConfig,
    },
    moments::Estimator,
};

/// Octave margin applied when the configuration leaves octaves unset.
const DEFAULT_OCTAVE_MARGIN: u32 = 3;

/// Promote a single channelless series to `(1, 1, T)`.
pub fn signal_from_1d(x: &Array1<f64>) -> Array3<f64> {
    x.view().insert_axis(Axis(0)).insert_axis(Axis(0)).to_owned()
}

/// Promote a batch of single-channel series `(B, T)` to `(B, 1, T)`.
pub fn signal_from_2d(x: &Array2<f64>) -> Array3<f64> {
    x.view().insert_axis(Axis(1)).to_owned()
}

/// Upcast a single-precision signal for analysis.
///
/// All internal arithmetic is double precision; callers holding `f32` data
/// go through here so the cast is explicit and logged once per call.
pub fn upcast_single(x: &Array3<f32>) -> Array3<f64> {
    eprintln!("analysis: single-precision input upcast to double");
    x.mapv(f64::from)
}

/// Analyze a `(B, N, T)` signal into its sorted scattering statistics.
///
/// `sigma2` feeds `BatchPs` normalization and is ignored otherwise. With
/// `keep_ps` the Ps rows are multiplied back by the sigma squared that was
/// divided out, so output stays comparable across normalization settings.
pub fn analyze(
    x: &Array3<f64>, cfg: &ScatCovConfig, sigma2: Option<&Array3<f64>>, keep_ps: bool,
) -> ModelResult<DescribedTensor> {
    let (b, n, t) = x.dim();
    if b == 0 || n == 0 || t == 0 {
        return Err(ModelError::InputShape {
            context: "analyze",
            expected: "non-empty (B, N, T)".to_string(),
            found: format!("({b}, {n}, {t})"),
        });
    }
    if cfg.nchunks == 0 {
        return Err(ModelError::InvalidChunks { nchunks: 0 });
    }
    let mut cfg = cfg.clone().with_default_octaves(t, DEFAULT_OCTAVE_MARGIN);
    if cfg.precision == Precision::Single {
        eprintln!("analysis: single-precision configuration runs in double internally");
    }

    // split the chunk budget between the batch axis and the covariance layer
    let batch_chunks = cfg.nchunks.clamp(1, b);
    cfg.nchunks = if cfg.nchunks > b { cfg.nchunks.div_ceil(b) } else { 1 };
    let model = Model::new(&cfg, n, t)?;

    let owned_sigma2;
    let sigma2 = match (cfg.normalize, sigma2) {
        (Some(Normalize::BatchPs), None) => {
            owned_sigma2 = compute_sigma2(x, &cfg)?;
            Some(&owned_sigma2)
        }
        (_, supplied) => supplied,
    };

    let mut out = if batch_chunks > 1 {
        ChunkedModel::new(&model, batch_chunks).forward(x, sigma2)?
    } else {
        model.forward(x, sigma2)?
    };

    if keep_ps && cfg.normalize.is_some() {
        let restored = match cfg.normalize {
            Some(Normalize::EachPs) => compute_sigma2(x, &cfg)?,
            _ => match sigma2 {
                Some(sig) => sig.clone(),
                None => compute_sigma2(x, &cfg)?,
            },
        };
        out = restore_ps(&out, &restored)?;
    }
    Ok(out.sort()?)
}

/// Per-channel, per-scale first-layer power `E{|Wx(j)|^2}`, shape
/// `(B, N, P1)` with the low-pass path last.
///
/// This is the sigma squared fed to `BatchPs` normalization (after an
/// optional batch average) and matches what `EachPs` estimates on the fly.
pub fn compute_sigma2(x: &Array3<f64>, cfg: &ScatCovConfig) -> ModelResult<Array3<f64>> {
    let (b, n, t) = x.dim();
    let octaves = cfg.octaves.as_ref().ok_or(ModelError::MissingOctaves)?;
    let power_cfg = ScatCovConfig {
        r: 1,
        octaves: Some(Layered::Scalar(octaves.expand("octaves", cfg.r)?[0])),
        voices: Layered::Scalar(cfg.voices.expand("voices", cfg.r)?[0]),
        family: Layered::Scalar(cfg.family.expand("family", cfg.r)?[0]),
        norm: Layered::Scalar(cfg.norm.expand("norm", cfg.r)?[0]),
        high_freq: cfg.high_freq,
        qs: Some(vec![2.0]),
        model_type: ModelType::Scat,
        estimator: Estimator::Mean,
        normalize: None,
        keep_c_types: None,
        nchunks: 1,
        no_mean: cfg.no_mean,
        ..cfg.clone()
    };
    let model = Model::new(&power_cfg, n, t)?;
    let power = model.forward(x, None)?;
    let p1 = power.n_coeffs() / n;
    let mut sigma2 = Array3::zeros((b, n, p1));
    // rows are channel-major, path-major, single q
    for bi in 0..b {
        for ni in 0..n {
            for p in 0..p1 {
                sigma2[[bi, ni, p]] = power.y()[[bi, ni * p1 + p, 0]].re;
            }
        }
    }
    Ok(sigma2)
}

/// Average a per-batch sigma squared down to `(1, N, P1)`.
pub fn batch_sigma2(sigma2: &Array3<f64>) -> ModelResult<Array3<f64>> {
    let mean = sigma2.mean_axis(Axis(0)).ok_or(ModelError::InputShape {
        context: "batch_sigma2",
        expected: "non-empty batch".to_string(),
        found: "(0, N, P1)".to_string(),
    })?;
    Ok(mean.insert_axis(Axis(0)))
}

fn restore_ps(out: &DescribedTensor, sigma2: &Array3<f64>) -> ModelResult<DescribedTensor> {
    let positions = out.descri().index_where(&RowFilter::new().c_type(CType::Ps));
    let mut y = out.y().clone();
    let (b, _, _) = y.dim();
    let bs = sigma2.dim().0;
    for &i in &positions {
        let row = &out.descri().rows()[i];
        let (ni, g) = match (row.nl, row.scl) {
            (Some(ni), Some(g)) => (ni, g),
            _ => continue,
        };
        for bi in 0..b {
            let bsig = if bs == 1 { 0 } else { bi };
            let factor = sigma2[[bsig, ni, g]];
            let mut cell = y.slice_mut(s![bi, i, ..]);
            cell.mapv_inplace(|v| v * factor);
        }
    }
    Ok(DescribedTensor::new(out.x.clone(), out.descri().clone(), y)?)
}

/// Per-block obstruction-to-self-similarity scores.
///
/// Each component is the average normalized dispersion of one coefficient
/// family along its scale diagonals; zero means the statistics repeat
/// exactly across scales.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub spars: f64,
    pub ps: f64,
    pub phase_env: f64,
    pub envelope: f64,
    pub total: f64,
}

/// Score how far the analyzed statistics sit from scale self-similarity.
///
/// Works on a Cov-style described tensor; rows are batch-averaged first.
/// Spars and Ps rows form one diagonal each per channel; PhaseEnv rows
/// group by their scale shift `jl1 - jr1`, Envelope rows additionally by
/// `jl1 - j2`. Low-pass rows are excluded everywhere.
pub fn self_similarity_score(dtensor: &DescribedTensor) -> ModelResult<ScoreBreakdown> {
    let averaged = dtensor.mean_batch()?;
    let y = averaged.y();
    let descri = averaged.descri();

    let mut groups: std::collections::BTreeMap<(u8, usize, usize, i64, i64), Vec<f64>> =
        std::collections::BTreeMap::new();
    for (i, row) in descri.iter().enumerate() {
        if row.low == Some(true) {
            continue;
        }
        let value = y[[0, i, 0]].norm();
        let key = match row.c_type {
            CType::Spars => (0u8, row.nl.unwrap_or(0), 0, 0, 0),
            CType::Ps => (1, row.nl.unwrap_or(0), 0, 0, 0),
            CType::PhaseEnv => {
                let (jl1, jr1) = match (row.jl1, row.jr1) {
                    (Some(jl1), Some(jr1)) => (jl1, jr1),
                    _ => continue,
                };
                (2, row.nl.unwrap_or(0), row.nr.unwrap_or(0), jl1 as i64 - jr1 as i64, 0)
            }
            CType::Envelope => {
                let (jl1, jr1, j2) = match (row.jl1, row.jr1, row.j2) {
                    (Some(jl1), Some(jr1), Some(j2)) => (jl1, jr1, j2),
                    _ => continue,
                };
                (
                    3,
                    row.nl.unwrap_or(0),
                    row.nr.unwrap_or(0),
                    jl1 as i64 - jr1 as i64,
                    jl1 as i64 - j2 as i64,
                )
            }
            _ => continue,
        };
        groups.entry(key).or_default().push(value);
    }

    let mut sums = [0.0_f64; 4];
    let mut counts = [0usize; 4];
    for ((rank, ..), values) in &groups {
        if values.len() < 2 {
            continue;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let var =
            values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
        let dispersion = var.sqrt() / mean.abs().max(f64::EPSILON);
        sums[*rank as usize] += dispersion;
        counts[*rank as usize] += 1;
    }
    let component = |k: usize| if counts[k] == 0 { 0.0 } else { sums[k] / counts[k] as f64 };
    let (spars, ps, phase_env, envelope) =
        (component(0), component(1), component(2), component(3));
    let active = counts.iter().filter(|&&c| c > 0).count().max(1) as f64;
    let total = (spars + ps + phase_env + envelope) / active;
    Ok(ScoreBreakdown { spars, ps, phase_env, envelope, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use rand_distr::StandardNormal;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Shape promotion helpers.
    // - analyze returning sorted, finite statistics with the expected row
    //   count and defaulted octaves.
    // - compute_sigma2 shape and strict positivity on noise.
    // - keep_ps undoing the normalization on Ps rows.
    // - Self-similarity score near zero for exactly repeated diagonals.
    // -------------------------------------------------------------------------

    fn noise(b: usize, n: usize, t: usize, seed: u64) -> Array3<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array3::from_shape_fn((b, n, t), |_| rng.sample(StandardNormal))
    }

    fn cov_cfg() -> ScatCovConfig {
        ScatCovConfig { r: 2, model_type: ModelType::Cov, ..ScatCovConfig::default() }
    }

    #[test]
    fn promotion_helpers_add_the_leading_axes() {
        let x1 = Array1::from(vec![1.0, 2.0, 3.0]);
        assert_eq!(signal_from_1d(&x1).dim(), (1, 1, 3));
        let x2 = Array2::from_shape_fn((4, 3), |(i, j)| (i * 3 + j) as f64);
        let promoted = signal_from_2d(&x2);
        assert_eq!(promoted.dim(), (4, 1, 3));
        assert_eq!(promoted[[2, 0, 1]], 7.0);
    }

    #[test]
    fn analyze_returns_sorted_finite_statistics() {
        let x = noise(2, 1, 256, 3);
        let out = analyze(&x, &cov_cfg(), None, false).expect("analysis runs");
        assert!(out.n_coeffs() > 0);
        assert!(out.y().iter().all(|v| v.re.is_finite() && v.im.is_finite()));
        let (sorted, perm) = out.descri().sorted();
        assert_eq!(&sorted, out.descri());
        assert_eq!(perm, (0..out.n_coeffs()).collect::<Vec<_>>());
    }

    #[test]
    fn analyze_rejects_empty_input() {
        let x = Array3::<f64>::zeros((0, 1, 64));
        assert!(matches!(
            analyze(&x, &cov_cfg(), None, false),
            Err(ModelError::InputShape { .. })
        ));
    }

    #[test]
    fn chunked_analysis_matches_unchunked() {
        let x = noise(4, 1, 128, 7);
        let reference = analyze(&x, &cov_cfg(), None, false).expect("analysis runs");
        for nchunks in [2, 4, 9] {
            let cfg = ScatCovConfig { nchunks, ..cov_cfg() };
            let chunked = analyze(&x, &cfg, None, false).expect("analysis runs");
            assert_eq!(reference.y(), chunked.y(), "nchunks = {nchunks}");
        }
    }

    #[test]
    fn sigma2_is_positive_with_one_row_per_scale() {
        let x = noise(2, 1, 128, 11);
        let cfg = cov_cfg().with_default_octaves(128, 3);
        let sigma2 = compute_sigma2(&x, &cfg).expect("power runs");
        // 4 octaves of bands plus the low pass
        assert_eq!(sigma2.dim(), (2, 1, 5));
        assert!(sigma2.iter().all(|&v| v > 0.0));
        assert_eq!(batch_sigma2(&sigma2).expect("mean").dim(), (1, 1, 5));
    }

    #[test]
    fn keep_ps_undoes_the_normalization() {
        let x = noise(1, 1, 128, 13);
        let plain = analyze(&x, &cov_cfg(), None, false).expect("analysis runs");
        let normalized_cfg =
            ScatCovConfig { normalize: Some(Normalize::EachPs), ..cov_cfg() };
        let restored = analyze(&x, &normalized_cfg, None, true).expect("analysis runs");
        let filter = RowFilter::new().c_type(CType::Ps).low(false);
        let plain_ps = plain.select(&filter);
        let restored_ps = restored.select(&filter);
        assert_eq!(plain_ps.dim(), restored_ps.dim());
        for (a, b) in plain_ps.iter().zip(restored_ps.iter()) {
            assert!((a - b).norm() < 1e-10 * (1.0 + a.norm()), "{a} vs {b}");
        }
    }

    #[test]
    fn repeated_diagonals_score_as_self_similar() {
        use crate::describe::{CoeffRow, Description};
        // two Envelope diagonals with identical values across scales
        let mut rows = Vec::new();
        let mut values = Vec::new();
        for (a, b, v) in [(1, 0, 0.5), (2, 1, 0.25)] {
            for shift in 0..3usize {
                rows.push(CoeffRow {
                    nl: Some(0),
                    nr: Some(0),
                    jl1: Some(shift + a as usize),
                    jr1: Some(shift),
                    j2: Some(shift + a as usize - b as usize),
                    real: Some(false),
                    low: Some(false),
                    ..CoeffRow::new(CType::Envelope)
                });
                values.push(Complex64::new(v, 0.0));
            }
        }
        let y = Array3::from_shape_vec((1, values.len(), 1), values).expect("shape");
        let dtensor =
            DescribedTensor::new(None, Description::new(rows), y).expect("aligned");
        let score = self_similarity_score(&dtensor).expect("score");
        assert!(score.envelope < 1e-12);
        assert!(score.total < 1e-12);
    }
}
