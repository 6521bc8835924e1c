//! Integration tests for the scattering covariance pipeline.
//!
//! Purpose
//! -------
//! - Validate the end-to-end path: from a raw signal, through the wavelet
//!   cascade and moment layers, to sorted described statistics and back
//!   through the analytic gradients driving synthesis.
//! - Exercise realistic configurations (white noise at realistic lengths,
//!   several model variants, chunked evaluation, normalization) rather
//!   than toy edge cases only.
//!
//! Coverage
//! --------
//! - `analysis`:
//!   - `analyze` on white noise: finite, sorted output, flat power
//!     spectrum across scales.
//!   - `compute_sigma2` feeding `BatchPs` normalization.
//! - `model`:
//!   - Variant row layouts and chunked-versus-unchunked bit identity.
//!   - `forward_tape`/`backward` against finite differences.
//! - `synthesis`:
//!   - Immediate tolerance stop when starting at the target.
//!   - A bounded descent run shrinking the loss within its budgets.
//!
//! Exclusions
//! ----------
//! - Fine-grained validation of low-level building blocks (filter
//!   construction, indexers, adjoint identities per layer) — these are
//!   covered by unit tests.
//! - Long synthesis runs to convergence and statistical quality of large
//!   batches — those belong in targeted performance experiments.
use ndarray::Array3;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;
use scatcov::{
    analysis::{self, batch_sigma2},
    describe::{CType, RowFilter},
    model::{ChunkedModel, Layered, Model, ModelType, Normalize, ScatCovConfig},
    synthesis::{run_synthesis, OptimOptions, StopReason, SynthesisProblem},
};

/// Seeded white-noise signal of shape `(b, n, t)`.
fn white_noise(b: usize, n: usize, t: usize, seed: u64) -> Array3<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array3::from_shape_fn((b, n, t), |_| rng.sample(StandardNormal))
}

fn cov_cfg(octaves: usize) -> ScatCovConfig {
    ScatCovConfig {
        r: 2,
        octaves: Some(Layered::Scalar(octaves)),
        model_type: ModelType::Cov,
        ..ScatCovConfig::default()
    }
}

#[test]
fn white_noise_power_spectrum_is_flat_across_scales() {
    let x = white_noise(8, 1, 2048, 101);
    let cfg = ScatCovConfig { norm: Layered::Scalar(scatcov::scattering::WaveletNorm::L2), ..cov_cfg(5) };
    let out = analysis::analyze(&x, &cfg, None, false).expect("analysis runs");
    let averaged = out.mean_batch().expect("non-empty batch");

    let ps = averaged.select(&RowFilter::new().c_type(CType::Ps).low(false));
    assert_eq!(ps.dim().1, 5);
    let mut powers = Vec::new();
    for k in 0..ps.dim().1 {
        let v = ps[[0, k, 0]];
        assert!(v.im.abs() < 1e-12, "Ps rows must be real, got {v}");
        assert!(v.re > 0.0, "Ps rows must be positive, got {v}");
        powers.push(v.re);
    }
    // white noise spreads energy evenly over L2-normalized bands
    let max = powers.iter().cloned().fold(f64::MIN, f64::max);
    let min = powers.iter().cloned().fold(f64::MAX, f64::min);
    assert!(
        (max / min).log2() < 1.0,
        "power spectrum not flat within one octave: {powers:?}"
    );
}

#[test]
fn every_variant_analyzes_white_noise() {
    let x = white_noise(2, 1, 256, 103);
    for model_type in
        [ModelType::None, ModelType::Scat, ModelType::Cov, ModelType::ScatCov]
    {
        let cfg = ScatCovConfig { model_type, ..cov_cfg(3) };
        let out = analysis::analyze(&x, &cfg, None, false).expect("analysis runs");
        assert!(out.n_coeffs() > 0, "{model_type} produced no rows");
        assert!(
            out.y().iter().all(|v| v.re.is_finite() && v.im.is_finite()),
            "{model_type} produced non-finite values"
        );
    }
    let reduced_cfg = ScatCovConfig {
        model_type: ModelType::CovReduced,
        normalize: Some(Normalize::EachPs),
        ..cov_cfg(3)
    };
    let out = analysis::analyze(&x, &reduced_cfg, None, false).expect("analysis runs");
    assert!(out.n_coeffs() > 0);
}

#[test]
fn batch_normalization_consumes_a_target_sigma() {
    let target = white_noise(4, 1, 256, 107);
    let cfg = ScatCovConfig { normalize: Some(Normalize::BatchPs), ..cov_cfg(3) };
    let sized = cfg.clone().with_default_octaves(256, 3);
    let sigma2 = batch_sigma2(
        &analysis::compute_sigma2(&target, &sized).expect("power runs"),
    )
    .expect("batch mean");

    let x = white_noise(1, 1, 256, 109);
    let out = analysis::analyze(&x, &cfg, Some(&sigma2), false).expect("analysis runs");
    assert!(out.y().iter().all(|v| v.re.is_finite() && v.im.is_finite()));
    // normalized band powers of a same-law signal sit near one
    let ps = out.select(&RowFilter::new().c_type(CType::Ps).low(false));
    for k in 0..ps.dim().1 {
        let v = ps[[0, k, 0]].re;
        assert!(v > 0.1 && v < 10.0, "normalized Ps out of range: {v}");
    }
}

#[test]
fn chunked_model_is_bit_identical_to_unchunked() {
    let cfg = cov_cfg(3);
    let model = Model::new(&cfg, 1, 128).expect("valid config");
    let x = white_noise(6, 1, 128, 113);
    let reference = model.forward(&x, None).expect("forward");
    for nchunks in [2, 3, 6, 17] {
        let chunked = ChunkedModel::new(&model, nchunks).forward(&x, None).expect("forward");
        assert_eq!(reference.y(), chunked.y(), "nchunks = {nchunks}");
    }
}

#[test]
fn analytic_gradient_matches_finite_differences() {
    let cfg = cov_cfg(2);
    let model = Model::new(&cfg, 1, 32).expect("valid config");
    let target_signal = white_noise(1, 1, 32, 127);
    let target = model.forward(&target_signal, None).expect("forward").y().clone();
    let x0 = white_noise(1, 1, 32, 131);
    let problem = SynthesisProblem::new(&model, target, None, &x0).expect("valid problem");

    let theta: ndarray::Array1<f64> = x0.iter().copied().collect();
    let (_, grad) = problem.evaluate(&theta).expect("evaluate");
    let fd = problem.gradient_fd(&theta).expect("finite differences");
    let scale = grad.iter().fold(0.0_f64, |acc, &g| acc.max(g.abs()));
    for i in 0..grad.len() {
        assert!(
            (fd[i] - grad[i]).abs() < 1e-4 * scale.max(1e-6),
            "coordinate {i}: fd = {}, analytic = {}",
            fd[i],
            grad[i]
        );
    }
}

#[test]
fn synthesis_from_the_target_stops_immediately() {
    let cfg = cov_cfg(3);
    let model = Model::new(&cfg, 1, 128).expect("valid config");
    let x = white_noise(1, 1, 128, 137);
    let target = model.forward(&x, None).expect("forward").y().clone();
    let problem = SynthesisProblem::new(&model, target, None, &x).expect("valid problem");
    assert!(problem.loss0() < 1e-20);

    let opts = OptimOptions { tol: 1e-12, relative: false, ..OptimOptions::default() };
    let outcome = run_synthesis(problem, &x, &opts).expect("run");
    assert_eq!(outcome.reason, StopReason::ToleranceReached);
    assert_eq!(outcome.iterations, 0);
    assert!(outcome.final_loss < 1e-20);
}

#[test]
fn bounded_synthesis_shrinks_the_loss() {
    let cfg = cov_cfg(3);
    let model = Model::new(&cfg, 1, 128).expect("valid config");
    let target_signal = white_noise(1, 1, 128, 139);
    let target = model.forward(&target_signal, None).expect("forward").y().clone();
    let x0 = white_noise(1, 1, 128, 149);
    let problem = SynthesisProblem::new(&model, target, None, &x0).expect("valid problem");
    let loss0 = problem.loss0();

    let opts = OptimOptions {
        max_iter: 100,
        tol: 0.1,
        relative: true,
        ..OptimOptions::default()
    };
    let outcome = run_synthesis(problem, &x0, &opts).expect("run");
    assert!(outcome.iterations <= 100);
    assert!(
        outcome.final_loss < loss0,
        "loss did not decrease: {loss0} -> {}",
        outcome.final_loss
    );
    assert_ne!(outcome.reason, StopReason::NonFiniteLoss);
    assert_eq!(outcome.x_hat.dim(), (1, 1, 128));
}
