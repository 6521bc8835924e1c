//! Cross-scale covariances between scattering layers.
//!
//! Purpose
//! -------
//! Compute `E{A conj(B)}` over time for admissible pairs of coefficients,
//! where `A` has order `rl` and `B` order `rr` with `(rl, rr)` one of
//! `(1,1)` (power spectrum), `(1,2)` (phase-envelope) or `(2,2)` (envelope).
//!
//! Key behaviors
//! -------------
//! - Admissible scale pairs require coinciding terminal octaves (compared by
//!   cross-multiplication when voice counts differ); low-pass terminals only
//!   pair with low-pass terminals. `(2,2)` keeps one representative of each
//!   conjugate pair (`jl1 >= jr1`); `(1,1)` is the diagonal.
//! - Channel pairs enumerate outer, scale pairs inner; the scale-pair axis is
//!   processed in `nchunks` contiguous chunks as a memory knob, with
//!   bit-identical results for any chunk count.
//! - A centered mode subtracts the time means of both sides before the
//!   product.
//!
//! Invariants & assumptions
//! ------------------------
//! - Description rows and computed values agree position by position.
//! - `real = (scl == scr) || low` holds for every row.
use ndarray::{Array1, Array3, Array4, ArrayView1, s};
use num_complex::Complex64;

use crate::{
    describe::{CType, CoeffRow, Description},
    moments::Estimator,
    scattering::{ScaleIndexer, ScatResult, ScatteringTape},
};

/// Channel pairing policy for covariance blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Every ordered channel pair.
    Full,
    /// Same-channel pairs only.
    Diag,
    /// Distinct-channel pairs only.
    OffDiag,
}

impl std::str::FromStr for ChannelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(ChannelMode::Full),
            "diag" => Ok(ChannelMode::Diag),
            "offdiag" => Ok(ChannelMode::OffDiag),
            _ => Err(format!("Unknown channel mode '{s}'")),
        }
    }
}

/// Second-moment form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovMode {
    /// Raw second moment `E{A conj(B)}`.
    Raw,
    /// Centered covariance `E{(A - E A) conj(B - E B)}`.
    Centered,
}

// One admissible scale pair inside a block, with the row labels it carries.
#[derive(Debug, Clone)]
struct ScalePair {
    scl: usize,
    scr: usize,
    jl1: usize,
    jr1: Option<usize>,
    j2: Option<usize>,
    low: bool,
    real: bool,
}

/// Chunked covariance layer over the tape's per-order outputs.
#[derive(Debug, Clone)]
pub struct Cov {
    channel_mode: ChannelMode,
    mode: CovMode,
    estimator: Estimator,
    nchunks: usize,
}

impl Cov {
    pub fn new(channel_mode: ChannelMode, mode: CovMode, estimator: Estimator, nchunks: usize) -> Self {
        Self { channel_mode, mode, estimator, nchunks: nchunks.max(1) }
    }

    pub fn with_nchunks(&self, nchunks: usize) -> Self {
        Self { nchunks: nchunks.max(1), ..self.clone() }
    }

    fn channel_pairs(&self, n: usize) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for nl in 0..n {
            for nr in 0..n {
                let keep = match self.channel_mode {
                    ChannelMode::Full => true,
                    ChannelMode::Diag => nl == nr,
                    ChannelMode::OffDiag => nl != nr,
                };
                if keep {
                    pairs.push((nl, nr));
                }
            }
        }
        pairs
    }

    fn scale_pairs(idx: &ScaleIndexer, rl: usize, rr: usize) -> ScatResult<Vec<ScalePair>> {
        let mut pairs = Vec::new();
        match (rl, rr) {
            (1, 1) => {
                for g in idx.order_range(1) {
                    let j = idx.path(g)?[0];
                    let low = idx.is_low_pass(g)?;
                    pairs.push(ScalePair {
                        scl: g,
                        scr: g,
                        jl1: j,
                        jr1: None,
                        j2: None,
                        low,
                        real: true,
                    });
                }
            }
            (1, 2) => {
                let low1 = idx.low_pass_scale(0);
                let low2 = idx.low_pass_scale(1);
                for gl in idx.order_range(1) {
                    let jl1 = idx.path(gl)?[0];
                    let left_low = jl1 == low1;
                    for gr in idx.order_range(2) {
                        let path = idx.path(gr)?;
                        let (jr1, j2) = (path[0], path[1]);
                        let right_low = j2 == low2;
                        let admissible = if left_low || right_low {
                            left_low && right_low
                        } else {
                            idx.octaves_equal(jl1, 0, j2, 1)
                        };
                        if admissible {
                            pairs.push(ScalePair {
                                scl: gl,
                                scr: gr,
                                jl1,
                                jr1: Some(jr1),
                                j2: Some(j2),
                                low: left_low,
                                real: left_low,
                            });
                        }
                    }
                }
            }
            (2, 2) => {
                let low2 = idx.low_pass_scale(1);
                for gl in idx.order_range(2) {
                    let pl = idx.path(gl)?;
                    let (jl1, j2l) = (pl[0], pl[1]);
                    for gr in idx.order_range(2) {
                        let pr = idx.path(gr)?;
                        let (jr1, j2r) = (pr[0], pr[1]);
                        if j2l != j2r || jl1 < jr1 {
                            continue;
                        }
                        let low = j2l == low2;
                        pairs.push(ScalePair {
                            scl: gl,
                            scr: gr,
                            jl1,
                            jr1: Some(jr1),
                            j2: Some(j2l),
                            low,
                            real: gl == gr || low,
                        });
                    }
                }
            }
            _ => {
                return Err(crate::scattering::ScatteringError::InvalidLayerCount { r: rr });
            }
        }
        Ok(pairs)
    }

    fn c_type(rl: usize, rr: usize) -> CType {
        match (rl, rr) {
            (1, 1) => CType::Ps,
            (1, 2) => CType::PhaseEnv,
            _ => CType::Envelope,
        }
    }

    /// Description of one `(rl, rr)` block for `n` channels.
    pub fn description(
        &self, idx: &ScaleIndexer, n: usize, rl: usize, rr: usize,
    ) -> ScatResult<Description> {
        let scale_pairs = Self::scale_pairs(idx, rl, rr)?;
        let c_type = Self::c_type(rl, rr);
        let mut rows = Vec::with_capacity(self.channel_pairs(n).len() * scale_pairs.len());
        for (nl, nr) in self.channel_pairs(n) {
            for pair in &scale_pairs {
                rows.push(CoeffRow {
                    nl: Some(nl),
                    nr: Some(nr),
                    rl: Some(rl),
                    rr: Some(rr),
                    scl: Some(pair.scl),
                    scr: Some(pair.scr),
                    jl1: Some(pair.jl1),
                    jr1: pair.jr1,
                    j2: pair.j2,
                    real: Some(pair.real),
                    low: Some(pair.low),
                    ..CoeffRow::new(c_type)
                });
            }
        }
        Ok(Description::new(rows))
    }

    /// Covariances of one block, `(B, n_pairs, 1)`.
    pub fn forward(
        &self, idx: &ScaleIndexer, tape: &ScatteringTape, rl: usize, rr: usize,
    ) -> ScatResult<Array3<Complex64>> {
        let scale_pairs = Self::scale_pairs(idx, rl, rr)?;
        let (b, n, _, t) = tape.sx[0].dim();
        let channel_pairs = self.channel_pairs(n);
        let denom = self.estimator.denom(t, true);
        let (left, right) = (&tape.sx[rl - 1], &tape.sx[rr - 1]);
        let (start_l, start_r) = (idx.order_range(rl).start, idx.order_range(rr).start);

        let mut out = Array3::zeros((b, channel_pairs.len() * scale_pairs.len(), 1));
        let chunk_size = scale_pairs.len().div_ceil(self.nchunks);
        for bi in 0..b {
            for (ci, &(nl, nr)) in channel_pairs.iter().enumerate() {
                for (chunk_i, chunk) in scale_pairs.chunks(chunk_size).enumerate() {
                    for (k, pair) in chunk.iter().enumerate() {
                        let row = ci * scale_pairs.len() + chunk_i * chunk_size + k;
                        let a = left.slice(s![bi, nl, pair.scl - start_l, ..]);
                        let b_row = right.slice(s![bi, nr, pair.scr - start_r, ..]);
                        out[[bi, row, 0]] = self.pair_moment(a, b_row, denom);
                    }
                }
            }
        }
        Ok(out)
    }

    fn pair_moment(
        &self, a: ArrayView1<'_, Complex64>, b: ArrayView1<'_, Complex64>, denom: f64,
    ) -> Complex64 {
        match self.mode {
            CovMode::Raw => {
                a.iter().zip(b.iter()).map(|(&av, &bv)| av * bv.conj()).sum::<Complex64>() / denom
            }
            CovMode::Centered => {
                let t = a.len() as f64;
                let am = a.iter().sum::<Complex64>() / t;
                let bm = b.iter().sum::<Complex64>() / t;
                a.iter()
                    .zip(b.iter())
                    .map(|(&av, &bv)| (av - am) * (bv - bm).conj())
                    .sum::<Complex64>()
                    / denom
            }
        }
    }

    /// Scatter a cotangent on one block back onto the tape layers.
    pub fn backward(
        &self, idx: &ScaleIndexer, tape: &ScatteringTape, rl: usize, rr: usize,
        cot: &Array3<Complex64>, g_sx: &mut [Array4<Complex64>],
    ) -> ScatResult<()> {
        let scale_pairs = Self::scale_pairs(idx, rl, rr)?;
        let (b, n, _, t) = tape.sx[0].dim();
        let channel_pairs = self.channel_pairs(n);
        let denom = self.estimator.denom(t, true);
        let (start_l, start_r) = (idx.order_range(rl).start, idx.order_range(rr).start);

        for bi in 0..b {
            for (ci, &(nl, nr)) in channel_pairs.iter().enumerate() {
                for (k, pair) in scale_pairs.iter().enumerate() {
                    let g_c = cot[[bi, ci * scale_pairs.len() + k, 0]];
                    let a = tape.sx[rl - 1].slice(s![bi, nl, pair.scl - start_l, ..]).to_owned();
                    let b_row = tape.sx[rr - 1].slice(s![bi, nr, pair.scr - start_r, ..]).to_owned();
                    let (g_a, g_b) = self.pair_adjoint(&a, &b_row, g_c, denom, t);
                    let mut dst = g_sx[rl - 1].slice_mut(s![bi, nl, pair.scl - start_l, ..]);
                    dst.zip_mut_with(&g_a, |d, &g| *d += g);
                    let mut dst = g_sx[rr - 1].slice_mut(s![bi, nr, pair.scr - start_r, ..]);
                    dst.zip_mut_with(&g_b, |d, &g| *d += g);
                }
            }
        }
        Ok(())
    }

    // Adjoint of pair_moment for a single pair; returns fresh arrays so the
    // diagonal case can accumulate both sides onto one row safely.
    fn pair_adjoint(
        &self, a: &Array1<Complex64>, b: &Array1<Complex64>, g_c: Complex64, denom: f64, t: usize,
    ) -> (Array1<Complex64>, Array1<Complex64>) {
        match self.mode {
            CovMode::Raw => {
                let g_a = b.mapv(|bv| g_c * bv / denom);
                let g_b = a.mapv(|av| g_c.conj() * av / denom);
                (g_a, g_b)
            }
            CovMode::Centered => {
                let tf = t as f64;
                let am = a.iter().sum::<Complex64>() / tf;
                let bm = b.iter().sum::<Complex64>() / tf;
                let mut g_a = b.mapv(|bv| g_c * (bv - bm) / denom);
                let mut g_b = a.mapv(|av| g_c.conj() * (av - am) / denom);
                let ga_mean = g_a.iter().sum::<Complex64>() / tf;
                let gb_mean = g_b.iter().sum::<Complex64>() / tf;
                g_a.mapv_inplace(|g| g - ga_mean);
                g_b.mapv_inplace(|g| g - gb_mean);
                (g_a, g_b)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Admissibility of every enumerated scale pair per block.
    // - Realness of diagonal and low rows in the computed tensor.
    // - Chunk-count invariance (bit identity).
    // - Adjoint exactness for raw and centered modes, including the
    //   diagonal case where both sides share one row.
    // - Channel pairing modes.
    // -------------------------------------------------------------------------

    fn indexer() -> ScaleIndexer {
        ScaleIndexer::new(2, vec![3, 3], vec![1, 1]).expect("valid")
    }

    fn tape(idx: &ScaleIndexer, n: usize, t: usize) -> ScatteringTape {
        let sx: Vec<Array4<Complex64>> = (1..=2)
            .map(|o| {
                Array4::from_shape_fn((1, n, idx.order_len(o), t), |(_, ni, p, ti)| {
                    Complex64::new(
                        (ni as f64 + p as f64 * 0.9 + ti as f64 * 0.51).sin(),
                        (p as f64 * 1.7 - ti as f64 * 0.23).cos(),
                    )
                })
            })
            .collect();
        ScatteringTape { sx, sigma: None }
    }

    #[test]
    fn scale_pairs_respect_octave_and_low_pass_rules() {
        let idx = indexer();
        let wmw = Cov::scale_pairs(&idx, 1, 2).expect("valid block");
        for pair in &wmw {
            let j2 = pair.j2.expect("order-2 right side");
            if pair.low {
                assert_eq!(pair.jl1, idx.low_pass_scale(0));
                assert_eq!(j2, idx.low_pass_scale(1));
            } else {
                assert!(idx.octaves_equal(pair.jl1, 0, j2, 1));
            }
        }
        let mw = Cov::scale_pairs(&idx, 2, 2).expect("valid block");
        for pair in &mw {
            assert!(pair.jl1 >= pair.jr1.expect("order-2 left side"));
            assert_eq!(pair.real, pair.scl == pair.scr || pair.low);
        }
    }

    #[test]
    fn diagonal_and_low_rows_are_real() {
        let idx = indexer();
        let cov = Cov::new(ChannelMode::Diag, CovMode::Raw, Estimator::Mean, 1);
        let tape = tape(&idx, 1, 16);
        for (rl, rr) in [(1, 1), (2, 2)] {
            let descri = cov.description(&idx, 1, rl, rr).expect("valid block");
            let out = cov.forward(&idx, &tape, rl, rr).expect("valid block");
            for (i, row) in descri.iter().enumerate() {
                if row.scl == row.scr {
                    assert!(
                        out[[0, i, 0]].im.abs() < 1e-12,
                        "diagonal row {i} has imaginary part {}",
                        out[[0, i, 0]].im
                    );
                }
            }
        }
    }

    #[test]
    fn chunk_count_never_changes_values() {
        let idx = indexer();
        let tape = tape(&idx, 2, 16);
        let base = Cov::new(ChannelMode::Full, CovMode::Raw, Estimator::Mean, 1);
        let reference = base.forward(&idx, &tape, 2, 2).expect("valid block");
        for nchunks in [2, 3, 4, 100] {
            let chunked = base.with_nchunks(nchunks).forward(&idx, &tape, 2, 2).expect("valid");
            assert_eq!(reference, chunked);
        }
    }

    #[test]
    fn channel_modes_partition_the_full_pairing() {
        let idx = indexer();
        let n = 3;
        let full = Cov::new(ChannelMode::Full, CovMode::Raw, Estimator::Mean, 1);
        let diag = Cov::new(ChannelMode::Diag, CovMode::Raw, Estimator::Mean, 1);
        let off = Cov::new(ChannelMode::OffDiag, CovMode::Raw, Estimator::Mean, 1);
        let total = full.description(&idx, n, 1, 1).expect("valid").len();
        let d = diag.description(&idx, n, 1, 1).expect("valid").len();
        let o = off.description(&idx, n, 1, 1).expect("valid").len();
        assert_eq!(total, d + o);
        assert_eq!(d, idx.order_len(1) * n);
    }

    #[test]
    fn backward_matches_finite_difference_in_both_modes() {
        let idx = indexer();
        let tape0 = tape(&idx, 1, 8);
        for mode in [CovMode::Raw, CovMode::Centered] {
            for (rl, rr) in [(1, 1), (1, 2), (2, 2)] {
                let cov = Cov::new(ChannelMode::Full, mode, Estimator::Mean, 1);
                let m = cov.description(&idx, 1, rl, rr).expect("valid").len();
                let cot = Array3::from_shape_fn((1, m, 1), |(_, i, _)| {
                    Complex64::new(0.4 - i as f64 * 0.07, 0.1 + i as f64 * 0.05)
                });
                let mut g_sx: Vec<Array4<Complex64>> =
                    tape0.sx.iter().map(|s| Array4::zeros(s.dim())).collect();
                cov.backward(&idx, &tape0, rl, rr, &cot, &mut g_sx).expect("valid");

                let dirs: Vec<Array4<Complex64>> = tape0
                    .sx
                    .iter()
                    .map(|s| {
                        Array4::from_shape_fn(s.dim(), |(_, _, p, ti)| {
                            Complex64::new(
                                (p as f64 * 0.8 + ti as f64).sin(),
                                (p as f64 - ti as f64 * 0.6).cos(),
                            )
                        })
                    })
                    .collect();
                let loss = |sx: &[Array4<Complex64>]| -> f64 {
                    let t = ScatteringTape { sx: sx.to_vec(), sigma: None };
                    let out = cov.forward(&idx, &t, rl, rr).expect("valid");
                    out.iter().zip(cot.iter()).map(|(z, c)| (c.conj() * z).re).sum()
                };
                let eps = 1e-6;
                let shift = |sign: f64| -> Vec<Array4<Complex64>> {
                    tape0
                        .sx
                        .iter()
                        .zip(dirs.iter())
                        .map(|(s, d)| {
                            let mut s = s.clone();
                            s.zip_mut_with(d, |z, dv| *z += dv * (sign * eps));
                            s
                        })
                        .collect()
                };
                let fd = (loss(&shift(1.0)) - loss(&shift(-1.0))) / (2.0 * eps);
                let analytic: f64 = g_sx
                    .iter()
                    .zip(dirs.iter())
                    .map(|(g, d)| {
                        g.iter().zip(d.iter()).map(|(gv, dv)| (gv.conj() * dv).re).sum::<f64>()
                    })
                    .sum();
                assert!(
                    (fd - analytic).abs() < 1e-5 * analytic.abs().max(1.0),
                    "block ({rl},{rr}) mode {mode:?}: fd = {fd}, analytic = {analytic}"
                );
            }
        }
    }
}
