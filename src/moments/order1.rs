//! Order-1 marginal moments: `E{Wx}` on the low-pass, `E{|Wx|}` on bands.
use ndarray::{Array3, Array4, s};
use num_complex::Complex64;

use crate::{
    describe::{CType, CoeffRow, Description},
    scattering::{ScaleIndexer, ScatResult, ScatteringTape},
};

/// Per-channel first-order marginals of the first layer.
///
/// Rows are channel-major: one `Mean` row (low-pass average) followed by one
/// `Spars` row per band-pass scale, fine to coarse. All rows are real.
#[derive(Debug, Clone, Copy)]
pub struct Order1Moments;

impl Order1Moments {
    /// Description of the `(B, N * P1, 1)` output.
    pub fn description(idx: &ScaleIndexer, n: usize) -> ScatResult<Description> {
        let mut rows = Vec::new();
        for ni in 0..n {
            for g in idx.order_range(1) {
                let j = idx.path(g)?[0];
                let low = idx.is_low_pass(g)?;
                let c_type = if low { CType::Mean } else { CType::Spars };
                rows.push(CoeffRow {
                    nl: Some(ni),
                    rl: Some(1),
                    scl: Some(g),
                    jl1: Some(j),
                    q: (!low).then_some(1.0),
                    real: Some(true),
                    low: Some(low),
                    ..CoeffRow::new(c_type)
                });
            }
        }
        Ok(Description::new(rows))
    }

    /// Averaged marginals, `(B, N * P1, 1)`.
    pub fn forward(idx: &ScaleIndexer, tape: &ScatteringTape) -> ScatResult<Array3<Complex64>> {
        let sx1 = &tape.sx[0];
        let (b, n, p1, t) = sx1.dim();
        let mut out = Array3::zeros((b, n * p1, 1));
        for bi in 0..b {
            for ni in 0..n {
                for (pos, g) in idx.order_range(1).enumerate() {
                    let row = sx1.slice(s![bi, ni, pos, ..]);
                    let value = if idx.is_low_pass(g)? {
                        row.iter().sum::<Complex64>() / t as f64
                    } else {
                        Complex64::new(row.iter().map(|z| z.norm()).sum::<f64>() / t as f64, 0.0)
                    };
                    out[[bi, ni * p1 + pos, 0]] = value;
                }
            }
        }
        Ok(out)
    }

    /// Scatter a cotangent on the marginals back onto the first layer.
    pub fn backward(
        idx: &ScaleIndexer, tape: &ScatteringTape, cot: &Array3<Complex64>,
        g_sx1: &mut Array4<Complex64>,
    ) -> ScatResult<()> {
        let sx1 = &tape.sx[0];
        let (b, n, p1, t) = sx1.dim();
        for bi in 0..b {
            for ni in 0..n {
                for (pos, g) in idx.order_range(1).enumerate() {
                    let g_c = cot[[bi, ni * p1 + pos, 0]];
                    let mut dst = g_sx1.slice_mut(s![bi, ni, pos, ..]);
                    if idx.is_low_pass(g)? {
                        let spread = g_c / t as f64;
                        dst.mapv_inplace(|v| v + spread);
                    } else {
                        // Modulus adjoint folded in: real cotangent spread
                        // along the unit phase, zero at zero.
                        let scale = g_c.re / t as f64;
                        let src = sx1.slice(s![bi, ni, pos, ..]);
                        for (d, &z) in dst.iter_mut().zip(src.iter()) {
                            let norm = z.norm();
                            if norm > 0.0 {
                                *d += z * (scale / norm);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Row layout against the path enumeration (mean on low-pass, spars on
    //   bands, channel-major).
    // - Forward values on a hand-built tape.
    // - Adjoint exactness via the inner-product identity.
    //
    // They intentionally DO NOT cover:
    // - The cascade producing the tape (scattering tests).
    // -------------------------------------------------------------------------

    fn tape(b: usize, n: usize, p1: usize, t: usize) -> ScatteringTape {
        let sx1 = Array4::from_shape_fn((b, n, p1, t), |(bi, ni, p, ti)| {
            Complex64::new((bi + ni + p + ti) as f64 * 0.1 - 0.3, (p + ti) as f64 * 0.05)
        });
        ScatteringTape { sx: vec![sx1], sigma: None }
    }

    #[test]
    fn description_is_channel_major_with_mean_on_low_pass() {
        let idx = ScaleIndexer::new(1, vec![3], vec![1]).expect("valid");
        let descri = Order1Moments::description(&idx, 2).expect("in range");
        assert_eq!(descri.len(), 2 * 4);
        let rows = descri.rows();
        for ni in 0..2 {
            for p in 0..4 {
                let row = &rows[ni * 4 + p];
                assert_eq!(row.nl, Some(ni));
                assert_eq!(row.jl1, Some(p));
                let expect_low = p == 3;
                assert_eq!(row.low, Some(expect_low));
                assert_eq!(row.c_type, if expect_low { CType::Mean } else { CType::Spars });
            }
        }
    }

    #[test]
    fn forward_averages_modulus_on_bands_and_value_on_low_pass() {
        let idx = ScaleIndexer::new(1, vec![2], vec![1]).expect("valid");
        let tape = tape(1, 1, 3, 4);
        let out = Order1Moments::forward(&idx, &tape).expect("in range");
        let band0: f64 =
            tape.sx[0].slice(s![0, 0, 0, ..]).iter().map(|z| z.norm()).sum::<f64>() / 4.0;
        assert!((out[[0, 0, 0]].re - band0).abs() < 1e-12);
        assert_eq!(out[[0, 0, 0]].im, 0.0);
        let low: Complex64 = tape.sx[0].slice(s![0, 0, 2, ..]).iter().sum::<Complex64>() / 4.0;
        assert!((out[[0, 2, 0]] - low).norm() < 1e-12);
    }

    #[test]
    // Re <g_c, forward(z + eps d)> linearizes to Re <backward(g_c), d>.
    fn backward_satisfies_inner_product_identity() {
        let idx = ScaleIndexer::new(1, vec![2], vec![1]).expect("valid");
        let tape0 = tape(1, 1, 3, 8);
        let cot = Array3::from_shape_fn((1, 3, 1), |(_, m, _)| {
            Complex64::new(0.3 + m as f64, 0.2 - m as f64 * 0.1)
        });
        let mut g = Array4::<Complex64>::zeros(tape0.sx[0].dim());
        Order1Moments::backward(&idx, &tape0, &cot, &mut g).expect("in range");

        let dir = Array4::from_shape_fn(tape0.sx[0].dim(), |(_, _, p, ti)| {
            Complex64::new((p as f64 - ti as f64) * 0.1, (p * ti) as f64 * 0.03)
        });
        let loss = |sx1: &Array4<Complex64>| -> f64 {
            let t = ScatteringTape { sx: vec![sx1.clone()], sigma: None };
            let out = Order1Moments::forward(&idx, &t).expect("in range");
            out.iter().zip(cot.iter()).map(|(z, c)| (c.conj() * z).re).sum()
        };
        let eps = 1e-6;
        let mut zp = tape0.sx[0].clone();
        zp.zip_mut_with(&dir, |z, d| *z += d * eps);
        let mut zm = tape0.sx[0].clone();
        zm.zip_mut_with(&dir, |z, d| *z -= d * eps);
        let fd = (loss(&zp) - loss(&zm)) / (2.0 * eps);
        let analytic: f64 = g.iter().zip(dir.iter()).map(|(gv, dv)| (gv.conj() * dv).re).sum();
        assert!((fd - analytic).abs() < 1e-6 * analytic.abs().max(1.0));
    }
}
