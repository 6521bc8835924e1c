//! Marginal scattering moments `E{|Sx(p)|^q}`.
use ndarray::{Array3, Array4, s};
use num_complex::Complex64;

use crate::{
    describe::{CType, CoeffRow, Description},
    moments::Estimator,
    scattering::{ScaleIndexer, ScatResult, ScatteringTape},
};

/// `q`-th moment marginals over every enumerated path of every order.
///
/// Rows are channel-major, then path-major, then one row per exponent in
/// `qs`. All rows are real.
#[derive(Debug, Clone)]
pub struct ScatCoefficients {
    qs: Vec<f64>,
    estimator: Estimator,
}

impl ScatCoefficients {
    pub fn new(qs: Vec<f64>, estimator: Estimator) -> Self {
        Self { qs, estimator }
    }

    pub fn qs(&self) -> &[f64] {
        &self.qs
    }

    /// Description of the `(B, N * K * nq, 1)` output, `K` the total path
    /// count.
    pub fn description(&self, idx: &ScaleIndexer, n: usize) -> ScatResult<Description> {
        let mut rows = Vec::new();
        for ni in 0..n {
            for g in 0..idx.n_paths() {
                let scales = idx.scales(g)?;
                let low = idx.is_low_pass(g)?;
                let order = idx.order(g)?;
                for &q in &self.qs {
                    rows.push(CoeffRow {
                        nl: Some(ni),
                        rl: Some(order),
                        scl: Some(g),
                        jl1: scales[0],
                        j2: scales.get(1).copied().flatten(),
                        q: Some(q),
                        real: Some(true),
                        low: Some(low),
                        ..CoeffRow::new(CType::Scat)
                    });
                }
            }
        }
        Ok(Description::new(rows))
    }

    /// Averaged `q`-th moments, `(B, N * K * nq, 1)`.
    pub fn forward(&self, idx: &ScaleIndexer, tape: &ScatteringTape) -> ScatResult<Array3<Complex64>> {
        let (b, n, _, t) = tape.sx[0].dim();
        let nq = self.qs.len();
        let k = idx.n_paths();
        let mut out = Array3::zeros((b, n * k * nq, 1));
        for g in 0..k {
            let order = idx.order(g)?;
            let pos = g - idx.order_range(order).start;
            let sx = &tape.sx[order - 1];
            for bi in 0..b {
                for ni in 0..n {
                    let row = sx.slice(s![bi, ni, pos, ..]);
                    for (qi, &q) in self.qs.iter().enumerate() {
                        let denom = self.estimator.denom(t, q == 2.0);
                        let moment: f64 = row.iter().map(|z| z.norm().powf(q)).sum::<f64>() / denom;
                        out[[bi, (ni * k + g) * nq + qi, 0]] = Complex64::new(moment, 0.0);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Scatter a cotangent on the moments back onto every tape layer.
    ///
    /// Uses `d|z|^q = q |z|^(q-2) z`; for `q < 2` the derivative blows up at
    /// zero, so zero coefficients receive no gradient.
    pub fn backward(
        &self, idx: &ScaleIndexer, tape: &ScatteringTape, cot: &Array3<Complex64>,
        g_sx: &mut [Array4<Complex64>],
    ) -> ScatResult<()> {
        let (b, n, _, t) = tape.sx[0].dim();
        let nq = self.qs.len();
        let k = idx.n_paths();
        for g in 0..k {
            let order = idx.order(g)?;
            let pos = g - idx.order_range(order).start;
            let sx = &tape.sx[order - 1];
            for bi in 0..b {
                for ni in 0..n {
                    let src = sx.slice(s![bi, ni, pos, ..]);
                    let mut dst = g_sx[order - 1].slice_mut(s![bi, ni, pos, ..]);
                    for (qi, &q) in self.qs.iter().enumerate() {
                        let denom = self.estimator.denom(t, q == 2.0);
                        let scale = cot[[bi, (ni * k + g) * nq + qi, 0]].re * q / denom;
                        for (d, &z) in dst.iter_mut().zip(src.iter()) {
                            let norm = z.norm();
                            if norm > 0.0 {
                                *d += z * (scale * norm.powf(q - 2.0));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
