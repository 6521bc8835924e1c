//! Losses between candidate and target statistic vectors.
//!
//! Both losses work on the real-component layout: real-flagged rows
//! contribute their real part once, complex rows contribute both parts
//! (equivalently, their squared modulus). Each returns the loss together
//! with the cotangent on the complex coefficient vector, so the model's
//! backward pass can consume it directly.
use ndarray::{Array1, Array3};
use num_complex::Complex64;

use crate::{
    describe::{DescribeError, Description},
    synthesis::errors::{SynthResult, SynthesisError},
};

/// Mean squared coefficient difference, averaged over batch and
/// coefficients.
#[derive(Debug, Clone)]
pub struct MseLossScat {
    real_rows: Vec<bool>,
}

impl MseLossScat {
    /// Read the per-row realness off the model description.
    pub fn new(descri: &Description) -> SynthResult<Self> {
        let mut real_rows = Vec::with_capacity(descri.len());
        for (i, row) in descri.iter().enumerate() {
            match row.real {
                Some(flag) => real_rows.push(flag),
                None => return Err(DescribeError::MissingRealFlag { row: i }.into()),
            }
        }
        Ok(Self { real_rows })
    }

    pub fn n_coeffs(&self) -> usize {
        self.real_rows.len()
    }

    /// Loss and its cotangent on the candidate coefficients.
    ///
    /// The target batch axis is either shared (same `B`) or broadcast from a
    /// single entry.
    pub fn value_and_cotangent(
        &self, candidate: &Array3<Complex64>, target: &Array3<Complex64>,
    ) -> SynthResult<(f64, Array3<Complex64>)> {
        let (b, m, tdim) = candidate.dim();
        if target.dim().1 != m || tdim != 1 {
            return Err(SynthesisError::TargetLengthMismatch {
                expected: m,
                found: target.dim().1,
            });
        }
        let tb = target.dim().0;
        let scale = 1.0 / (b * m) as f64;
        let mut loss = 0.0;
        let mut cot = Array3::zeros((b, m, 1));
        for bi in 0..b {
            let tbi = if tb == 1 { 0 } else { bi };
            for k in 0..m {
                let diff = candidate[[bi, k, 0]] - target[[tbi, k, 0]];
                if self.real_rows[k] {
                    loss += diff.re * diff.re * scale;
                    cot[[bi, k, 0]] = Complex64::new(2.0 * scale * diff.re, 0.0);
                } else {
                    loss += diff.norm_sqr() * scale;
                    cot[[bi, k, 0]] = diff * (2.0 * scale);
                }
            }
        }
        Ok((loss, cot))
    }
}

/// Weighted squared-difference loss over the three deglitching blocks.
///
/// Every coefficient is scaled by its inverse template standard deviation;
/// each block additionally carries a global weight (recording fit versus
/// independence pressure).
#[derive(Debug, Clone)]
pub struct DeglitchingLoss {
    real_rows: Vec<bool>,
    tags: Vec<u8>,
    weights: Array1<f64>,
    block_weights: [f64; 3],
}

impl DeglitchingLoss {
    pub fn new(
        descri: &Description, weights: Array1<f64>, block_weights: [f64; 3],
    ) -> SynthResult<Self> {
        let mut real_rows = Vec::with_capacity(descri.len());
        let mut tags = Vec::with_capacity(descri.len());
        for (i, row) in descri.iter().enumerate() {
            match row.real {
                Some(flag) => real_rows.push(flag),
                None => return Err(DescribeError::MissingRealFlag { row: i }.into()),
            }
            tags.push(row.loss_tag.unwrap_or(0));
        }
        Ok(Self { real_rows, tags, weights, block_weights })
    }

    /// Loss and its cotangent on the candidate coefficients, batch 1.
    pub fn value_and_cotangent(
        &self, candidate: &Array3<Complex64>, target: &Array3<Complex64>,
    ) -> SynthResult<(f64, Array3<Complex64>)> {
        let m = candidate.dim().1;
        if target.dim().1 != m {
            return Err(SynthesisError::TargetLengthMismatch {
                expected: m,
                found: target.dim().1,
            });
        }
        let scale = 1.0 / m as f64;
        let mut loss = 0.0;
        let mut cot = Array3::zeros((1, m, 1));
        for k in 0..m {
            let w = self.weights[k] * self.weights[k] * self.block_weights[self.tags[k] as usize];
            let diff = candidate[[0, k, 0]] - target[[0, k, 0]];
            if self.real_rows[k] {
                loss += w * diff.re * diff.re * scale;
                cot[[0, k, 0]] = Complex64::new(2.0 * scale * w * diff.re, 0.0);
            } else {
                loss += w * diff.norm_sqr() * scale;
                cot[[0, k, 0]] = diff * (2.0 * scale * w);
            }
        }
        Ok((loss, cot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::{CType, CoeffRow};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Zero loss at the target and strict positivity elsewhere.
    // - Cotangent exactness against finite differences over real and
    //   imaginary perturbations.
    // - Target batch broadcasting.
    // -------------------------------------------------------------------------

    fn descri(real_flags: &[bool]) -> Description {
        Description::new(
            real_flags
                .iter()
                .map(|&r| CoeffRow { real: Some(r), ..CoeffRow::new(CType::Ps) })
                .collect(),
        )
    }

    #[test]
    fn loss_vanishes_exactly_at_the_target() {
        let loss = MseLossScat::new(&descri(&[true, false, false])).expect("flags present");
        let target = Array3::from_shape_fn((1, 3, 1), |(_, k, _)| {
            Complex64::new(k as f64, 0.5 - k as f64)
        });
        let (value, cot) = loss.value_and_cotangent(&target, &target).expect("aligned");
        assert_eq!(value, 0.0);
        assert!(cot.iter().all(|c| c.norm() == 0.0));

        let mut off = target.clone();
        off[[0, 1, 0]] += Complex64::new(0.1, 0.0);
        let (value, _) = loss.value_and_cotangent(&off, &target).expect("aligned");
        assert!(value > 0.0);
    }

    #[test]
    // Real rows must ignore imaginary perturbations entirely.
    fn real_rows_ignore_imaginary_parts() {
        let loss = MseLossScat::new(&descri(&[true])).expect("flags present");
        let target = Array3::from_elem((1, 1, 1), Complex64::new(1.0, 0.0));
        let mut candidate = target.clone();
        candidate[[0, 0, 0]] += Complex64::new(0.0, 5.0);
        let (value, _) = loss.value_and_cotangent(&candidate, &target).expect("aligned");
        assert_eq!(value, 0.0);
    }

    #[test]
    fn cotangent_matches_finite_difference() {
        let loss = MseLossScat::new(&descri(&[true, false])).expect("flags present");
        let target = Array3::from_shape_fn((2, 2, 1), |(bi, k, _)| {
            Complex64::new(bi as f64 * 0.3 + k as f64, 0.2)
        });
        let candidate = target.mapv(|z| z + Complex64::new(0.07, -0.04));
        let (_, cot) = loss.value_and_cotangent(&candidate, &target).expect("aligned");

        let eps = 1e-7;
        for bi in 0..2 {
            for k in 0..2 {
                for (re_dir, part) in [(true, cot[[bi, k, 0]].re), (false, cot[[bi, k, 0]].im)] {
                    let delta = if re_dir {
                        Complex64::new(eps, 0.0)
                    } else {
                        Complex64::new(0.0, eps)
                    };
                    let mut p = candidate.clone();
                    p[[bi, k, 0]] += delta;
                    let mut m = candidate.clone();
                    m[[bi, k, 0]] -= delta;
                    let (lp, _) = loss.value_and_cotangent(&p, &target).expect("aligned");
                    let (lm, _) = loss.value_and_cotangent(&m, &target).expect("aligned");
                    let fd = (lp - lm) / (2.0 * eps);
                    assert!((fd - part).abs() < 1e-6, "fd = {fd}, analytic = {part}");
                }
            }
        }
    }

    #[test]
    fn single_target_broadcasts_over_the_batch() {
        let loss = MseLossScat::new(&descri(&[false])).expect("flags present");
        let target = Array3::from_elem((1, 1, 1), Complex64::new(1.0, 1.0));
        let candidate = Array3::from_elem((3, 1, 1), Complex64::new(2.0, 1.0));
        let (value, _) = loss.value_and_cotangent(&candidate, &target).expect("aligned");
        assert!((value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn deglitch_blocks_scale_by_their_weights() {
        let rows = Description::new(vec![
            CoeffRow { real: Some(true), loss_tag: Some(0), ..CoeffRow::new(CType::Ps) },
            CoeffRow { real: Some(true), loss_tag: Some(2), ..CoeffRow::new(CType::Ps) },
        ]);
        let weights = Array1::from(vec![1.0, 2.0]);
        let loss = DeglitchingLoss::new(&rows, weights, [1.0, 1.0, 3.0]).expect("flags present");
        let target = Array3::from_elem((1, 2, 1), Complex64::new(0.0, 0.0));
        let candidate = Array3::from_elem((1, 2, 1), Complex64::new(1.0, 0.0));
        let (value, cot) = loss.value_and_cotangent(&candidate, &target).expect("aligned");
        // (1 * 1 + 4 * 3 * 1) / 2
        assert!((value - 6.5).abs() < 1e-12);
        assert!((cot[[0, 1, 0]].re / cot[[0, 0, 0]].re - 12.0).abs() < 1e-12);
    }
}
