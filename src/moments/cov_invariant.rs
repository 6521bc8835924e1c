//! Scale-invariant reduction of covariance rows.
//!
//! Band-pass `PhaseEnv` and `Envelope` rows are grouped into classes of
//! constant scale offset and averaged, turning per-scale covariances into a
//! representation that no longer depends on the absolute scale:
//!
//! - `PhaseEnv`: one class per (channel pair, `a = jl1 - jr1`).
//! - `Envelope`: one class per (channel pair, `a = jl1 - jr1 >= 0`,
//!   `b = jl1 - j2 < 0`).
//!
//! `Ps` rows and low-pass rows are excluded and stay non-invariant. The
//! projection is linear (each class row is the arithmetic mean of its
//! members), so its adjoint is the transpose scatter.
use std::collections::BTreeMap;

use ndarray::Array3;
use num_complex::Complex64;

use crate::{
    describe::{CType, CoeffRow, Description},
    scattering::{ScaleIndexer, ScatResult, ScatteringError},
};

// Class key; the c_type rank keeps phaseenv classes ahead of envelope ones.
type ClassKey = (u8, usize, usize, i64, i64);

/// Sparse averaging projection from covariance rows to invariant classes.
///
/// Built once from the covariance block description; positions refer to rows
/// of that description.
#[derive(Debug, Clone)]
pub struct CovScaleInvariant {
    n_input_rows: usize,
    classes: Vec<(CoeffRow, Vec<usize>)>,
}

impl CovScaleInvariant {
    /// Group the band-pass covariance rows of `cov_descri` into invariant
    /// classes.
    ///
    /// Averaging across scales is only meaningful when both layers share the
    /// voice count; construction fails otherwise.
    pub fn new(idx: &ScaleIndexer, cov_descri: &Description) -> ScatResult<Self> {
        if idx.r() >= 2 && idx.voice_count(0) != idx.voice_count(1) {
            return Err(ScatteringError::VoiceMismatch {
                q1: idx.voice_count(0),
                q2: idx.voice_count(1),
            });
        }
        let mut grouped: BTreeMap<ClassKey, (CoeffRow, Vec<usize>)> = BTreeMap::new();
        for (i, row) in cov_descri.iter().enumerate() {
            if row.low == Some(true) {
                continue;
            }
            let (rank, a, b) = match row.c_type {
                CType::PhaseEnv => {
                    let (jl1, jr1) = match (row.jl1, row.jr1) {
                        (Some(l), Some(r)) => (l as i64, r as i64),
                        _ => continue,
                    };
                    (0u8, jl1 - jr1, 0i64)
                }
                CType::Envelope => {
                    let (jl1, jr1, j2) = match (row.jl1, row.jr1, row.j2) {
                        (Some(l), Some(r), Some(j)) => (l as i64, r as i64, j as i64),
                        _ => continue,
                    };
                    (1u8, jl1 - jr1, jl1 - j2)
                }
                _ => continue,
            };
            let (nl, nr) = match (row.nl, row.nr) {
                (Some(nl), Some(nr)) => (nl, nr),
                _ => continue,
            };
            let entry = grouped.entry((rank, nl, nr, a, b)).or_insert_with(|| {
                let class_row = CoeffRow {
                    nl: Some(nl),
                    nr: Some(nr),
                    rl: row.rl,
                    rr: row.rr,
                    a: Some(a),
                    b: (row.c_type == CType::Envelope).then_some(b),
                    real: Some(true),
                    low: Some(false),
                    ..CoeffRow::new(row.c_type)
                };
                (class_row, Vec::new())
            });
            // a class is real only when every member is
            if row.real != Some(true) {
                entry.0.real = Some(false);
            }
            entry.1.push(i);
        }
        Ok(Self {
            n_input_rows: cov_descri.len(),
            classes: grouped.into_values().collect(),
        })
    }

    /// Description of the projected rows, one per class.
    pub fn description(&self) -> Description {
        Description::new(self.classes.iter().map(|(row, _)| row.clone()).collect())
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Average covariance rows into their classes, `(B, n_classes, 1)`.
    pub fn forward(&self, y: &Array3<Complex64>) -> Array3<Complex64> {
        let b = y.dim().0;
        let mut out = Array3::zeros((b, self.classes.len(), 1));
        for (k, (_, members)) in self.classes.iter().enumerate() {
            let weight = 1.0 / members.len() as f64;
            for bi in 0..b {
                let sum: Complex64 = members.iter().map(|&i| y[[bi, i, 0]]).sum();
                out[[bi, k, 0]] = sum * weight;
            }
        }
        out
    }

    /// Transpose scatter of a cotangent on the classes back to covariance
    /// rows.
    pub fn backward(&self, cot: &Array3<Complex64>) -> Array3<Complex64> {
        let b = cot.dim().0;
        let mut out = Array3::zeros((b, self.n_input_rows, 1));
        for (k, (_, members)) in self.classes.iter().enumerate() {
            let weight = 1.0 / members.len() as f64;
            for bi in 0..b {
                let spread = cot[[bi, k, 0]] * weight;
                for &i in members {
                    out[[bi, i, 0]] += spread;
                }
            }
        }
        out
    }
}
