//! A statistic tensor paired with its row-for-row description.
//!
//! Purpose
//! -------
//! Keep the `(B, M, T)` complex statistic tensor and the [`Description`] of
//! its coefficient axis in lock-step, so selection, reduction, sorting and
//! batch aggregation can never desynchronize labels from values.
//!
//! Key behaviors
//! -------------
//! - `select` returns raw values for matching rows; `reduce` returns a new
//!   [`DescribedTensor`] restricted to them.
//! - `cat_batch` / `mean_batch` aggregate along the batch axis and require
//!   identical descriptions.
//! - `sort` reorders values and rows together under the canonical row order.
//! - `format_to_real` splits complex rows into real/imaginary components for
//!   consumers that need a flat real vector.
//!
//! Invariants & assumptions
//! ------------------------
//! - `descri.len() == y.dim().1` at all times (checked at construction).
//! - Time-invariant statistics carry `T == 1`; time-resolved ones carry the
//!   full time axis.
use ndarray::{Array3, Axis, concatenate, s};
use num_complex::Complex64;

use crate::describe::{
    description::{Description, RowFilter},
    errors::{DescribeError, DescribeResult},
};

/// `(B, M, T)` complex statistics plus one description row per coefficient.
#[derive(Debug, Clone)]
pub struct DescribedTensor {
    /// The analyzed input, when the producer chose to keep it around.
    pub x: Option<Array3<f64>>,
    descri: Description,
    y: Array3<Complex64>,
}

impl DescribedTensor {
    /// Pair a tensor with its description; fails if the row count and the
    /// coefficient axis disagree.
    pub fn new(
        x: Option<Array3<f64>>, descri: Description, y: Array3<Complex64>,
    ) -> DescribeResult<Self> {
        if descri.len() != y.dim().1 {
            return Err(DescribeError::RowCountMismatch {
                rows: descri.len(),
                coefficients: y.dim().1,
            });
        }
        Ok(Self { x, descri, y })
    }

    pub fn descri(&self) -> &Description {
        &self.descri
    }

    pub fn y(&self) -> &Array3<Complex64> {
        &self.y
    }

    /// Number of coefficients along the description axis.
    pub fn n_coeffs(&self) -> usize {
        self.y.dim().1
    }

    pub fn batch_len(&self) -> usize {
        self.y.dim().0
    }

    /// Values of the rows matching the filter, `(B, M', T)`.
    pub fn select(&self, filter: &RowFilter) -> Array3<Complex64> {
        let idx = self.descri.index_where(filter);
        let mut out = Array3::zeros((self.y.dim().0, idx.len(), self.y.dim().2));
        for (k, &i) in idx.iter().enumerate() {
            out.slice_mut(s![.., k, ..]).assign(&self.y.slice(s![.., i, ..]));
        }
        out
    }

    /// A new described tensor restricted to the rows matching the filter.
    pub fn reduce(&self, filter: &RowFilter) -> DescribeResult<DescribedTensor> {
        let idx = self.descri.index_where(filter);
        DescribedTensor::new(self.x.clone(), self.descri.take(&idx), self.select(filter))
    }

    /// Number of rows matching the filter.
    pub fn count(&self, filter: &RowFilter) -> usize {
        self.descri.count(filter)
    }

    /// Reorder coefficients and rows together under the canonical row order.
    pub fn sort(&self) -> DescribeResult<DescribedTensor> {
        let (sorted, perm) = self.descri.sorted();
        let mut y = Array3::zeros(self.y.dim());
        for (k, &src) in perm.iter().enumerate() {
            y.slice_mut(s![.., k, ..]).assign(&self.y.slice(s![.., src, ..]));
        }
        DescribedTensor::new(self.x.clone(), sorted, y)
    }

    /// Stack several described tensors along the batch axis.
    ///
    /// All parts must share the description and the non-batch axes; the `x`
    /// inputs are dropped (an aggregate has no single input).
    pub fn cat_batch(parts: &[DescribedTensor]) -> DescribeResult<DescribedTensor> {
        let first = parts.first().ok_or(DescribeError::EmptyConcat)?;
        let (_, m, t) = first.y.dim();
        for part in &parts[1..] {
            if part.descri != first.descri {
                return Err(DescribeError::DescriptionMismatch);
            }
            let (_, pm, pt) = part.y.dim();
            if (pm, pt) != (m, t) {
                return Err(DescribeError::ShapeMismatch { expected: (m, t), found: (pm, pt) });
            }
        }
        let views: Vec<_> = parts.iter().map(|p| p.y.view()).collect();
        let y = concatenate(Axis(0), &views)
            .map_err(|_| DescribeError::ShapeMismatch { expected: (m, t), found: (m, t) })?;
        DescribedTensor::new(None, first.descri.clone(), y)
    }

    /// Average over the batch axis, keeping a singleton batch.
    pub fn mean_batch(&self) -> DescribeResult<DescribedTensor> {
        let mean = self.y.mean_axis(Axis(0)).ok_or(DescribeError::EmptyConcat)?;
        let y = mean.insert_axis(Axis(0));
        DescribedTensor::new(None, self.descri.clone(), y)
    }

    /// Flatten to real components, per batch element.
    ///
    /// Layout per batch: all real-flagged rows (real part only), then the
    /// real parts of complex rows, then their imaginary parts. Every row must
    /// carry a `real` flag.
    pub fn format_to_real(&self) -> DescribeResult<Vec<Vec<f64>>> {
        let (b, _, t) = self.y.dim();
        let mut real_rows = Vec::new();
        let mut complex_rows = Vec::new();
        for (i, row) in self.descri.iter().enumerate() {
            match row.real {
                Some(true) => real_rows.push(i),
                Some(false) => complex_rows.push(i),
                None => return Err(DescribeError::MissingRealFlag { row: i }),
            }
        }
        let mut out = Vec::with_capacity(b);
        for bi in 0..b {
            let mut flat = Vec::with_capacity((real_rows.len() + 2 * complex_rows.len()) * t);
            for &i in &real_rows {
                flat.extend(self.y.slice(s![bi, i, ..]).iter().map(|z| z.re));
            }
            for &i in &complex_rows {
                flat.extend(self.y.slice(s![bi, i, ..]).iter().map(|z| z.re));
            }
            for &i in &complex_rows {
                flat.extend(self.y.slice(s![bi, i, ..]).iter().map(|z| z.im));
            }
            out.push(flat);
        }
        Ok(out)
    }
}
