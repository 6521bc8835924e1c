/// Result alias for description/tensor bookkeeping operations.
pub type DescribeResult<T> = Result<T, DescribeError>;

/// Errors raised by the labeled-tensor layer.
///
/// Every operation that pairs a description with a tensor checks that the
/// row count matches the coefficient axis; a violation here means statistics
/// would be silently mislabeled downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum DescribeError {
    /// Description rows and tensor coefficient axis disagree.
    RowCountMismatch {
        rows: usize,
        coefficients: usize,
    },
    /// Concatenated parts must share the non-coefficient tensor axes.
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
    /// Batch concatenation requires identical descriptions.
    DescriptionMismatch,
    /// Nothing to concatenate.
    EmptyConcat,
    /// `format_to_real` requires the `real` flag on every row.
    MissingRealFlag {
        row: usize,
    },
}

impl std::error::Error for DescribeError {}

impl std::fmt::Display for DescribeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DescribeError::RowCountMismatch { rows, coefficients } => {
                write!(
                    f,
                    "Description has {rows} rows but the tensor carries {coefficients} coefficients"
                )
            }
            DescribeError::ShapeMismatch { expected, found } => {
                write!(
                    f,
                    "Tensor axes mismatch: expected (batch, time) = {expected:?}, found {found:?}"
                )
            }
            DescribeError::DescriptionMismatch => {
                write!(f, "Batch concatenation requires identical descriptions")
            }
            DescribeError::EmptyConcat => {
                write!(f, "Cannot concatenate an empty list of described tensors")
            }
            DescribeError::MissingRealFlag { row } => {
                write!(f, "Row {row} carries no 'real' flag; cannot format to real components")
            }
        }
    }
}
