//! describe — labeled statistic tensors.
//!
//! Couples every coefficient axis with a columnar [`Description`] so
//! statistics stay interpretable through selection, sorting and batch
//! aggregation.
pub mod described_tensor;
pub mod description;
pub mod errors;

pub use described_tensor::DescribedTensor;
pub use description::{CType, CoeffRow, Description, RowFilter};
pub use errors::{DescribeError, DescribeResult};
