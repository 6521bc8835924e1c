//! model — configurable scattering covariance representations.
//!
//! Purpose
//! -------
//! Bind the cascade and the moment layers into the closed model variants,
//! with fail-fast configuration validation, a description built once at
//! construction, and exact adjoints for gradient-based synthesis. A chunked
//! wrapper splits large batches and a companion model supports transient
//! separation.
pub mod chunked;
pub mod config;
pub mod deglitch;
pub mod errors;
pub mod scat_model;
pub mod variant;

pub use chunked::ChunkedModel;
pub use config::{Layered, ScatCovConfig};
pub use deglitch::{DeglitchModel, DeglitchTape};
pub use errors::{ModelError, ModelResult};
pub use scat_model::Model;
pub use variant::{ModelType, Normalize, Precision};
