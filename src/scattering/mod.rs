//! scattering — wavelet filter banks and the scattering cascade.
//!
//! Purpose
//! -------
//! Provide the multiscale machinery below the moment layers: admissible
//! scale-path enumeration ([`ScaleIndexer`]), Fourier-domain filter banks
//! ([`FilterBank`]), and the cascaded convolution/modulus recursion with its
//! exact adjoint ([`ScatteringCascade`]).
//!
//! Conventions
//! -----------
//! - Layers are 0-based internally; path *orders* are 1-based.
//! - Scale index `J * Q` of a layer is the reserved low-pass channel.
//! - Coefficient tensors are `(B, N, P, T)` complex, path positions ordered
//!   by the indexer's enumeration.
pub mod cascade;
pub mod errors;
pub mod fft;
pub mod scale_indexer;
pub mod wavelet;

pub use cascade::{ScatteringCascade, ScatteringTape, SpectrumNorm};
pub use errors::{ScatResult, ScatteringError};
pub use fft::FourierPlan;
pub use scale_indexer::ScaleIndexer;
pub use wavelet::{FilterBank, WaveletFamily, WaveletNorm};
