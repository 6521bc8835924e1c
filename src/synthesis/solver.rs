//! The optimizer-side synthesis problem.
//!
//! Purpose
//! -------
//! Bridge the model and loss to the Argmin driver: flattened `B * N * T`
//! parameter vectors come in, loss values and analytic gradients go out.
//! The loss at the initial candidate (`loss0`) is computed once at
//! construction so relative tolerances and progress reports have a
//! reference point.
//!
//! Invariants & assumptions
//! ------------------------
//! - Target statistics are computed once and cached by the caller; this
//!   problem never re-analyzes the target.
//! - Non-finite losses are returned as values (the convergence guard turns
//!   them into an explicit stop); non-finite gradients abort the run with an
//!   explicit error.
use argmin::core::{CostFunction, Error, Gradient};
use ndarray::Array3;
use num_complex::Complex64;

use crate::{
    model::Model,
    synthesis::{
        errors::{SynthResult, SynthesisError},
        loss::MseLossScat,
        types::{Cost, Grad, Theta},
    },
};

/// Synthesis objective `L(x) = MSE(phi(x), target)` over flattened signals.
#[derive(Debug)]
pub struct SynthesisProblem<'a> {
    model: &'a Model,
    loss: MseLossScat,
    target: Array3<Complex64>,
    sigma2: Option<Array3<f64>>,
    b: usize,
    loss0: f64,
}

impl<'a> SynthesisProblem<'a> {
    /// Wire a model to cached target statistics and evaluate `loss0` at the
    /// initial candidate.
    pub fn new(
        model: &'a Model, target: Array3<Complex64>, sigma2: Option<Array3<f64>>,
        x0: &Array3<f64>,
    ) -> SynthResult<Self> {
        let loss = MseLossScat::new(model.descri())?;
        if target.dim().1 != model.descri().len() {
            return Err(SynthesisError::TargetLengthMismatch {
                expected: model.descri().len(),
                found: target.dim().1,
            });
        }
        let mut problem =
            Self { model, loss, target, sigma2, b: x0.dim().0, loss0: 0.0 };
        problem.loss0 = problem.value(&flatten(x0))?;
        Ok(problem)
    }

    /// Loss at the initial candidate.
    pub fn loss0(&self) -> f64 {
        self.loss0
    }

    pub fn n_coeffs(&self) -> usize {
        self.loss.n_coeffs()
    }

    /// Shape `(B, N, T)` of the candidate signal.
    pub fn signal_shape(&self) -> (usize, usize, usize) {
        (self.b, self.model.n_channels(), self.model.t())
    }

    /// Reshape a flattened parameter vector back into `(B, N, T)`.
    pub fn unflatten(&self, theta: &Theta) -> SynthResult<Array3<f64>> {
        let (n, t) = (self.model.n_channels(), self.model.t());
        Array3::from_shape_vec((self.b, n, t), theta.to_vec())
            .map_err(|err| SynthesisError::BackendError { text: err.to_string() })
    }

    /// Loss only (one forward pass).
    pub fn value(&self, theta: &Theta) -> SynthResult<f64> {
        let x = self.unflatten(theta)?;
        let (_, values) = self.model.forward_tape(&x, self.sigma2.as_ref())?;
        let values = self.model.apply_keep(values);
        let (loss, _) = self.loss.value_and_cotangent(&values, &self.target)?;
        Ok(loss)
    }

    /// Finite-difference gradient over the same objective.
    ///
    /// Kept as a cross-check and debugging fallback; synthesis itself runs
    /// on the analytic gradient from [`SynthesisProblem::evaluate`].
    pub fn gradient_fd(&self, theta: &Theta) -> SynthResult<Grad> {
        use finitediff::FiniteDiff;
        let grad = theta.forward_diff(&|t: &Theta| self.value(t).unwrap_or(f64::NAN));
        for (index, &value) in grad.iter().enumerate() {
            if !value.is_finite() {
                return Err(SynthesisError::NonFiniteGradient { index, value });
            }
        }
        Ok(grad)
    }

    /// Loss and analytic gradient (forward, loss cotangent, backward).
    pub fn evaluate(&self, theta: &Theta) -> SynthResult<(f64, Grad)> {
        let x = self.unflatten(theta)?;
        let (tape, values) = self.model.forward_tape(&x, self.sigma2.as_ref())?;
        let values = self.model.apply_keep(values);
        let (loss, cot) = self.loss.value_and_cotangent(&values, &self.target)?;
        let grad = self.model.backward(&tape, &cot)?;
        let grad: Grad = grad.iter().copied().collect();
        for (index, &value) in grad.iter().enumerate() {
            if !value.is_finite() {
                return Err(SynthesisError::NonFiniteGradient { index, value });
            }
        }
        Ok((loss, grad))
    }
}

impl CostFunction for SynthesisProblem<'_> {
    type Param = Theta;
    type Output = Cost;

    fn cost(&self, param: &Theta) -> Result<Cost, Error> {
        Ok(self.value(param)?)
    }
}

impl Gradient for SynthesisProblem<'_> {
    type Param = Theta;
    type Gradient = Grad;

    fn gradient(&self, param: &Theta) -> Result<Grad, Error> {
        let (_, grad) = self.evaluate(param)?;
        Ok(grad)
    }
}

/// Flatten `(B, N, T)` into the optimizer's parameter vector.
pub fn flatten(x: &Array3<f64>) -> Theta {
    x.iter().copied().collect()
}
