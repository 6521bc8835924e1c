//! Early-stopping decorator around the L-BFGS solver.
//!
//! Purpose
//! -------
//! Argmin's built-in termination covers iteration budgets and internal
//! convergence. Synthesis additionally stops once the loss drops below a
//! user tolerance, once the function-evaluation budget is spent, or as soon
//! as the loss goes non-finite. [`ConvergenceGuard`] wraps the inner solver
//! and injects those checks into its termination test.
//!
//! Invariants & assumptions
//! ------------------------
//! - The guard never alters the inner solver's iterations; it only adds
//!   termination conditions, so a guarded run visits the same iterates as an
//!   unguarded one up to the stopping point.
//! - An early stop is a successful termination, not an error; the caller
//!   maps the termination reason to a [`StopReason`].
use argmin::core::{
    Error, IterState, Problem, Solver, State, TerminationReason, TerminationStatus, KV,
};

use crate::synthesis::types::{Grad, Theta};

/// Solver-exit text emitted when the loss goes non-finite.
pub(crate) const NON_FINITE_EXIT: &str = "non-finite loss";

/// Solver-exit text emitted when the evaluation budget is spent.
pub(crate) const EVAL_BUDGET_EXIT: &str = "function evaluation budget exhausted";

type SynthState = IterState<Theta, Grad, (), (), (), f64>;

/// Why a synthesis run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The loss fell below the requested tolerance.
    ToleranceReached,
    /// The inner solver reported convergence on its own criteria.
    Converged,
    /// The iteration budget ran out before the tolerance was met.
    IterBudget,
    /// The function-evaluation budget ran out before the tolerance was met.
    EvalBudget,
    /// The loss became non-finite and the run was cut short.
    NonFiniteLoss,
    /// The inner solver stopped for a reason of its own.
    Solver(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::ToleranceReached => write!(f, "loss tolerance reached"),
            StopReason::Converged => write!(f, "solver converged"),
            StopReason::IterBudget => write!(f, "iteration budget exhausted"),
            StopReason::EvalBudget => write!(f, "{EVAL_BUDGET_EXIT}"),
            StopReason::NonFiniteLoss => write!(f, "{NON_FINITE_EXIT}"),
            StopReason::Solver(text) => write!(f, "solver exit: {text}"),
        }
    }
}

impl StopReason {
    /// Map a terminal Argmin status back into a stop reason.
    pub(crate) fn from_status(status: &TerminationStatus) -> StopReason {
        match status {
            TerminationStatus::Terminated(reason) => match reason {
                TerminationReason::TargetCostReached => StopReason::ToleranceReached,
                TerminationReason::SolverConverged => StopReason::Converged,
                TerminationReason::MaxItersReached => StopReason::IterBudget,
                TerminationReason::SolverExit(text) if text == NON_FINITE_EXIT => {
                    StopReason::NonFiniteLoss
                }
                TerminationReason::SolverExit(text) if text == EVAL_BUDGET_EXIT => {
                    StopReason::EvalBudget
                }
                TerminationReason::SolverExit(text) => StopReason::Solver(text.clone()),
                TerminationReason::Interrupt | TerminationReason::Timeout => {
                    StopReason::Solver(reason.text().to_string())
                }
            },
            TerminationStatus::NotTerminated => {
                StopReason::Solver("not terminated".to_string())
            }
        }
    }
}

/// Wraps an inner solver and adds tolerance, evaluation-budget and
/// finiteness termination checks.
#[derive(Debug, Clone)]
pub struct ConvergenceGuard<S> {
    inner: S,
    threshold: f64,
    max_evals: Option<u64>,
}

impl<S> ConvergenceGuard<S> {
    /// `threshold` is the absolute loss value under which the run stops.
    pub fn new(inner: S, threshold: f64, max_evals: Option<u64>) -> Self {
        Self { inner, threshold, max_evals }
    }
}

impl<O, S> Solver<O, SynthState> for ConvergenceGuard<S>
where
    S: Solver<O, SynthState>,
{
    const NAME: &'static str = "Guarded L-BFGS";

    fn init(
        &mut self, problem: &mut Problem<O>, state: SynthState,
    ) -> Result<(SynthState, Option<KV>), Error> {
        self.inner.init(problem, state)
    }

    fn next_iter(
        &mut self, problem: &mut Problem<O>, state: SynthState,
    ) -> Result<(SynthState, Option<KV>), Error> {
        self.inner.next_iter(problem, state)
    }

    fn terminate(&mut self, state: &SynthState) -> TerminationStatus {
        if let TerminationStatus::Terminated(reason) = self.inner.terminate(state) {
            return TerminationStatus::Terminated(reason);
        }
        let cost = state.get_cost();
        if !cost.is_finite() {
            return TerminationStatus::Terminated(TerminationReason::SolverExit(
                NON_FINITE_EXIT.to_string(),
            ));
        }
        if cost <= self.threshold {
            return TerminationStatus::Terminated(TerminationReason::TargetCostReached);
        }
        if let Some(budget) = self.max_evals {
            let evals: u64 = state.get_func_counts().values().sum();
            if evals >= budget {
                return TerminationStatus::Terminated(TerminationReason::SolverExit(
                    EVAL_BUDGET_EXIT.to_string(),
                ));
            }
        }
        TerminationStatus::NotTerminated
    }
}
