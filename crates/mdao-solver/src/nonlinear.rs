//! Root nonlinear solver selection.

use crate::error::Result;
use crate::linear_solver::LinearSolver;
use crate::model::Model;
use crate::newton::{NewtonSolver, SolveReport, NL_SOURCE};
use crate::recording::{CaseInfo, Recorders};

/// Residual norm below which a single run-once pass counts as converged.
pub const RUN_ONCE_ATOL: f64 = 1e-10;

/// Nonlinear solver attached to the root of a model.
#[derive(Debug, Default)]
pub enum NonlinearSolver {
    /// Execute every component once in execution order.
    #[default]
    RunOnce,
    Newton(NewtonSolver),
}

impl From<NewtonSolver> for NonlinearSolver {
    fn from(newton: NewtonSolver) -> Self {
        NonlinearSolver::Newton(newton)
    }
}

impl NonlinearSolver {
    pub fn name(&self) -> &'static str {
        match self {
            NonlinearSolver::RunOnce => "NL: RUNONCE",
            NonlinearSolver::Newton(_) => "NL: Newton",
        }
    }

    pub fn solve(
        &mut self,
        model: &mut Model,
        linear: &mut dyn LinearSolver,
        recorders: &mut Recorders,
    ) -> Result<SolveReport> {
        match self {
            NonlinearSolver::Newton(newton) => newton.solve(model, linear, recorders),
            NonlinearSolver::RunOnce => {
                if model.is_coupled() {
                    log::warn!("NL: RUNONCE on a model with coupled components; residuals may remain");
                }
                model.run_solve_once()?;
                model.run_apply_nonlinear()?;
                let norm = model.residual_norm();
                let converged = norm <= RUN_ONCE_ATOL;
                let msg = if converged {
                    String::new()
                } else {
                    log::warn!("NL: RUNONCE left residuals (|r| = {:e})", norm);
                    format!("residual norm {:e} after a single pass", norm)
                };
                let report = SolveReport {
                    iterations: 1,
                    abs_err: norm,
                    rel_err: 0.0,
                    converged,
                };
                recorders.record(
                    model,
                    &CaseInfo {
                        source: NL_SOURCE,
                        iteration: 1,
                        abs_err: norm,
                        rel_err: 0.0,
                        success: converged,
                        msg: &msg,
                    },
                )?;
                Ok(report)
            }
        }
    }
}
