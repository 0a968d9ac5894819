//! Newton nonlinear solver over the whole model.

use mdao_core::Mode;

use crate::error::{Error, Result};
use crate::linear_solver::LinearSolver;
use crate::linesearch::LineSearch;
use crate::model::Model;
use crate::recording::{CaseInfo, Recorders};

/// Recording source name of the root nonlinear solver.
pub const NL_SOURCE: &str = "root.nonlinear_solver";

/// Newton iteration options.
#[derive(Debug, Clone)]
pub struct NewtonOptions {
    pub maxiter: usize,
    /// Absolute residual norm tolerance.
    pub atol: f64,
    /// Tolerance on the residual norm relative to the initial one.
    pub rtol: f64,
    /// Let components run their own `solve_nonlinear` between Newton steps.
    pub solve_subsystems: bool,
    /// Number of Newton iterations that run sub-solves.
    pub max_sub_solves: usize,
    /// Fail with [`Error::ConvergenceFailed`] instead of warning.
    pub err_on_non_converge: bool,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            maxiter: 10,
            atol: 1e-10,
            rtol: 1e-10,
            solve_subsystems: false,
            max_sub_solves: 10,
            err_on_non_converge: false,
        }
    }
}

impl NewtonOptions {
    pub fn with_maxiter(mut self, maxiter: usize) -> Self {
        self.maxiter = maxiter;
        self
    }

    pub fn with_atol(mut self, atol: f64) -> Self {
        self.atol = atol;
        self
    }

    pub fn with_rtol(mut self, rtol: f64) -> Self {
        self.rtol = rtol;
        self
    }

    pub fn with_solve_subsystems(mut self, enabled: bool) -> Self {
        self.solve_subsystems = enabled;
        self
    }

    pub fn with_max_sub_solves(mut self, max: usize) -> Self {
        self.max_sub_solves = max;
        self
    }

    pub fn with_err_on_non_converge(mut self, strict: bool) -> Self {
        self.err_on_non_converge = strict;
        self
    }
}

/// Outcome of a nonlinear solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    pub iterations: usize,
    pub abs_err: f64,
    pub rel_err: f64,
    pub converged: bool,
}

/// Newton's method on `R(u) = 0` over all outputs of the model.
#[derive(Default)]
pub struct NewtonSolver {
    pub options: NewtonOptions,
    pub linesearch: LineSearch,
    linear: Option<Box<dyn LinearSolver>>,
}

impl std::fmt::Debug for NewtonSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewtonSolver")
            .field("options", &self.options)
            .field("linesearch", &self.linesearch)
            .field("linear", &self.linear.as_ref().map(|l| l.name()))
            .finish()
    }
}

impl NewtonSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: NewtonOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_linesearch(mut self, linesearch: LineSearch) -> Self {
        self.linesearch = linesearch;
        self
    }

    /// Use a dedicated linear solver for Newton steps instead of the
    /// problem's one.
    pub fn with_linear_solver(mut self, linear: impl LinearSolver + 'static) -> Self {
        self.linear = Some(Box::new(linear));
        self
    }

    /// Drive the model's residuals to zero.
    ///
    /// `fallback` solves the Newton systems unless a dedicated linear solver
    /// was set.
    pub fn solve(
        &mut self,
        model: &mut Model,
        fallback: &mut dyn LinearSolver,
        recorders: &mut Recorders,
    ) -> Result<SolveReport> {
        let opts = &self.options;
        let linear: &mut dyn LinearSolver = match self.linear.as_deref_mut() {
            Some(linear) => linear,
            None => fallback,
        };

        if model.run_guess()? {
            log::debug!("NL: Newton: initial guess applied");
        }
        if opts.solve_subsystems {
            model.run_solve_once()?;
        }
        model.run_apply_nonlinear()?;

        let mut norm = model.residual_norm();
        let norm0 = if norm == 0.0 { 1.0 } else { norm };
        let mut report = SolveReport {
            iterations: 0,
            abs_err: norm,
            rel_err: norm / norm0,
            converged: norm <= opts.atol,
        };
        log::debug!("NL: Newton 0 ; {:e} {:e}", norm, report.rel_err);
        recorders.record(model, &case(&report, ""))?;

        while !report.converged && report.iterations < opts.maxiter {
            let iter = report.iterations + 1;
            model.run_linearize()?;
            linear.linearize(model)?;

            let rhs: Vec<f64> = model.residuals_vec().iter().map(|r| -r).collect();
            let du = linear.solve(model, &rhs, Mode::Fwd)?;
            let u0 = model.outputs_vec();
            norm = self.linesearch.step(model, &u0, &du, norm)?;

            if opts.solve_subsystems && iter <= opts.max_sub_solves {
                model.run_solve_once()?;
                model.run_apply_nonlinear()?;
                norm = model.residual_norm();
            }

            report = SolveReport {
                iterations: iter,
                abs_err: norm,
                rel_err: norm / norm0,
                converged: norm <= opts.atol || norm / norm0 <= opts.rtol,
            };
            log::debug!("NL: Newton {} ; {:e} {:e}", iter, norm, report.rel_err);
            recorders.record(model, &case(&report, ""))?;
        }

        if report.converged {
            log::info!("NL: Newton Converged in {} iterations", report.iterations);
        } else if opts.err_on_non_converge {
            return Err(Error::ConvergenceFailed {
                solver: "NL: Newton".into(),
                iterations: report.iterations,
            });
        } else {
            log::warn!(
                "NL: Newton Failed to Converge in {} iterations (|r| = {:e})",
                report.iterations,
                report.abs_err
            );
        }
        Ok(report)
    }
}

fn case<'a>(report: &SolveReport, msg: &'a str) -> CaseInfo<'a> {
    CaseInfo {
        source: NL_SOURCE,
        iteration: report.iterations,
        abs_err: report.abs_err,
        rel_err: report.rel_err,
        success: report.converged,
        msg,
    }
}
