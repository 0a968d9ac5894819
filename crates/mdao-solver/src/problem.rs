//! Top-level driver: set up a model, run it and compute total derivatives.

use nalgebra::DMatrix;

use mdao_core::{IntoValues, Mode};

use crate::error::{Error, Result};
use crate::linear_solver::{BlockGaussSeidel, LinearSolver};
use crate::model::{Group, Model, OutputFilter};
use crate::newton::SolveReport;
use crate::nonlinear::NonlinearSolver;
use crate::recording::{CaseInfo, Recorder, Recorders};
use crate::totals::{TotalCheck, Totals, TotalsMode};

/// Recording source name of final `run_model` cases.
pub const PROBLEM_SOURCE: &str = "problem";

enum State {
    Pending(Group),
    Ready(Model),
    /// Setup failed; the group was consumed.
    Failed,
}

/// A model together with its root solvers and recorders.
pub struct Problem {
    state: State,
    nonlinear: NonlinearSolver,
    linear: Box<dyn LinearSolver>,
    recorders: Recorders,
    mode: TotalsMode,
    /// Direction of `compute_totals`, fixed once known.
    resolved: Option<Mode>,
    design_vars: Vec<String>,
    responses: Vec<String>,
    last_report: Option<SolveReport>,
}

impl std::fmt::Debug for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Pending(_) => "pending",
            State::Ready(_) => "ready",
            State::Failed => "failed",
        };
        f.debug_struct("Problem")
            .field("state", &state)
            .field("nonlinear", &self.nonlinear.name())
            .field("linear", &self.linear.name())
            .field("mode", &self.mode)
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl Problem {
    pub fn new(model: Group) -> Self {
        Self {
            state: State::Pending(model),
            nonlinear: NonlinearSolver::default(),
            linear: Box::new(BlockGaussSeidel::run_once()),
            recorders: Recorders::new(),
            mode: TotalsMode::Auto,
            resolved: None,
            design_vars: Vec::new(),
            responses: Vec::new(),
            last_report: None,
        }
    }

    pub fn set_nonlinear_solver(&mut self, solver: impl Into<NonlinearSolver>) -> &mut Self {
        self.nonlinear = solver.into();
        self
    }

    pub fn set_linear_solver(&mut self, solver: impl LinearSolver + 'static) -> &mut Self {
        self.linear = Box::new(solver);
        self
    }

    pub fn set_linear_solver_boxed(&mut self, solver: Box<dyn LinearSolver>) -> &mut Self {
        self.linear = solver;
        self
    }

    pub fn linear_solver(&self) -> &dyn LinearSolver {
        self.linear.as_ref()
    }

    pub fn add_recorder(&mut self, recorder: impl Recorder + 'static) -> &mut Self {
        self.recorders.add(recorder);
        self
    }

    /// Declare a variable totals are taken with respect to. Used by
    /// [`setup`](Self::setup) to resolve [`TotalsMode::Auto`].
    pub fn add_design_var(&mut self, name: impl Into<String>) -> &mut Self {
        self.design_vars.push(name.into());
        self
    }

    /// Declare a variable totals are taken of.
    pub fn add_response(&mut self, name: impl Into<String>) -> &mut Self {
        self.responses.push(name.into());
        self
    }

    /// Build the model and fix the direction of `compute_totals`.
    ///
    /// `Auto` is resolved here from the declared design variables and
    /// responses. Without declarations it is resolved by the first
    /// `compute_totals` call and kept from then on.
    pub fn setup(&mut self, mode: TotalsMode) -> Result<()> {
        self.mode = mode;
        self.state = match std::mem::replace(&mut self.state, State::Failed) {
            State::Pending(group) => State::Ready(Model::build(group)?),
            State::Ready(model) => State::Ready(model),
            State::Failed => {
                return Err(config("setup previously failed; build a new problem"));
            }
        };
        self.resolved = match mode {
            TotalsMode::Auto if self.design_vars.is_empty() || self.responses.is_empty() => None,
            TotalsMode::Auto => {
                let model = self.model()?;
                let n_wrt = entries(model, &self.design_vars)?;
                let n_of = entries(model, &self.responses)?;
                Some(mode.resolve(n_of, n_wrt))
            }
            fixed => Some(fixed.resolve(0, 0)),
        };
        if let Some(resolved) = self.resolved {
            log::debug!("totals mode {:?} resolved to {:?}", mode, resolved);
        }
        Ok(())
    }

    pub fn mode(&self) -> TotalsMode {
        self.mode
    }

    /// Direction `compute_totals` uses, once fixed.
    pub fn resolved_mode(&self) -> Option<Mode> {
        self.resolved
    }

    pub fn model(&self) -> Result<&Model> {
        match &self.state {
            State::Ready(model) => Ok(model),
            _ => Err(config("problem is not set up; call setup() first")),
        }
    }

    pub fn model_mut(&mut self) -> Result<&mut Model> {
        match &mut self.state {
            State::Ready(model) => Ok(model),
            _ => Err(config("problem is not set up; call setup() first")),
        }
    }

    pub fn set_val(&mut self, name: &str, values: impl IntoValues) -> Result<()> {
        let values = values.into_values();
        self.model_mut()?.set_val(name, &values)
    }

    pub fn get_val(&self, name: &str) -> Result<Vec<f64>> {
        self.model()?.get_val(name)
    }

    /// First entry of a variable.
    pub fn val(&self, name: &str) -> Result<f64> {
        self.get_val(name)?
            .first()
            .copied()
            .ok_or_else(|| Error::Core(mdao_core::Error::VariableNotFound(name.to_string())))
    }

    /// Outcome of the last `run_model`.
    pub fn last_report(&self) -> Option<SolveReport> {
        self.last_report
    }

    /// Run the root nonlinear solver and record the final state.
    ///
    /// On failure every vector is made writable again before the error is
    /// returned, so the caller may adjust values and retry.
    pub fn run_model(&mut self) -> Result<SolveReport> {
        let State::Ready(model) = &mut self.state else {
            return Err(config("problem is not set up; call setup() first"));
        };
        let result = self
            .nonlinear
            .solve(model, self.linear.as_mut(), &mut self.recorders);
        match result {
            Ok(report) => {
                self.last_report = Some(report);
                self.recorders.record(
                    model,
                    &CaseInfo {
                        source: PROBLEM_SOURCE,
                        iteration: report.iterations,
                        abs_err: report.abs_err,
                        rel_err: report.rel_err,
                        success: report.converged,
                        msg: "",
                    },
                )?;
                self.recorders.flush()?;
                Ok(report)
            }
            Err(err) => {
                model.release_all();
                let msg = err.to_string();
                log::debug!("run_model failed: {}", msg);
                self.recorders.record(
                    model,
                    &CaseInfo {
                        source: PROBLEM_SOURCE,
                        iteration: 0,
                        abs_err: model.residual_norm(),
                        rel_err: f64::NAN,
                        success: false,
                        msg: &msg,
                    },
                )?;
                Err(err)
            }
        }
    }

    /// Evaluate residuals at the current values without solving.
    pub fn run_apply_nonlinear(&mut self) -> Result<()> {
        let model = self.model_mut()?;
        let result = model.run_apply_nonlinear();
        if result.is_err() {
            model.release_all();
        }
        result
    }

    /// Total derivatives `d(of)/d(wrt)` at the current point.
    ///
    /// `wrt` names are usually promoted or unconnected inputs; the seed is
    /// placed on the independent output feeding them.
    pub fn compute_totals(&mut self, of: &[&str], wrt: &[&str]) -> Result<Totals> {
        let State::Ready(model) = &mut self.state else {
            return Err(config("problem is not set up; call setup() first"));
        };
        let linear = self.linear.as_mut();
        let result = compute_totals(model, linear, self.mode, &mut self.resolved, of, wrt);
        if result.is_err() {
            model.release_all();
        }
        result
    }

    /// Compare `compute_totals` with forward differences of `run_model`.
    ///
    /// The model is returned to its current state afterwards.
    pub fn check_totals(&mut self, of: &[&str], wrt: &[&str], step: f64) -> Result<Vec<TotalCheck>> {
        let totals = self.compute_totals(of, wrt)?;
        let saved_outputs = self.model()?.outputs_vec();
        let base: Vec<Vec<f64>> = of
            .iter()
            .map(|name| self.get_val(name))
            .collect::<Result<_>>()?;

        let mut checks = Vec::new();
        for &w in wrt {
            let original = self.get_val(w)?;
            let mut columns: Vec<Vec<Vec<f64>>> = vec![Vec::new(); of.len()];
            for k in 0..original.len() {
                let mut perturbed = original.clone();
                perturbed[k] += step;
                self.set_val(w, perturbed)?;
                self.run_model()?;
                for (col, (name, f0)) in columns.iter_mut().zip(of.iter().zip(&base)) {
                    let f1 = self.get_val(name)?;
                    col.push(f1.iter().zip(f0).map(|(a, b)| (a - b) / step).collect());
                }
                self.model_mut()?.set_outputs_vec(&saved_outputs)?;
                self.set_val(w, original.clone())?;
            }
            for ((name, f0), cols) in of.iter().zip(&base).zip(columns) {
                let approx = DMatrix::from_fn(f0.len(), original.len(), |r, c| cols[c][r]);
                let computed = totals
                    .get(name, w)
                    .cloned()
                    .unwrap_or_else(|| DMatrix::zeros(f0.len(), original.len()));
                let check = TotalCheck::new(name, w, computed, approx);
                log::debug!(
                    "check_totals d({})/d({}): abs {:e}, rel {:e}",
                    name,
                    w,
                    check.abs_error,
                    check.rel_error
                );
                checks.push(check);
            }
        }
        self.model_mut()?.set_outputs_vec(&saved_outputs)?;
        self.run_apply_nonlinear()?;
        Ok(checks)
    }

    pub fn list_inputs(&self) -> Result<Vec<(String, Vec<f64>)>> {
        Ok(self.model()?.list_inputs())
    }

    pub fn list_outputs(&self, filter: OutputFilter) -> Result<Vec<(String, Vec<f64>)>> {
        Ok(self.model()?.list_outputs(filter))
    }

    pub fn list_residuals(&self) -> Result<Vec<(String, Vec<f64>)>> {
        Ok(self.model()?.list_residuals())
    }
}

fn config(msg: &str) -> Error {
    Error::Core(mdao_core::Error::Configuration(msg.to_string()))
}

/// Number of entries across `names`.
fn entries(model: &Model, names: &[String]) -> Result<usize> {
    names
        .iter()
        .map(|name| model.global_range(name).map(|r| r.len()))
        .sum()
}

fn compute_totals(
    model: &mut Model,
    linear: &mut dyn LinearSolver,
    mode: TotalsMode,
    resolved: &mut Option<Mode>,
    of: &[&str],
    wrt: &[&str],
) -> Result<Totals> {
    let of_ranges = of
        .iter()
        .map(|name| model.global_range(name))
        .collect::<Result<Vec<_>>>()?;
    let wrt_ranges = wrt
        .iter()
        .map(|name| model.global_range(name))
        .collect::<Result<Vec<_>>>()?;
    let n_of: usize = of_ranges.iter().map(|r| r.len()).sum();
    let n_wrt: usize = wrt_ranges.iter().map(|r| r.len()).sum();
    let mode = *resolved.get_or_insert_with(|| mode.resolve(n_of, n_wrt));

    model.run_linearize()?;
    linear.linearize(model)?;

    let mut totals = Totals::new();
    for (o, or) in of.iter().zip(&of_ranges) {
        for (w, wr) in wrt.iter().zip(&wrt_ranges) {
            totals.insert(o, w, DMatrix::zeros(or.len(), wr.len()));
        }
    }

    let n = model.size();
    let mut case = 0;
    match mode {
        Mode::Fwd => {
            for (w, wr) in wrt.iter().zip(&wrt_ranges) {
                for (col, seed) in wr.clone().enumerate() {
                    let mut rhs = vec![0.0; n];
                    rhs[seed] = 1.0;
                    let x = linear.solve_case(model, &rhs, Mode::Fwd, case)?;
                    case += 1;
                    for (o, or) in of.iter().zip(&of_ranges) {
                        if let Some(block) = totals.block_mut(o, w) {
                            for (row, k) in or.clone().enumerate() {
                                block[(row, col)] = x[k];
                            }
                        }
                    }
                }
            }
        }
        Mode::Rev => {
            for (o, or) in of.iter().zip(&of_ranges) {
                for (row, seed) in or.clone().enumerate() {
                    let mut rhs = vec![0.0; n];
                    rhs[seed] = 1.0;
                    let lambda = linear.solve_case(model, &rhs, Mode::Rev, case)?;
                    case += 1;
                    for (w, wr) in wrt.iter().zip(&wrt_ranges) {
                        if let Some(block) = totals.block_mut(o, w) {
                            for (col, k) in wr.clone().enumerate() {
                                block[(row, col)] = lambda[k];
                            }
                        }
                    }
                }
            }
        }
    }
    log::debug!(
        "compute_totals: {} x {} in {:?} mode with {}",
        n_of,
        n_wrt,
        mode,
        linear.name()
    );
    Ok(totals)
}
