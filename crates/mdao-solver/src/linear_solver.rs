//! Linear solvers for the linearized model.
//!
//! Forward mode solves `J x = b` (`d_residuals -> d_outputs`), reverse mode
//! solves `Jᵀ x = b` (`d_outputs -> d_residuals`), where `J = dR/du` over
//! all outputs of the model.

use mdao_core::Mode;

use crate::cache::{CacheLookup, LinearSolutionCache};
use crate::error::{Error, Result};
use crate::gmres::{solve_gmres, GmresConfig};
use crate::linear::CachedLu;
use crate::model::Model;
use crate::operator::LinearOperator;

/// A solver for the linearized model.
pub trait LinearSolver: Send {
    fn name(&self) -> &'static str;

    /// Prepare for solves at the model's current linearization.
    fn linearize(&mut self, model: &mut Model) -> Result<()>;

    fn solve(&mut self, model: &mut Model, rhs: &[f64], mode: Mode) -> Result<Vec<f64>>;

    /// Solve for one seed case of a total-derivative computation. Solvers
    /// that keep a solution cache use `case` as its key.
    fn solve_case(
        &mut self,
        model: &mut Model,
        rhs: &[f64],
        mode: Mode,
        _case: usize,
    ) -> Result<Vec<f64>> {
        self.solve(model, rhs, mode)
    }

    /// The solution cache, for solvers that keep one.
    fn solution_cache(&self) -> Option<&LinearSolutionCache> {
        None
    }
}

/// Linear solver selection by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverChoice {
    Direct,
    Gmres,
    BlockGs,
    RunOnce,
}

impl LinearSolverChoice {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "direct" | "lu" => Some(Self::Direct),
            "gmres" | "krylov" => Some(Self::Gmres),
            "bgs" | "block_gs" | "gauss-seidel" => Some(Self::BlockGs),
            "run_once" | "runonce" => Some(Self::RunOnce),
            _ => None,
        }
    }

    pub fn build(self) -> Box<dyn LinearSolver> {
        match self {
            Self::Direct => Box::new(DirectSolver::new()),
            Self::Gmres => Box::new(KrylovSolver::new().with_preconditioner(DirectSolver::new())),
            Self::BlockGs => Box::new(BlockGaussSeidel::new()),
            Self::RunOnce => Box::new(BlockGaussSeidel::run_once()),
        }
    }
}

/// Factorizes the assembled Jacobian once per linearization and reuses the
/// factorization for every right-hand side in both directions.
#[derive(Debug, Default)]
pub struct DirectSolver {
    lu: Option<CachedLu>,
    /// Model linearization the factorization belongs to.
    factorized_at: Option<u64>,
    factorizations: usize,
}

impl DirectSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of factorizations performed so far.
    pub fn factorizations(&self) -> usize {
        self.factorizations
    }

    /// Dense Jacobian: assembled from partials where possible, otherwise
    /// built column by column from the matrix-free products.
    fn matrix(model: &mut Model) -> Result<nalgebra::DMatrix<f64>> {
        if let Some(jac) = model.assemble_jacobian() {
            return Ok(jac);
        }
        let n = model.size();
        let mut jac = nalgebra::DMatrix::zeros(n, n);
        let mut e = vec![0.0; n];
        let mut col = vec![0.0; n];
        for k in 0..n {
            e[k] = 1.0;
            model.apply_jacobian(&e, &mut col, Mode::Fwd)?;
            e[k] = 0.0;
            jac.set_column(k, &nalgebra::DVector::from_column_slice(&col));
        }
        Ok(jac)
    }
}

impl LinearSolver for DirectSolver {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn linearize(&mut self, model: &mut Model) -> Result<()> {
        let matrix = Self::matrix(model)?;
        self.lu = Some(CachedLu::new(matrix)?);
        self.factorized_at = Some(model.linearization());
        self.factorizations += 1;
        log::trace!("direct: factorized {}x{} jacobian", model.size(), model.size());
        Ok(())
    }

    fn solve(&mut self, model: &mut Model, rhs: &[f64], mode: Mode) -> Result<Vec<f64>> {
        let stale = self.factorized_at != Some(model.linearization())
            || self.lu.as_ref().map(|lu| lu.dim()) != Some(model.size());
        if stale {
            self.linearize(model)?;
        }
        let lu = self
            .lu
            .as_mut()
            .ok_or_else(|| Error::SolverError("direct solver has no factorization".into()))?;
        match mode {
            Mode::Fwd => lu.solve(rhs),
            Mode::Rev => lu.solve_transpose(rhs),
        }
    }
}

/// The model's Jacobian as a [`LinearOperator`], preconditioned by an
/// inner linear solver.
struct ModelOperator<'a> {
    model: &'a mut Model,
    precond: Option<&'a mut Box<dyn LinearSolver>>,
    mode: Mode,
}

impl LinearOperator for ModelOperator<'_> {
    fn dim(&self) -> usize {
        self.model.size()
    }

    fn apply(&mut self, x: &[f64], y: &mut [f64]) -> Result<()> {
        self.model.apply_jacobian(x, y, self.mode)
    }

    fn precondition(&mut self, r: &[f64], z: &mut [f64]) -> Result<()> {
        match self.precond.as_mut() {
            Some(precond) => {
                let solved = precond.solve(self.model, r, self.mode)?;
                z.copy_from_slice(&solved);
            }
            None => z.copy_from_slice(r),
        }
        Ok(())
    }
}

/// Restarted GMRES on the model's matrix-free products.
pub struct KrylovSolver {
    config: GmresConfig,
    precond: Option<Box<dyn LinearSolver>>,
    cache: LinearSolutionCache,
    /// Model linearization the cache entries were computed at.
    cached_at: Option<u64>,
    err_on_non_converge: bool,
}

impl Default for KrylovSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl KrylovSolver {
    pub fn new() -> Self {
        Self {
            config: GmresConfig::default(),
            precond: None,
            cache: LinearSolutionCache::new(),
            cached_at: None,
            err_on_non_converge: false,
        }
    }

    pub fn with_config(mut self, config: GmresConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_preconditioner(mut self, precond: impl LinearSolver + 'static) -> Self {
        self.precond = Some(Box::new(precond));
        self
    }

    pub fn with_err_on_non_converge(mut self, strict: bool) -> Self {
        self.err_on_non_converge = strict;
        self
    }

    pub fn cache(&self) -> &LinearSolutionCache {
        &self.cache
    }

    fn run(&mut self, model: &mut Model, rhs: &[f64], mode: Mode, x0: Option<&[f64]>) -> Result<Vec<f64>> {
        let mut op = ModelOperator {
            model,
            precond: self.precond.as_mut(),
            mode,
        };
        let result = solve_gmres(&mut op, rhs, x0, &self.config)?;
        if !result.converged {
            if self.err_on_non_converge {
                return Err(Error::ConvergenceFailed {
                    solver: "gmres".into(),
                    iterations: result.iterations,
                });
            }
            log::warn!(
                "gmres did not converge after {} iterations (residual {:e})",
                result.iterations,
                result.residual
            );
        } else {
            log::trace!("gmres converged in {} iterations", result.iterations);
        }
        Ok(result.x)
    }
}

impl LinearSolver for KrylovSolver {
    fn name(&self) -> &'static str {
        "gmres"
    }

    fn linearize(&mut self, model: &mut Model) -> Result<()> {
        if let Some(precond) = self.precond.as_mut() {
            precond.linearize(model)?;
        }
        self.cache.invalidate();
        self.cached_at = Some(model.linearization());
        Ok(())
    }

    fn solve(&mut self, model: &mut Model, rhs: &[f64], mode: Mode) -> Result<Vec<f64>> {
        self.run(model, rhs, mode, None)
    }

    fn solve_case(&mut self, model: &mut Model, rhs: &[f64], mode: Mode, case: usize) -> Result<Vec<f64>> {
        if self.cached_at != Some(model.linearization()) {
            self.cache.invalidate();
            self.cached_at = Some(model.linearization());
        }
        let x0 = match self.cache.lookup(mode, case, rhs) {
            CacheLookup::Exact(x) => return Ok(x),
            CacheLookup::WarmStart(x) => Some(x),
            CacheLookup::Miss => None,
        };
        let x = self.run(model, rhs, mode, x0.as_deref())?;
        self.cache.store(mode, case, rhs, &x);
        Ok(x)
    }

    fn solution_cache(&self) -> Option<&LinearSolutionCache> {
        Some(&self.cache)
    }
}

/// Block Gauss-Seidel options.
#[derive(Debug, Clone)]
pub struct BlockGsOptions {
    pub maxiter: usize,
    pub atol: f64,
    pub rtol: f64,
}

impl Default for BlockGsOptions {
    fn default() -> Self {
        Self {
            maxiter: 10,
            atol: 1e-10,
            rtol: 1e-10,
        }
    }
}

impl BlockGsOptions {
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
}

/// Sweeps over the components, inverting each diagonal block with the
/// component's own `solve_linear`. Forward sweeps follow execution order,
/// reverse sweeps run backwards.
#[derive(Debug, Clone, Default)]
pub struct BlockGaussSeidel {
    options: BlockGsOptions,
    single_pass: bool,
}

impl BlockGaussSeidel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: BlockGsOptions) -> Self {
        Self {
            options,
            single_pass: false,
        }
    }

    /// One sweep without a convergence check. Exact when the model has no
    /// cycles.
    pub fn run_once() -> Self {
        Self {
            options: BlockGsOptions::default().with_maxiter(1),
            single_pass: true,
        }
    }

    fn sweep(&self, model: &mut Model, rhs: &[f64], x: &mut [f64], mode: Mode) -> Result<()> {
        let n = model.size();
        let order: Vec<usize> = match mode {
            Mode::Fwd => (0..model.len()).collect(),
            Mode::Rev => (0..model.len()).rev().collect(),
        };
        let mut ax = vec![0.0; n];
        for i in order {
            let block = model.block(i);
            if block.is_empty() {
                continue;
            }
            model.apply_jacobian(x, &mut ax, mode)?;
            let r: Vec<f64> = block.clone().map(|k| rhs[k] - ax[k]).collect();
            let dx = model.solve_block(i, &r, mode)?;
            for (xk, d) in x[block].iter_mut().zip(dx) {
                *xk += d;
            }
        }
        Ok(())
    }

    fn residual(model: &mut Model, rhs: &[f64], x: &[f64], mode: Mode) -> Result<f64> {
        let mut ax = vec![0.0; model.size()];
        model.apply_jacobian(x, &mut ax, mode)?;
        Ok(rhs
            .iter()
            .zip(&ax)
            .map(|(b, a)| (b - a) * (b - a))
            .sum::<f64>()
            .sqrt())
    }
}

impl LinearSolver for BlockGaussSeidel {
    fn name(&self) -> &'static str {
        if self.single_pass {
            "ln_runonce"
        } else {
            "ln_bgs"
        }
    }

    fn linearize(&mut self, _model: &mut Model) -> Result<()> {
        Ok(())
    }

    fn solve(&mut self, model: &mut Model, rhs: &[f64], mode: Mode) -> Result<Vec<f64>> {
        if rhs.len() != model.size() {
            return Err(Error::DimensionMismatch {
                expected: model.size(),
                actual: rhs.len(),
            });
        }
        let mut x = vec![0.0; rhs.len()];
        if self.single_pass {
            self.sweep(model, rhs, &mut x, mode)?;
            return Ok(x);
        }

        let norm0 = rhs.iter().map(|b| b * b).sum::<f64>().sqrt();
        let norm0 = if norm0 == 0.0 { 1.0 } else { norm0 };
        for iter in 1..=self.options.maxiter {
            self.sweep(model, rhs, &mut x, mode)?;
            let norm = Self::residual(model, rhs, &x, mode)?;
            log::trace!("ln_bgs iteration {}: |r| = {:e}", iter, norm);
            if norm <= self.options.atol || norm / norm0 <= self.options.rtol {
                return Ok(x);
            }
        }
        log::warn!(
            "ln_bgs did not converge after {} iterations",
            self.options.maxiter
        );
        Ok(x)
    }
}
