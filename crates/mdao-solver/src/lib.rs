//! Solvers and orchestration for mdao.
//!
//! This crate provides:
//! - Model assembly from groups of components, data transfer and auto-IVC
//! - Nonlinear solvers (run-once, Newton with line searches, component-local Newton)
//! - Linear solvers (direct LU, GMRES with nested preconditioning, block Gauss-Seidel)
//!   and a linear-solution cache
//! - Total derivatives in forward and reverse mode, with a finite-difference check
//! - Iteration recording

pub mod cache;
pub mod error;
pub mod gmres;
pub mod linear;
pub mod linear_solver;
pub mod linesearch;
pub mod local;
pub mod model;
pub mod newton;
pub mod nonlinear;
pub mod operator;
pub mod problem;
pub mod recording;
pub mod totals;

pub use cache::{CacheLookup, LinearSolutionCache};
pub use error::{Error, Result};
pub use gmres::{solve_gmres, GmresConfig, GmresResult};
pub use linear::{solve_dense, CachedLu};
pub use linear_solver::{
    BlockGaussSeidel, BlockGsOptions, DirectSolver, KrylovSolver, LinearSolver,
    LinearSolverChoice,
};
pub use linesearch::{ArmijoOptions, BoundsMode, LineSearch};
pub use local::NewtonComponent;
pub use model::{Group, Model, OutputFilter, Subsystem, AUTO_IVC};
pub use newton::{NewtonOptions, NewtonSolver, SolveReport};
pub use nonlinear::{NonlinearSolver, RUN_ONCE_ATOL};
pub use operator::{DenseOperator, LinearOperator};
pub use problem::Problem;
pub use recording::{
    CaseInfo, IterationSnapshot, JsonLinesRecorder, MemoryRecorder, Recorder, Recorders,
};
pub use totals::{TotalCheck, Totals, TotalsMode};
