//! # mdao
//!
//! Coupled multidisciplinary analysis in Rust.
//!
//! mdao provides:
//! - Explicit and implicit components with declared partial derivatives
//! - Groups with connections, promoted inputs and automatic independent variables
//! - Newton solvers with line searches, run-once execution and component-local Newton
//! - Direct, GMRES and block Gauss-Seidel linear solvers with a solution cache
//! - Total derivatives in forward and reverse (adjoint) mode
//! - Iteration recording
//!
//! ## Quick Start
//!
//! ```rust
//! use mdao::prelude::*;
//!
//! let mut model = Group::new();
//! model.add_subsystem("quad", Component::implicit(QuadraticLinearize::new()));
//!
//! let mut prob = Problem::new(model);
//! prob.set_nonlinear_solver(NewtonSolver::new());
//! prob.set_linear_solver(DirectSolver::new());
//! prob.setup(TotalsMode::Rev).unwrap();
//! prob.set_val("quad.b", -4.0).unwrap();
//! prob.set_val("quad.c", 3.0).unwrap();
//! prob.run_model().unwrap();
//! assert!((prob.val("quad.x").unwrap() - 1.0).abs() < 1e-9);
//!
//! // dx/dc = -1 / (2ax + b) at the root x = 1
//! let totals = prob.compute_totals(&["quad.x"], &["quad.a", "quad.b", "quad.c"]).unwrap();
//! assert!((totals.value("quad.x", "quad.c").unwrap() - 0.5).abs() < 1e-9);
//! ```

// Re-export library crates
pub use mdao_components as components;
pub use mdao_core as core;
pub use mdao_solver as solver;

// ============================================================================
// Convenient re-exports from mdao_core
// ============================================================================

pub use mdao_core::{
    // Component contract
    Capabilities,
    Component,
    ComponentInstance,
    // Variables
    Declarations,
    DerivMethod,
    // Errors
    Error as CoreError,
    ExplicitComponent,
    // Primal components
    ExplicitPrimal,
    ExplicitPrimalComponent,
    ImplicitComponent,
    ImplicitPrimal,
    ImplicitPrimalComponent,
    IntoValues,
    Mode,
    Overrides,
    Partials,
    PrimalArgs,
    Scalar,
    VarRole,
    VariableMeta,
    Vector,
};

// ============================================================================
// Convenient re-exports from mdao_solver
// ============================================================================

pub use mdao_solver::{
    ArmijoOptions,
    BlockGaussSeidel,
    BlockGsOptions,
    BoundsMode,
    DirectSolver,
    // Errors
    Error as SolverError,
    GmresConfig,
    // Model assembly
    Group,
    JsonLinesRecorder,
    KrylovSolver,
    LineSearch,
    // Linear solvers
    LinearSolver,
    LinearSolverChoice,
    // Recording
    MemoryRecorder,
    Model,
    NewtonComponent,
    // Nonlinear solvers
    NewtonOptions,
    NewtonSolver,
    NonlinearSolver,
    OutputFilter,
    // Driver
    Problem,
    Recorder,
    SolveReport,
    TotalCheck,
    // Totals
    Totals,
    TotalsMode,
};

// ============================================================================
// Convenient re-exports from mdao_components
// ============================================================================

pub use mdao_components::{
    Error as ComponentError, ExecComp, IndepVarComp, LinearSystemComp, QuadraticComp,
    QuadraticJacVec, QuadraticLinearize,
};

/// Re-export of nalgebra's dynamic matrix type, used for total-derivative blocks.
pub use nalgebra::DMatrix;

/// Prelude module containing commonly used types and traits.
///
/// ```rust
/// use mdao::prelude::*;
/// ```
pub mod prelude {
    // Components
    pub use crate::{
        Component, Declarations, DerivMethod, ExplicitComponent, ImplicitComponent, Mode,
        Overrides, Partials, Vector,
    };

    // Model and driver
    pub use crate::{Group, Problem, Totals, TotalsMode};

    // Solvers
    pub use crate::{
        ArmijoOptions, BlockGaussSeidel, DirectSolver, KrylovSolver, LineSearch, NewtonOptions,
        NewtonSolver,
    };

    // Reference components
    pub use crate::{
        ExecComp, IndepVarComp, LinearSystemComp, QuadraticComp, QuadraticJacVec,
        QuadraticLinearize,
    };

    // Common external types
    pub use crate::DMatrix;
}
