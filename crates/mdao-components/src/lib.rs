//! Reference components for mdao.
//!
//! This crate provides:
//! - The quadratic family `a·x² + b·x + c = 0` with finite-difference,
//!   analytic and matrix-free derivatives
//! - Independent variables (`IndepVarComp`)
//! - Expression components (`ExecComp`) built on a small expression language
//! - Linear systems `A·x = b` as primal implicit components

pub mod error;
pub mod exec;
pub mod expression;
pub mod indep;
pub mod linear_system;
pub mod quadratic;

pub use error::{Error, Result};
pub use exec::ExecComp;
pub use expression::{parse_equation, parse_expression, Equation, Expr};
pub use indep::IndepVarComp;
pub use linear_system::LinearSystemComp;
pub use quadratic::{Coefficients, QuadraticComp, QuadraticJacVec, QuadraticLinearize};
