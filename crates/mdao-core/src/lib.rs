//! Core data structures for mdao.
//!
//! This crate provides the pieces every solver consumes: named variable
//! vectors with a scoped read-only mode, the explicit/implicit component
//! contract, partial-derivative storage assembled from declared sparsity,
//! the connection graph, and primal (scalar-generic) components whose
//! partials are derived by complex step, dual numbers or finite differences.

pub mod component;
pub mod connections;
pub mod error;
pub mod instance;
pub mod partials;
pub mod primal;
pub mod variable;
pub mod vector;

pub use component::{
    Capabilities, Component, ExplicitComponent, ImplicitComponent, Mode, Overrides,
};
pub use connections::{execution_order, split_name, ConnectionGraph, ExecutionOrder};
pub use error::{Error, Result};
pub use instance::{ComponentInstance, ComponentVectors};
pub use partials::{glob_match, DerivMethod, PartialDecl, Partials, SubJac};
pub use primal::{
    ExplicitPrimal, ExplicitPrimalComponent, ImplicitPrimal, ImplicitPrimalComponent, PrimalArgs,
    Scalar,
};
pub use variable::{Declarations, IntoValues, VariableMeta};
pub use vector::{AccessMode, ReadOnlyGuard, VarLayout, VarRole, Vector};
