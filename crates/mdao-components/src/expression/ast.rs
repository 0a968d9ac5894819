//! Expression AST types.

use super::functions::Function;

/// Expression AST node.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Expr {
    /// Numeric constant.
    Constant(f64),
    /// Named variable, resolved at evaluation time.
    Variable(String),
    /// Binary operation.
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation.
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
    /// Built-in function call.
    Function { func: Function, args: Vec<Expr> },
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum UnaryOp {
    Neg,
}

/// `output = expression`.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub output: String,
    pub expr: Expr,
}
