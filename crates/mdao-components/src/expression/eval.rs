//! Expression evaluation and analysis.

use mdao_core::{Error, Result, Scalar};

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::functions::Function;

impl Expr {
    /// Evaluate the expression with any scalar type.
    ///
    /// `lookup` resolves variable names; an unresolved name is a
    /// `VariableNotFound` error.
    pub fn eval<S, F>(&self, lookup: &F) -> Result<S>
    where
        S: Scalar,
        F: Fn(&str) -> Option<S>,
    {
        match self {
            Expr::Constant(v) => Ok(S::from_f64(*v)),
            Expr::Variable(name) => {
                lookup(name).ok_or_else(|| Error::VariableNotFound(name.clone()))
            }
            Expr::BinaryOp { op, left, right } => {
                let l = left.eval(lookup)?;
                match op {
                    BinaryOp::Add => Ok(l + right.eval(lookup)?),
                    BinaryOp::Sub => Ok(l - right.eval(lookup)?),
                    BinaryOp::Mul => Ok(l * right.eval(lookup)?),
                    BinaryOp::Div => Ok(l / right.eval(lookup)?),
                    BinaryOp::Pow => power(l, right, lookup),
                }
            }
            Expr::UnaryOp { op, operand } => {
                let v = operand.eval(lookup)?;
                match op {
                    UnaryOp::Neg => Ok(-v),
                }
            }
            Expr::Function {
                func: Function::Pow,
                args,
            } => power(args[0].eval(lookup)?, &args[1], lookup),
            Expr::Function { func, args } => {
                let values = args
                    .iter()
                    .map(|a| a.eval(lookup))
                    .collect::<Result<Vec<S>>>()?;
                Ok(func.eval(&values))
            }
        }
    }

    /// Variable names in order of first appearance.
    pub fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut Vec<String>) {
        match self {
            Expr::Constant(_) => {}
            Expr::Variable(name) => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                left.collect_variables(names);
                right.collect_variables(names);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_variables(names),
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.collect_variables(names);
                }
            }
        }
    }

    /// Check if the expression references `name`.
    pub fn depends_on(&self, name: &str) -> bool {
        match self {
            Expr::Constant(_) => false,
            Expr::Variable(v) => v == name,
            Expr::BinaryOp { left, right, .. } => left.depends_on(name) || right.depends_on(name),
            Expr::UnaryOp { operand, .. } => operand.depends_on(name),
            Expr::Function { args, .. } => args.iter().any(|a| a.depends_on(name)),
        }
    }
}

/// Constant integral exponents go through `powi` so negative bases stay real.
fn power<S, F>(base: S, exponent: &Expr, lookup: &F) -> Result<S>
where
    S: Scalar,
    F: Fn(&str) -> Option<S>,
{
    match exponent {
        Expr::Constant(e) if e.fract() == 0.0 && e.abs() <= f64::from(i32::MAX) => {
            Ok(base.powi(*e as i32))
        }
        Expr::Constant(e) => Ok(base.powf(*e)),
        _ => Ok(base.pow(exponent.eval(lookup)?)),
    }
}
