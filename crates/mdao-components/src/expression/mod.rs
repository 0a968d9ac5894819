//! Mathematical expression parsing and evaluation for expression components.
//!
//! Supports expressions like:
//! - `.03*a*x*x - .04*a*a*b*x - c` - arithmetic on named variables
//! - `x**2 + 3*x` - powers (`**` or `^`)
//! - `sin(2 * pi * t) + exp(-z)` - built-in functions and constants
//!
//! Evaluation is generic over [`Scalar`](mdao_core::Scalar), so the same
//! tree yields values in `f64` and derivatives by complex step or dual
//! numbers.

mod ast;
mod eval;
mod functions;
mod parser;

pub use ast::{BinaryOp, Equation, Expr, UnaryOp};
pub use functions::Function;
pub use parser::{parse_equation, parse_expression};

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::f64::consts::{E, PI};

    use num_complex::Complex64;

    use super::*;
    use crate::error::Error;

    fn eval(input: &str, vars: &[(&str, f64)]) -> f64 {
        let vars: HashMap<&str, f64> = vars.iter().copied().collect();
        parse_expression(input)
            .unwrap()
            .eval(&|name: &str| vars.get(name).copied())
            .unwrap()
    }

    #[test]
    fn test_parse_constant() {
        let expr = parse_expression("42").unwrap();
        assert_eq!(expr, Expr::Constant(42.0));
        assert_eq!(eval("1.5e3", &[]), 1500.0);
        assert_eq!(eval(".5", &[]), 0.5);
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2", &[]), 3.0);
        assert_eq!(eval("2 + 3 * 4", &[]), 14.0);
        assert_eq!(eval("(2 + 3) * 4", &[]), 20.0);
        assert_eq!(eval("8 / 4 / 2", &[]), 1.0);
        assert_eq!(eval("10 - 4 - 3", &[]), 3.0);
    }

    #[test]
    fn test_power_forms() {
        assert_eq!(eval("2^3", &[]), 8.0);
        assert_eq!(eval("2**3", &[]), 8.0);
        assert_eq!(eval("2**3**2", &[]), 512.0);
        assert_eq!(eval("-2**2", &[]), -4.0);
        assert_eq!(eval("x**-1", &[("x", 4.0)]), 0.25);
        assert_eq!(eval("(-2)**3", &[]), -8.0);
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(parse_expression("-5").unwrap(), Expr::Constant(-5.0));
        assert_eq!(eval("-x", &[("x", 2.0)]), -2.0);
        assert_eq!(eval("3 * -x", &[("x", 2.0)]), -6.0);
    }

    #[test]
    fn test_variables_and_constants() {
        assert_eq!(eval("pi", &[]), PI);
        assert_eq!(eval("e", &[]), E);
        let expr = parse_expression(".03*a*x*x - .04*a*a*b*x - c").unwrap();
        assert_eq!(expr.variables(), vec!["a", "x", "b", "c"]);
        assert!(expr.depends_on("b"));
        assert!(!expr.depends_on("y"));
    }

    #[test]
    fn test_functions() {
        assert!(eval("sin(0)", &[]).abs() < 1e-15);
        assert!((eval("exp(1)", &[]) - E).abs() < 1e-12);
        assert!((eval("log10(1000)", &[]) - 3.0).abs() < 1e-12);
        assert!((eval("cosh(0) + sinh(0)", &[]) - 1.0).abs() < 1e-15);
        assert_eq!(eval("pow(2, 10)", &[]), 1024.0);
        assert_eq!(eval("max(1, x, 3)", &[("x", 7.0)]), 7.0);
        assert_eq!(eval("min(x, 3)", &[("x", 7.0)]), 3.0);
        assert_eq!(eval("abs(-2.5)", &[]), 2.5);
    }

    #[test]
    fn test_complex_step_derivative() {
        // d/dx (x^2 sin(x)) = 2x sin(x) + x^2 cos(x)
        let expr = parse_expression("x**2 * sin(x)").unwrap();
        let x = 0.7_f64;
        let h = 1e-40;
        let z = expr
            .eval(&|name: &str| (name == "x").then(|| Complex64::new(x, h)))
            .unwrap();
        let expected = 2.0 * x * x.sin() + x * x * x.cos();
        assert!((z.im / h - expected).abs() < 1e-14);
    }

    #[test]
    fn test_unknown_variable() {
        let expr = parse_expression("a + b").unwrap();
        let err = expr
            .eval::<f64, _>(&|name: &str| (name == "a").then_some(1.0))
            .unwrap_err();
        assert_eq!(err, mdao_core::Error::VariableNotFound("b".to_string()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_expression("2 +"), Err(Error::Parse { .. })));
        assert!(matches!(parse_expression("(1 + 2"), Err(Error::Parse { .. })));
        assert!(matches!(parse_expression("2x"), Err(Error::Parse { pos: 1, .. })));
        assert!(matches!(parse_expression("1 $ 2"), Err(Error::Parse { pos: 2, .. })));
        assert_eq!(
            parse_expression("foo(1)").unwrap_err(),
            Error::UnknownFunction("foo".to_string())
        );
        assert!(matches!(
            parse_expression("pow(1)"),
            Err(Error::Arity { expected: 2, actual: 1, .. })
        ));
        assert!(matches!(parse_expression("max()"), Err(Error::Arity { .. })));
    }

    #[test]
    fn test_parse_equation() {
        let eq = parse_equation("y = 2*x + 1").unwrap();
        assert_eq!(eq.output, "y");
        assert_eq!(eq.expr.variables(), vec!["x"]);
        assert!(matches!(parse_equation("2*x + 1"), Err(Error::Parse { .. })));
        assert!(matches!(parse_equation("1y = x"), Err(Error::Parse { .. })));
        assert!(matches!(parse_equation("y = x +"), Err(Error::Parse { pos: 7, .. })));
    }
}
