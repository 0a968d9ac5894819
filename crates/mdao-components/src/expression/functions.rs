//! Built-in functions.

use mdao_core::Scalar;

/// Functions an expression may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Tanh,
    Atan,
    Exp,
    Log,
    Log10,
    Sqrt,
    Abs,
    Pow,
    Min,
    Max,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "sinh" => Function::Sinh,
            "cosh" => Function::Cosh,
            "tanh" => Function::Tanh,
            "atan" | "arctan" => Function::Atan,
            "exp" => Function::Exp,
            "log" | "ln" => Function::Log,
            "log10" => Function::Log10,
            "sqrt" => Function::Sqrt,
            "abs" => Function::Abs,
            "pow" | "power" => Function::Pow,
            "min" | "minimum" => Function::Min,
            "max" | "maximum" => Function::Max,
            _ => return None,
        };
        Some(func)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Sinh => "sinh",
            Function::Cosh => "cosh",
            Function::Tanh => "tanh",
            Function::Atan => "atan",
            Function::Exp => "exp",
            Function::Log => "log",
            Function::Log10 => "log10",
            Function::Sqrt => "sqrt",
            Function::Abs => "abs",
            Function::Pow => "pow",
            Function::Min => "min",
            Function::Max => "max",
        }
    }

    /// Required argument count; `None` accepts one or more.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Function::Pow => Some(2),
            Function::Min | Function::Max => None,
            _ => Some(1),
        }
    }

    /// Evaluate with arguments already checked against [`arity`](Self::arity).
    pub fn eval<S: Scalar>(&self, args: &[S]) -> S {
        let x = args[0];
        match self {
            Function::Sin => x.sin(),
            Function::Cos => x.cos(),
            Function::Tan => x.tan(),
            Function::Sinh => (x.exp() - (-x).exp()) / S::from_f64(2.0),
            Function::Cosh => (x.exp() + (-x).exp()) / S::from_f64(2.0),
            Function::Tanh => x.tanh(),
            Function::Atan => x.atan(),
            Function::Exp => x.exp(),
            Function::Log => x.ln(),
            Function::Log10 => x.ln() / S::from_f64(std::f64::consts::LN_10),
            Function::Sqrt => x.sqrt(),
            Function::Abs => x.abs(),
            Function::Pow => x.pow(args[1]),
            // Comparisons use the real part so derivative parts follow the selected branch.
            Function::Min => args[1..]
                .iter()
                .fold(x, |m, &v| if v.re() < m.re() { v } else { m }),
            Function::Max => args[1..]
                .iter()
                .fold(x, |m, &v| if v.re() > m.re() { v } else { m }),
        }
    }
}
