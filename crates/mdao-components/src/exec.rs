//! Components defined by algebraic expressions.

use std::collections::HashMap;

use mdao_core::{
    Component, Declarations, DerivMethod, ExplicitPrimal, ExplicitPrimalComponent, PrimalArgs,
    Result, Scalar,
};

use crate::error::Error;
use crate::expression::{parse_equation, Equation};

/// Initial value of variables without an explicit default.
pub const DEFAULT_VALUE: f64 = 1.0;

/// An explicit component whose outputs are given by equations such as
/// `y = .03*a*x*x - .04*a*a*b*x - c`.
///
/// Every name on a right-hand side becomes a scalar input. Partials are
/// declared only where an output depends on an input and are computed by
/// complex step unless another method is chosen.
///
/// ```ignore
/// let comp = ExecComp::new(&["y = 2*x + z**2"])?.with_default("x", 3.0).component();
/// ```
#[derive(Debug, Clone)]
pub struct ExecComp {
    equations: Vec<Equation>,
    inputs: Vec<String>,
    defaults: HashMap<String, f64>,
}

impl ExecComp {
    pub fn new(equations: &[&str]) -> crate::Result<Self> {
        if equations.is_empty() {
            return Err(Error::InvalidDefinition(
                "ExecComp needs at least one equation".to_string(),
            ));
        }
        let equations = equations
            .iter()
            .map(|eq| parse_equation(eq))
            .collect::<crate::Result<Vec<_>>>()?;

        let mut inputs: Vec<String> = Vec::new();
        for (k, eq) in equations.iter().enumerate() {
            if equations[..k].iter().any(|prev| prev.output == eq.output) {
                return Err(Error::InvalidDefinition(format!(
                    "output '{}' is assigned more than once",
                    eq.output
                )));
            }
            for name in eq.expr.variables() {
                if !inputs.contains(&name) {
                    inputs.push(name);
                }
            }
        }
        if let Some(eq) = equations.iter().find(|eq| inputs.contains(&eq.output)) {
            return Err(Error::InvalidDefinition(format!(
                "'{}' is used both as an output and as an input",
                eq.output
            )));
        }

        log::debug!(
            "ExecComp: {} equation(s), inputs {:?}",
            equations.len(),
            inputs
        );
        Ok(Self {
            equations,
            inputs,
            defaults: HashMap::new(),
        })
    }

    /// Initial value of an input or output.
    pub fn with_default(mut self, name: &str, value: f64) -> Self {
        self.defaults.insert(name.to_string(), value);
        self
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.equations.iter().map(|eq| eq.output.as_str())
    }

    /// Wrap into a component with complex-step partials.
    pub fn component(self) -> Component {
        Component::explicit(ExplicitPrimalComponent::new(self))
    }

    pub fn component_with_method(self, method: DerivMethod) -> Component {
        Component::explicit(ExplicitPrimalComponent::with_method(self, method))
    }

    fn default_of(&self, name: &str) -> f64 {
        self.defaults.get(name).copied().unwrap_or(DEFAULT_VALUE)
    }
}

impl ExplicitPrimal for ExecComp {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        for name in &self.inputs {
            decl.add_input(name, self.default_of(name));
        }
        for eq in &self.equations {
            decl.add_output(&eq.output, self.default_of(&eq.output));
        }
        for eq in &self.equations {
            for name in self.inputs.iter().filter(|name| eq.expr.depends_on(name)) {
                decl.declare_partials(&eq.output, name);
            }
        }
        Ok(())
    }

    fn primal_args(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn compute_primal<S: Scalar>(&self, args: &PrimalArgs<S>) -> Result<Vec<Vec<S>>> {
        let lookup = |name: &str| args.scalar(name).ok();
        self.equations
            .iter()
            .map(|eq| eq.expr.eval(&lookup).map(|v| vec![v]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdao_core::ComponentInstance;

    fn paraboloid() -> ExecComp {
        ExecComp::new(&["f = (x - 3)**2 + x*y + (y + 4)**2 - 3"]).unwrap()
    }

    #[test]
    fn test_inputs_in_order_of_appearance() {
        let comp = ExecComp::new(&["y = .03*a*x*x - .04*a*a*b*x - c", "z = 2*w"]).unwrap();
        assert_eq!(comp.inputs(), &["a", "x", "b", "c", "w"]);
        assert_eq!(comp.outputs().collect::<Vec<_>>(), vec!["y", "z"]);
    }

    #[test]
    fn test_compute_and_partials() {
        for method in [
            DerivMethod::ComplexStep,
            DerivMethod::Automatic,
            DerivMethod::FiniteDifference,
        ] {
            let comp = paraboloid()
                .with_default("x", 1.0)
                .with_default("y", 2.0)
                .component_with_method(method);
            let mut inst = ComponentInstance::new("parab", comp).unwrap();
            inst.run_solve_nonlinear().unwrap();
            // (1-3)^2 + 2 + 36 - 3
            assert_eq!(inst.outputs().value("f").unwrap(), 39.0);

            inst.run_linearize().unwrap();
            let tol = if method == DerivMethod::FiniteDifference { 1e-5 } else { 1e-12 };
            // df/dx = 2(x-3) + y, df/dy = x + 2(y+4)
            let dfdx = inst.partials().get("f", "x").unwrap().values()[0];
            let dfdy = inst.partials().get("f", "y").unwrap().values()[0];
            assert!((dfdx + 2.0).abs() < tol, "{:?}: {}", method, dfdx);
            assert!((dfdy - 13.0).abs() < tol, "{:?}: {}", method, dfdy);
        }
    }

    #[test]
    fn test_sparsity_follows_dependencies() {
        let comp = ExecComp::new(&["y1 = 2*a", "y2 = b*b"]).unwrap().component();
        let inst = ComponentInstance::new("c", comp).unwrap();
        assert!(inst.partials().contains("y1", "a"));
        assert!(!inst.partials().contains("y1", "b"));
        assert!(inst.partials().contains("y2", "b"));
        assert!(!inst.partials().contains("y2", "a"));
    }

    #[test]
    fn test_invalid_definitions() {
        assert!(matches!(ExecComp::new(&[]), Err(Error::InvalidDefinition(_))));
        assert!(matches!(
            ExecComp::new(&["y = x", "y = 2*x"]),
            Err(Error::InvalidDefinition(_))
        ));
        assert!(matches!(
            ExecComp::new(&["y = x", "z = y"]),
            Err(Error::InvalidDefinition(_))
        ));
        assert!(matches!(ExecComp::new(&["y = foo(x)"]), Err(Error::UnknownFunction(_))));
    }

    #[test]
    fn test_constant_output_has_no_inputs() {
        let mut inst = ComponentInstance::new("k", ExecComp::new(&["y = 2*pi"]).unwrap().component())
            .unwrap();
        assert_eq!(inst.num_inputs(), 0);
        inst.run_solve_nonlinear().unwrap();
        assert!((inst.outputs().value("y").unwrap() - 2.0 * std::f64::consts::PI).abs() < 1e-15);
    }

    #[test]
    fn test_transcendental_partial() {
        let comp = ExecComp::new(&["y = sqrt(x) * exp(0.5*z)"]).unwrap().component();
        let mut inst = ComponentInstance::new("r", comp).unwrap();
        inst.inputs_mut().set_all(&[4.0, 0.0]).unwrap();
        inst.run_solve_nonlinear().unwrap();
        assert_eq!(inst.outputs().value("y").unwrap(), 2.0);
        inst.run_linearize().unwrap();
        assert!((inst.partials().get("y", "x").unwrap().values()[0] - 0.25).abs() < 1e-14);
        assert!((inst.partials().get("y", "z").unwrap().values()[0] - 1.0).abs() < 1e-14);
    }
}
