//! Linear systems as implicit components: `R(A, b, x) = A·x - b`.

use mdao_core::{
    Component, Declarations, DerivMethod, Error, ImplicitPrimal, ImplicitPrimalComponent,
    PrimalArgs, Result, Scalar,
};

/// Residual `A·x - b` for an `n × n` matrix `A`, written as a primal so its
/// partials come from complex step.
///
/// Variables are named `{prefix}A`, `{prefix}b` and `{prefix}x`; the primal
/// function always sees them as `A`, `b` and `x`. The component has no
/// `solve_nonlinear` of its own: converge it with an outer Newton solver or
/// wrap the adapter in a component-local Newton.
#[derive(Debug, Clone)]
pub struct LinearSystemComp {
    size: usize,
    prefix: String,
}

impl LinearSystemComp {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            prefix: String::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Absolute variable name for a primal argument (`A`, `b` or `x`).
    pub fn var(&self, primal: &str) -> String {
        format!("{}{}", self.prefix, primal)
    }

    /// The primal adapter, ready to be wrapped further.
    pub fn into_primal_component(self) -> ImplicitPrimalComponent<Self> {
        ImplicitPrimalComponent::new(self)
    }

    pub fn component(self) -> Component {
        Component::implicit(self.into_primal_component())
    }
}

impl ImplicitPrimal for LinearSystemComp {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        let n = self.size;
        if n == 0 {
            return Err(Error::Configuration(
                "LinearSystemComp size must be positive".to_string(),
            ));
        }
        let (a, b, x) = (self.var("A"), self.var("b"), self.var("x"));

        let mut identity = vec![0.0; n * n];
        for k in 0..n {
            identity[k * n + k] = 1.0;
        }
        decl.add_input(&a, identity).primal_name("A");
        decl.add_input(&b, vec![1.0; n]).primal_name("b");
        decl.add_output(&x, vec![1.0; n]).primal_name("x");

        // Row i of the residual sees row i of A.
        let (rows, cols): (Vec<usize>, Vec<usize>) =
            (0..n).flat_map(|i| (0..n).map(move |j| (i, i * n + j))).unzip();
        decl.declare_partials(&x, &a).rows_cols(rows, cols);
        decl.declare_partials(&x, &b)
            .rows_cols((0..n).collect(), (0..n).collect())
            .val(vec![-1.0; n]);
        decl.declare_partials(&x, &x).method(DerivMethod::ComplexStep);
        Ok(())
    }

    fn primal_args(&self) -> Vec<String> {
        ["A", "b", "x"].iter().map(|s| s.to_string()).collect()
    }

    fn compute_primal<S: Scalar>(&self, args: &PrimalArgs<S>) -> Result<Vec<Vec<S>>> {
        let n = self.size;
        let (a, b, x) = (args.get("A")?, args.get("b")?, args.get("x")?);
        let r = (0..n)
            .map(|i| {
                let ax = (0..n).fold(S::from_f64(0.0), |acc, j| acc + a[i * n + j] * x[j]);
                ax - b[i]
            })
            .collect();
        Ok(vec![r])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdao_core::{ComponentInstance, Mode};

    fn instance(prefix: &str) -> ComponentInstance {
        let comp = LinearSystemComp::new(2).with_prefix(prefix).component();
        let mut inst = ComponentInstance::new("lin", comp).unwrap();
        inst.inputs_mut()
            .set(&format!("{}A", prefix), &[2.0, 1.0, 1.0, 3.0])
            .unwrap();
        inst.inputs_mut()
            .set(&format!("{}b", prefix), &[3.0, 5.0])
            .unwrap();
        inst
    }

    #[test]
    fn test_residual() {
        let mut inst = instance("");
        inst.outputs_mut().set("x", &[1.0, 1.0]).unwrap();
        inst.run_apply_nonlinear().unwrap();
        assert_eq!(inst.residuals().get("x").unwrap(), &[0.0, -1.0]);
    }

    #[test]
    fn test_prefixed_names_map_to_primal_args() {
        let mut inst = instance("foo:");
        assert!(inst.inputs().contains("foo:A"));
        assert_eq!(inst.input_meta("foo:A").unwrap().primal(), "A");
        inst.outputs_mut().set("foo:x", &[0.8, 1.4]).unwrap();
        inst.run_apply_nonlinear().unwrap();
        assert!(inst.residuals().norm() < 1e-12);
    }

    #[test]
    fn test_partials() {
        let mut inst = instance("");
        inst.outputs_mut().set("x", &[0.5, -1.0]).unwrap();
        inst.run_linearize().unwrap();
        let p = inst.partials();
        assert_eq!(p.get("x", "x").unwrap().to_dense(), nalgebra::dmatrix![2.0, 1.0; 1.0, 3.0]);
        let da = p.get("x", "A").unwrap();
        assert_eq!(da.nnz(), 4);
        assert_eq!(da.get(0, 0), 0.5);
        assert_eq!(da.get(0, 1), -1.0);
        assert_eq!(da.get(1, 2), 0.5);
        assert_eq!(da.get(1, 3), -1.0);
        assert_eq!(p.get("x", "b").unwrap().values(), &[-1.0, -1.0]);
    }

    #[test]
    fn test_solve_linear_falls_back_to_output_block() {
        let mut inst = instance("");
        inst.run_linearize().unwrap();
        inst.vectors_mut().d_residuals.set("x", &[3.0, 5.0]).unwrap();
        inst.run_solve_linear(Mode::Fwd).unwrap();
        let d = inst.vectors().d_outputs.get("x").unwrap().to_vec();
        assert!((d[0] - 0.8).abs() < 1e-12 && (d[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_zero_size_rejected() {
        let err = ComponentInstance::new("lin", LinearSystemComp::new(0).component()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
