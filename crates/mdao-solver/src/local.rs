//! Component-local Newton solver.
//!
//! [`NewtonComponent`] gives an implicit component that has no
//! `solve_nonlinear` of its own one, so run-once sweeps and sub-solves of an
//! outer Newton can converge it in place.

use nalgebra::DMatrix;

use mdao_core::instance::FD_STEP;
use mdao_core::{
    Capabilities, Declarations, DerivMethod, Error, ImplicitComponent, Mode, Partials, Result,
    VarRole, Vector,
};

use crate::newton::NewtonOptions;

/// An implicit component converged by its own Newton iteration.
pub struct NewtonComponent<C> {
    inner: C,
    options: NewtonOptions,
    /// Analytic partials used for the local Jacobian; `None` falls back to
    /// finite differences of the residual.
    partials: Option<Partials>,
}

impl<C: ImplicitComponent> NewtonComponent<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            options: NewtonOptions::default(),
            partials: None,
        }
    }

    pub fn with_options(mut self, options: NewtonOptions) -> Self {
        self.options = options;
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// `dR/d(outputs)` at the current point.
    fn output_jacobian(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        residuals: &Vector,
    ) -> Result<DMatrix<f64>> {
        let n = outputs.len();
        if let Some(partials) = self.partials.as_mut() {
            partials.reset();
            self.inner
                .linearize(inputs, &mut outputs.read_only(), partials)?;
            let jac = partials.to_dense(inputs.layout(), outputs.layout());
            return Ok(jac.columns(0, n).into_owned());
        }

        let base = residuals.as_slice().to_vec();
        let mut perturbed = outputs.clone();
        let mut r = residuals.clone();
        let mut jac = DMatrix::zeros(n, n);
        for k in 0..n {
            perturbed.set_all(outputs.as_slice())?;
            perturbed.as_mut_slice()?[k] += FD_STEP;
            self.inner
                .apply_nonlinear(inputs, &mut perturbed.read_only(), &mut r)?;
            for (row, (r1, r0)) in r.as_slice().iter().zip(&base).enumerate() {
                jac[(row, k)] = (r1 - r0) / FD_STEP;
            }
        }
        Ok(jac)
    }
}

impl<C: ImplicitComponent> ImplicitComponent for NewtonComponent<C> {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        self.inner.setup(decl)?;
        let analytic = self.inner.capabilities().approximates_partials
            || decl.partials().iter().all(|p| p.method == DerivMethod::Exact);
        if analytic && !decl.partials().is_empty() {
            let (inputs, outputs) = decl.layouts()?;
            self.partials = Some(Partials::resolve(
                "local_newton",
                decl.partials(),
                &inputs,
                &outputs,
                true,
            )?);
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities().with_solve_nonlinear()
    }

    fn apply_nonlinear(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        residuals: &mut Vector,
    ) -> Result<()> {
        self.inner.apply_nonlinear(inputs, outputs, residuals)
    }

    fn solve_nonlinear(&mut self, inputs: &mut Vector, outputs: &mut Vector) -> Result<()> {
        if self.inner.capabilities().solve_nonlinear {
            return self.inner.solve_nonlinear(inputs, outputs);
        }
        let mut residuals = Vector::zeros(outputs.owner(), VarRole::Residual, outputs.layout().clone());
        self.inner
            .apply_nonlinear(inputs, &mut outputs.read_only(), &mut residuals)?;
        let norm0 = match residuals.norm() {
            n if n == 0.0 => 1.0,
            n => n,
        };
        let mut norm = residuals.norm();

        let mut iter = 0;
        while norm > self.options.atol && norm / norm0 > self.options.rtol {
            if iter >= self.options.maxiter {
                if self.options.err_on_non_converge {
                    return Err(Error::analysis(format!(
                        "local Newton failed to converge after {} iterations",
                        iter
                    )));
                }
                log::warn!(
                    "'{}': local Newton failed to converge in {} iterations (|r| = {:e})",
                    outputs.owner(),
                    iter,
                    norm
                );
                break;
            }
            iter += 1;
            let jac = self.output_jacobian(inputs, outputs, &residuals)?;
            let rhs = -residuals.to_dvector();
            let du = jac
                .lu()
                .solve(&rhs)
                .ok_or_else(|| Error::analysis("singular jacobian in local Newton solve"))?;
            let u: Vec<f64> = outputs
                .as_slice()
                .iter()
                .zip(du.iter())
                .map(|(u, d)| u + d)
                .collect();
            outputs.set_all(&u)?;
            self.inner
                .apply_nonlinear(inputs, &mut outputs.read_only(), &mut residuals)?;
            norm = residuals.norm();
            log::trace!("'{}': local Newton {} ; {:e}", outputs.owner(), iter, norm);
        }
        Ok(())
    }

    fn guess_nonlinear(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        residuals: &mut Vector,
    ) -> Result<()> {
        self.inner.guess_nonlinear(inputs, outputs, residuals)
    }

    fn linearize(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        partials: &mut Partials,
    ) -> Result<()> {
        self.inner.linearize(inputs, outputs, partials)
    }

    fn apply_linear(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        d_inputs: &mut Vector,
        d_outputs: &mut Vector,
        d_residuals: &mut Vector,
        mode: Mode,
    ) -> Result<()> {
        self.inner
            .apply_linear(inputs, outputs, d_inputs, d_outputs, d_residuals, mode)
    }

    fn solve_linear(&mut self, d_outputs: &mut Vector, d_residuals: &mut Vector, mode: Mode) -> Result<()> {
        self.inner.solve_linear(d_outputs, d_residuals, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdao_core::{Component, ComponentInstance};

    /// x^3 - a = 0, no closed-form solve provided.
    struct CubeRoot {
        method: DerivMethod,
    }

    impl ImplicitComponent for CubeRoot {
        fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
            decl.add_input("a", 27.0);
            decl.add_output("x", 1.0);
            decl.declare_partials("x", "*").method(self.method);
            Ok(())
        }

        fn apply_nonlinear(&mut self, i: &mut Vector, o: &mut Vector, r: &mut Vector) -> Result<()> {
            let x = o.value("x")?;
            r.set_value("x", x * x * x - i.value("a")?)
        }

        fn linearize(&mut self, _i: &mut Vector, o: &mut Vector, p: &mut Partials) -> Result<()> {
            if self.method != DerivMethod::Exact {
                return Ok(());
            }
            let x = o.value("x")?;
            p.set_scalar("x", "x", 3.0 * x * x)?;
            p.set_scalar("x", "a", -1.0)
        }
    }

    #[test]
    fn local_newton_with_analytic_partials() {
        let comp = NewtonComponent::new(CubeRoot {
            method: DerivMethod::Exact,
        })
        .with_options(NewtonOptions::default().with_maxiter(30));
        let mut inst = ComponentInstance::new("cube", Component::implicit(comp)).unwrap();
        assert!(inst.capabilities().solve_nonlinear);
        assert!(inst.run_solve_nonlinear().unwrap());
        assert!((inst.outputs().value("x").unwrap() - 3.0).abs() < 1e-9);
        assert!(!inst.any_read_only());
    }

    #[test]
    fn local_newton_with_finite_differences() {
        let comp = NewtonComponent::new(CubeRoot {
            method: DerivMethod::FiniteDifference,
        })
        .with_options(NewtonOptions::default().with_maxiter(30));
        let mut inst = ComponentInstance::new("cube", Component::implicit(comp)).unwrap();
        inst.run_solve_nonlinear().unwrap();
        assert!((inst.outputs().value("x").unwrap() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn local_newton_strict_failure() {
        let comp = NewtonComponent::new(CubeRoot {
            method: DerivMethod::Exact,
        })
        .with_options(NewtonOptions::default().with_maxiter(1).with_err_on_non_converge(true));
        let mut inst = ComponentInstance::new("cube", Component::implicit(comp)).unwrap();
        let err = inst.run_solve_nonlinear().unwrap_err();
        assert!(err.is_analysis_failure());
        assert!(!inst.any_read_only());
    }
}
