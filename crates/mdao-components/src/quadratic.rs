//! The quadratic family: `R(a, b, c, x) = a·x² + b·x + c`.
//!
//! All three components solve for the root
//! `x = (-b + sqrt(b² - 4ac)) / 2a` in `solve_nonlinear` and differ only in
//! how they expose derivatives:
//!
//! - [`QuadraticComp`]: dense partials by finite difference
//! - [`QuadraticLinearize`]: analytic partials and an analytic `solve_linear`
//! - [`QuadraticJacVec`]: matrix-free `apply_linear` and `solve_linear`

use mdao_core::{
    Capabilities, Declarations, DerivMethod, Error, ImplicitComponent, Mode, Partials, Result,
    Vector,
};

/// Default input values of the quadratic family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Default for Coefficients {
    fn default() -> Self {
        Self {
            a: 1.0,
            b: 1.0,
            c: 1.0,
        }
    }
}

fn declare_variables(decl: &mut Declarations, coefficients: Coefficients) {
    decl.add_input("a", coefficients.a);
    decl.add_input("b", coefficients.b);
    decl.add_input("c", coefficients.c);
    decl.add_output("x", 0.0);
}

fn residual(inputs: &Vector, outputs: &Vector, residuals: &mut Vector) -> Result<()> {
    let (a, b, c) = (inputs.value("a")?, inputs.value("b")?, inputs.value("c")?);
    let x = outputs.value("x")?;
    residuals.set_value("x", a * x * x + b * x + c)
}

fn root(inputs: &Vector, outputs: &mut Vector) -> Result<()> {
    let (a, b, c) = (inputs.value("a")?, inputs.value("b")?, inputs.value("c")?);
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 || a == 0.0 {
        return Err(Error::analysis(format!(
            "no real root for a={}, b={}, c={}",
            a, b, c
        )));
    }
    outputs.set_value("x", (-b + disc.sqrt()) / (2.0 * a))
}

/// `1 / dR/dx` at the current point.
fn inverse_jacobian(inputs: &Vector, outputs: &Vector) -> Result<f64> {
    let (a, b) = (inputs.value("a")?, inputs.value("b")?);
    let x = outputs.value("x")?;
    let d = 2.0 * a * x + b;
    if d == 0.0 {
        return Err(Error::analysis("dR/dx vanishes at a double root"));
    }
    Ok(1.0 / d)
}

fn solve_scalar(inv_jac: f64, d_outputs: &mut Vector, d_residuals: &mut Vector, mode: Mode) -> Result<()> {
    match mode {
        Mode::Fwd => d_outputs.set_value("x", inv_jac * d_residuals.value("x")?),
        Mode::Rev => d_residuals.set_value("x", inv_jac * d_outputs.value("x")?),
    }
}

/// Quadratic with a closed-form solve and finite-difference partials.
#[derive(Debug, Clone, Default)]
pub struct QuadraticComp {
    coefficients: Coefficients,
}

impl QuadraticComp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coefficients(a: f64, b: f64, c: f64) -> Self {
        Self {
            coefficients: Coefficients { a, b, c },
        }
    }
}

impl ImplicitComponent for QuadraticComp {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        declare_variables(decl, self.coefficients);
        decl.declare_partials("*", "*")
            .method(DerivMethod::FiniteDifference);
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with_solve_nonlinear()
    }

    fn apply_nonlinear(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        residuals: &mut Vector,
    ) -> Result<()> {
        residual(inputs, outputs, residuals)
    }

    fn solve_nonlinear(&mut self, inputs: &mut Vector, outputs: &mut Vector) -> Result<()> {
        root(inputs, outputs)
    }
}

/// Quadratic with analytic partials and a scalar `solve_linear`.
#[derive(Debug, Clone, Default)]
pub struct QuadraticLinearize {
    coefficients: Coefficients,
    inv_jac: f64,
}

impl QuadraticLinearize {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coefficients(a: f64, b: f64, c: f64) -> Self {
        Self {
            coefficients: Coefficients { a, b, c },
            inv_jac: 0.0,
        }
    }
}

impl ImplicitComponent for QuadraticLinearize {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        declare_variables(decl, self.coefficients);
        decl.declare_partials("*", "*");
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
            .with_solve_nonlinear()
            .with_solve_linear()
    }

    fn apply_nonlinear(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        residuals: &mut Vector,
    ) -> Result<()> {
        residual(inputs, outputs, residuals)
    }

    fn solve_nonlinear(&mut self, inputs: &mut Vector, outputs: &mut Vector) -> Result<()> {
        root(inputs, outputs)
    }

    fn linearize(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        partials: &mut Partials,
    ) -> Result<()> {
        let (a, b) = (inputs.value("a")?, inputs.value("b")?);
        let x = outputs.value("x")?;
        partials.set_scalar("x", "a", x * x)?;
        partials.set_scalar("x", "b", x)?;
        partials.set_scalar("x", "c", 1.0)?;
        partials.set_scalar("x", "x", 2.0 * a * x + b)?;
        self.inv_jac = inverse_jacobian(inputs, outputs)?;
        Ok(())
    }

    fn solve_linear(&mut self, d_outputs: &mut Vector, d_residuals: &mut Vector, mode: Mode) -> Result<()> {
        solve_scalar(self.inv_jac, d_outputs, d_residuals, mode)
    }
}

/// Quadratic with matrix-free derivatives; declares no partials.
#[derive(Debug, Clone, Default)]
pub struct QuadraticJacVec {
    coefficients: Coefficients,
    inv_jac: f64,
}

impl QuadraticJacVec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coefficients(a: f64, b: f64, c: f64) -> Self {
        Self {
            coefficients: Coefficients { a, b, c },
            inv_jac: 0.0,
        }
    }
}

impl ImplicitComponent for QuadraticJacVec {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        declare_variables(decl, self.coefficients);
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
            .with_solve_nonlinear()
            .with_apply_linear()
            .with_solve_linear()
    }

    fn apply_nonlinear(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        residuals: &mut Vector,
    ) -> Result<()> {
        residual(inputs, outputs, residuals)
    }

    fn solve_nonlinear(&mut self, inputs: &mut Vector, outputs: &mut Vector) -> Result<()> {
        root(inputs, outputs)
    }

    fn linearize(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        _partials: &mut Partials,
    ) -> Result<()> {
        self.inv_jac = inverse_jacobian(inputs, outputs)?;
        Ok(())
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
        let (a, b) = (inputs.value("a")?, inputs.value("b")?);
        let x = outputs.value("x")?;
        let dr_dx = 2.0 * a * x + b;
        match mode {
            Mode::Fwd => {
                let dr = dr_dx * d_outputs.value("x")?
                    + x * x * d_inputs.value("a")?
                    + x * d_inputs.value("b")?
                    + d_inputs.value("c")?;
                d_residuals.add("x", &[dr])
            }
            Mode::Rev => {
                let dr = d_residuals.value("x")?;
                d_outputs.add("x", &[dr_dx * dr])?;
                d_inputs.add("a", &[x * x * dr])?;
                d_inputs.add("b", &[x * dr])?;
                d_inputs.add("c", &[dr])
            }
        }
    }

    fn solve_linear(&mut self, d_outputs: &mut Vector, d_residuals: &mut Vector, mode: Mode) -> Result<()> {
        solve_scalar(self.inv_jac, d_outputs, d_residuals, mode)
    }
}
