//! Components defined by a scalar-generic primal function.
//!
//! An [`ImplicitPrimal`] or [`ExplicitPrimal`] writes its residual (or
//! output) computation once, generic over [`Scalar`]. The adapters evaluate
//! it with `f64` for values and derive partials column by column with
//! complex step (`Complex64`), forward-mode dual numbers (`Dual64`) or
//! forward differences.

use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

use num_complex::Complex64;
use num_dual::{Dual64, DualNum};

use crate::component::{Capabilities, ExplicitComponent, ImplicitComponent};
use crate::error::{Error, Result};
use crate::instance::FD_STEP;
use crate::partials::{DerivMethod, Partials};
use crate::variable::{Declarations, VariableMeta};
use crate::vector::Vector;

/// Step used for complex-step partials.
pub const CS_STEP: f64 = 1e-40;

/// Numeric type a primal function can be evaluated with.
pub trait Scalar:
    Copy
    + Debug
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    fn from_f64(value: f64) -> Self;

    /// Real part, used for comparisons and branching.
    fn re(&self) -> f64;

    fn sqrt(self) -> Self;
    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tan(self) -> Self;
    fn tanh(self) -> Self;
    fn atan(self) -> Self;
    fn powi(self, n: i32) -> Self;
    fn powf(self, n: f64) -> Self;

    /// Absolute value that keeps derivative information (sign of the real part).
    fn abs(self) -> Self {
        if self.re() < 0.0 {
            -self
        } else {
            self
        }
    }

    fn pow(self, exponent: Self) -> Self {
        (exponent * self.ln()).exp()
    }
}

impl Scalar for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }
    fn re(&self) -> f64 {
        *self
    }
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
    fn exp(self) -> Self {
        f64::exp(self)
    }
    fn ln(self) -> Self {
        f64::ln(self)
    }
    fn sin(self) -> Self {
        f64::sin(self)
    }
    fn cos(self) -> Self {
        f64::cos(self)
    }
    fn tan(self) -> Self {
        f64::tan(self)
    }
    fn tanh(self) -> Self {
        f64::tanh(self)
    }
    fn atan(self) -> Self {
        f64::atan(self)
    }
    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }
    fn powf(self, n: f64) -> Self {
        f64::powf(self, n)
    }
    fn pow(self, exponent: Self) -> Self {
        f64::powf(self, exponent)
    }
}

impl Scalar for Complex64 {
    fn from_f64(value: f64) -> Self {
        Complex64::new(value, 0.0)
    }
    fn re(&self) -> f64 {
        self.re
    }
    fn sqrt(self) -> Self {
        Complex64::sqrt(self)
    }
    fn exp(self) -> Self {
        Complex64::exp(self)
    }
    fn ln(self) -> Self {
        Complex64::ln(self)
    }
    fn sin(self) -> Self {
        Complex64::sin(self)
    }
    fn cos(self) -> Self {
        Complex64::cos(self)
    }
    fn tan(self) -> Self {
        Complex64::tan(self)
    }
    fn tanh(self) -> Self {
        Complex64::tanh(self)
    }
    fn atan(self) -> Self {
        Complex64::atan(self)
    }
    fn powi(self, n: i32) -> Self {
        Complex64::powi(&self, n)
    }
    fn powf(self, n: f64) -> Self {
        Complex64::powf(self, n)
    }
}

impl Scalar for Dual64 {
    fn from_f64(value: f64) -> Self {
        Dual64::from(value)
    }
    fn re(&self) -> f64 {
        DualNum::re(self)
    }
    fn sqrt(self) -> Self {
        DualNum::sqrt(&self)
    }
    fn exp(self) -> Self {
        DualNum::exp(&self)
    }
    fn ln(self) -> Self {
        DualNum::ln(&self)
    }
    fn sin(self) -> Self {
        DualNum::sin(&self)
    }
    fn cos(self) -> Self {
        DualNum::cos(&self)
    }
    fn tan(self) -> Self {
        DualNum::tan(&self)
    }
    fn tanh(self) -> Self {
        DualNum::tanh(&self)
    }
    fn atan(self) -> Self {
        DualNum::atan(&self)
    }
    fn powi(self, n: i32) -> Self {
        DualNum::powi(&self, n)
    }
    fn powf(self, n: f64) -> Self {
        DualNum::powf(&self, n)
    }
}

/// Named arguments of a primal evaluation, in declaration order.
#[derive(Debug, Clone)]
pub struct PrimalArgs<S> {
    names: Vec<String>,
    values: Vec<Vec<S>>,
}

impl<S: Scalar> PrimalArgs<S> {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, name: &str) -> Result<&[S]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|k| self.values[k].as_slice())
            .ok_or_else(|| Error::VariableNotFound(name.to_string()))
    }

    /// First entry of an argument.
    pub fn scalar(&self, name: &str) -> Result<S> {
        self.get(name)?
            .first()
            .copied()
            .ok_or_else(|| Error::SizeMismatch {
                name: name.to_string(),
                expected: 1,
                actual: 0,
            })
    }

    pub fn by_index(&self, index: usize) -> &[S] {
        &self.values[index]
    }
}

/// An implicit component written as `residuals = R(inputs, outputs)`.
pub trait ImplicitPrimal: Send {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()>;

    /// Argument names of [`compute_primal`](Self::compute_primal): declared
    /// inputs then outputs, each by its primal name.
    fn primal_args(&self) -> Vec<String>;

    /// One residual array per declared output, in declaration order.
    fn compute_primal<S: Scalar>(&self, args: &PrimalArgs<S>) -> Result<Vec<Vec<S>>>;
}

/// An explicit component written as `outputs = f(inputs)`.
pub trait ExplicitPrimal: Send {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()>;

    /// Argument names: declared inputs by their primal names.
    fn primal_args(&self) -> Vec<String>;

    /// One output array per declared output, in declaration order.
    fn compute_primal<S: Scalar>(&self, args: &PrimalArgs<S>) -> Result<Vec<Vec<S>>>;
}

/// Adapter turning an [`ImplicitPrimal`] into an [`ImplicitComponent`].
pub struct ImplicitPrimalComponent<P> {
    primal: P,
    method: DerivMethod,
    args: Vec<VariableMeta>,
    outputs: Vec<VariableMeta>,
}

impl<P: ImplicitPrimal> ImplicitPrimalComponent<P> {
    /// Partials by complex step unless a declaration chooses otherwise.
    pub fn new(primal: P) -> Self {
        Self::with_method(primal, DerivMethod::ComplexStep)
    }

    pub fn with_method(primal: P, method: DerivMethod) -> Self {
        Self {
            primal,
            method,
            args: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn primal(&self) -> &P {
        &self.primal
    }
}

/// Adapter turning an [`ExplicitPrimal`] into an [`ExplicitComponent`].
pub struct ExplicitPrimalComponent<P> {
    primal: P,
    method: DerivMethod,
    args: Vec<VariableMeta>,
    outputs: Vec<VariableMeta>,
}

impl<P: ExplicitPrimal> ExplicitPrimalComponent<P> {
    pub fn new(primal: P) -> Self {
        Self::with_method(primal, DerivMethod::ComplexStep)
    }

    pub fn with_method(primal: P, method: DerivMethod) -> Self {
        Self {
            primal,
            method,
            args: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn primal(&self) -> &P {
        &self.primal
    }
}

fn check_args(actual: Vec<String>, declared: &[VariableMeta]) -> Result<()> {
    let expected: Vec<&str> = declared.iter().map(VariableMeta::primal).collect();
    if actual.iter().map(String::as_str).ne(expected.iter().copied()) {
        return Err(Error::Configuration(format!(
            "compute_primal method args {:?} don't match the expected args {:?}",
            actual, expected
        )));
    }
    Ok(())
}

fn gather(args: &[VariableMeta], vectors: &[&Vector]) -> Result<Vec<Vec<f64>>> {
    args.iter()
        .map(|meta| {
            vectors
                .iter()
                .find(|v| v.contains(&meta.name))
                .ok_or_else(|| Error::VariableNotFound(meta.name.clone()))
                .and_then(|v| v.get(&meta.name).map(<[f64]>::to_vec))
        })
        .collect()
}

fn lift<S: Scalar>(args: &[VariableMeta], values: &[Vec<f64>]) -> PrimalArgs<S> {
    PrimalArgs {
        names: args.iter().map(|m| m.primal().to_string()).collect(),
        values: values
            .iter()
            .map(|v| v.iter().map(|&x| S::from_f64(x)).collect())
            .collect(),
    }
}

/// Object-safe view of a primal function at the three scalar types.
trait PrimalView {
    fn real(&self, args: &PrimalArgs<f64>) -> Result<Vec<Vec<f64>>>;
    fn complex(&self, args: &PrimalArgs<Complex64>) -> Result<Vec<Vec<Complex64>>>;
    fn dual(&self, args: &PrimalArgs<Dual64>) -> Result<Vec<Vec<Dual64>>>;
}

struct ImplicitView<'a, P>(&'a P);
struct ExplicitView<'a, P>(&'a P);

impl<P: ImplicitPrimal> PrimalView for ImplicitView<'_, P> {
    fn real(&self, args: &PrimalArgs<f64>) -> Result<Vec<Vec<f64>>> {
        self.0.compute_primal(args)
    }
    fn complex(&self, args: &PrimalArgs<Complex64>) -> Result<Vec<Vec<Complex64>>> {
        self.0.compute_primal(args)
    }
    fn dual(&self, args: &PrimalArgs<Dual64>) -> Result<Vec<Vec<Dual64>>> {
        self.0.compute_primal(args)
    }
}

impl<P: ExplicitPrimal> PrimalView for ExplicitView<'_, P> {
    fn real(&self, args: &PrimalArgs<f64>) -> Result<Vec<Vec<f64>>> {
        self.0.compute_primal(args)
    }
    fn complex(&self, args: &PrimalArgs<Complex64>) -> Result<Vec<Vec<Complex64>>> {
        self.0.compute_primal(args)
    }
    fn dual(&self, args: &PrimalArgs<Dual64>) -> Result<Vec<Vec<Dual64>>> {
        self.0.compute_primal(args)
    }
}

/// Derivative of every primal result with respect to `values[arg][col]`.
fn derivative_column(
    view: &dyn PrimalView,
    args: &[VariableMeta],
    values: &[Vec<f64>],
    base: &[Vec<f64>],
    (arg, col): (usize, usize),
    method: DerivMethod,
) -> Result<Vec<Vec<f64>>> {
    match method {
        DerivMethod::Exact | DerivMethod::ComplexStep => {
            let mut z = lift::<Complex64>(args, values);
            z.values[arg][col] = Complex64::new(values[arg][col], CS_STEP);
            let out = view.complex(&z)?;
            Ok(out
                .iter()
                .map(|o| o.iter().map(|v| v.im / CS_STEP).collect())
                .collect())
        }
        DerivMethod::Automatic => {
            let mut d = lift::<Dual64>(args, values);
            d.values[arg][col] = Dual64::new(values[arg][col], 1.0);
            let out = view.dual(&d)?;
            Ok(out
                .iter()
                .map(|o| o.iter().map(|v| v.eps).collect())
                .collect())
        }
        DerivMethod::FiniteDifference => {
            let mut r = lift::<f64>(args, values);
            r.values[arg][col] += FD_STEP;
            let out = view.real(&r)?;
            Ok(out
                .iter()
                .zip(base)
                .map(|(o, b)| o.iter().zip(b).map(|(v, b)| (v - b) / FD_STEP).collect())
                .collect())
        }
    }
}

/// Fill every partial block by differentiating the primal function.
fn fill_partials(
    view: &dyn PrimalView,
    args: &[VariableMeta],
    outputs: &[VariableMeta],
    values: &[Vec<f64>],
    partials: &mut Partials,
) -> Result<()> {
    let base = view.real(&lift(args, values))?;
    check_results(&base, outputs)?;

    for (arg, meta) in args.iter().enumerate() {
        let mut methods: Vec<DerivMethod> = Vec::new();
        for sub in partials.iter().filter(|s| s.wrt == meta.name) {
            if !methods.contains(&sub.method()) {
                methods.push(sub.method());
            }
        }
        for method in methods {
            for col in 0..meta.size() {
                let column = derivative_column(view, args, values, &base, (arg, col), method)?;
                for (k, out) in outputs.iter().enumerate() {
                    let Ok(sub) = partials.get_mut(&out.name, &meta.name) else {
                        continue;
                    };
                    if sub.method() != method || sub.is_constant() {
                        continue;
                    }
                    let rows: Vec<usize> = sub
                        .entries()
                        .iter()
                        .filter(|(_, c, _)| *c == col)
                        .map(|(r, _, _)| *r)
                        .collect();
                    for r in rows {
                        sub.set_entry(r, col, column[k][r])?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_results(results: &[Vec<f64>], outputs: &[VariableMeta]) -> Result<()> {
    if results.len() != outputs.len() {
        return Err(Error::SizeMismatch {
            name: "compute_primal results".to_string(),
            expected: outputs.len(),
            actual: results.len(),
        });
    }
    for (r, meta) in results.iter().zip(outputs) {
        if r.len() != meta.size() {
            return Err(Error::SizeMismatch {
                name: meta.name.clone(),
                expected: meta.size(),
                actual: r.len(),
            });
        }
    }
    Ok(())
}

impl<P: ImplicitPrimal> ImplicitComponent for ImplicitPrimalComponent<P> {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        self.primal.setup(decl)?;
        decl.set_default_method(self.method);
        self.args = decl
            .inputs()
            .iter()
            .chain(decl.outputs())
            .cloned()
            .collect();
        self.outputs = decl.outputs().to_vec();
        check_args(self.primal.primal_args(), &self.args)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with_approximated_partials()
    }

    fn apply_nonlinear(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        residuals: &mut Vector,
    ) -> Result<()> {
        let values = gather(&self.args, &[&*inputs, &*outputs])?;
        let result = self.primal.compute_primal(&lift::<f64>(&self.args, &values))?;
        check_results(&result, &self.outputs)?;
        for (meta, r) in self.outputs.iter().zip(result) {
            residuals.set(&meta.name, &r)?;
        }
        Ok(())
    }

    fn linearize(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        partials: &mut Partials,
    ) -> Result<()> {
        let values = gather(&self.args, &[&*inputs, &*outputs])?;
        fill_partials(
            &ImplicitView(&self.primal),
            &self.args,
            &self.outputs,
            &values,
            partials,
        )
    }
}

impl<P: ExplicitPrimal> ExplicitComponent for ExplicitPrimalComponent<P> {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        self.primal.setup(decl)?;
        decl.set_default_method(self.method);
        self.args = decl.inputs().to_vec();
        self.outputs = decl.outputs().to_vec();
        check_args(self.primal.primal_args(), &self.args)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with_approximated_partials()
    }

    fn compute(&mut self, inputs: &mut Vector, outputs: &mut Vector) -> Result<()> {
        let values = gather(&self.args, &[&*inputs])?;
        let result = self.primal.compute_primal(&lift::<f64>(&self.args, &values))?;
        check_results(&result, &self.outputs)?;
        for (meta, r) in self.outputs.iter().zip(result) {
            outputs.set(&meta.name, &r)?;
        }
        Ok(())
    }

    fn compute_partials(&mut self, inputs: &mut Vector, partials: &mut Partials) -> Result<()> {
        let values = gather(&self.args, &[&*inputs])?;
        fill_partials(
            &ExplicitView(&self.primal),
            &self.args,
            &self.outputs,
            &values,
            partials,
        )
    }
}
