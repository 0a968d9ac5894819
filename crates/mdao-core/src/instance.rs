//! A component bound to its vectors and partials.
//!
//! [`ComponentInstance`] owns the variable vectors of one component and is
//! the only place callbacks are invoked. Each `run_*` method hands the
//! component read-only guards for the arguments it must not modify; the
//! guards are released on every return path, so after any error every
//! vector of the instance is writable again.

use std::sync::Arc;

use nalgebra::DMatrix;

use crate::component::{Capabilities, Component, Mode};
use crate::error::{Error, Result};
use crate::partials::{DerivMethod, Partials};
use crate::variable::{Declarations, VariableMeta};
use crate::vector::{AccessMode, VarLayout, VarRole, Vector};

/// Step used for finite-difference partials.
pub const FD_STEP: f64 = 1e-6;

/// The six vectors of a component.
#[derive(Debug, Clone)]
pub struct ComponentVectors {
    pub inputs: Vector,
    pub outputs: Vector,
    pub residuals: Vector,
    pub d_inputs: Vector,
    pub d_outputs: Vector,
    pub d_residuals: Vector,
}

impl ComponentVectors {
    fn new(path: &str, decl: &Declarations, inputs: Arc<VarLayout>, outputs: Arc<VarLayout>) -> Result<Self> {
        let input_vals: Vec<f64> = decl.inputs().iter().flat_map(|m| m.val.clone()).collect();
        let output_vals: Vec<f64> = decl.outputs().iter().flat_map(|m| m.val.clone()).collect();
        Ok(Self {
            inputs: Vector::from_values(path, VarRole::Input, inputs.clone(), input_vals)?,
            outputs: Vector::from_values(path, VarRole::Output, outputs.clone(), output_vals)?,
            residuals: Vector::zeros(path, VarRole::Residual, outputs.clone()),
            d_inputs: Vector::zeros(path, VarRole::Input, inputs),
            d_outputs: Vector::zeros(path, VarRole::Output, outputs.clone()),
            d_residuals: Vector::zeros(path, VarRole::Residual, outputs),
        })
    }

    fn all_mut(&mut self) -> [&mut Vector; 6] {
        [
            &mut self.inputs,
            &mut self.outputs,
            &mut self.residuals,
            &mut self.d_inputs,
            &mut self.d_outputs,
            &mut self.d_residuals,
        ]
    }
}

/// A set-up component with its storage.
#[derive(Debug)]
pub struct ComponentInstance {
    path: String,
    component: Component,
    decl: Declarations,
    vectors: ComponentVectors,
    partials: Partials,
}

impl ComponentInstance {
    /// Run `setup` and allocate vectors and partial storage.
    pub fn new(path: impl Into<String>, mut component: Component) -> Result<Self> {
        let path = path.into();
        let mut decl = Declarations::new();
        component.setup(&mut decl).map_err(|e| e.in_system(&path))?;
        let (inputs, outputs) = decl.layouts().map_err(|e| prefix_config(&path, e))?;

        let caps = component.capabilities();
        if !caps.approximates_partials {
            if let Some(p) = decl.partials().iter().find(|p| {
                matches!(p.method, DerivMethod::ComplexStep | DerivMethod::Automatic)
            }) {
                return Err(Error::Configuration(format!(
                    "'{}': d({})/d({}) uses {:?}, which requires a primal component",
                    path, p.of, p.wrt, p.method
                )));
            }
        }

        let partials = Partials::resolve(
            &path,
            decl.partials(),
            &inputs,
            &outputs,
            !component.is_explicit(),
        )?;
        let vectors = ComponentVectors::new(&path, &decl, inputs, outputs)?;
        log::debug!(
            "set up '{}': {} inputs, {} outputs, {} partial blocks",
            path,
            decl.inputs().len(),
            decl.outputs().len(),
            partials.len()
        );
        Ok(Self {
            path,
            component,
            decl,
            vectors,
            partials,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn is_explicit(&self) -> bool {
        self.component.is_explicit()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.component.capabilities()
    }

    pub fn declarations(&self) -> &Declarations {
        &self.decl
    }

    pub fn input_meta(&self, name: &str) -> Option<&VariableMeta> {
        self.decl.input(name)
    }

    pub fn output_meta(&self, name: &str) -> Option<&VariableMeta> {
        self.decl.output(name)
    }

    pub fn vectors(&self) -> &ComponentVectors {
        &self.vectors
    }

    pub fn vectors_mut(&mut self) -> &mut ComponentVectors {
        &mut self.vectors
    }

    pub fn inputs(&self) -> &Vector {
        &self.vectors.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut Vector {
        &mut self.vectors.inputs
    }

    pub fn outputs(&self) -> &Vector {
        &self.vectors.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut Vector {
        &mut self.vectors.outputs
    }

    pub fn residuals(&self) -> &Vector {
        &self.vectors.residuals
    }

    pub fn residuals_mut(&mut self) -> &mut Vector {
        &mut self.vectors.residuals
    }

    pub fn partials(&self) -> &Partials {
        &self.partials
    }

    pub fn num_outputs(&self) -> usize {
        self.vectors.outputs.len()
    }

    pub fn num_inputs(&self) -> usize {
        self.vectors.inputs.len()
    }

    /// Force every vector back to writable mode.
    pub fn release_all(&mut self) {
        for v in self.vectors.all_mut() {
            v.set_mode(AccessMode::ReadWrite);
        }
    }

    /// Whether any vector is currently read-only.
    pub fn any_read_only(&self) -> bool {
        let v = &self.vectors;
        [&v.inputs, &v.outputs, &v.residuals, &v.d_inputs, &v.d_outputs, &v.d_residuals]
            .iter()
            .any(|v| v.is_read_only())
    }

    /// Evaluate residuals at the current inputs and outputs.
    ///
    /// Explicit components compute into a scratch copy of their outputs and
    /// report `outputs - f(inputs)`.
    pub fn run_apply_nonlinear(&mut self) -> Result<()> {
        let v = &mut self.vectors;
        let result = match &mut self.component {
            Component::Implicit(c) => c.apply_nonlinear(
                &mut v.inputs.read_only(),
                &mut v.outputs.read_only(),
                &mut v.residuals,
            ),
            Component::Explicit(c) => {
                let mut computed = v.outputs.clone();
                c.compute(&mut v.inputs.read_only(), &mut computed)
                    .and_then(|_| {
                        let r: Vec<f64> = v
                            .outputs
                            .as_slice()
                            .iter()
                            .zip(computed.as_slice())
                            .map(|(o, f)| o - f)
                            .collect();
                        v.residuals.set_all(&r)
                    })
            }
        };
        result.map_err(|e| e.in_system(&self.path))
    }

    /// Run the component's own nonlinear solve, if it has one.
    ///
    /// Returns whether anything ran.
    pub fn run_solve_nonlinear(&mut self) -> Result<bool> {
        let v = &mut self.vectors;
        let result = match &mut self.component {
            Component::Explicit(c) => c
                .compute(&mut v.inputs.read_only(), &mut v.outputs)
                .and_then(|_| v.residuals.fill(0.0))
                .map(|_| true),
            Component::Implicit(c) if c.capabilities().solve_nonlinear => c
                .solve_nonlinear(&mut v.inputs.read_only(), &mut v.outputs)
                .map(|_| true),
            Component::Implicit(_) => Ok(false),
        };
        result.map_err(|e| e.in_system(&self.path))
    }

    /// Invoke `guess_nonlinear` if present. Residuals must be current.
    pub fn run_guess_nonlinear(&mut self) -> Result<bool> {
        let v = &mut self.vectors;
        let result = match &mut self.component {
            Component::Implicit(c) if c.capabilities().guess_nonlinear => c
                .guess_nonlinear(
                    &mut v.inputs.read_only(),
                    &mut v.outputs,
                    &mut v.residuals.read_only(),
                )
                .map(|_| true),
            _ => Ok(false),
        };
        result.map_err(|e| e.in_system(&self.path))
    }

    /// Rebuild partials at the current point.
    pub fn run_linearize(&mut self) -> Result<()> {
        self.partials.reset();
        let v = &mut self.vectors;
        let result = match &mut self.component {
            Component::Implicit(c) => c.linearize(
                &mut v.inputs.read_only(),
                &mut v.outputs.read_only(),
                &mut self.partials,
            ),
            Component::Explicit(c) => {
                c.compute_partials(&mut v.inputs.read_only(), &mut self.partials)
            }
        };
        result.map_err(|e| e.in_system(&self.path))?;

        if !self.capabilities().approximates_partials {
            self.approximate_fd_partials()?;
        }
        Ok(())
    }

    /// Jacobian-vector product on the derivative vectors.
    ///
    /// Forward: `d_residuals = J [d_outputs; d_inputs]`.
    /// Reverse: `[d_outputs; d_inputs] = Jᵀ d_residuals`.
    /// The written side is cleared first.
    pub fn run_apply_linear(&mut self, mode: Mode) -> Result<()> {
        let caps = self.capabilities();
        let explicit = self.is_explicit();
        let v = &mut self.vectors;
        match mode {
            Mode::Fwd => v.d_residuals.fill(0.0)?,
            Mode::Rev => {
                v.d_inputs.fill(0.0)?;
                v.d_outputs.fill(0.0)?;
            }
        }

        let result = match &mut self.component {
            Component::Implicit(c) if caps.apply_linear => match mode {
                Mode::Fwd => c.apply_linear(
                    &mut v.inputs.read_only(),
                    &mut v.outputs.read_only(),
                    &mut v.d_inputs.read_only(),
                    &mut v.d_outputs.read_only(),
                    &mut v.d_residuals,
                    mode,
                ),
                Mode::Rev => c.apply_linear(
                    &mut v.inputs.read_only(),
                    &mut v.outputs.read_only(),
                    &mut v.d_inputs,
                    &mut v.d_outputs,
                    &mut v.d_residuals.read_only(),
                    mode,
                ),
            },
            Component::Explicit(c) if caps.apply_linear => match mode {
                Mode::Fwd => {
                    let mut jv = Vector::zeros(&self.path, VarRole::Output, v.outputs.layout().clone());
                    c.compute_jacvec_product(
                        &mut v.inputs.read_only(),
                        &mut v.d_inputs.read_only(),
                        &mut jv,
                        mode,
                    )
                    .and_then(|_| {
                        let r: Vec<f64> = v
                            .d_outputs
                            .as_slice()
                            .iter()
                            .zip(jv.as_slice())
                            .map(|(d, j)| d - j)
                            .collect();
                        v.d_residuals.set_all(&r)
                    })
                }
                Mode::Rev => {
                    let seed: Vec<f64> = v.d_residuals.as_slice().iter().map(|r| -r).collect();
                    let mut seed = Vector::from_values(
                        &self.path,
                        VarRole::Output,
                        v.outputs.layout().clone(),
                        seed,
                    )?;
                    let mut seed = seed.read_only();
                    let result = c.compute_jacvec_product(
                        &mut v.inputs.read_only(),
                        &mut v.d_inputs,
                        &mut seed,
                        mode,
                    );
                    result.and_then(|_| v.d_outputs.set_all(v.d_residuals.as_slice()))
                }
            },
            _ => apply_partials(&self.partials, v, explicit, mode),
        };
        result.map_err(|e| e.in_system(&self.path))
    }

    /// Invert `dR/d(outputs)` on the derivative vectors.
    ///
    /// Explicit components are the identity. Implicit components without a
    /// `solve_linear` hook fall back to a dense solve of their output block.
    pub fn run_solve_linear(&mut self, mode: Mode) -> Result<()> {
        let fallback = match &self.component {
            Component::Implicit(c) if !c.capabilities().solve_linear => Some(self.output_block()),
            _ => None,
        };
        let v = &mut self.vectors;
        let result = match (&mut self.component, fallback) {
            (Component::Explicit(_), _) => match mode {
                Mode::Fwd => v.d_outputs.set_all(v.d_residuals.as_slice()),
                Mode::Rev => v.d_residuals.set_all(v.d_outputs.as_slice()),
            },
            (Component::Implicit(c), None) => match mode {
                Mode::Fwd => c.solve_linear(&mut v.d_outputs, &mut v.d_residuals.read_only(), mode),
                Mode::Rev => c.solve_linear(&mut v.d_outputs.read_only(), &mut v.d_residuals, mode),
            },
            (Component::Implicit(_), Some(block)) => {
                let (rhs, lhs) = match mode {
                    Mode::Fwd => (v.d_residuals.to_dvector(), block),
                    Mode::Rev => (v.d_outputs.to_dvector(), block.transpose()),
                };
                match lhs.lu().solve(&rhs) {
                    Some(x) => match mode {
                        Mode::Fwd => v.d_outputs.set_all(x.as_slice()),
                        Mode::Rev => v.d_residuals.set_all(x.as_slice()),
                    },
                    None => Err(Error::analysis("singular d(residual)/d(output) block")),
                }
            }
        };
        result.map_err(|e| e.in_system(&self.path))
    }

    /// Dense `d(residual)/d([outputs; inputs])` from stored partials.
    ///
    /// Explicit components contribute `[I, -df/dx]`.
    pub fn jacobian(&self) -> DMatrix<f64> {
        let inputs = self.vectors.inputs.layout();
        let outputs = self.vectors.outputs.layout();
        let mut jac = self.partials.to_dense(inputs, outputs);
        if self.is_explicit() {
            let n = outputs.size();
            jac.scale_mut(-1.0);
            for k in 0..n {
                jac[(k, k)] = 1.0;
            }
        }
        jac
    }

    /// Whether [`jacobian`](Self::jacobian) describes the component, i.e. it
    /// does not rely on matrix-free products.
    pub fn has_assembled_jacobian(&self) -> bool {
        !self.capabilities().apply_linear
    }

    fn output_block(&self) -> DMatrix<f64> {
        let n = self.num_outputs();
        self.jacobian().columns(0, n).into_owned()
    }

    /// Fill `FiniteDifference` blocks by perturbing inputs and outputs.
    fn approximate_fd_partials(&mut self) -> Result<()> {
        let fd_wrts: Vec<(String, bool)> = {
            let mut wrts: Vec<(String, bool)> = Vec::new();
            for sub in self.partials.iter() {
                if sub.method() == DerivMethod::FiniteDifference
                    && !wrts.iter().any(|(w, _)| w == &sub.wrt)
                {
                    wrts.push((sub.wrt.clone(), sub.wrt_is_output()));
                }
            }
            wrts
        };
        if fd_wrts.is_empty() {
            return Ok(());
        }

        let (inputs0, outputs0) = (self.vectors.inputs.clone(), self.vectors.outputs.clone());
        let base = self.evaluate(&inputs0, &outputs0)?;
        for (wrt, is_output) in fd_wrts {
            let size = if is_output {
                self.vectors.outputs.get(&wrt)?.len()
            } else {
                self.vectors.inputs.get(&wrt)?.len()
            };
            for col in 0..size {
                let mut inputs = self.vectors.inputs.clone();
                let mut outputs = self.vectors.outputs.clone();
                let target = if is_output { &mut outputs } else { &mut inputs };
                target.get_mut(&wrt)?[col] += FD_STEP;
                let perturbed = self.evaluate(&inputs, &outputs)?;

                for sub in self.partials.iter_mut() {
                    if sub.wrt != wrt || sub.method() != DerivMethod::FiniteDifference {
                        continue;
                    }
                    let d0 = base.get(&sub.of)?;
                    let d1 = perturbed.get(&sub.of)?;
                    let rows: Vec<usize> = sub
                        .entries()
                        .iter()
                        .filter(|(_, c, _)| *c == col)
                        .map(|(r, _, _)| *r)
                        .collect();
                    for r in rows {
                        sub.set_entry(r, col, (d1[r] - d0[r]) / FD_STEP)
                            .map_err(|e| e.in_system(&self.path))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Residuals (implicit) or computed outputs (explicit) at a given point,
    /// leaving the instance's own vectors untouched.
    fn evaluate(&mut self, inputs: &Vector, outputs: &Vector) -> Result<Vector> {
        let mut inputs = inputs.clone();
        let mut outputs = outputs.clone();
        let result = match &mut self.component {
            Component::Implicit(c) => {
                let mut residuals = self.vectors.residuals.clone();
                residuals.set_mode(AccessMode::ReadWrite);
                c.apply_nonlinear(&mut inputs.read_only(), &mut outputs.read_only(), &mut residuals)
                    .map(|_| residuals)
            }
            Component::Explicit(c) => c
                .compute(&mut inputs.read_only(), &mut outputs)
                .map(|_| outputs),
        };
        result.map_err(|e| e.in_system(&self.path))
    }
}

/// Partials-based product used when the component has no matrix-free hook.
fn apply_partials(partials: &Partials, v: &mut ComponentVectors, explicit: bool, mode: Mode) -> Result<()> {
    let outputs = v.outputs.layout().clone();
    let inputs = v.inputs.layout().clone();
    // stored blocks are df/dx for explicit components; the residual uses -df/dx
    let sign = if explicit { -1.0 } else { 1.0 };

    let d_in = v.d_inputs.as_slice().to_vec();
    let d_out = v.d_outputs.as_slice().to_vec();
    let d_res = v.d_residuals.as_slice().to_vec();
    let mut res_acc = vec![0.0; d_res.len()];
    let mut in_acc = vec![0.0; d_in.len()];
    let mut out_acc = vec![0.0; d_out.len()];

    if explicit {
        match mode {
            Mode::Fwd => res_acc.copy_from_slice(&d_out),
            Mode::Rev => out_acc.copy_from_slice(&d_res),
        }
    }

    for sub in partials.iter() {
        let Some(rows) = outputs.range(&sub.of) else {
            continue;
        };
        let cols = if sub.wrt_is_output() {
            outputs.range(&sub.wrt)
        } else {
            inputs.range(&sub.wrt)
        };
        let Some(cols) = cols else {
            continue;
        };
        match mode {
            Mode::Fwd => {
                let x = if sub.wrt_is_output() { &d_out } else { &d_in };
                let mut y = vec![0.0; rows.len()];
                sub.apply_fwd(&x[cols], &mut y);
                for (acc, val) in res_acc[rows].iter_mut().zip(y) {
                    *acc += sign * val;
                }
            }
            Mode::Rev => {
                let acc = if sub.wrt_is_output() {
                    &mut out_acc
                } else {
                    &mut in_acc
                };
                let mut x = vec![0.0; cols.len()];
                sub.apply_rev(&d_res[rows], &mut x);
                for (a, val) in acc[cols].iter_mut().zip(x) {
                    *a += sign * val;
                }
            }
        }
    }

    match mode {
        Mode::Fwd => v.d_residuals.set_all(&res_acc),
        Mode::Rev => {
            v.d_inputs.set_all(&in_acc)?;
            v.d_outputs.set_all(&out_acc)
        }
    }
}

fn prefix_config(path: &str, err: Error) -> Error {
    match err {
        Error::Configuration(msg) => Error::Configuration(format!("'{}': {}", path, msg)),
        other => other,
    }
}
