//! The component contract.
//!
//! Components come in two closed variants, [`ExplicitComponent`]
//! (`outputs = f(inputs)`) and [`ImplicitComponent`]
//! (`residuals = R(inputs, outputs)`), wrapped by [`Component`]. Optional
//! hooks are advertised through [`Capabilities`]; callers dispatch on those
//! flags and never call a hook to find out whether it exists.
//!
//! Every callback receives its vectors by `&mut` reference. Arguments the
//! callback must not modify are handed over in read-only mode, so a write
//! fails with [`Error::ReadOnlyViolation`] instead of silently corrupting
//! solver state.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::partials::Partials;
use crate::variable::Declarations;
use crate::vector::Vector;

/// Direction of derivative propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Seed inputs, solve for outputs: `d_residuals -> d_outputs`.
    Fwd,
    /// Seed responses, solve for adjoints: `d_outputs -> d_residuals`.
    Rev,
}

impl Mode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "fwd" | "forward" => Some(Mode::Fwd),
            "rev" | "reverse" => Some(Mode::Rev),
            _ => None,
        }
    }
}

/// Optional hooks a component provides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub solve_nonlinear: bool,
    pub guess_nonlinear: bool,
    /// Matrix-free products (`apply_linear` / `compute_jacvec_product`).
    pub apply_linear: bool,
    pub solve_linear: bool,
    /// The component fills approximated partial blocks itself.
    pub approximates_partials: bool,
}

impl Capabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_solve_nonlinear(mut self) -> Self {
        self.solve_nonlinear = true;
        self
    }

    pub fn with_guess_nonlinear(mut self) -> Self {
        self.guess_nonlinear = true;
        self
    }

    pub fn with_apply_linear(mut self) -> Self {
        self.apply_linear = true;
        self
    }

    pub fn with_solve_linear(mut self) -> Self {
        self.solve_linear = true;
        self
    }

    pub fn with_approximated_partials(mut self) -> Self {
        self.approximates_partials = true;
        self
    }
}

/// A unit whose outputs are defined implicitly by `R(inputs, outputs) = 0`.
pub trait ImplicitComponent: Send {
    /// Register variables and partial-derivative blocks.
    fn setup(&mut self, decl: &mut Declarations) -> Result<()>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
    }

    /// `residuals = R(inputs, outputs)`. Inputs and outputs are read-only.
    fn apply_nonlinear(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        residuals: &mut Vector,
    ) -> Result<()>;

    /// Solve for `outputs` directly. Inputs are read-only.
    fn solve_nonlinear(&mut self, _inputs: &mut Vector, _outputs: &mut Vector) -> Result<()> {
        Err(not_implemented("solve_nonlinear"))
    }

    /// Seed `outputs` before the first residual evaluation of a solve.
    /// Inputs and residuals are read-only.
    fn guess_nonlinear(
        &mut self,
        _inputs: &mut Vector,
        _outputs: &mut Vector,
        _residuals: &mut Vector,
    ) -> Result<()> {
        Err(not_implemented("guess_nonlinear"))
    }

    /// Fill declared partial blocks. Inputs and outputs are read-only.
    fn linearize(
        &mut self,
        _inputs: &mut Vector,
        _outputs: &mut Vector,
        _partials: &mut Partials,
    ) -> Result<()> {
        Ok(())
    }

    /// Matrix-free Jacobian-vector product.
    ///
    /// Forward mode accumulates into `d_residuals` (the derivative vectors
    /// `d_inputs`/`d_outputs` are read-only); reverse mode accumulates into
    /// `d_inputs`/`d_outputs` (`d_residuals` is read-only).
    #[allow(clippy::too_many_arguments)]
    fn apply_linear(
        &mut self,
        _inputs: &mut Vector,
        _outputs: &mut Vector,
        _d_inputs: &mut Vector,
        _d_outputs: &mut Vector,
        _d_residuals: &mut Vector,
        _mode: Mode,
    ) -> Result<()> {
        Err(not_implemented("apply_linear"))
    }

    /// Apply the inverse of `dR/d(outputs)`.
    ///
    /// Forward: `d_outputs = inv(J) d_residuals` (`d_residuals` read-only).
    /// Reverse: `d_residuals = inv(J)ᵀ d_outputs` (`d_outputs` read-only).
    fn solve_linear(
        &mut self,
        _d_outputs: &mut Vector,
        _d_residuals: &mut Vector,
        _mode: Mode,
    ) -> Result<()> {
        Err(not_implemented("solve_linear"))
    }
}

/// A unit whose outputs are computed directly from its inputs.
pub trait ExplicitComponent: Send {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
    }

    /// `outputs = f(inputs)`. Inputs are read-only.
    fn compute(&mut self, inputs: &mut Vector, outputs: &mut Vector) -> Result<()>;

    /// Fill declared `d(output)/d(input)` blocks. Inputs are read-only.
    fn compute_partials(&mut self, _inputs: &mut Vector, _partials: &mut Partials) -> Result<()> {
        Ok(())
    }

    /// Matrix-free product of `df/d(inputs)`.
    ///
    /// Forward: `d_outputs += J d_inputs`. Reverse: `d_inputs += Jᵀ d_outputs`.
    fn compute_jacvec_product(
        &mut self,
        _inputs: &mut Vector,
        _d_inputs: &mut Vector,
        _d_outputs: &mut Vector,
        _mode: Mode,
    ) -> Result<()> {
        Err(not_implemented("compute_jacvec_product"))
    }
}

/// Closed set of component variants.
pub enum Component {
    Explicit(Box<dyn ExplicitComponent>),
    Implicit(Box<dyn ImplicitComponent>),
}

impl Component {
    pub fn explicit(component: impl ExplicitComponent + 'static) -> Self {
        Component::Explicit(Box::new(component))
    }

    pub fn implicit(component: impl ImplicitComponent + 'static) -> Self {
        Component::Implicit(Box::new(component))
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Component::Explicit(_))
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Component::Explicit(c) => c.capabilities(),
            Component::Implicit(c) => c.capabilities(),
        }
    }

    pub fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        match self {
            Component::Explicit(c) => c.setup(decl),
            Component::Implicit(c) => c.setup(decl),
        }
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_explicit() { "Explicit" } else { "Implicit" };
        f.debug_struct("Component")
            .field("kind", &kind)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

fn not_implemented(operation: &'static str) -> Error {
    Error::NotImplemented {
        system: String::new(),
        operation,
    }
}

type NonlinearHook<C> =
    Box<dyn FnMut(&mut C, &mut Vector, &mut Vector, &mut Vector) -> Result<()> + Send>;
type SolveNonlinearHook<C> = Box<dyn FnMut(&mut C, &mut Vector, &mut Vector) -> Result<()> + Send>;
type LinearizeHook<C> =
    Box<dyn FnMut(&mut C, &mut Vector, &mut Vector, &mut Partials) -> Result<()> + Send>;
type ApplyLinearHook<C> = Box<
    dyn FnMut(&mut C, &mut Vector, &mut Vector, &mut Vector, &mut Vector, &mut Vector, Mode) -> Result<()>
        + Send,
>;
type SolveLinearHook<C> = Box<dyn FnMut(&mut C, &mut Vector, &mut Vector, Mode) -> Result<()> + Send>;

/// A base implicit component with selected callbacks replaced.
///
/// Each hook receives the base component first, so it can delegate to the
/// base behavior and then add its own.
///
/// ```ignore
/// let comp = Overrides::new(QuadraticComp::new())
///     .guess_nonlinear(|_, _inputs, outputs, _residuals| outputs.set_value("x", 3.0));
/// ```
pub struct Overrides<C> {
    base: C,
    apply_nonlinear: Option<NonlinearHook<C>>,
    solve_nonlinear: Option<SolveNonlinearHook<C>>,
    guess_nonlinear: Option<NonlinearHook<C>>,
    linearize: Option<LinearizeHook<C>>,
    apply_linear: Option<ApplyLinearHook<C>>,
    solve_linear: Option<SolveLinearHook<C>>,
}

impl<C: ImplicitComponent> Overrides<C> {
    pub fn new(base: C) -> Self {
        Self {
            base,
            apply_nonlinear: None,
            solve_nonlinear: None,
            guess_nonlinear: None,
            linearize: None,
            apply_linear: None,
            solve_linear: None,
        }
    }

    pub fn base(&self) -> &C {
        &self.base
    }

    pub fn apply_nonlinear<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut C, &mut Vector, &mut Vector, &mut Vector) -> Result<()> + Send + 'static,
    {
        self.apply_nonlinear = Some(Box::new(hook));
        self
    }

    pub fn solve_nonlinear<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut C, &mut Vector, &mut Vector) -> Result<()> + Send + 'static,
    {
        self.solve_nonlinear = Some(Box::new(hook));
        self
    }

    pub fn guess_nonlinear<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut C, &mut Vector, &mut Vector, &mut Vector) -> Result<()> + Send + 'static,
    {
        self.guess_nonlinear = Some(Box::new(hook));
        self
    }

    pub fn linearize<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut C, &mut Vector, &mut Vector, &mut Partials) -> Result<()> + Send + 'static,
    {
        self.linearize = Some(Box::new(hook));
        self
    }

    pub fn apply_linear<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut C, &mut Vector, &mut Vector, &mut Vector, &mut Vector, &mut Vector, Mode) -> Result<()>
            + Send
            + 'static,
    {
        self.apply_linear = Some(Box::new(hook));
        self
    }

    pub fn solve_linear<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut C, &mut Vector, &mut Vector, Mode) -> Result<()> + Send + 'static,
    {
        self.solve_linear = Some(Box::new(hook));
        self
    }
}

impl<C: ImplicitComponent> ImplicitComponent for Overrides<C> {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        self.base.setup(decl)
    }

    fn capabilities(&self) -> Capabilities {
        let mut caps = self.base.capabilities();
        caps.solve_nonlinear |= self.solve_nonlinear.is_some();
        caps.guess_nonlinear |= self.guess_nonlinear.is_some();
        caps.apply_linear |= self.apply_linear.is_some();
        caps.solve_linear |= self.solve_linear.is_some();
        caps
    }

    fn apply_nonlinear(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        residuals: &mut Vector,
    ) -> Result<()> {
        match &mut self.apply_nonlinear {
            Some(hook) => hook(&mut self.base, inputs, outputs, residuals),
            None => self.base.apply_nonlinear(inputs, outputs, residuals),
        }
    }

    fn solve_nonlinear(&mut self, inputs: &mut Vector, outputs: &mut Vector) -> Result<()> {
        match &mut self.solve_nonlinear {
            Some(hook) => hook(&mut self.base, inputs, outputs),
            None => self.base.solve_nonlinear(inputs, outputs),
        }
    }

    fn guess_nonlinear(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        residuals: &mut Vector,
    ) -> Result<()> {
        match &mut self.guess_nonlinear {
            Some(hook) => hook(&mut self.base, inputs, outputs, residuals),
            None => self.base.guess_nonlinear(inputs, outputs, residuals),
        }
    }

    fn linearize(
        &mut self,
        inputs: &mut Vector,
        outputs: &mut Vector,
        partials: &mut Partials,
    ) -> Result<()> {
        match &mut self.linearize {
            Some(hook) => hook(&mut self.base, inputs, outputs, partials),
            None => self.base.linearize(inputs, outputs, partials),
        }
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
        match &mut self.apply_linear {
            Some(hook) => hook(&mut self.base, inputs, outputs, d_inputs, d_outputs, d_residuals, mode),
            None => self
                .base
                .apply_linear(inputs, outputs, d_inputs, d_outputs, d_residuals, mode),
        }
    }

    fn solve_linear(&mut self, d_outputs: &mut Vector, d_residuals: &mut Vector, mode: Mode) -> Result<()> {
        match &mut self.solve_linear {
            Some(hook) => hook(&mut self.base, d_outputs, d_residuals, mode),
            None => self.base.solve_linear(d_outputs, d_residuals, mode),
        }
    }
}
