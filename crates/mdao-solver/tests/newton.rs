//! Newton line searches, bound enforcement, failure recovery and
//! component-local Newton.

use mdao_components::{LinearSystemComp, QuadraticLinearize};
use mdao_core::{
    Component, Declarations, Error as CoreError, ImplicitComponent, Overrides, Partials, Result,
    VarRole, Vector,
};
use mdao_solver::{
    ArmijoOptions, BoundsMode, DirectSolver, Error, Group, LineSearch, NewtonComponent,
    NewtonOptions, NewtonSolver, Problem, TotalsMode,
};

/// `x³ - 8 = 0`, undefined above `x = 6`.
struct Cube;

impl ImplicitComponent for Cube {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_output("x", 0.5);
        decl.declare_partials("x", "x");
        Ok(())
    }

    fn apply_nonlinear(&mut self, _i: &mut Vector, o: &mut Vector, r: &mut Vector) -> Result<()> {
        let x = o.value("x")?;
        if x > 6.0 {
            return Err(CoreError::analysis(format!("x = {} is out of range", x)));
        }
        r.set_value("x", x * x * x - 8.0)
    }

    fn linearize(&mut self, _i: &mut Vector, o: &mut Vector, p: &mut Partials) -> Result<()> {
        let x = o.value("x")?;
        p.set_scalar("x", "x", 3.0 * x * x)
    }
}

/// `R = [x - 4, y - 4]` with `x <= 1.5`.
struct Capped;

impl ImplicitComponent for Capped {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_output("x", 0.0).upper(1.5);
        decl.add_output("y", 0.0);
        decl.declare_partials("x", "x");
        decl.declare_partials("y", "y");
        Ok(())
    }

    fn apply_nonlinear(&mut self, _i: &mut Vector, o: &mut Vector, r: &mut Vector) -> Result<()> {
        r.set_value("x", o.value("x")? - 4.0)?;
        r.set_value("y", o.value("y")? - 4.0)
    }

    fn linearize(&mut self, _i: &mut Vector, _o: &mut Vector, p: &mut Partials) -> Result<()> {
        p.set_scalar("x", "x", 1.0)?;
        p.set_scalar("y", "y", 1.0)
    }
}

fn single(name: &str, component: Component, newton: NewtonSolver) -> Problem {
    let mut model = Group::new();
    model.add_subsystem(name, component);
    let mut prob = Problem::new(model);
    prob.set_nonlinear_solver(newton);
    prob.set_linear_solver(DirectSolver::new());
    prob.setup(TotalsMode::Fwd).unwrap();
    prob
}

#[test]
fn test_armijo_backtracks_out_of_failed_region() {
    let newton = NewtonSolver::new()
        .with_options(NewtonOptions::default().with_maxiter(20))
        .with_linesearch(LineSearch::ArmijoGoldstein(ArmijoOptions::default()));
    let mut prob = single("cube", Component::implicit(Cube), newton);
    let report = prob.run_model().unwrap();
    assert!(report.converged);
    assert!((prob.val("cube.x").unwrap() - 2.0).abs() < 1e-9);
}

#[test]
fn test_full_step_into_failed_region_is_an_error() {
    let mut prob = single("cube", Component::implicit(Cube), NewtonSolver::new());
    let err = prob.run_model().unwrap_err();
    assert!(err.is_analysis_failure());
    assert!(err.to_string().contains("'cube'"), "{}", err);
    assert!(!prob.model().unwrap().any_read_only());

    // Without retries Armijo gives up on the first failure as well.
    let newton = NewtonSolver::new().with_linesearch(LineSearch::ArmijoGoldstein(
        ArmijoOptions::default().with_retry_on_analysis_error(false),
    ));
    prob.set_nonlinear_solver(newton);
    prob.set_val("cube.x", 0.5).unwrap();
    assert!(prob.run_model().unwrap_err().is_analysis_failure());

    // The caller may adjust the point and try again.
    prob.set_nonlinear_solver(NewtonSolver::new());
    prob.set_val("cube.x", 1.5).unwrap();
    prob.run_model().unwrap();
    assert!((prob.val("cube.x").unwrap() - 2.0).abs() < 1e-9);
}

#[test]
fn test_bounds_enforce_modes() {
    let one_step = || NewtonOptions::default().with_maxiter(1);

    let newton = NewtonSolver::new()
        .with_options(one_step())
        .with_linesearch(LineSearch::BoundsEnforce(BoundsMode::Wall));
    let mut prob = single("cap", Component::implicit(Capped), newton);
    let report = prob.run_model().unwrap();
    assert!(!report.converged);
    assert_eq!(prob.val("cap.x").unwrap(), 1.5);
    assert_eq!(prob.val("cap.y").unwrap(), 4.0);

    let newton = NewtonSolver::new()
        .with_options(one_step())
        .with_linesearch(LineSearch::BoundsEnforce(BoundsMode::Vector));
    let mut prob = single("cap", Component::implicit(Capped), newton);
    prob.run_model().unwrap();
    assert_eq!(prob.val("cap.x").unwrap(), 1.5);
    assert_eq!(prob.val("cap.y").unwrap(), 1.5);

    // Without a line search the bound is ignored.
    let newton = NewtonSolver::new().with_options(one_step());
    let mut prob = single("cap", Component::implicit(Capped), newton);
    prob.run_model().unwrap();
    assert_eq!(prob.val("cap.x").unwrap(), 4.0);
}

#[test]
fn test_writing_inputs_in_guess_is_refused() {
    let comp = Overrides::new(QuadraticLinearize::new())
        .guess_nonlinear(|_, inputs, _outputs, _residuals| inputs.set_value("a", 2.0));
    let mut prob = single("comp", Component::implicit(comp), NewtonSolver::new());
    let err = prob.run_model().unwrap_err();
    assert_eq!(
        err.to_string(),
        "'comp': Attempt to set value of 'a' in input vector when it is read only."
    );
    assert!(matches!(
        err,
        Error::Core(CoreError::ReadOnlyViolation {
            role: VarRole::Input,
            ..
        })
    ));
    assert!(err.is_recoverable());
    assert!(!err.is_analysis_failure());

    // Vectors are writable again once the error is out.
    assert!(!prob.model().unwrap().any_read_only());
    prob.set_val("comp.a", 2.0).unwrap();
    prob.set_val("comp.x", 1.0).unwrap();
    assert_eq!(prob.val("comp.a").unwrap(), 2.0);
}

#[test]
fn test_guess_cannot_reacquire_write_access() {
    let comp = Overrides::new(QuadraticLinearize::new()).guess_nonlinear(|_, inputs, _, _| {
        drop(inputs.read_only());
        inputs.set_value("a", 2.0)
    });
    let mut prob = single("comp", Component::implicit(comp), NewtonSolver::new());
    let err = prob.run_model().unwrap_err();
    assert_eq!(
        err.to_string(),
        "'comp': Attempt to set value of 'a' in input vector when it is read only."
    );
    assert_eq!(prob.val("comp.a").unwrap(), 1.0);
    assert!(!prob.model().unwrap().any_read_only());
}

#[test]
fn test_writing_outputs_in_apply_nonlinear_is_refused() {
    let comp = Overrides::new(QuadraticLinearize::new()).apply_nonlinear(|_, _inputs, outputs, _| {
        outputs.set_value("x", 0.0)
    });
    let mut prob = single("comp", Component::implicit(comp), NewtonSolver::new());
    let err = prob.run_apply_nonlinear().unwrap_err();
    assert!(matches!(
        err,
        Error::Core(CoreError::ReadOnlyViolation {
            role: VarRole::Output,
            ..
        })
    ));
    assert!(!prob.model().unwrap().any_read_only());
}

#[test]
fn test_local_newton_converges_linear_system() {
    let comp = NewtonComponent::new(LinearSystemComp::new(2).into_primal_component())
        .with_options(NewtonOptions::default().with_maxiter(5));
    let mut model = Group::new();
    model.add_subsystem("lin", Component::implicit(comp));
    let mut prob = Problem::new(model);
    prob.set_linear_solver(DirectSolver::new());
    prob.setup(TotalsMode::Fwd).unwrap();
    prob.set_val("lin.A", [2.0, 1.0, 1.0, 3.0]).unwrap();
    prob.set_val("lin.b", [3.0, 5.0]).unwrap();

    // Run-once at the root relies on the component's own solve.
    prob.run_model().unwrap();
    let x = prob.get_val("lin.x").unwrap();
    assert!((x[0] - 0.8).abs() < 1e-10 && (x[1] - 1.4).abs() < 1e-10, "{:?}", x);

    // dx/db = inv(A)
    let totals = prob.compute_totals(&["lin.x"], &["lin.b"]).unwrap();
    let jac = totals.get("lin.x", "lin.b").unwrap();
    let expected = [[0.6, -0.2], [-0.2, 0.4]];
    for r in 0..2 {
        for c in 0..2 {
            assert!((jac[(r, c)] - expected[r][c]).abs() < 1e-10, "{}", jac);
        }
    }
}

#[test]
fn test_solve_subsystems_uses_local_solves() {
    let comp = NewtonComponent::new(LinearSystemComp::new(2).into_primal_component());
    let newton = NewtonSolver::new().with_options(
        NewtonOptions::default()
            .with_solve_subsystems(true)
            .with_maxiter(3),
    );
    let mut prob = single("lin", Component::implicit(comp), newton);
    prob.set_val("lin.A", [4.0, 0.0, 0.0, 2.0]).unwrap();
    prob.set_val("lin.b", [2.0, 1.0]).unwrap();
    let report = prob.run_model().unwrap();
    assert!(report.converged);
    assert_eq!(report.iterations, 0);
    assert_eq!(prob.get_val("lin.x").unwrap(), vec![0.5, 0.5]);
}
