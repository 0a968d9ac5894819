//! Integration tests on the quadratic model `a·x² + b·x + c = 0`.

use mdao_components::{QuadraticComp, QuadraticJacVec, QuadraticLinearize};
use mdao_core::{Component, Mode, Overrides};
use mdao_solver::{
    BlockGaussSeidel, DirectSolver, Group, KrylovSolver, LinearSolver, NewtonOptions, NewtonSolver,
    Problem, TotalsMode,
};

const WRT: [&str; 3] = ["comp.a", "comp.b", "comp.c"];

/// One quadratic component fed by the auto-IVC with `a=1, b=-4, c=3`.
fn quadratic_problem(component: Component, linear: Box<dyn LinearSolver>, mode: TotalsMode) -> Problem {
    let mut model = Group::new();
    model.add_subsystem("comp", component);
    let mut prob = Problem::new(model);
    prob.set_nonlinear_solver(NewtonSolver::new());
    prob.set_linear_solver_boxed(linear);
    prob.setup(mode).expect("setup should succeed");
    prob.set_val("comp.a", 1.0).unwrap();
    prob.set_val("comp.b", -4.0).unwrap();
    prob.set_val("comp.c", 3.0).unwrap();
    prob
}

fn component(kind: &str) -> Component {
    match kind {
        "fd" => Component::implicit(QuadraticComp::new()),
        "linearize" => Component::implicit(QuadraticLinearize::new()),
        _ => Component::implicit(QuadraticJacVec::new()),
    }
}

fn linear_solver(kind: &str) -> Box<dyn LinearSolver> {
    match kind {
        "direct" => Box::new(DirectSolver::new()),
        "gmres" => Box::new(KrylovSolver::new()),
        "gmres+direct" => Box::new(KrylovSolver::new().with_preconditioner(DirectSolver::new())),
        _ => Box::new(BlockGaussSeidel::run_once()),
    }
}

const COMPONENTS: [&str; 3] = ["fd", "linearize", "jacvec"];
const SOLVERS: [&str; 4] = ["direct", "gmres", "gmres+direct", "bgs"];

/// Newton from the default zero output lands on the root at x = 1.
#[test]
fn test_newton_from_zero_finds_first_root() {
    for name in COMPONENTS {
        let mut prob = quadratic_problem(component(name), Box::new(DirectSolver::new()), TotalsMode::Fwd);
        let report = prob.run_model().expect("run_model should succeed");
        assert!(report.converged, "{}: {:?}", name, report);
        let x = prob.val("comp.x").unwrap();
        assert!((x - 1.0).abs() < 1e-8, "{}: x = {}", name, x);
    }
}

/// A guess of 5 steers Newton to the root at x = 3.
#[test]
fn test_guess_selects_second_root() {
    let comp = Overrides::new(QuadraticLinearize::new())
        .guess_nonlinear(|_, _inputs, outputs, _residuals| outputs.set_value("x", 5.0));
    let mut prob = quadratic_problem(
        Component::implicit(comp),
        Box::new(DirectSolver::new()),
        TotalsMode::Fwd,
    );
    prob.run_model().unwrap();
    assert!((prob.val("comp.x").unwrap() - 3.0).abs() < 1e-8);
}

/// The guess sees current residuals and only fires far from a solution.
#[test]
fn test_guess_reads_residuals() {
    let comp = Overrides::new(QuadraticLinearize::new()).guess_nonlinear(|_, _, outputs, residuals| {
        if residuals.value("x")?.abs() > 1e-2 {
            outputs.set_value("x", 5.0)?;
        }
        Ok(())
    });
    let mut prob = quadratic_problem(
        Component::implicit(comp),
        Box::new(DirectSolver::new()),
        TotalsMode::Fwd,
    );
    prob.run_model().unwrap();
    assert!((prob.val("comp.x").unwrap() - 3.0).abs() < 1e-8);

    // Start next to the other root: the guess leaves it alone.
    prob.set_val("comp.x", 1.001).unwrap();
    prob.run_model().unwrap();
    assert!((prob.val("comp.x").unwrap() - 1.0).abs() < 1e-8);
}

/// Totals at x = 3 agree in both modes for every component and solver.
#[test]
fn test_totals_fwd_and_rev_agree() {
    let expected = [-4.5, -1.5, -0.5];
    for comp_name in COMPONENTS {
        for solver_name in SOLVERS {
            for mode in [TotalsMode::Fwd, TotalsMode::Rev] {
                let mut prob = quadratic_problem(component(comp_name), linear_solver(solver_name), mode);
                prob.set_val("comp.x", 3.0).unwrap();
                prob.run_model().unwrap();

                let totals = prob.compute_totals(&["comp.x"], &WRT).unwrap();
                let tol = if comp_name == "fd" { 1e-5 } else { 1e-9 };
                for (wrt, want) in WRT.iter().zip(expected) {
                    let got = totals.value("comp.x", wrt).unwrap();
                    assert!(
                        (got - want).abs() < tol,
                        "{}/{}/{:?}: d(x)/d({}) = {} (expected {})",
                        comp_name,
                        solver_name,
                        mode,
                        wrt,
                        got,
                        want
                    );
                }
            }
        }
    }
}

/// Auto mode picks reverse for one response and three seeds.
#[test]
fn test_auto_mode_matches_fwd() {
    let mut fwd = quadratic_problem(
        Component::implicit(QuadraticLinearize::new()),
        Box::new(DirectSolver::new()),
        TotalsMode::Fwd,
    );
    let mut auto = quadratic_problem(
        Component::implicit(QuadraticLinearize::new()),
        Box::new(DirectSolver::new()),
        TotalsMode::Auto,
    );
    for prob in [&mut fwd, &mut auto] {
        prob.set_val("comp.x", 3.0).unwrap();
        prob.run_model().unwrap();
    }
    let a = fwd.compute_totals(&["comp.x"], &WRT).unwrap();
    let b = auto.compute_totals(&["comp.x"], &WRT).unwrap();
    for wrt in WRT {
        let (x, y) = (a.value("comp.x", wrt).unwrap(), b.value("comp.x", wrt).unwrap());
        assert!((x - y).abs() < 1e-12, "d(x)/d({}): {} vs {}", wrt, x, y);
    }
}

/// Auto mode is fixed at setup from the declared design variables and
/// responses, whatever a later call asks for.
#[test]
fn test_auto_mode_fixed_at_setup() {
    let mut model = Group::new();
    model.add_subsystem("comp", Component::implicit(QuadraticLinearize::new()));
    let mut prob = Problem::new(model);
    prob.set_nonlinear_solver(NewtonSolver::new());
    prob.set_linear_solver(DirectSolver::new());
    for wrt in WRT {
        prob.add_design_var(wrt);
    }
    prob.add_response("comp.x");
    prob.setup(TotalsMode::Auto).unwrap();
    assert_eq!(prob.resolved_mode(), Some(Mode::Rev));

    prob.set_val("comp.b", -4.0).unwrap();
    prob.set_val("comp.c", 3.0).unwrap();
    prob.set_val("comp.x", 3.0).unwrap();
    prob.run_model().unwrap();
    // One seed and one response would pick forward if resolved per call.
    let totals = prob.compute_totals(&["comp.x"], &["comp.c"]).unwrap();
    assert_eq!(prob.resolved_mode(), Some(Mode::Rev));
    assert!((totals.value("comp.x", "comp.c").unwrap() + 0.5).abs() < 1e-9);
}

/// Without declarations the first `compute_totals` fixes the direction.
#[test]
fn test_auto_mode_fixed_by_first_totals() {
    let mut prob = quadratic_problem(
        Component::implicit(QuadraticLinearize::new()),
        Box::new(DirectSolver::new()),
        TotalsMode::Auto,
    );
    assert_eq!(prob.resolved_mode(), None);
    prob.set_val("comp.x", 3.0).unwrap();
    prob.run_model().unwrap();
    prob.compute_totals(&["comp.x"], &WRT).unwrap();
    assert_eq!(prob.resolved_mode(), Some(Mode::Rev));
    prob.compute_totals(&["comp.x"], &["comp.a"]).unwrap();
    assert_eq!(prob.resolved_mode(), Some(Mode::Rev));

    let fixed = quadratic_problem(
        Component::implicit(QuadraticLinearize::new()),
        Box::new(DirectSolver::new()),
        TotalsMode::Fwd,
    );
    assert_eq!(fixed.resolved_mode(), Some(Mode::Fwd));
}

/// Repeated calls at the same point give identical results.
#[test]
fn test_totals_are_deterministic() {
    let mut prob = quadratic_problem(
        Component::implicit(QuadraticJacVec::new()),
        Box::new(DirectSolver::new()),
        TotalsMode::Rev,
    );
    prob.set_val("comp.x", 3.0).unwrap();
    prob.run_model().unwrap();
    let first = prob.compute_totals(&["comp.x"], &WRT).unwrap();
    let second = prob.compute_totals(&["comp.x"], &WRT).unwrap();
    assert_eq!(first, second);
}

/// Run-once execution uses the closed-form solve.
#[test]
fn test_run_once_uses_solve_nonlinear() {
    let mut model = Group::new();
    model.add_subsystem("comp", Component::implicit(QuadraticComp::new()));
    let mut prob = Problem::new(model);
    prob.setup(TotalsMode::Auto).unwrap();
    prob.set_val("comp.b", -4.0).unwrap();
    prob.set_val("comp.c", 3.0).unwrap();
    let report = prob.run_model().unwrap();
    assert!(report.converged);
    assert_eq!(report.abs_err, 0.0);
    assert_eq!(prob.val("comp.x").unwrap(), 3.0);
    assert_eq!(prob.val("comp.b").unwrap(), -4.0);
}

/// `check_totals` agrees with finite differences of the converged model.
#[test]
fn test_check_totals() {
    let mut prob = quadratic_problem(
        Component::implicit(QuadraticLinearize::new()),
        Box::new(DirectSolver::new()),
        TotalsMode::Rev,
    );
    prob.set_val("comp.x", 3.0).unwrap();
    prob.run_model().unwrap();
    let before = prob.val("comp.x").unwrap();

    let checks = prob.check_totals(&["comp.x"], &WRT, 1e-6).unwrap();
    assert_eq!(checks.len(), 3);
    for check in &checks {
        assert!(check.rel_error < 1e-4, "{:?}", check);
    }
    assert_eq!(prob.val("comp.x").unwrap(), before);
    assert_eq!(prob.val("comp.a").unwrap(), 1.0);
}

/// Newton options flow through: a single iteration from zero is not enough.
#[test]
fn test_strict_non_convergence_is_an_error() {
    let mut prob = quadratic_problem(
        Component::implicit(QuadraticLinearize::new()),
        Box::new(DirectSolver::new()),
        TotalsMode::Fwd,
    );
    prob.set_nonlinear_solver(
        NewtonSolver::new().with_options(
            NewtonOptions::default()
                .with_maxiter(1)
                .with_err_on_non_converge(true),
        ),
    );
    let err = prob.run_model().unwrap_err();
    assert!(err.is_analysis_failure());
    assert!(err.to_string().contains("NL: Newton"), "{}", err);
    assert!(!prob.model().unwrap().any_read_only());

    // Lenient solvers report instead of failing.
    prob.set_nonlinear_solver(NewtonSolver::new().with_options(NewtonOptions::default().with_maxiter(1)));
    prob.set_val("comp.x", 0.0).unwrap();
    let report = prob.run_model().unwrap();
    assert!(!report.converged);
    assert_eq!(report.iterations, 1);
}
