//! Integration tests on coupled models and model-level access.

use mdao_components::{ExecComp, IndepVarComp, QuadraticComp, QuadraticLinearize};
use mdao_core::Component;
use mdao_solver::{
    BlockGaussSeidel, BlockGsOptions, DirectSolver, Group, KrylovSolver, LinearSolver,
    MemoryRecorder, NewtonOptions, NewtonSolver, NonlinearSolver, OutputFilter, Problem,
    TotalsMode, AUTO_IVC, RUN_ONCE_ATOL,
};

/// `x² - 4x + c = 0` with `c = 2.7 + 0.1x` fed back from an expression.
fn coupled_problem(linear: Box<dyn LinearSolver>, mode: TotalsMode) -> Problem {
    let mut model = Group::new();
    model
        .add_subsystem("quad", Component::implicit(QuadraticLinearize::new()))
        .add_subsystem(
            "feedback",
            ExecComp::new(&["c = 2.7 + 0.1*x"]).unwrap().component(),
        )
        .connect("quad.x", "feedback.x")
        .connect("feedback.c", "quad.c");
    let mut prob = Problem::new(model);
    prob.set_nonlinear_solver(
        NewtonSolver::new().with_options(NewtonOptions::default().with_maxiter(20)),
    );
    prob.set_linear_solver_boxed(linear);
    prob.setup(mode).unwrap();
    prob.set_val("quad.a", 1.0).unwrap();
    prob.set_val("quad.b", -4.0).unwrap();
    prob
}

fn direct() -> Box<dyn LinearSolver> {
    Box::new(DirectSolver::new())
}

fn gmres() -> Box<dyn LinearSolver> {
    Box::new(KrylovSolver::new())
}

fn bgs() -> Box<dyn LinearSolver> {
    Box::new(BlockGaussSeidel::with_options(
        BlockGsOptions::default().with_maxiter(50).with_atol(1e-14).with_rtol(1e-14),
    ))
}

#[test]
fn test_coupled_newton_converges() {
    let mut prob = coupled_problem(direct(), TotalsMode::Fwd);
    assert!(prob.model().unwrap().is_coupled());
    let report = prob.run_model().unwrap();
    assert!(report.converged);
    // x² - 3.9x + 2.7 = 0 has roots 0.9 and 3; Newton from zero finds 0.9.
    assert!((prob.val("quad.x").unwrap() - 0.9).abs() < 1e-9);
    assert!((prob.val("feedback.c").unwrap() - 2.79).abs() < 1e-9);
    assert!((prob.val("quad.c").unwrap() - 2.79).abs() < 1e-9);
}

#[test]
fn test_run_once_reports_remaining_residuals() {
    let recorder = MemoryRecorder::new();
    let mut prob = coupled_problem(direct(), TotalsMode::Fwd);
    prob.set_nonlinear_solver(NonlinearSolver::RunOnce);
    prob.add_recorder(recorder.clone());
    let report = prob.run_model().unwrap();

    // One pass cannot close the loop through an implicit component.
    assert!(!report.converged);
    assert_eq!(report.iterations, 1);
    assert!(report.abs_err > RUN_ONCE_ATOL);
    assert!((report.abs_err - prob.model().unwrap().residual_norm()).abs() < 1e-15);

    let cases = recorder.cases();
    assert_eq!(cases.len(), 2);
    assert!(cases.iter().all(|c| !c.success));
    assert!(!cases[0].msg.is_empty());
}

#[test]
fn test_coupled_totals_agree_across_solvers() {
    // dR/dx = 2x - 4 + 0.1 = -2.1 at x = 0.9
    let expected = [("quad.a", 0.81 / 2.1), ("quad.b", 0.9 / 2.1)];
    let solvers: [(&str, fn() -> Box<dyn LinearSolver>); 3] =
        [("direct", direct), ("bgs", bgs), ("gmres", gmres)];
    for (name, make) in solvers {
        for mode in [TotalsMode::Fwd, TotalsMode::Rev] {
            let mut prob = coupled_problem(make(), mode);
            prob.run_model().unwrap();
            let totals = prob.compute_totals(&["quad.x"], &["quad.a", "quad.b"]).unwrap();
            for (wrt, want) in expected {
                let got = totals.value("quad.x", wrt).unwrap();
                assert!(
                    (got - want).abs() < 1e-8,
                    "{}/{:?}: d(quad.x)/d({}) = {} (expected {})",
                    name,
                    mode,
                    wrt,
                    got,
                    want
                );
            }
        }
    }
}

#[test]
fn test_coupled_check_totals() {
    let mut prob = coupled_problem(direct(), TotalsMode::Rev);
    prob.run_model().unwrap();
    let checks = prob
        .check_totals(&["quad.x", "feedback.c"], &["quad.a", "quad.b"], 1e-6)
        .unwrap();
    assert_eq!(checks.len(), 4);
    for check in &checks {
        assert!(check.rel_error < 1e-4, "{:?}", check);
    }
}

#[test]
fn test_explicit_only_cycle_is_a_configuration_error() {
    let mut model = Group::new();
    model
        .add_subsystem("double", ExecComp::new(&["y = 2*x"]).unwrap().component())
        .add_subsystem("half", ExecComp::new(&["x = 0.5*y"]).unwrap().component())
        .connect("double.y", "half.y")
        .connect("half.x", "double.x");
    let mut prob = Problem::new(model);
    let err = prob.setup(TotalsMode::Auto).unwrap_err();
    assert!(err.to_string().contains("cycle"), "{}", err);
    assert!(prob.setup(TotalsMode::Auto).is_err());
}

#[test]
fn test_promoted_inputs_and_user_ivc() {
    let mut ivc = IndepVarComp::new();
    ivc.add_output("b", -4.0);
    let mut model = Group::new();
    model
        .add_subsystem("ivc", Component::explicit(ivc))
        .add_subsystem("q1", Component::implicit(QuadraticComp::new()))
        .add_subsystem("q2", Component::implicit(QuadraticComp::new()))
        .connect("ivc.b", "q1.b")
        .connect("ivc.b", "q2.b")
        .promotes_inputs("q1", &["a", "c"])
        .promotes_inputs("q2", &["a", "c"]);
    let mut prob = Problem::new(model);
    prob.setup(TotalsMode::Fwd).unwrap();

    // One auto-IVC output per promoted name, none for the connected input.
    let order = prob.model().unwrap().execution_order().join(",");
    assert!(order.starts_with(AUTO_IVC), "{}", order);
    assert_eq!(
        prob.model().unwrap().instance(AUTO_IVC).unwrap().num_outputs(),
        2
    );

    prob.set_val("c", 3.0).unwrap();
    prob.run_model().unwrap();
    assert_eq!(prob.val("q1.x").unwrap(), 3.0);
    assert_eq!(prob.val("q2.x").unwrap(), 3.0);
    assert_eq!(prob.val("c").unwrap(), 3.0);
    assert_eq!(prob.val("q2.b").unwrap(), -4.0);

    let totals = prob.compute_totals(&["q1.x", "q2.x"], &["c", "ivc.b"]).unwrap();
    for of in ["q1.x", "q2.x"] {
        assert!((totals.value(of, "c").unwrap() + 0.5).abs() < 1e-5);
        assert!((totals.value(of, "ivc.b").unwrap() + 1.5).abs() < 1e-5);
    }
}

#[test]
fn test_list_variables() {
    let mut model = Group::new();
    model
        .add_subsystem("quad", Component::implicit(QuadraticComp::new()))
        .add_subsystem("twice", ExecComp::new(&["y = 2*x"]).unwrap().component())
        .connect("quad.x", "twice.x");
    let mut prob = Problem::new(model);
    prob.setup(TotalsMode::Auto).unwrap();
    prob.set_val("quad.b", -4.0).unwrap();
    prob.set_val("quad.c", 3.0).unwrap();
    prob.run_model().unwrap();

    let inputs = prob.list_inputs().unwrap();
    let names: Vec<&str> = inputs.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["quad.a", "quad.b", "quad.c", "twice.x"]);
    assert_eq!(inputs[3].1, vec![3.0]);

    let implicit = prob.list_outputs(OutputFilter::Implicit).unwrap();
    assert_eq!(implicit, vec![("quad.x".to_string(), vec![3.0])]);
    let explicit = prob.list_outputs(OutputFilter::Explicit).unwrap();
    assert!(explicit.contains(&("twice.y".to_string(), vec![6.0])));
    assert!(explicit.iter().any(|(n, _)| n.starts_with(AUTO_IVC)));

    let residuals = prob.list_residuals().unwrap();
    assert!(residuals.iter().all(|(_, r)| r.iter().all(|v| v.abs() < 1e-12)));
}

#[test]
fn test_unknown_variable_is_reported() {
    let mut model = Group::new();
    model.add_subsystem("quad", Component::implicit(QuadraticComp::new()));
    let mut prob = Problem::new(model);
    assert!(prob.val("quad.x").is_err());
    prob.setup(TotalsMode::Auto).unwrap();
    let err = prob.set_val("quad.nope", 1.0).unwrap_err();
    assert!(err.to_string().contains("quad.nope"), "{}", err);
    assert!(prob.compute_totals(&["quad.x"], &["quad.nope"]).is_err());
}
