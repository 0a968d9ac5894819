//! mdao command-line interface.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use mdao::{
    ArmijoOptions, BoundsMode, Component, ExecComp, Group, ImplicitComponent, LineSearch,
    LinearSolverChoice, NewtonOptions, NewtonSolver, Overrides, Problem, QuadraticComp,
    QuadraticJacVec, QuadraticLinearize, SolveReport, Totals, TotalsMode,
};

#[derive(Parser)]
#[command(name = "mdao")]
#[command(about = "Run coupled analyses and compute total derivatives", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Solve a·x² + b·x + c = 0 with Newton and print dx/d(a, b, c)
    Quadratic(QuadraticArgs),
    /// Evaluate an expression component and its totals
    Exec(ExecArgs),
}

#[derive(clap::Args)]
struct QuadraticArgs {
    #[arg(short, default_value_t = 1.0, allow_negative_numbers = true)]
    a: f64,
    #[arg(short, default_value_t = -4.0, allow_negative_numbers = true)]
    b: f64,
    #[arg(short, default_value_t = 3.0, allow_negative_numbers = true)]
    c: f64,

    /// Derivative flavor: fd, linearize or jacvec
    #[arg(long, default_value = "linearize")]
    component: String,

    /// Linear solver: direct, gmres, bgs or run_once
    #[arg(long, default_value = "direct")]
    linear_solver: String,

    /// Totals mode: auto, fwd or rev
    #[arg(long, default_value = "auto")]
    mode: String,

    /// Line search: none, bounds or armijo
    #[arg(long, default_value = "none")]
    linesearch: String,

    /// Initial value of x, applied as a nonlinear guess
    #[arg(long, allow_negative_numbers = true)]
    guess: Option<f64>,

    /// Maximum Newton iterations
    #[arg(long, default_value_t = 10)]
    maxiter: usize,

    /// Compare totals with finite differences
    #[arg(long)]
    check: bool,
}

#[derive(clap::Args)]
struct ExecArgs {
    /// Equations such as "y = 2*x + z**2"; repeat for several outputs
    #[arg(value_name = "EQUATION", required = true)]
    equations: Vec<String>,

    /// Input values as name=value
    #[arg(short, long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,

    /// Also print d(output)/d(input) for every pair
    #[arg(long)]
    totals: bool,

    /// Totals mode: auto, fwd or rev
    #[arg(long, default_value = "auto")]
    mode: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Command::Quadratic(args) => run_quadratic(args, cli.verbose),
        Command::Exec(args) => run_exec(args, cli.verbose),
    }
}

fn totals_mode(name: &str) -> Result<TotalsMode> {
    TotalsMode::from_name(name).ok_or_else(|| anyhow!("unknown totals mode '{}'", name))
}

fn linesearch(name: &str) -> Result<LineSearch> {
    Ok(match name.to_lowercase().as_str() {
        "none" => LineSearch::None,
        "bounds" | "bounds_enforce" => LineSearch::BoundsEnforce(BoundsMode::Vector),
        "armijo" | "armijo_goldstein" => LineSearch::ArmijoGoldstein(ArmijoOptions::default()),
        other => bail!("unknown line search '{}'", other),
    })
}

/// Wrap `base` with a guess that moves `x` to `guess` before the first
/// residual evaluation.
fn with_guess<C: ImplicitComponent + 'static>(base: C, guess: Option<f64>) -> Component {
    match guess {
        Some(x0) => Component::implicit(
            Overrides::new(base).guess_nonlinear(move |_, _, outputs, _| outputs.set_value("x", x0)),
        ),
        None => Component::implicit(base),
    }
}

fn quadratic_component(name: &str, guess: Option<f64>) -> Result<Component> {
    Ok(match name.to_lowercase().as_str() {
        "fd" => with_guess(QuadraticComp::new(), guess),
        "linearize" => with_guess(QuadraticLinearize::new(), guess),
        "jacvec" => with_guess(QuadraticJacVec::new(), guess),
        other => bail!("unknown quadratic component '{}'", other),
    })
}

fn run_quadratic(args: &QuadraticArgs, verbose: bool) -> Result<()> {
    let mode = totals_mode(&args.mode)?;
    let linear = LinearSolverChoice::from_name(&args.linear_solver)
        .ok_or_else(|| anyhow!("unknown linear solver '{}'", args.linear_solver))?;

    log::debug!(
        "quadratic: component {}, linear solver {:?}, mode {:?}",
        args.component,
        linear,
        mode
    );

    let mut model = Group::new();
    model.add_subsystem("comp", quadratic_component(&args.component, args.guess)?);

    let mut prob = Problem::new(model);
    prob.set_nonlinear_solver(
        NewtonSolver::new()
            .with_options(NewtonOptions::default().with_maxiter(args.maxiter))
            .with_linesearch(linesearch(&args.linesearch)?),
    );
    prob.set_linear_solver_boxed(linear.build());
    prob.setup(mode).context("Failed to set up quadratic model")?;
    prob.set_val("comp.a", args.a)?;
    prob.set_val("comp.b", args.b)?;
    prob.set_val("comp.c", args.c)?;

    println!("Quadratic: {}·x² + {}·x + {} = 0", args.a, args.b, args.c);
    println!("=================================");
    println!();
    if verbose {
        println!("Component: {}", args.component);
        println!("Linear solver: {:?}", linear);
        println!("Totals mode: {:?}", mode);
        println!();
    }

    let report = prob.run_model().context("Newton solve failed")?;
    print_report(&report);
    println!("  x = {:.10}", prob.val("comp.x")?);
    println!();

    let wrt = ["comp.a", "comp.b", "comp.c"];
    let totals = prob
        .compute_totals(&["comp.x"], &wrt)
        .context("Failed to compute totals")?;
    print_totals(&totals, &["comp.x"], &wrt);

    if args.check {
        println!("Check against finite differences:");
        for check in prob.check_totals(&["comp.x"], &wrt, 1e-6)? {
            println!(
                "  d({})/d({}): abs {:.3e}, rel {:.3e}",
                check.of, check.wrt, check.abs_error, check.rel_error
            );
        }
        println!();
    }
    Ok(())
}

/// Split `name=value` assignments.
fn parse_assignment(text: &str) -> Result<(String, f64)> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{}'", text))?;
    let value = value
        .trim()
        .parse::<f64>()
        .with_context(|| format!("invalid value for '{}'", name.trim()))?;
    Ok((name.trim().to_string(), value))
}

fn run_exec(args: &ExecArgs, verbose: bool) -> Result<()> {
    let mode = totals_mode(&args.mode)?;
    let equations: Vec<&str> = args.equations.iter().map(String::as_str).collect();
    let comp = ExecComp::new(&equations).context("Invalid expression component")?;
    let inputs: Vec<String> = comp.inputs().iter().map(|n| format!("exec.{}", n)).collect();
    let outputs: Vec<String> = comp.outputs().map(|n| format!("exec.{}", n)).collect();

    let mut model = Group::new();
    model.add_subsystem("exec", comp.component());
    let mut prob = Problem::new(model);
    prob.setup(mode)?;

    for assignment in &args.set {
        let (name, value) = parse_assignment(assignment)?;
        prob.set_val(&format!("exec.{}", name), value)
            .with_context(|| format!("Cannot set '{}'", name))?;
    }

    let report = prob.run_model().context("Evaluation failed")?;
    if verbose {
        print_report(&report);
        println!("Inputs:");
        for (name, value) in prob.list_inputs()? {
            println!("  {} = {:?}", name, value);
        }
        println!();
    }

    println!("Outputs:");
    for name in &outputs {
        println!("  {} = {:.10}", name, prob.val(name)?);
    }
    println!();

    if args.totals && !inputs.is_empty() {
        let of: Vec<&str> = outputs.iter().map(String::as_str).collect();
        let wrt: Vec<&str> = inputs.iter().map(String::as_str).collect();
        let totals = prob.compute_totals(&of, &wrt)?;
        print_totals(&totals, &of, &wrt);
    }
    Ok(())
}

fn print_report(report: &SolveReport) {
    if report.converged {
        println!("Converged in {} iterations.", report.iterations);
    } else {
        eprintln!(
            "Warning: solver did not converge after {} iterations (|r| = {:e})",
            report.iterations, report.abs_err
        );
    }
    println!();
}

fn print_totals(totals: &Totals, of: &[&str], wrt: &[&str]) {
    println!("Total derivatives:");
    for o in of {
        for w in wrt {
            match totals.value(o, w) {
                Some(v) => println!("  d({})/d({}) = {:.10}", o, w, v),
                None => println!("  d({})/d({}) = n/a", o, w),
            }
        }
    }
    println!();
}
