//! Step selection for Newton updates.

use crate::error::Result;
use crate::model::Model;

/// How bound violations are removed from a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BoundsMode {
    /// Shrink the whole step so that every entry stays feasible.
    #[default]
    Vector,
    /// Clip each violating entry at its bound.
    Wall,
}

/// Armijo-Goldstein backtracking options.
#[derive(Debug, Clone)]
pub struct ArmijoOptions {
    /// Sufficient decrease parameter.
    pub c: f64,
    /// Backtracking factor.
    pub rho: f64,
    pub maxiter: usize,
    /// Initial step length.
    pub alpha: f64,
    /// Shrink the step when a trial point raises an analysis failure.
    pub retry_on_analysis_error: bool,
    pub bounds: BoundsMode,
}

impl Default for ArmijoOptions {
    fn default() -> Self {
        Self {
            c: 0.1,
            rho: 0.5,
            maxiter: 5,
            alpha: 1.0,
            retry_on_analysis_error: true,
            bounds: BoundsMode::Vector,
        }
    }
}

impl ArmijoOptions {
    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    pub fn with_rho(mut self, rho: f64) -> Self {
        self.rho = rho;
        self
    }

    pub fn with_maxiter(mut self, maxiter: usize) -> Self {
        self.maxiter = maxiter;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_retry_on_analysis_error(mut self, retry: bool) -> Self {
        self.retry_on_analysis_error = retry;
        self
    }
}

/// Line search applied after each Newton step.
#[derive(Debug, Clone, Default)]
pub enum LineSearch {
    /// Take the full step.
    #[default]
    None,
    BoundsEnforce(BoundsMode),
    ArmijoGoldstein(ArmijoOptions),
}

impl LineSearch {
    pub fn name(&self) -> &'static str {
        match self {
            LineSearch::None => "none",
            LineSearch::BoundsEnforce(_) => "bounds_enforce",
            LineSearch::ArmijoGoldstein(_) => "armijo_goldstein",
        }
    }

    /// Move the outputs from `u0` along `du`, evaluate residuals at the new
    /// point and return its residual norm. `phi0` is the norm at `u0`.
    pub fn step(&self, model: &mut Model, u0: &[f64], du: &[f64], phi0: f64) -> Result<f64> {
        match self {
            LineSearch::None => {
                let u: Vec<f64> = u0.iter().zip(du).map(|(u, d)| u + d).collect();
                model.set_outputs_vec(&u)?;
                model.run_apply_nonlinear()?;
                Ok(model.residual_norm())
            }
            LineSearch::BoundsEnforce(mode) => {
                let u = enforce_bounds(model, u0, du, 1.0, *mode);
                model.set_outputs_vec(&u)?;
                model.run_apply_nonlinear()?;
                Ok(model.residual_norm())
            }
            LineSearch::ArmijoGoldstein(opts) => armijo(model, u0, du, phi0, opts),
        }
    }
}

/// `u0 + alpha·du`, pulled back inside the output bounds.
fn enforce_bounds(model: &Model, u0: &[f64], du: &[f64], alpha: f64, mode: BoundsMode) -> Vec<f64> {
    let (lower, upper) = model.bounds();
    match mode {
        BoundsMode::Wall => u0
            .iter()
            .zip(du)
            .enumerate()
            .map(|(k, (u, d))| (u + alpha * d).max(lower[k]).min(upper[k]))
            .collect(),
        BoundsMode::Vector => {
            let mut scale = 1.0_f64;
            for (k, (u, d)) in u0.iter().zip(du).enumerate() {
                let trial = u + alpha * d;
                let limit = if trial > upper[k] {
                    upper[k]
                } else if trial < lower[k] {
                    lower[k]
                } else {
                    continue;
                };
                let step = alpha * d;
                if step != 0.0 {
                    scale = scale.min(((limit - u) / step).max(0.0));
                }
            }
            u0.iter()
                .zip(du)
                .map(|(u, d)| u + scale * alpha * d)
                .collect()
        }
    }
}

fn armijo(model: &mut Model, u0: &[f64], du: &[f64], phi0: f64, opts: &ArmijoOptions) -> Result<f64> {
    let mut alpha = opts.alpha;
    let mut iter = 0;
    loop {
        iter += 1;
        let u = enforce_bounds(model, u0, du, alpha, opts.bounds);
        model.set_outputs_vec(&u)?;
        match model.run_apply_nonlinear() {
            Ok(()) => {
                let phi = model.residual_norm();
                log::trace!("armijo iteration {}: alpha = {}, |r| = {:e}", iter, alpha, phi);
                if phi <= (1.0 - opts.c * alpha) * phi0 || iter >= opts.maxiter {
                    return Ok(phi);
                }
            }
            Err(e) if e.is_analysis_failure() && opts.retry_on_analysis_error && iter < opts.maxiter => {
                log::debug!("armijo: {} at alpha = {}, backtracking", e, alpha);
                model.release_all();
            }
            Err(e) => return Err(e),
        }
        alpha *= opts.rho;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armijo_defaults() {
        let opts = ArmijoOptions::default();
        assert_eq!(opts.c, 0.1);
        assert_eq!(opts.rho, 0.5);
        assert_eq!(opts.maxiter, 5);
        assert_eq!(opts.alpha, 1.0);
        assert!(opts.retry_on_analysis_error);
    }

    #[test]
    fn linesearch_names() {
        assert_eq!(LineSearch::default().name(), "none");
        assert_eq!(
            LineSearch::ArmijoGoldstein(ArmijoOptions::default()).name(),
            "armijo_goldstein"
        );
    }
}
