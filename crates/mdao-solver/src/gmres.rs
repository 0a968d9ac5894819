//! Restarted GMRES for real linear systems.
//!
//! Solves A*x = b where A is represented by a [`LinearOperator`]. The
//! operator's preconditioner is applied on the right in flexible form: the
//! preconditioned directions are stored, so the preconditioner may change
//! between iterations (e.g. an inner iterative solver).

use crate::error::{Error, Result};
use crate::operator::LinearOperator;

/// GMRES solver configuration.
#[derive(Debug, Clone)]
pub struct GmresConfig {
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// Relative residual tolerance.
    pub tol: f64,
    /// Absolute residual tolerance.
    pub atol: f64,
    /// Restart parameter (Krylov subspace dimension before restart).
    pub restart: usize,
}

impl Default for GmresConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-10,
            atol: 1e-12,
            restart: 20,
        }
    }
}

/// Result of a GMRES solve.
#[derive(Debug, Clone)]
pub struct GmresResult {
    /// Solution vector.
    pub x: Vec<f64>,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Final residual norm ||b - A x||.
    pub residual: f64,
    /// Whether the solver converged.
    pub converged: bool,
}

/// Solve A*x = b using restarted, right-preconditioned GMRES.
///
/// `x0` seeds the iteration; a zero vector is used when it is absent.
pub fn solve_gmres(
    op: &mut dyn LinearOperator,
    b: &[f64],
    x0: Option<&[f64]>,
    config: &GmresConfig,
) -> Result<GmresResult> {
    let n = op.dim();
    if b.len() != n {
        return Err(Error::DimensionMismatch {
            expected: n,
            actual: b.len(),
        });
    }
    let mut x = match x0 {
        Some(x0) if x0.len() == n => x0.to_vec(),
        Some(x0) => {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: x0.len(),
            })
        }
        None => vec![0.0; n],
    };

    let b_norm = norm(b);
    let threshold = config.atol.max(config.tol * b_norm);
    if b_norm < 1e-300 {
        return Ok(GmresResult {
            x: vec![0.0; n],
            iterations: 0,
            residual: 0.0,
            converged: true,
        });
    }

    let mut total_iter = 0;
    let mut ax = vec![0.0; n];
    loop {
        // r = b - A*x
        op.apply(&x, &mut ax)?;
        let mut r: Vec<f64> = b.iter().zip(&ax).map(|(bi, axi)| bi - axi).collect();
        let r_norm = norm(&r);
        if r_norm <= threshold {
            return Ok(GmresResult {
                x,
                iterations: total_iter,
                residual: r_norm,
                converged: true,
            });
        }
        if total_iter >= config.max_iter {
            return Ok(GmresResult {
                x,
                iterations: total_iter,
                residual: r_norm,
                converged: false,
            });
        }

        // Arnoldi process with modified Gram-Schmidt
        let m = config.restart.max(1).min(n);
        let mut v: Vec<Vec<f64>> = Vec::with_capacity(m + 1);
        let mut z: Vec<Vec<f64>> = Vec::with_capacity(m);
        let mut h = vec![vec![0.0; m + 1]; m];

        let inv_r_norm = 1.0 / r_norm;
        for ri in r.iter_mut() {
            *ri *= inv_r_norm;
        }
        v.push(r);

        // g = ||r|| * e_1
        let mut g = vec![0.0; m + 1];
        g[0] = r_norm;

        let mut cs = vec![0.0; m];
        let mut sn = vec![0.0; m];

        let mut k = 0;
        while k < m && total_iter < config.max_iter {
            total_iter += 1;

            // w = A * M⁻¹ * v[k]
            let mut zk = vec![0.0; n];
            op.precondition(&v[k], &mut zk)?;
            let mut w = vec![0.0; n];
            op.apply(&zk, &mut w)?;
            z.push(zk);

            for j in 0..=k {
                let hij = dot(&v[j], &w);
                h[k][j] = hij;
                for (wi, vji) in w.iter_mut().zip(&v[j]) {
                    *wi -= hij * vji;
                }
            }

            let w_norm = norm(&w);
            h[k][k + 1] = w_norm;

            // Apply previous Givens rotations to h[k]
            for j in 0..k {
                let temp = cs[j] * h[k][j] + sn[j] * h[k][j + 1];
                h[k][j + 1] = -sn[j] * h[k][j] + cs[j] * h[k][j + 1];
                h[k][j] = temp;
            }

            let (c, s) = givens_rotation(h[k][k], h[k][k + 1]);
            cs[k] = c;
            sn[k] = s;
            h[k][k] = c * h[k][k] + s * h[k][k + 1];
            h[k][k + 1] = 0.0;
            g[k + 1] = -s * g[k];
            g[k] *= c;

            k += 1;
            if g[k].abs() <= threshold || w_norm < 1e-300 {
                // converged or lucky breakdown
                break;
            }
            let inv_w = 1.0 / w_norm;
            v.push(w.iter().map(|wi| wi * inv_w).collect());
        }

        // Back-substitution to find y from H*y = g
        let mut y = vec![0.0; k];
        for i in (0..k).rev() {
            let mut sum = g[i];
            for j in (i + 1)..k {
                sum -= h[j][i] * y[j];
            }
            if h[i][i].abs() > 1e-300 {
                y[i] = sum / h[i][i];
            }
        }

        // x = x + Z * y
        for (zi, yi) in z.iter().zip(&y) {
            for (xj, zij) in x.iter_mut().zip(zi) {
                *xj += zij * yi;
            }
        }
        log::trace!("gmres cycle done after {} iterations, |g| = {:e}", total_iter, g[k].abs());
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// Givens rotation coefficients zeroing `b` against `a`.
fn givens_rotation(a: f64, b: f64) -> (f64, f64) {
    if b.abs() < 1e-300 {
        return (1.0, 0.0);
    }
    let r = a.hypot(b);
    (a / r, b / r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::DenseOperator;
    use nalgebra::{dmatrix, DMatrix};

    /// Simple diagonal operator for testing.
    struct DiagOp {
        diag: Vec<f64>,
    }

    impl LinearOperator for DiagOp {
        fn dim(&self) -> usize {
            self.diag.len()
        }

        fn apply(&mut self, x: &[f64], y: &mut [f64]) -> Result<()> {
            for ((yi, di), xi) in y.iter_mut().zip(&self.diag).zip(x) {
                *yi = di * xi;
            }
            Ok(())
        }
    }

    #[test]
    fn gmres_diagonal_system() {
        let diag: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let b: Vec<f64> = diag.iter().map(|d| 2.0 * d).collect();
        let mut op = DiagOp { diag };

        let result = solve_gmres(&mut op, &b, None, &GmresConfig::default()).unwrap();

        assert!(result.converged, "GMRES did not converge");
        for xi in &result.x {
            assert!((xi - 2.0).abs() < 1e-8);
        }
    }

    #[test]
    fn gmres_zero_rhs() {
        let mut op = DiagOp { diag: vec![1.0, 2.0, 3.0] };
        let result = solve_gmres(&mut op, &[0.0; 3], None, &GmresConfig::default()).unwrap();
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.x, vec![0.0; 3]);
    }

    #[test]
    fn gmres_nonsymmetric_dense() {
        let a = dmatrix![4.0, 1.0, 0.0; -2.0, 3.0, 1.0; 0.5, 0.0, 2.0];
        let expected = [1.0, -1.0, 2.0];
        let b = &a * nalgebra::DVector::from_column_slice(&expected);
        let mut op = DenseOperator::new(a).unwrap();

        let result = solve_gmres(&mut op, b.as_slice(), None, &GmresConfig::default()).unwrap();
        assert!(result.converged);
        for (xi, ei) in result.x.iter().zip(expected) {
            assert!((xi - ei).abs() < 1e-8);
        }
    }

    #[test]
    fn gmres_restart_behavior() {
        let n = 50;
        let a = DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                (i + 1) as f64
            } else if j == i + 1 {
                0.5
            } else {
                0.0
            }
        });
        let b = vec![1.0; n];
        let config = GmresConfig {
            max_iter: 500,
            restart: 5,
            ..Default::default()
        };
        let mut op = DenseOperator::new(a).unwrap();
        let result = solve_gmres(&mut op, &b, None, &config).unwrap();
        assert!(result.converged);
        assert!(result.residual < 1e-8);
    }

    #[test]
    fn gmres_preconditioner_reduces_iterations() {
        let n = 30;
        let a = DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                10.0_f64.powi((i % 6) as i32)
            } else if j + 1 == i {
                1.0
            } else {
                0.0
            }
        });
        let b = vec![1.0; n];
        let config = GmresConfig::default();

        let mut plain = DenseOperator::new(a.clone()).unwrap();
        let r1 = solve_gmres(&mut plain, &b, None, &config).unwrap();
        let mut jacobi = DenseOperator::new(a).unwrap().with_jacobi();
        let r2 = solve_gmres(&mut jacobi, &b, None, &config).unwrap();

        assert!(r1.converged && r2.converged);
        assert!(r2.iterations <= r1.iterations);
        for (x1, x2) in r1.x.iter().zip(&r2.x) {
            assert!((x1 - x2).abs() < 1e-6);
        }
    }

    #[test]
    fn gmres_warm_start_at_solution() {
        let mut op = DiagOp { diag: vec![2.0, 4.0] };
        let result =
            solve_gmres(&mut op, &[2.0, 4.0], Some(&[1.0, 1.0]), &GmresConfig::default()).unwrap();
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn gmres_dimension_mismatch() {
        let mut op = DiagOp { diag: vec![1.0, 2.0] };
        let err = solve_gmres(&mut op, &[1.0], None, &GmresConfig::default()).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn givens_rotation_test() {
        let (c, s) = givens_rotation(3.0, 4.0);
        assert!((-s * 3.0 + c * 4.0).abs() < 1e-12);
        assert!((c * 3.0 + s * 4.0 - 5.0).abs() < 1e-12);
    }
}
