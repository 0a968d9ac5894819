//! Dense linear algebra: one-shot solves and reusable LU factorizations.

use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};

use crate::error::{Error, Result};

/// Solve a linear system Ax = b using LU decomposition.
pub fn solve_dense(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    check_square(a, b.len())?;
    a.clone().lu().solve(b).ok_or(Error::SingularMatrix)
}

fn check_square(a: &DMatrix<f64>, rhs_len: usize) -> Result<()> {
    if a.nrows() != a.ncols() {
        return Err(Error::DimensionMismatch {
            expected: a.nrows(),
            actual: a.ncols(),
        });
    }
    if a.nrows() != rhs_len {
        return Err(Error::DimensionMismatch {
            expected: a.nrows(),
            actual: rhs_len,
        });
    }
    Ok(())
}

/// LU factorization of a matrix, reused across right-hand sides.
///
/// The factorization of the transpose is built on the first transposed
/// solve and kept alongside.
#[derive(Debug, Clone)]
pub struct CachedLu {
    matrix: DMatrix<f64>,
    lu: LU<f64, Dyn, Dyn>,
    lu_t: Option<LU<f64, Dyn, Dyn>>,
}

impl CachedLu {
    /// Factor `a`. Fails with [`Error::SingularMatrix`] if `a` is not invertible.
    pub fn new(a: DMatrix<f64>) -> Result<Self> {
        check_square(&a, a.nrows())?;
        let lu = a.clone().lu();
        if !lu.is_invertible() {
            return Err(Error::SingularMatrix);
        }
        Ok(Self {
            matrix: a,
            lu,
            lu_t: None,
        })
    }

    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Solve `A x = b`.
    pub fn solve(&self, b: &[f64]) -> Result<Vec<f64>> {
        check_square(&self.matrix, b.len())?;
        let rhs = DVector::from_column_slice(b);
        self.lu
            .solve(&rhs)
            .map(|x| x.as_slice().to_vec())
            .ok_or(Error::SingularMatrix)
    }

    /// Solve `Aᵀ x = b`.
    pub fn solve_transpose(&mut self, b: &[f64]) -> Result<Vec<f64>> {
        check_square(&self.matrix, b.len())?;
        let matrix = &self.matrix;
        let lu_t = self.lu_t.get_or_insert_with(|| matrix.transpose().lu());
        let rhs = DVector::from_column_slice(b);
        lu_t.solve(&rhs)
            .map(|x| x.as_slice().to_vec())
            .ok_or(Error::SingularMatrix)
    }
}
