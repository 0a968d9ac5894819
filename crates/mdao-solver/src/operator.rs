//! Linear operator abstraction for iterative solvers.
//!
//! The operator of a model calls back into components, so applying it
//! mutates state and may fail; both methods take `&mut self` and return a
//! [`Result`].

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

/// A linear operator that computes `y = A x`, with an optional right
/// preconditioner `z = M⁻¹ r`.
pub trait LinearOperator {
    /// Dimension of the operator (N x N).
    fn dim(&self) -> usize;

    /// Apply the operator: `y = A x`.
    fn apply(&mut self, x: &[f64], y: &mut [f64]) -> Result<()>;

    /// Apply the preconditioner: `z = M⁻¹ r`. Identity by default.
    fn precondition(&mut self, r: &[f64], z: &mut [f64]) -> Result<()> {
        z.copy_from_slice(r);
        Ok(())
    }
}

/// Dense matrix operator, optionally preconditioned by its inverse diagonal.
#[derive(Debug, Clone)]
pub struct DenseOperator {
    matrix: DMatrix<f64>,
    jacobi: bool,
}

impl DenseOperator {
    pub fn new(matrix: DMatrix<f64>) -> Result<Self> {
        if matrix.nrows() != matrix.ncols() {
            return Err(Error::DimensionMismatch {
                expected: matrix.nrows(),
                actual: matrix.ncols(),
            });
        }
        Ok(Self {
            matrix,
            jacobi: false,
        })
    }

    /// Use `diag(A)⁻¹` as the preconditioner.
    pub fn with_jacobi(mut self) -> Self {
        self.jacobi = true;
        self
    }
}

impl LinearOperator for DenseOperator {
    fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    fn apply(&mut self, x: &[f64], y: &mut [f64]) -> Result<()> {
        let result = &self.matrix * DVector::from_column_slice(x);
        y.copy_from_slice(result.as_slice());
        Ok(())
    }

    fn precondition(&mut self, r: &[f64], z: &mut [f64]) -> Result<()> {
        if !self.jacobi {
            z.copy_from_slice(r);
            return Ok(());
        }
        for (i, (zi, ri)) in z.iter_mut().zip(r).enumerate() {
            let d = self.matrix[(i, i)];
            *zi = if d != 0.0 { ri / d } else { *ri };
        }
        Ok(())
    }
}
