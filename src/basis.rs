//! The basis-evaluator boundary.
//!
//! Turning a time grid into a basis matrix is an external collaborator's
//! job (a B-spline library, a Fourier basis, whatever the sampler used).
//! This crate only fixes the contract: rows correspond to grid points,
//! columns to basis functions, and the column count must equal the number
//! of basis coefficients the posterior was sampled with. Knot placement and
//! boundary handling are entirely the evaluator's responsibility.

use crate::samples::ModelError;
use ndarray::{Array2, ArrayView1};

/// Maps a time grid and a basis count to a basis matrix.
pub trait BasisEvaluator {
    /// Evaluates `num_basis` basis functions at every point of `times`,
    /// returning a `times.len() x num_basis` matrix.
    fn basis_matrix(&self, times: ArrayView1<f64>, num_basis: usize) -> Array2<f64>;
}

/// Invokes the evaluator and verifies the shape it promised.
pub(crate) fn checked_basis(
    evaluator: &dyn BasisEvaluator,
    times: ArrayView1<f64>,
    num_basis: usize,
) -> Result<Array2<f64>, ModelError> {
    let matrix = evaluator.basis_matrix(times, num_basis);
    if matrix.nrows() != times.len() || matrix.ncols() != num_basis {
        return Err(ModelError::BasisShape {
            expected_rows: times.len(),
            expected_cols: num_basis,
            found_rows: matrix.nrows(),
            found_cols: matrix.ncols(),
        });
    }
    Ok(matrix)
}
