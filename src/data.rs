//! Validated analysis inputs.
//!
//! Observations arrive once per analysis and are immutable afterwards. The
//! functional container pairs each subject's irregular time grid with its
//! observed values and precomputes the per-subject basis matrix through the
//! [`BasisEvaluator`] boundary, so likelihood evaluation never touches the
//! evaluator again. The multivariate container is one fixed-width matrix.

use crate::basis::{checked_basis, BasisEvaluator};
use crate::samples::ModelError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Functional observations: per subject, (time, value) pairs of irregular
/// length, plus the basis matrix evaluated on that subject's grid.
#[derive(Debug, Clone)]
pub struct FunctionalData {
    times: Vec<Array1<f64>>,
    values: Vec<Array1<f64>>,
    bases: Vec<Array2<f64>>,
}

impl FunctionalData {
    /// Builds the container, evaluating one `L_i x num_basis` basis matrix
    /// per subject. `num_basis` must equal the posterior's coefficient
    /// count P.
    pub fn new(
        times: Vec<Array1<f64>>,
        values: Vec<Array1<f64>>,
        evaluator: &dyn BasisEvaluator,
        num_basis: usize,
    ) -> Result<Self, ModelError> {
        if times.len() != values.len() {
            return Err(ModelError::Shape(format!(
                "{} time grids but {} value vectors",
                times.len(),
                values.len()
            )));
        }
        for (i, (t, y)) in times.iter().zip(&values).enumerate() {
            if t.len() != y.len() {
                return Err(ModelError::Shape(format!(
                    "subject {} observed {} time points but {} values",
                    i + 1,
                    t.len(),
                    y.len()
                )));
            }
        }
        let bases = times
            .iter()
            .map(|t| checked_basis(evaluator, t.view(), num_basis))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            times,
            values,
            bases,
        })
    }

    /// Number of observed subjects I.
    pub fn n_subjects(&self) -> usize {
        self.values.len()
    }

    /// Subject `i`'s time grid (0-based internal index).
    pub fn times(&self, i: usize) -> ArrayView1<'_, f64> {
        self.times[i].view()
    }

    /// Subject `i`'s observed values.
    pub fn values(&self, i: usize) -> ArrayView1<'_, f64> {
        self.values[i].view()
    }

    /// Subject `i`'s basis matrix, `L_i x P`.
    pub fn basis(&self, i: usize) -> ArrayView2<'_, f64> {
        self.bases[i].view()
    }
}

/// Multivariate observations: one fixed-length vector per subject, I x P.
#[derive(Debug, Clone)]
pub struct MultivariateData {
    values: Array2<f64>,
}

impl MultivariateData {
    pub fn new(values: Array2<f64>) -> Self {
        Self { values }
    }

    /// Number of observed subjects I.
    pub fn n_subjects(&self) -> usize {
        self.values.nrows()
    }

    /// Length of each observation vector.
    pub fn dimension(&self) -> usize {
        self.values.ncols()
    }

    /// Subject `i`'s observation vector.
    pub fn values(&self, i: usize) -> ArrayView1<'_, f64> {
        self.values.row(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    struct Identity;

    impl BasisEvaluator for Identity {
        fn basis_matrix(&self, times: ArrayView1<f64>, num_basis: usize) -> Array2<f64> {
            Array2::from_shape_fn((times.len(), num_basis), |(l, p)| {
                if l % num_basis == p { 1.0 } else { 0.0 }
            })
        }
    }

    #[test]
    fn ragged_subjects_are_allowed() {
        let data = FunctionalData::new(
            vec![array![0.0, 0.5, 1.0], array![0.0, 1.0]],
            vec![array![1.0, 2.0, 3.0], array![4.0, 5.0]],
            &Identity,
            3,
        )
        .unwrap();
        assert_eq!(data.n_subjects(), 2);
        assert_eq!(data.basis(0).shape(), &[3, 3]);
        assert_eq!(data.basis(1).shape(), &[2, 3]);
    }

    #[test]
    fn time_value_length_disagreement_is_rejected() {
        let err = FunctionalData::new(
            vec![array![0.0, 0.5]],
            vec![array![1.0]],
            &Identity,
            3,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::Shape(_)));
    }
}
