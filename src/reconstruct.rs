//! Fitted-mean reconstruction from one posterior draw.
//!
//! A subject's fitted mean is a membership-weighted superposition over
//! clusters: the cluster-mean coefficients `nu`, plus the subject's scores
//! `chi` on each latent component's coefficients `phi`. In the functional
//! model every coefficient vector is projected through the subject's basis
//! row; in the multivariate model the coefficients act directly. The
//! covariate-adjusted variants shift both coefficient vectors by the
//! contraction of the effect tensors (`eta`, `xi`) with the subject's
//! covariate row.
//!
//! Clusters with exactly zero membership weight are skipped. The skip is an
//! optimization only; a dense evaluation produces the identical result
//! (zero times anything contributes nothing), which the tests verify.

use crate::samples::{Draw, ModelError};
use ndarray::{s, Array1, ArrayView1, ArrayView3, ArrayView4};

impl<'a> Draw<'a> {
    fn check_subject(&self, subject: usize) -> Result<(), ModelError> {
        if subject >= self.n_subjects() {
            return Err(ModelError::IndexOutOfRange {
                what: "subject",
                index: subject + 1,
                len: self.n_subjects(),
            });
        }
        Ok(())
    }

    fn check_basis_row(&self, basis_row: ArrayView1<f64>) -> Result<(), ModelError> {
        if basis_row.len() != self.n_basis() {
            return Err(ModelError::Shape(format!(
                "basis row holds {} values, but the posterior has {} coefficients",
                basis_row.len(),
                self.n_basis()
            )));
        }
        Ok(())
    }

    fn covariate_effects(
        &self,
        x_row: ArrayView1<f64>,
    ) -> Result<(ArrayView3<'_, f64>, ArrayView4<'_, f64>), ModelError> {
        let (eta, xi) = match (&self.eta, &self.xi) {
            (Some(eta), Some(xi)) => (eta.view(), xi.view()),
            _ => return Err(ModelError::MissingCovariateEffects),
        };
        if x_row.len() != eta.shape()[2] {
            return Err(ModelError::Shape(format!(
                "covariate row holds {} values, but the effect tensors expect {}",
                x_row.len(),
                eta.shape()[2]
            )));
        }
        Ok((eta, xi))
    }

    /// Fitted mean for `subject` at one observed point, given the basis row
    /// for that point (functional model, no covariates).
    pub fn mean_at(&self, subject: usize, basis_row: ArrayView1<f64>) -> Result<f64, ModelError> {
        self.check_subject(subject)?;
        self.check_basis_row(basis_row)?;
        let mut mean = 0.0;
        for k in 0..self.n_clusters() {
            let weight = self.z[[subject, k]];
            if weight == 0.0 {
                continue;
            }
            let mut value = self.nu.row(k).dot(&basis_row);
            for n in 0..self.n_components() {
                value += self.chi[[subject, n]] * self.phi.slice(s![k, .., n]).dot(&basis_row);
            }
            mean += weight * value;
        }
        Ok(mean)
    }

    /// Covariate-adjusted fitted mean at one observed point.
    pub fn mean_at_adjusted(
        &self,
        subject: usize,
        basis_row: ArrayView1<f64>,
        x_row: ArrayView1<f64>,
    ) -> Result<f64, ModelError> {
        self.check_subject(subject)?;
        self.check_basis_row(basis_row)?;
        let (eta, xi) = self.covariate_effects(x_row)?;
        let mut mean = 0.0;
        for k in 0..self.n_clusters() {
            let weight = self.z[[subject, k]];
            if weight == 0.0 {
                continue;
            }
            let coeff = eta.slice(s![k, .., ..]).dot(&x_row) + self.nu.row(k);
            let mut value = coeff.dot(&basis_row);
            for n in 0..self.n_components() {
                let comp = xi.slice(s![k, .., n, ..]).dot(&x_row) + self.phi.slice(s![k, .., n]);
                value += self.chi[[subject, n]] * comp.dot(&basis_row);
            }
            mean += weight * value;
        }
        Ok(mean)
    }

    /// Fitted mean vector for `subject` (multivariate model: coefficients
    /// act directly, no basis projection).
    pub fn mean_vector(&self, subject: usize) -> Result<Array1<f64>, ModelError> {
        self.check_subject(subject)?;
        let mut mean = Array1::<f64>::zeros(self.n_basis());
        for k in 0..self.n_clusters() {
            let weight = self.z[[subject, k]];
            if weight == 0.0 {
                continue;
            }
            mean.scaled_add(weight, &self.nu.row(k));
            for n in 0..self.n_components() {
                mean.scaled_add(
                    weight * self.chi[[subject, n]],
                    &self.phi.slice(s![k, .., n]),
                );
            }
        }
        Ok(mean)
    }

    /// Covariate-adjusted fitted mean vector (multivariate model).
    pub fn mean_vector_adjusted(
        &self,
        subject: usize,
        x_row: ArrayView1<f64>,
    ) -> Result<Array1<f64>, ModelError> {
        self.check_subject(subject)?;
        let (eta, xi) = self.covariate_effects(x_row)?;
        let mut mean = Array1::<f64>::zeros(self.n_basis());
        for k in 0..self.n_clusters() {
            let weight = self.z[[subject, k]];
            if weight == 0.0 {
                continue;
            }
            let coeff = eta.slice(s![k, .., ..]).dot(&x_row) + self.nu.row(k);
            mean.scaled_add(weight, &coeff);
            for n in 0..self.n_components() {
                let comp = xi.slice(s![k, .., n, ..]).dot(&x_row) + self.phi.slice(s![k, .., n]);
                mean.scaled_add(weight * self.chi[[subject, n]], &comp);
            }
        }
        Ok(mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::PosteriorSampleSet;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, Array3, Array4, Array5};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    /// Reference evaluation with no zero-weight skip: sums every cluster
    /// unconditionally.
    fn dense_mean_at(draw: &Draw, subject: usize, basis_row: ArrayView1<f64>) -> f64 {
        let mut mean = 0.0;
        for k in 0..draw.n_clusters() {
            let weight = draw.z[[subject, k]];
            let mut value = draw.nu.row(k).dot(&basis_row);
            for n in 0..draw.n_components() {
                value += draw.chi[[subject, n]] * draw.phi.slice(s![k, .., n]).dot(&basis_row);
            }
            mean += weight * value;
        }
        mean
    }

    fn set_with(z_row: [f64; 2]) -> PosteriorSampleSet {
        // S=1, K=2, P=3, N=2, I=1.
        let nu = Array3::from_shape_vec(
            (1, 2, 3),
            vec![1.0, 2.0, 3.0, -1.0, 0.5, 4.0],
        )
        .unwrap();
        let phi = Array4::from_shape_fn((1, 2, 3, 2), |(_, k, p, n)| {
            0.1 * (k as f64 + 1.0) + 0.01 * p as f64 + 0.5 * n as f64
        });
        let z = Array3::from_shape_vec((1, 1, 2), z_row.to_vec()).unwrap();
        let chi = Array3::from_shape_vec((1, 1, 2), vec![0.7, -0.2]).unwrap();
        let sigma = Array1::from_vec(vec![1.0]);
        PosteriorSampleSet::new(nu, phi, z, chi, sigma, None, None).unwrap()
    }

    #[test]
    fn one_hot_membership_isolates_a_single_cluster() {
        let set = set_with([1.0, 0.0]);
        let draw = set.draw(0);
        let basis_row = array![0.2, 0.3, 0.5];

        // Cluster 0's contribution computed by hand.
        let nu_part = 1.0 * 0.2 + 2.0 * 0.3 + 3.0 * 0.5;
        let phi_slice_n0: ArrayView1<f64> = draw.phi.slice(s![0, .., 0]);
        let phi_slice_n1: ArrayView1<f64> = draw.phi.slice(s![0, .., 1]);
        let phi_k0_n0 = phi_slice_n0.dot(&basis_row.view());
        let phi_k0_n1 = phi_slice_n1.dot(&basis_row.view());
        let expected = nu_part + 0.7 * phi_k0_n0 - 0.2 * phi_k0_n1;

        let mean = draw.mean_at(0, basis_row.view()).unwrap();
        assert_abs_diff_eq!(mean, expected, epsilon = 1e-12);

        // Perturbing the other cluster's parameters must not matter: its
        // weight is exactly zero, so cluster 1 contributes nothing.
        let dense = dense_mean_at(&draw, 0, basis_row.view());
        assert_abs_diff_eq!(mean, dense, epsilon = 1e-12);
    }

    #[test]
    fn skip_path_matches_dense_evaluation() {
        for z_row in [[0.0, 0.0], [0.0, 0.6], [0.3, 0.7]] {
            let set = set_with(z_row);
            let draw = set.draw(0);
            let basis_row = array![1.0, -0.5, 0.25];
            let skipped = draw.mean_at(0, basis_row.view()).unwrap();
            let dense = dense_mean_at(&draw, 0, basis_row.view());
            assert_abs_diff_eq!(skipped, dense, epsilon = 1e-12);
        }
    }

    #[test]
    fn skip_path_matches_dense_evaluation_on_random_draws() {
        let mut rng = StdRng::seed_from_u64(2024);
        let normal = Normal::new(0.0, 1.0).unwrap();
        for _ in 0..50 {
            // Random parameters with a sparse membership row: roughly half
            // the weights are exactly zero, so the skip actually fires.
            let nu = Array3::from_shape_fn((1, 4, 3), |_| normal.sample(&mut rng));
            let phi = Array4::from_shape_fn((1, 4, 3, 2), |_| normal.sample(&mut rng));
            let z = Array3::from_shape_fn((1, 1, 4), |_| {
                if rng.gen_bool(0.5) {
                    rng.gen_range(0.1..1.0)
                } else {
                    0.0
                }
            });
            let chi = Array3::from_shape_fn((1, 1, 2), |_| normal.sample(&mut rng));
            let sigma = Array1::from_vec(vec![1.0]);
            let set = PosteriorSampleSet::new(nu, phi, z, chi, sigma, None, None).unwrap();
            let draw = set.draw(0);
            let basis_row =
                Array1::from_shape_fn(3, |_| normal.sample(&mut rng));
            let skipped = draw.mean_at(0, basis_row.view()).unwrap();
            let dense = dense_mean_at(&draw, 0, basis_row.view());
            assert_abs_diff_eq!(skipped, dense, epsilon = 1e-12);
        }
    }

    #[test]
    fn multivariate_mean_adds_coefficients_directly() {
        let set = set_with([0.5, 0.5]);
        let draw = set.draw(0);
        let mean = draw.mean_vector(0).unwrap();
        let mut expected = Array1::<f64>::zeros(3);
        for k in 0..2 {
            expected.scaled_add(0.5, &draw.nu.row(k));
            expected.scaled_add(0.5 * 0.7, &draw.phi.slice(s![k, .., 0]));
            expected.scaled_add(0.5 * -0.2, &draw.phi.slice(s![k, .., 1]));
        }
        for p in 0..3 {
            assert_abs_diff_eq!(mean[p], expected[p], epsilon = 1e-12);
        }
    }

    #[test]
    fn covariate_adjustment_shifts_both_coefficient_sets() {
        // S=1, K=1, P=2, N=1, I=1, C=2; one-hot membership keeps the
        // arithmetic small enough to do by hand.
        let nu = Array3::from_shape_vec((1, 1, 2), vec![1.0, 2.0]).unwrap();
        let phi = Array4::from_shape_vec((1, 1, 2, 1), vec![0.5, -0.5]).unwrap();
        let z = Array3::from_elem((1, 1, 1), 1.0);
        let chi = Array3::from_elem((1, 1, 1), 2.0);
        let sigma = Array1::from_vec(vec![1.0]);
        // eta[k=0] = [[1, 0], [0, 1]]: covariate c shifts coefficient c.
        let eta = Array4::from_shape_vec((1, 1, 2, 2), vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        // xi[k=0, :, n=0, :] = [[0, 1], [1, 0]]: the swapped pattern.
        let xi = Array5::from_shape_vec((1, 1, 2, 1, 2), vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        let set =
            PosteriorSampleSet::new(nu, phi, z, chi, sigma, Some(eta), Some(xi)).unwrap();
        let draw = set.draw(0);

        let x_row = array![10.0, 20.0];
        let basis_row = array![1.0, 1.0];
        // Adjusted nu = [1+10, 2+20] = [11, 22]; adjusted phi = [0.5+20, -0.5+10].
        // mean = (11 + 22) + 2 * (20.5 + 9.5) = 33 + 60 = 93.
        let mean = draw
            .mean_at_adjusted(0, basis_row.view(), x_row.view())
            .unwrap();
        assert_abs_diff_eq!(mean, 93.0, epsilon = 1e-12);

        // The multivariate variant reports the same numbers before the
        // basis projection collapses them.
        let vec_mean = draw.mean_vector_adjusted(0, x_row.view()).unwrap();
        assert_abs_diff_eq!(vec_mean[0], 11.0 + 2.0 * 20.5, epsilon = 1e-12);
        assert_abs_diff_eq!(vec_mean[1], 22.0 + 2.0 * 9.5, epsilon = 1e-12);
    }

    #[test]
    fn adjusted_query_without_effect_draws_fails() {
        let set = set_with([1.0, 0.0]);
        let draw = set.draw(0);
        let err = draw
            .mean_at_adjusted(0, array![1.0, 0.0, 0.0].view(), array![1.0].view())
            .unwrap_err();
        assert!(matches!(err, ModelError::MissingCovariateEffects));
    }

    #[test]
    fn out_of_range_subject_is_reported() {
        let set = set_with([1.0, 0.0]);
        let draw = set.draw(0);
        let err = draw.mean_at(3, array![1.0, 0.0, 0.0].view()).unwrap_err();
        assert!(matches!(
            err,
            ModelError::IndexOutOfRange { what: "subject", .. }
        ));
    }
}
