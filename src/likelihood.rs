//! Gaussian observation-model density aggregation.
//!
//! Every observed point contributes a normal log-density centered at the
//! reconstructed mean with variance `sigma` (the draw's residual variance;
//! the standard deviation is its square root). The multivariate model uses
//! an isotropic `sigma * I` covariance, not a general covariance matrix.
//!
//! Aggregation is a plain sum over subjects and points, so the result is
//! invariant (within floating tolerance) to summation order. A draw with
//! non-positive variance fails before any density is evaluated; NaN is
//! never silently propagated.

use crate::data::{FunctionalData, MultivariateData};
use crate::samples::{Draw, ModelError};
use ndarray::ArrayView2;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

fn check_sigma(sigma: f64) -> Result<(), ModelError> {
    if !(sigma > 0.0) {
        return Err(ModelError::NonPositiveVariance(sigma));
    }
    Ok(())
}

fn check_subjects(expected: usize, found: usize) -> Result<(), ModelError> {
    if expected != found {
        return Err(ModelError::Shape(format!(
            "the sample set models {expected} subjects, but the data holds {found}"
        )));
    }
    Ok(())
}

fn check_covariates(draw: &Draw, covariates: ArrayView2<f64>) -> Result<(), ModelError> {
    if covariates.nrows() != draw.n_subjects() {
        return Err(ModelError::Shape(format!(
            "the covariate matrix holds {} rows, but the sample set models {} subjects",
            covariates.nrows(),
            draw.n_subjects()
        )));
    }
    Ok(())
}

/// Log-density of `N(mean, variance)` at `y`. `variance` must already be
/// validated as positive.
fn normal_ln_pdf(y: f64, mean: f64, variance: f64) -> f64 {
    -0.5 * (LN_2PI + variance.ln()) - (y - mean).powi(2) / (2.0 * variance)
}

/// Aggregate log-likelihood of one draw over functional observations.
pub fn log_likelihood(draw: &Draw, data: &FunctionalData) -> Result<f64, ModelError> {
    check_sigma(draw.sigma)?;
    check_subjects(draw.n_subjects(), data.n_subjects())?;
    let mut log_lik = 0.0;
    for i in 0..data.n_subjects() {
        let basis = data.basis(i);
        let y = data.values(i);
        for l in 0..y.len() {
            let mean = draw.mean_at(i, basis.row(l))?;
            log_lik += normal_ln_pdf(y[l], mean, draw.sigma);
        }
    }
    Ok(log_lik)
}

/// Covariate-adjusted aggregate log-likelihood, functional observations.
/// `covariates` is the I x C design matrix.
pub fn log_likelihood_adjusted(
    draw: &Draw,
    data: &FunctionalData,
    covariates: ArrayView2<f64>,
) -> Result<f64, ModelError> {
    check_sigma(draw.sigma)?;
    check_subjects(draw.n_subjects(), data.n_subjects())?;
    check_covariates(draw, covariates)?;
    let mut log_lik = 0.0;
    for i in 0..data.n_subjects() {
        let basis = data.basis(i);
        let y = data.values(i);
        let x_row = covariates.row(i);
        for l in 0..y.len() {
            let mean = draw.mean_at_adjusted(i, basis.row(l), x_row)?;
            log_lik += normal_ln_pdf(y[l], mean, draw.sigma);
        }
    }
    Ok(log_lik)
}

/// Aggregate log-likelihood of one draw over multivariate observations,
/// under the isotropic `sigma * I` covariance.
pub fn log_likelihood_mv(draw: &Draw, data: &MultivariateData) -> Result<f64, ModelError> {
    check_sigma(draw.sigma)?;
    check_subjects(draw.n_subjects(), data.n_subjects())?;
    check_dimension(draw, data)?;
    let d = data.dimension() as f64;
    let mut log_lik = 0.0;
    for i in 0..data.n_subjects() {
        let mean = draw.mean_vector(i)?;
        let resid = &data.values(i) - &mean;
        log_lik += -0.5 * d * (LN_2PI + draw.sigma.ln()) - resid.dot(&resid) / (2.0 * draw.sigma);
    }
    Ok(log_lik)
}

/// Covariate-adjusted aggregate log-likelihood, multivariate observations.
pub fn log_likelihood_mv_adjusted(
    draw: &Draw,
    data: &MultivariateData,
    covariates: ArrayView2<f64>,
) -> Result<f64, ModelError> {
    check_sigma(draw.sigma)?;
    check_subjects(draw.n_subjects(), data.n_subjects())?;
    check_dimension(draw, data)?;
    check_covariates(draw, covariates)?;
    let d = data.dimension() as f64;
    let mut log_lik = 0.0;
    for i in 0..data.n_subjects() {
        let mean = draw.mean_vector_adjusted(i, covariates.row(i))?;
        let resid = &data.values(i) - &mean;
        log_lik += -0.5 * d * (LN_2PI + draw.sigma.ln()) - resid.dot(&resid) / (2.0 * draw.sigma);
    }
    Ok(log_lik)
}

fn check_dimension(draw: &Draw, data: &MultivariateData) -> Result<(), ModelError> {
    if data.dimension() != draw.n_basis() {
        return Err(ModelError::Shape(format!(
            "observation vectors have length {}, but the posterior coefficients have length {}",
            data.dimension(),
            draw.n_basis()
        )));
    }
    Ok(())
}

/// Density (not log) of one observed point under one draw: the building
/// block for pointwise deviance summaries. `subject` and `point` are
/// 0-based internal indices.
pub fn point_density(
    draw: &Draw,
    data: &FunctionalData,
    subject: usize,
    point: usize,
) -> Result<f64, ModelError> {
    check_sigma(draw.sigma)?;
    check_subjects(draw.n_subjects(), data.n_subjects())?;
    let y = data.values(subject);
    if point >= y.len() {
        return Err(ModelError::IndexOutOfRange {
            what: "observed point",
            index: point + 1,
            len: y.len(),
        });
    }
    let mean = draw.mean_at(subject, data.basis(subject).row(point))?;
    Ok(normal_ln_pdf(y[point], mean, draw.sigma).exp())
}

/// Density (not log) of one subject's whole observation vector under one
/// draw, multivariate model: the product of per-coordinate densities.
pub fn point_density_mv(
    draw: &Draw,
    data: &MultivariateData,
    subject: usize,
) -> Result<f64, ModelError> {
    check_sigma(draw.sigma)?;
    check_subjects(draw.n_subjects(), data.n_subjects())?;
    check_dimension(draw, data)?;
    let mean = draw.mean_vector(subject)?;
    let y = data.values(subject);
    let mut log_density = 0.0;
    for j in 0..y.len() {
        log_density += normal_ln_pdf(y[j], mean[j], draw.sigma);
    }
    Ok(log_density.exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::BasisEvaluator;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, Array2, Array3, Array4, ArrayView1};

    use crate::samples::PosteriorSampleSet;

    /// Basis rows select coefficients directly: row l is the l-th standard
    /// basis vector (cycling), so the projected mean is just a coefficient.
    struct Selection;

    impl BasisEvaluator for Selection {
        fn basis_matrix(&self, times: ArrayView1<f64>, num_basis: usize) -> Array2<f64> {
            Array2::from_shape_fn((times.len(), num_basis), |(l, p)| {
                if l % num_basis == p { 1.0 } else { 0.0 }
            })
        }
    }

    /// Reference scenario: K=2, P=3, N=1, I=1, L=4, one-hot membership on
    /// cluster 1, chi = 0, sigma = 1, selection basis.
    fn scenario() -> (PosteriorSampleSet, FunctionalData) {
        let nu = Array3::from_shape_vec(
            (1, 2, 3),
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        )
        .unwrap();
        let phi = Array4::zeros((1, 2, 3, 1));
        let z = Array3::from_shape_vec((1, 1, 2), vec![1.0, 0.0]).unwrap();
        let chi = Array3::zeros((1, 1, 1));
        let sigma = Array1::from_vec(vec![1.0]);
        let set = PosteriorSampleSet::new(nu, phi, z, chi, sigma, None, None).unwrap();
        let data = FunctionalData::new(
            vec![array![0.0, 0.25, 0.5, 0.75]],
            vec![array![1.5, 0.0, -0.5, 1.0]],
            &Selection,
            3,
        )
        .unwrap();
        (set, data)
    }

    #[test]
    fn scenario_matches_independent_gaussian_sum() {
        let (set, data) = scenario();
        let draw = set.draw(0);

        // Reconstructed means: nu row 0 through the selection basis, i.e.
        // [1, 0, 0, 1] at the four observed points.
        let means: [f64; 4] = [1.0, 0.0, 0.0, 1.0];
        assert_abs_diff_eq!(draw.mean_at(0, data.basis(0).row(3)).unwrap(), 1.0);

        let y = [1.5, 0.0, -0.5, 1.0];
        let expected: f64 = means
            .iter()
            .zip(&y)
            .map(|(m, yl)| {
                // Standard normal log-density, sigma = 1.
                -0.5 * (2.0 * std::f64::consts::PI).ln() - 0.5 * (yl - m).powi(2)
            })
            .sum();

        let log_lik = log_likelihood(&draw, &data).unwrap();
        assert_abs_diff_eq!(log_lik, expected, epsilon = 1e-12);
    }

    #[test]
    fn summation_order_does_not_matter() {
        // Two subjects with distinct grids; reversing the subject order by
        // hand must agree with the engine's fixed order.
        let nu = Array3::from_shape_vec((1, 1, 2), vec![0.5, -0.5]).unwrap();
        let phi = Array4::zeros((1, 1, 2, 1));
        let z = Array3::from_elem((1, 2, 1), 1.0);
        let chi = Array3::zeros((1, 2, 1));
        let sigma = Array1::from_vec(vec![2.0]);
        let set = PosteriorSampleSet::new(nu, phi, z, chi, sigma, None, None).unwrap();
        let draw = set.draw(0);

        let data_fwd = FunctionalData::new(
            vec![array![0.0, 1.0, 2.0], array![0.0]],
            vec![array![0.1, 0.2, 0.3], array![0.4]],
            &Selection,
            2,
        )
        .unwrap();
        let data_rev = FunctionalData::new(
            vec![array![0.0], array![0.0, 1.0, 2.0]],
            vec![array![0.4], array![0.1, 0.2, 0.3]],
            &Selection,
            2,
        )
        .unwrap();

        let fwd = log_likelihood(&draw, &data_fwd).unwrap();
        let rev = log_likelihood(&draw, &data_rev).unwrap();
        assert_abs_diff_eq!(fwd, rev, epsilon = 1e-12);
    }

    #[test]
    fn multivariate_matches_per_coordinate_sum() {
        let nu = Array3::from_shape_vec((1, 1, 3), vec![1.0, 2.0, 3.0]).unwrap();
        let phi = Array4::zeros((1, 1, 3, 1));
        let z = Array3::from_elem((1, 1, 1), 1.0);
        let chi = Array3::zeros((1, 1, 1));
        let sigma = Array1::from_vec(vec![4.0]);
        let set = PosteriorSampleSet::new(nu, phi, z, chi, sigma, None, None).unwrap();
        let draw = set.draw(0);
        let data = MultivariateData::new(array![[1.5, 1.0, 3.5]]);

        let expected: f64 = [(1.5, 1.0), (1.0, 2.0), (3.5, 3.0)]
            .iter()
            .map(|&(y, m): &(f64, f64)| {
                -0.5 * ((2.0 * std::f64::consts::PI * 4.0).ln()) - (y - m).powi(2) / 8.0
            })
            .sum();
        let log_lik = log_likelihood_mv(&draw, &data).unwrap();
        assert_abs_diff_eq!(log_lik, expected, epsilon = 1e-12);

        // The non-log subject density is the exponential of the same sum.
        let density = point_density_mv(&draw, &data, 0).unwrap();
        assert_abs_diff_eq!(density, expected.exp(), epsilon = 1e-15);
    }

    #[test]
    fn point_density_is_a_plain_gaussian_density() {
        let (set, data) = scenario();
        let draw = set.draw(0);
        // Point 1 has mean 0 and y = 0: the standard normal mode.
        let d = point_density(&draw, &data, 0, 1).unwrap();
        assert_abs_diff_eq!(d, 1.0 / (2.0 * std::f64::consts::PI).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn non_positive_variance_is_a_domain_error() {
        let nu = Array3::zeros((1, 1, 2));
        let phi = Array4::zeros((1, 1, 2, 1));
        let z = Array3::from_elem((1, 1, 1), 1.0);
        let chi = Array3::zeros((1, 1, 1));
        let sigma = Array1::from_vec(vec![0.0]);
        let set = PosteriorSampleSet::new(nu, phi, z, chi, sigma, None, None).unwrap();
        let draw = set.draw(0);
        let data = MultivariateData::new(Array2::zeros((1, 2)));
        let err = log_likelihood_mv(&draw, &data).unwrap_err();
        assert!(matches!(err, ModelError::NonPositiveVariance(_)));
    }
}
