//! Pointwise and simultaneous credible bands.
//!
//! Two calibrations are offered for every curve- or surface-valued target:
//!
//! - **Pointwise**: the empirical 2.5 / 50 / 97.5 percentiles of the draws,
//!   taken independently at every grid coordinate. No joint-coverage
//!   guarantee across the grid.
//! - **Simultaneous**: a Scheffe-type band. With pointwise posterior mean
//!   `m(g)` and sample standard deviation `sd(g)` across draws, each draw
//!   contributes its maximal studentized deviation over the grid; the 95th
//!   percentile of those maxima is the critical value `c`, and the band is
//!   `m(g) +/- c * sd(g)`. The whole curve lies inside with roughly 95%
//!   posterior probability, at the cost of pointwise tightness. The center
//!   reported for a simultaneous band is `m(g)` itself.
//!
//! The two-dimensional (covariance-surface) simultaneous band is the same
//! algorithm applied to the flattened grid; both dimensionalities share one
//! core routine.
//!
//! Grid points where the draws have exactly zero spread are excluded from
//! every per-draw max and contribute a zero-width band there (the posterior
//! is a point mass at that coordinate). A grid that is degenerate
//! everywhere is an error, as is a single-draw collection, where no spread
//! can be estimated at all.
//!
//! Percentiles use linear interpolation between order statistics
//! throughout.

use crate::basis::{checked_basis, BasisEvaluator};
use crate::samples::{one_based, ModelError, PosteriorSampleSet};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView3, ArrayView4, Axis};
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by credible-band estimation.
#[derive(Error, Debug)]
pub enum IntervalError {
    #[error("Cannot summarize an empty posterior sample collection.")]
    EmptySampleSet,

    #[error(
        "Simultaneous bands need at least two draws to estimate pointwise spread, but only {found} draw(s) are available."
    )]
    TooFewDraws { found: usize },

    #[error(
        "Every grid point has zero posterior spread (first at grid coordinate {coordinate}); a studentized band is undefined."
    )]
    DegenerateSpread { coordinate: String },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// An immutable credible triple over one grid shape: `lower` is the 2.5th
/// percentile surface, `upper` the 97.5th, `median` the 50th (for
/// simultaneous bands, the pointwise posterior mean).
#[derive(Debug, Clone, Serialize)]
pub struct CredibleBand<A> {
    pub lower: A,
    pub median: A,
    pub upper: A,
}

fn sorted(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values
}

/// Percentile of an ascending-sorted slice, interpolating linearly between
/// order statistics.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    let float_idx = (n as f64 - 1.0) * p;
    let lower_idx = float_idx.floor() as usize;
    let upper_idx = float_idx.ceil() as usize;
    if lower_idx == upper_idx {
        sorted[lower_idx]
    } else {
        let fraction = float_idx - lower_idx as f64;
        sorted[lower_idx] * (1.0 - fraction) + sorted[upper_idx] * fraction
    }
}

/// Pointwise percentiles, one grid coordinate per column of `samples`.
fn pointwise_core(samples: &Array2<f64>) -> CredibleBand<Array1<f64>> {
    let g_n = samples.ncols();
    let mut lower = Array1::zeros(g_n);
    let mut median = Array1::zeros(g_n);
    let mut upper = Array1::zeros(g_n);
    for g in 0..g_n {
        let col = sorted(samples.column(g).to_vec());
        lower[g] = percentile_sorted(&col, 0.025);
        median[g] = percentile_sorted(&col, 0.5);
        upper[g] = percentile_sorted(&col, 0.975);
    }
    CredibleBand {
        lower,
        median,
        upper,
    }
}

/// The max-studentized-deviation band over the columns of `samples`.
/// `coord_name` renders a flat column index for error messages.
fn simultaneous_core(
    samples: &Array2<f64>,
    coord_name: impl Fn(usize) -> String,
) -> Result<CredibleBand<Array1<f64>>, IntervalError> {
    let s_n = samples.nrows();
    if s_n < 2 {
        return Err(IntervalError::TooFewDraws { found: s_n });
    }
    let mean = samples
        .mean_axis(Axis(0))
        .expect("draw count checked above");
    let sd = samples.std_axis(Axis(0), 1.0);
    let active: Vec<usize> = sd
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v > 0.0)
        .map(|(g, _)| g)
        .collect();
    if active.is_empty() {
        return Err(IntervalError::DegenerateSpread {
            coordinate: coord_name(0),
        });
    }

    let maxima: Vec<f64> = samples
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| {
            let mut max_dev = 0.0f64;
            for &g in &active {
                let dev = ((row[g] - mean[g]) / sd[g]).abs();
                if dev > max_dev {
                    max_dev = dev;
                }
            }
            max_dev
        })
        .collect();
    let critical = percentile_sorted(&sorted(maxima), 0.95);
    log::debug!(
        "Simultaneous band: critical value {critical:.6} from {s_n} draws over {} active of {} grid points",
        active.len(),
        samples.ncols()
    );

    let half = sd.mapv(|v| v * critical);
    Ok(CredibleBand {
        lower: &mean - &half,
        median: mean.clone(),
        upper: &mean + &half,
    })
}

/// Mean-curve draws: row s holds `B . nu[s, k, :]` over the grid.
fn mean_curve_samples(nu: ArrayView3<f64>, basis: &Array2<f64>, k: usize) -> Array2<f64> {
    let s_n = nu.shape()[0];
    let rows: Vec<Array1<f64>> = (0..s_n)
        .into_par_iter()
        .map(|si| basis.dot(&nu.slice(s![si, k, ..])))
        .collect();
    let mut f = Array2::zeros((s_n, basis.nrows()));
    for (si, row) in rows.into_iter().enumerate() {
        f.row_mut(si).assign(&row);
    }
    f
}

/// Covariance-surface draws, flattened: row s holds, in row-major order,
/// `sum_n (B1 . phi[s, k1, :, n]) outer (B2 . phi[s, k2, :, n])`.
fn covariance_samples(
    phi: ArrayView4<f64>,
    b1: &Array2<f64>,
    b2: &Array2<f64>,
    k1: usize,
    k2: usize,
) -> Array2<f64> {
    let s_n = phi.shape()[0];
    let n_comp = phi.shape()[3];
    let (g1, g2) = (b1.nrows(), b2.nrows());
    let rows: Vec<Array1<f64>> = (0..s_n)
        .into_par_iter()
        .map(|si| {
            let mut surface = Array2::<f64>::zeros((g1, g2));
            for n in 0..n_comp {
                let a = b1.dot(&phi.slice(s![si, k1, .., n]));
                let b = b2.dot(&phi.slice(s![si, k2, .., n]));
                for (ia, &av) in a.iter().enumerate() {
                    for (jb, &bv) in b.iter().enumerate() {
                        surface[[ia, jb]] += av * bv;
                    }
                }
            }
            surface
                .into_shape_with_order(g1 * g2)
                .expect("contiguous surface flattens losslessly")
        })
        .collect();
    let mut f = Array2::zeros((s_n, g1 * g2));
    for (si, row) in rows.into_iter().enumerate() {
        f.row_mut(si).assign(&row);
    }
    f
}

fn check_grid(times: ArrayView1<f64>) -> Result<(), IntervalError> {
    if times.is_empty() {
        return Err(IntervalError::Model(ModelError::Shape(
            "the time grid is empty".to_string(),
        )));
    }
    Ok(())
}

fn reshape_surface(
    band: CredibleBand<Array1<f64>>,
    g1: usize,
    g2: usize,
) -> CredibleBand<Array2<f64>> {
    let unflatten = |a: Array1<f64>| {
        a.into_shape_with_order((g1, g2))
            .expect("band length equals the grid size")
    };
    CredibleBand {
        lower: unflatten(band.lower),
        median: unflatten(band.median),
        upper: unflatten(band.upper),
    }
}

/// Pointwise band for cluster `cluster`'s mean curve over `times`.
/// `cluster` is 1-based.
pub fn mean_band_pointwise(
    nu: ArrayView3<f64>,
    evaluator: &dyn BasisEvaluator,
    times: ArrayView1<f64>,
    cluster: usize,
) -> Result<CredibleBand<Array1<f64>>, IntervalError> {
    if nu.shape()[0] == 0 {
        return Err(IntervalError::EmptySampleSet);
    }
    check_grid(times)?;
    let k = one_based(cluster, nu.shape()[1], "cluster")?;
    let basis = checked_basis(evaluator, times, nu.shape()[2])?;
    Ok(pointwise_core(&mean_curve_samples(nu, &basis, k)))
}

/// Simultaneous (max-statistic) band for cluster `cluster`'s mean curve.
pub fn mean_band_simultaneous(
    nu: ArrayView3<f64>,
    evaluator: &dyn BasisEvaluator,
    times: ArrayView1<f64>,
    cluster: usize,
) -> Result<CredibleBand<Array1<f64>>, IntervalError> {
    if nu.shape()[0] == 0 {
        return Err(IntervalError::EmptySampleSet);
    }
    check_grid(times)?;
    let k = one_based(cluster, nu.shape()[1], "cluster")?;
    let basis = checked_basis(evaluator, times, nu.shape()[2])?;
    simultaneous_core(&mean_curve_samples(nu, &basis, k), |g| (g + 1).to_string())
}

/// Pointwise band for the covariance surface between two clusters, over
/// the grid `times1 x times2`. Cluster indices are 1-based.
pub fn covariance_band_pointwise(
    phi: ArrayView4<f64>,
    evaluator: &dyn BasisEvaluator,
    times1: ArrayView1<f64>,
    times2: ArrayView1<f64>,
    cluster1: usize,
    cluster2: usize,
) -> Result<CredibleBand<Array2<f64>>, IntervalError> {
    if phi.shape()[0] == 0 {
        return Err(IntervalError::EmptySampleSet);
    }
    check_grid(times1)?;
    check_grid(times2)?;
    let k1 = one_based(cluster1, phi.shape()[1], "cluster")?;
    let k2 = one_based(cluster2, phi.shape()[1], "cluster")?;
    let b1 = checked_basis(evaluator, times1, phi.shape()[2])?;
    let b2 = checked_basis(evaluator, times2, phi.shape()[2])?;
    let flat = covariance_samples(phi, &b1, &b2, k1, k2);
    Ok(reshape_surface(
        pointwise_core(&flat),
        times1.len(),
        times2.len(),
    ))
}

/// Simultaneous band for the covariance surface between two clusters: the
/// one-dimensional max-statistic algorithm applied to the flattened grid.
pub fn covariance_band_simultaneous(
    phi: ArrayView4<f64>,
    evaluator: &dyn BasisEvaluator,
    times1: ArrayView1<f64>,
    times2: ArrayView1<f64>,
    cluster1: usize,
    cluster2: usize,
) -> Result<CredibleBand<Array2<f64>>, IntervalError> {
    if phi.shape()[0] == 0 {
        return Err(IntervalError::EmptySampleSet);
    }
    check_grid(times1)?;
    check_grid(times2)?;
    let k1 = one_based(cluster1, phi.shape()[1], "cluster")?;
    let k2 = one_based(cluster2, phi.shape()[1], "cluster")?;
    let b1 = checked_basis(evaluator, times1, phi.shape()[2])?;
    let b2 = checked_basis(evaluator, times2, phi.shape()[2])?;
    let g2 = times2.len();
    let flat = covariance_samples(phi, &b1, &b2, k1, k2);
    let band = simultaneous_core(&flat, |g| format!("({}, {})", g / g2 + 1, g % g2 + 1))?;
    Ok(reshape_surface(band, times1.len(), g2))
}

/// Credible interval for the residual variance. Ascending percentiles map
/// to ascending fields: `lower` is the 2.5th percentile.
pub fn sigma_interval(sigma: ArrayView1<f64>) -> Result<CredibleBand<f64>, IntervalError> {
    if sigma.is_empty() {
        return Err(IntervalError::EmptySampleSet);
    }
    let draws = sorted(sigma.to_vec());
    Ok(CredibleBand {
        lower: percentile_sorted(&draws, 0.025),
        median: percentile_sorted(&draws, 0.5),
        upper: percentile_sorted(&draws, 0.975),
    })
}

/// Entrywise credible intervals for the whole membership matrix: three
/// I x K matrices of 2.5 / 50 / 97.5 percentiles.
pub fn membership_bands(z: ArrayView3<f64>) -> Result<CredibleBand<Array2<f64>>, IntervalError> {
    let (s_n, i_n, k_n) = (z.shape()[0], z.shape()[1], z.shape()[2]);
    if s_n == 0 {
        return Err(IntervalError::EmptySampleSet);
    }
    let mut lower = Array2::zeros((i_n, k_n));
    let mut median = Array2::zeros((i_n, k_n));
    let mut upper = Array2::zeros((i_n, k_n));
    for i in 0..i_n {
        for k in 0..k_n {
            let draws = sorted(z.slice(s![.., i, k]).to_vec());
            lower[[i, k]] = percentile_sorted(&draws, 0.025);
            median[[i, k]] = percentile_sorted(&draws, 0.5);
            upper[[i, k]] = percentile_sorted(&draws, 0.975);
        }
    }
    Ok(CredibleBand {
        lower,
        median,
        upper,
    })
}

/// Convenience forwarding so a fully loaded sample set can be queried
/// without pulling the parameter views out by hand. The free functions
/// above remain the entry points when only one parameter family was loaded.
impl PosteriorSampleSet {
    pub fn mean_band_pointwise(
        &self,
        evaluator: &dyn BasisEvaluator,
        times: ArrayView1<f64>,
        cluster: usize,
    ) -> Result<CredibleBand<Array1<f64>>, IntervalError> {
        mean_band_pointwise(self.nu(), evaluator, times, cluster)
    }

    pub fn mean_band_simultaneous(
        &self,
        evaluator: &dyn BasisEvaluator,
        times: ArrayView1<f64>,
        cluster: usize,
    ) -> Result<CredibleBand<Array1<f64>>, IntervalError> {
        mean_band_simultaneous(self.nu(), evaluator, times, cluster)
    }

    pub fn covariance_band_pointwise(
        &self,
        evaluator: &dyn BasisEvaluator,
        times1: ArrayView1<f64>,
        times2: ArrayView1<f64>,
        cluster1: usize,
        cluster2: usize,
    ) -> Result<CredibleBand<Array2<f64>>, IntervalError> {
        covariance_band_pointwise(self.phi(), evaluator, times1, times2, cluster1, cluster2)
    }

    pub fn covariance_band_simultaneous(
        &self,
        evaluator: &dyn BasisEvaluator,
        times1: ArrayView1<f64>,
        times2: ArrayView1<f64>,
        cluster1: usize,
        cluster2: usize,
    ) -> Result<CredibleBand<Array2<f64>>, IntervalError> {
        covariance_band_simultaneous(self.phi(), evaluator, times1, times2, cluster1, cluster2)
    }

    pub fn sigma_interval(&self) -> Result<CredibleBand<f64>, IntervalError> {
        sigma_interval(self.sigma())
    }

    pub fn membership_bands(&self) -> Result<CredibleBand<Array2<f64>>, IntervalError> {
        membership_bands(self.z())
    }
}
