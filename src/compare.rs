//! Deviance-based model comparison.
//!
//! The DIC implemented here is the canonical one: with per-draw deviance
//! `D(s) = -2 * log_likelihood(s)`, posterior mean deviance `Dbar`, and the
//! deviance `Dhat` at the draw-averaged plug-in parameter set, the
//! effective parameter count is `p_D = Dbar - Dhat` and
//! `DIC = Dbar + p_D = 2 * Dbar - Dhat`. Lower is better.
//!
//! Draws are independent given the data, so the per-draw deviances are
//! evaluated in parallel and reduced afterwards; each draw's result
//! occupies one private slot. Any draw-level failure (non-positive
//! variance, shape disagreement) aborts the whole score; a partially
//! summed deviance is never reported.

use crate::data::{FunctionalData, MultivariateData};
use crate::likelihood::{
    log_likelihood, log_likelihood_adjusted, log_likelihood_mv, log_likelihood_mv_adjusted,
};
use crate::samples::{ModelError, PosteriorSampleSet};
use ndarray::ArrayView2;
use rayon::prelude::*;

fn dic_from_deviances(deviances: Vec<f64>, plug_in_deviance: f64) -> f64 {
    let mean_deviance = deviances.iter().sum::<f64>() / deviances.len() as f64;
    let p_d = mean_deviance - plug_in_deviance;
    log::info!(
        "DIC: mean deviance {mean_deviance:.4}, plug-in deviance {plug_in_deviance:.4}, p_D {p_d:.4}"
    );
    2.0 * mean_deviance - plug_in_deviance
}

/// DIC for the functional model. Pass the covariate design matrix to score
/// the covariate-adjusted variant.
pub fn dic(
    set: &PosteriorSampleSet,
    data: &FunctionalData,
    covariates: Option<ArrayView2<f64>>,
) -> Result<f64, ModelError> {
    let deviances: Vec<f64> = (0..set.n_draws())
        .into_par_iter()
        .map(|s| {
            let draw = set.draw(s);
            let log_lik = match covariates {
                Some(x) => log_likelihood_adjusted(&draw, data, x)?,
                None => log_likelihood(&draw, data)?,
            };
            Ok(-2.0 * log_lik)
        })
        .collect::<Result<_, ModelError>>()?;

    let plug_in = set.plug_in_mean();
    let plug_in_draw = plug_in.as_draw();
    let plug_in_deviance = -2.0
        * match covariates {
            Some(x) => log_likelihood_adjusted(&plug_in_draw, data, x)?,
            None => log_likelihood(&plug_in_draw, data)?,
        };
    Ok(dic_from_deviances(deviances, plug_in_deviance))
}

/// DIC for the multivariate model (isotropic residual covariance).
pub fn dic_mv(
    set: &PosteriorSampleSet,
    data: &MultivariateData,
    covariates: Option<ArrayView2<f64>>,
) -> Result<f64, ModelError> {
    let deviances: Vec<f64> = (0..set.n_draws())
        .into_par_iter()
        .map(|s| {
            let draw = set.draw(s);
            let log_lik = match covariates {
                Some(x) => log_likelihood_mv_adjusted(&draw, data, x)?,
                None => log_likelihood_mv(&draw, data)?,
            };
            Ok(-2.0 * log_lik)
        })
        .collect::<Result<_, ModelError>>()?;

    let plug_in = set.plug_in_mean();
    let plug_in_draw = plug_in.as_draw();
    let plug_in_deviance = -2.0
        * match covariates {
            Some(x) => log_likelihood_mv_adjusted(&plug_in_draw, data, x)?,
            None => log_likelihood_mv(&plug_in_draw, data)?,
        };
    Ok(dic_from_deviances(deviances, plug_in_deviance))
}
