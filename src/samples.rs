//! The typed posterior sample container.
//!
//! `PosteriorSampleSet` owns every reassembled parameter collection for one
//! analysis and is read-only after construction. All cross-parameter shape
//! checking happens in [`PosteriorSampleSet::new`]; downstream code indexes
//! draws through [`Draw`] views and never re-derives a dimension from raw
//! array shapes. A set that would disagree with itself (say, a membership
//! matrix whose cluster count differs from the mean coefficients') cannot
//! be constructed.
//!
//! Array layout puts the draw index on axis 0 everywhere, so a `Draw` is a
//! bundle of `index_axis` views with no copying.

use ndarray::{
    Array1, Array2, Array3, Array4, Array5, ArrayView1, ArrayView2, ArrayView3, ArrayView4, Axis,
};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while evaluating the model against a sample set.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("The residual variance must be strictly positive, but a draw supplied {0}.")]
    NonPositiveVariance(f64),

    #[error("The 1-based {what} index {index} is out of range (valid: 1..={len}).")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error(
        "This query requires covariate-effect draws (eta/xi), but the sample set carries none."
    )]
    MissingCovariateEffects,

    #[error(
        "The basis evaluator returned a {found_rows}x{found_cols} matrix, but a {expected_rows}x{expected_cols} matrix was requested."
    )]
    BasisShape {
        expected_rows: usize,
        expected_cols: usize,
        found_rows: usize,
        found_cols: usize,
    },

    #[error("Inconsistent shapes: {0}")]
    Shape(String),
}

/// Normalizes an externally 1-based cluster/subject/component index.
pub(crate) fn one_based(
    index: usize,
    len: usize,
    what: &'static str,
) -> Result<usize, ModelError> {
    if index == 0 || index > len {
        return Err(ModelError::IndexOutOfRange { what, index, len });
    }
    Ok(index - 1)
}

/// One posterior draw, borrowed from a [`PosteriorSampleSet`].
///
/// Field shapes: `nu` K x P, `phi` K x P x N, `z` I x K, `chi` I x N, and,
/// when the model is covariate-adjusted, `eta` K x P x C and `xi`
/// K x P x N x C. `sigma` is the residual variance (not a standard
/// deviation). The fitted-mean methods on this type live in
/// [`crate::reconstruct`].
#[derive(Clone)]
pub struct Draw<'a> {
    pub nu: ArrayView2<'a, f64>,
    pub phi: ArrayView3<'a, f64>,
    pub z: ArrayView2<'a, f64>,
    pub chi: ArrayView2<'a, f64>,
    pub sigma: f64,
    pub eta: Option<ArrayView3<'a, f64>>,
    pub xi: Option<ArrayView4<'a, f64>>,
}

impl<'a> Draw<'a> {
    /// Number of clusters K.
    pub fn n_clusters(&self) -> usize {
        self.nu.nrows()
    }

    /// Number of basis coefficients P.
    pub fn n_basis(&self) -> usize {
        self.nu.ncols()
    }

    /// Number of subjects I.
    pub fn n_subjects(&self) -> usize {
        self.z.nrows()
    }

    /// Number of latent components N.
    pub fn n_components(&self) -> usize {
        self.phi.shape()[2]
    }
}

/// The complete, validated posterior sample collection for one analysis.
///
/// Built once (usually by [`crate::store::load_sample_set`]) and read-only
/// thereafter. Every credible band and comparison score is a pure function
/// of this container plus the analysis inputs.
#[derive(Debug, Clone, Serialize)]
pub struct PosteriorSampleSet {
    /// Cluster-mean basis coefficients, S x K x P.
    nu: Array3<f64>,
    /// Cluster-specific latent-component coefficients, S x K x P x N.
    phi: Array4<f64>,
    /// Membership weights, S x I x K.
    z: Array3<f64>,
    /// Latent-component scores, S x I x N.
    chi: Array3<f64>,
    /// Residual variance per draw, length S.
    sigma: Array1<f64>,
    /// Covariate effects on cluster means, S x K x P x C.
    eta: Option<Array4<f64>>,
    /// Covariate effects on cluster components, S x K x P x N x C.
    xi: Option<Array5<f64>>,
}

impl PosteriorSampleSet {
    /// Assembles a sample set, rejecting any cross-parameter disagreement.
    ///
    /// The covariate-effect tensors must be supplied together or not at all.
    pub fn new(
        nu: Array3<f64>,
        phi: Array4<f64>,
        z: Array3<f64>,
        chi: Array3<f64>,
        sigma: Array1<f64>,
        eta: Option<Array4<f64>>,
        xi: Option<Array5<f64>>,
    ) -> Result<Self, ModelError> {
        let (s, k, p) = (nu.shape()[0], nu.shape()[1], nu.shape()[2]);
        if s == 0 {
            return Err(ModelError::Shape(
                "a posterior sample set needs at least one draw".to_string(),
            ));
        }
        let n = phi.shape()[3];
        if phi.shape()[0] != s || phi.shape()[1] != k || phi.shape()[2] != p {
            return Err(ModelError::Shape(format!(
                "phi has shape {:?}, expected [{s}, {k}, {p}, N]",
                phi.shape()
            )));
        }
        let i = z.shape()[1];
        if z.shape()[0] != s || z.shape()[2] != k {
            return Err(ModelError::Shape(format!(
                "z has shape {:?}, expected [{s}, I, {k}]",
                z.shape()
            )));
        }
        if chi.shape() != &[s, i, n] {
            return Err(ModelError::Shape(format!(
                "chi has shape {:?}, expected [{s}, {i}, {n}]",
                chi.shape()
            )));
        }
        if sigma.len() != s {
            return Err(ModelError::Shape(format!(
                "sigma holds {} draws, expected {s}",
                sigma.len()
            )));
        }
        match (&eta, &xi) {
            (None, None) => {}
            (Some(eta), Some(xi)) => {
                let c = eta.shape()[3];
                if eta.shape()[0] != s || eta.shape()[1] != k || eta.shape()[2] != p {
                    return Err(ModelError::Shape(format!(
                        "eta has shape {:?}, expected [{s}, {k}, {p}, C]",
                        eta.shape()
                    )));
                }
                if xi.shape() != &[s, k, p, n, c] {
                    return Err(ModelError::Shape(format!(
                        "xi has shape {:?}, expected [{s}, {k}, {p}, {n}, {c}]",
                        xi.shape()
                    )));
                }
            }
            _ => {
                return Err(ModelError::Shape(
                    "covariate effects must supply both eta and xi, or neither".to_string(),
                ));
            }
        }
        Ok(Self {
            nu,
            phi,
            z,
            chi,
            sigma,
            eta,
            xi,
        })
    }

    /// Number of posterior draws S.
    pub fn n_draws(&self) -> usize {
        self.nu.shape()[0]
    }

    /// Number of clusters K.
    pub fn n_clusters(&self) -> usize {
        self.nu.shape()[1]
    }

    /// Number of basis coefficients P.
    pub fn n_basis(&self) -> usize {
        self.nu.shape()[2]
    }

    /// Number of subjects I.
    pub fn n_subjects(&self) -> usize {
        self.z.shape()[1]
    }

    /// Number of latent components N.
    pub fn n_components(&self) -> usize {
        self.phi.shape()[3]
    }

    /// Number of covariates C, when the model is covariate-adjusted.
    pub fn n_covariates(&self) -> Option<usize> {
        self.eta.as_ref().map(|eta| eta.shape()[3])
    }

    /// Whether the set carries covariate-effect draws.
    pub fn is_covariate_adjusted(&self) -> bool {
        self.eta.is_some()
    }

    /// The full cluster-mean coefficient collection, S x K x P.
    pub fn nu(&self) -> ArrayView3<'_, f64> {
        self.nu.view()
    }

    /// The full latent-component coefficient collection, S x K x P x N.
    pub fn phi(&self) -> ArrayView4<'_, f64> {
        self.phi.view()
    }

    /// The full membership collection, S x I x K.
    pub fn z(&self) -> ArrayView3<'_, f64> {
        self.z.view()
    }

    /// The residual-variance draws, length S.
    pub fn sigma(&self) -> ArrayView1<'_, f64> {
        self.sigma.view()
    }

    /// Borrows draw `s` (0-based internal index; panics past `n_draws`).
    pub fn draw(&self, s: usize) -> Draw<'_> {
        Draw {
            nu: self.nu.index_axis(Axis(0), s),
            phi: self.phi.index_axis(Axis(0), s),
            z: self.z.index_axis(Axis(0), s),
            chi: self.chi.index_axis(Axis(0), s),
            sigma: self.sigma[s],
            eta: self.eta.as_ref().map(|eta| eta.index_axis(Axis(0), s)),
            xi: self.xi.as_ref().map(|xi| xi.index_axis(Axis(0), s)),
        }
    }

    /// The plug-in parameter set: every parameter averaged over draws.
    ///
    /// This is the point estimate the DIC penalty is evaluated at.
    pub fn plug_in_mean(&self) -> PlugInDraw {
        let axis = Axis(0);
        let nonempty = "sample set is non-empty by construction";
        PlugInDraw {
            nu: self.nu.mean_axis(axis).expect(nonempty),
            phi: self.phi.mean_axis(axis).expect(nonempty),
            z: self.z.mean_axis(axis).expect(nonempty),
            chi: self.chi.mean_axis(axis).expect(nonempty),
            sigma: self.sigma.mean().expect(nonempty),
            eta: self.eta.as_ref().map(|eta| {
                eta.mean_axis(axis).expect(nonempty)
            }),
            xi: self.xi.as_ref().map(|xi| xi.mean_axis(axis).expect(nonempty)),
        }
    }
}

/// An owned draw-shaped record holding posterior-mean parameters.
#[derive(Debug, Clone)]
pub struct PlugInDraw {
    nu: Array2<f64>,
    phi: Array3<f64>,
    z: Array2<f64>,
    chi: Array2<f64>,
    sigma: f64,
    eta: Option<Array3<f64>>,
    xi: Option<Array4<f64>>,
}

impl PlugInDraw {
    /// Views this record through the same interface as a real draw.
    pub fn as_draw(&self) -> Draw<'_> {
        Draw {
            nu: self.nu.view(),
            phi: self.phi.view(),
            z: self.z.view(),
            chi: self.chi.view(),
            sigma: self.sigma,
            eta: self.eta.as_ref().map(|eta| eta.view()),
            xi: self.xi.as_ref().map(|xi| xi.view()),
        }
    }
}
