//! Posterior post-processing for Bayesian functional mixed-membership models.
//!
//! An MCMC sampler for these models persists its draws as numbered chunk
//! files, one sequence of files per parameter. This crate consumes those
//! files and turns them into the quantities an analyst actually reads:
//!
//! - [`store`] reassembles chunk files into contiguous, ordered posterior
//!   sample collections with strict shape checking.
//! - [`samples`] owns the reassembled draws as a typed, read-only
//!   [`samples::PosteriorSampleSet`] and hands out per-draw views.
//! - [`reconstruct`] rebuilds fitted means from one draw: each subject's
//!   curve is a membership-weighted superposition of cluster basis
//!   expansions plus latent-component adjustments.
//! - [`likelihood`] aggregates the Gaussian observation log-density across
//!   subjects and points, for functional and multivariate observations,
//!   with or without covariate adjustment.
//! - [`intervals`] derives pointwise and simultaneous (max-statistic)
//!   credible bands for mean curves, covariance surfaces, the residual
//!   variance, and membership weights.
//! - [`compare`] combines per-draw deviances into a DIC score.
//!
//! The sampler itself and the basis-function evaluator are external
//! collaborators: the former is specified only through the chunk-file
//! contract in [`store`], the latter through the [`basis::BasisEvaluator`]
//! trait.

pub mod basis;
pub mod compare;
pub mod data;
pub mod intervals;
pub mod likelihood;
pub mod reconstruct;
pub mod samples;
pub mod store;

pub use basis::BasisEvaluator;
pub use data::{FunctionalData, MultivariateData};
pub use intervals::CredibleBand;
pub use samples::{Draw, ModelError, PosteriorSampleSet};
pub use store::StoreError;
