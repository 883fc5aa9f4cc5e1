//! Chunk-file loading and reassembly.
//!
//! This module is the exclusive entry point for persisted MCMC output. A
//! sampler writes each parameter as a sequence of numbered chunk files,
//! `<parameter>_<index>.json` for `index` in `0..n_files`; every file holds
//! a contiguous slab of draws. This module reads those files back, enforces
//! the shape contract, and reassembles one contiguous draw-major collection
//! per parameter:
//!
//! - Chunk 0 establishes the canonical per-draw shape; any later chunk that
//!   disagrees is rejected with [`StoreError::ShapeMismatch`].
//! - Global draw order is concatenation by file index. Chunks may hold
//!   different draw counts (a truncated final chunk is common), so each
//!   chunk's destination offset comes from a prefix sum of the actual
//!   per-chunk counts, never from append order.
//! - Chunks are parsed in parallel; ordering is unaffected because the
//!   destination of every draw is known before any copy happens.
//!
//! The on-disk document is deliberately small and self-describing:
//!
//! ```json
//! { "parameter": "nu", "shape": [2, 3], "draws": [[...6 values...], ...] }
//! ```
//!
//! `shape` is the per-draw shape (empty for the scalar parameter `sigma`)
//! and each entry of `draws` is one draw flattened in row-major order.

use crate::samples::{ModelError, PosteriorSampleSet};
use ndarray::{Array1, Array2, Array3, Array4, Array5, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A comprehensive error type for chunk loading and reassembly failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read chunk file {file_index} of parameter '{parameter}': {source}")]
    Io {
        parameter: String,
        file_index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Chunk file {file_index} of parameter '{parameter}' is malformed: {detail}")]
    Malformed {
        parameter: String,
        file_index: usize,
        detail: String,
    },

    #[error(
        "Chunk file {file_index} of parameter '{parameter}' holds draws of shape {found:?}, but chunk 0 established {expected:?}."
    )]
    ShapeMismatch {
        parameter: String,
        file_index: usize,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Parameter '{parameter}' has no draws (zero files requested, or every chunk empty).")]
    Empty { parameter: String },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// The serialized form of one chunk file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterChunk {
    /// Parameter stem, e.g. `"nu"`. Must match the file name.
    pub parameter: String,
    /// Per-draw shape; empty for a scalar-per-draw parameter.
    pub shape: Vec<usize>,
    /// One row-major flattened vector per draw.
    pub draws: Vec<Vec<f64>>,
}

fn chunk_path(dir: &Path, parameter: &str, file_index: usize) -> PathBuf {
    dir.join(format!("{parameter}_{file_index}.json"))
}

/// Writes one chunk file in the format [`load_sample_set`] reads.
///
/// Producer-side counterpart of the loaders; the sampler (and this crate's
/// tests) persist draws through it.
pub fn write_chunk(
    dir: &Path,
    parameter: &str,
    file_index: usize,
    shape: &[usize],
    draws: &[Vec<f64>],
) -> Result<(), StoreError> {
    let len: usize = shape.iter().product();
    for (j, draw) in draws.iter().enumerate() {
        if draw.len() != len {
            return Err(StoreError::Malformed {
                parameter: parameter.to_string(),
                file_index,
                detail: format!("draw {j} holds {} values, expected {len}", draw.len()),
            });
        }
    }
    let chunk = ParameterChunk {
        parameter: parameter.to_string(),
        shape: shape.to_vec(),
        draws: draws.to_vec(),
    };
    let path = chunk_path(dir, parameter, file_index);
    let file = File::create(&path).map_err(|source| StoreError::Io {
        parameter: parameter.to_string(),
        file_index,
        source,
    })?;
    serde_json::to_writer(BufWriter::new(file), &chunk).map_err(|e| StoreError::Io {
        parameter: parameter.to_string(),
        file_index,
        source: std::io::Error::other(e),
    })?;
    Ok(())
}

fn read_chunk(dir: &Path, parameter: &str, file_index: usize) -> Result<ParameterChunk, StoreError> {
    let path = chunk_path(dir, parameter, file_index);
    let file = File::open(&path).map_err(|source| StoreError::Io {
        parameter: parameter.to_string(),
        file_index,
        source,
    })?;
    let chunk: ParameterChunk =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| StoreError::Malformed {
            parameter: parameter.to_string(),
            file_index,
            detail: e.to_string(),
        })?;
    if chunk.parameter != parameter {
        return Err(StoreError::Malformed {
            parameter: parameter.to_string(),
            file_index,
            detail: format!("file claims to hold parameter '{}'", chunk.parameter),
        });
    }
    let len: usize = chunk.shape.iter().product();
    for (j, draw) in chunk.draws.iter().enumerate() {
        if draw.len() != len {
            return Err(StoreError::Malformed {
                parameter: parameter.to_string(),
                file_index,
                detail: format!(
                    "draw {j} holds {} values, but shape {:?} implies {len}",
                    draw.len(),
                    chunk.shape
                ),
            });
        }
    }
    Ok(chunk)
}

/// Loads all chunks of one parameter and reassembles them as an
/// `S_total x prod(shape)` slab plus the canonical per-draw shape.
fn load_flat(
    dir: &Path,
    parameter: &str,
    n_files: usize,
) -> Result<(Vec<usize>, Array2<f64>), StoreError> {
    if n_files == 0 {
        return Err(StoreError::Empty {
            parameter: parameter.to_string(),
        });
    }
    let chunks: Vec<ParameterChunk> = (0..n_files)
        .into_par_iter()
        .map(|file_index| read_chunk(dir, parameter, file_index))
        .collect::<Result<_, _>>()?;

    let shape = chunks[0].shape.clone();
    for (file_index, chunk) in chunks.iter().enumerate().skip(1) {
        if chunk.shape != shape {
            return Err(StoreError::ShapeMismatch {
                parameter: parameter.to_string(),
                file_index,
                expected: shape.clone(),
                found: chunk.shape.clone(),
            });
        }
    }

    let total: usize = chunks.iter().map(|c| c.draws.len()).sum();
    if total == 0 {
        return Err(StoreError::Empty {
            parameter: parameter.to_string(),
        });
    }
    let len: usize = shape.iter().product();

    // Destination rows follow from per-chunk counts, so draw s of chunk i
    // lands immediately after the last draw of chunk i-1.
    let mut slab = Array2::<f64>::zeros((total, len));
    let mut offset = 0;
    for chunk in &chunks {
        for (j, draw) in chunk.draws.iter().enumerate() {
            slab.row_mut(offset + j).assign(&ArrayView1::from(&draw[..]));
        }
        offset += chunk.draws.len();
    }
    log::debug!(
        "Reassembled {total} draws of parameter '{parameter}' from {n_files} chunk files (per-draw shape {shape:?})"
    );
    Ok((shape, slab))
}

fn dims<const R: usize>(parameter: &str, shape: &[usize]) -> Result<[usize; R], StoreError> {
    <[usize; R]>::try_from(shape).map_err(|_| StoreError::Malformed {
        parameter: parameter.to_string(),
        file_index: 0,
        detail: format!("expected a rank-{} per-draw shape, found {:?}", R, shape),
    })
}

/// Cluster-mean coefficients: S x K x P.
pub fn load_nu(dir: &Path, n_files: usize) -> Result<Array3<f64>, StoreError> {
    let (shape, flat) = load_flat(dir, "nu", n_files)?;
    let [k, p] = dims::<2>("nu", &shape)?;
    let s = flat.nrows();
    Ok(flat
        .into_shape_with_order((s, k, p))
        .expect("row-major slab reshapes losslessly"))
}

/// Latent-component coefficients: S x K x P x N.
pub fn load_phi(dir: &Path, n_files: usize) -> Result<Array4<f64>, StoreError> {
    let (shape, flat) = load_flat(dir, "phi", n_files)?;
    let [k, p, n] = dims::<3>("phi", &shape)?;
    let s = flat.nrows();
    Ok(flat
        .into_shape_with_order((s, k, p, n))
        .expect("row-major slab reshapes losslessly"))
}

/// Membership weights: S x I x K.
pub fn load_z(dir: &Path, n_files: usize) -> Result<Array3<f64>, StoreError> {
    let (shape, flat) = load_flat(dir, "z", n_files)?;
    let [i, k] = dims::<2>("z", &shape)?;
    let s = flat.nrows();
    Ok(flat
        .into_shape_with_order((s, i, k))
        .expect("row-major slab reshapes losslessly"))
}

/// Latent-component scores: S x I x N.
pub fn load_chi(dir: &Path, n_files: usize) -> Result<Array3<f64>, StoreError> {
    let (shape, flat) = load_flat(dir, "chi", n_files)?;
    let [i, n] = dims::<2>("chi", &shape)?;
    let s = flat.nrows();
    Ok(flat
        .into_shape_with_order((s, i, n))
        .expect("row-major slab reshapes losslessly"))
}

/// Residual-variance draws: length S.
pub fn load_sigma(dir: &Path, n_files: usize) -> Result<Array1<f64>, StoreError> {
    let (shape, flat) = load_flat(dir, "sigma", n_files)?;
    if !shape.is_empty() {
        return Err(StoreError::Malformed {
            parameter: "sigma".to_string(),
            file_index: 0,
            detail: format!("expected a scalar per-draw shape, found {:?}", shape),
        });
    }
    Ok(flat.column(0).to_owned())
}

/// Covariate effects on cluster means: S x K x P x C.
pub fn load_eta(dir: &Path, n_files: usize) -> Result<Array4<f64>, StoreError> {
    let (shape, flat) = load_flat(dir, "eta", n_files)?;
    let [k, p, c] = dims::<3>("eta", &shape)?;
    let s = flat.nrows();
    Ok(flat
        .into_shape_with_order((s, k, p, c))
        .expect("row-major slab reshapes losslessly"))
}

/// Covariate effects on cluster components: S x K x P x N x C.
pub fn load_xi(dir: &Path, n_files: usize) -> Result<Array5<f64>, StoreError> {
    let (shape, flat) = load_flat(dir, "xi", n_files)?;
    let [k, p, n, c] = dims::<4>("xi", &shape)?;
    let s = flat.nrows();
    Ok(flat
        .into_shape_with_order((s, k, p, n, c))
        .expect("row-major slab reshapes losslessly"))
}

/// Loads every parameter family and assembles the validated sample set.
///
/// The covariate-effect tensors are loaded when `eta_0.json` exists in the
/// directory; a model sampled without covariates simply never wrote them.
pub fn load_sample_set(dir: &Path, n_files: usize) -> Result<PosteriorSampleSet, StoreError> {
    let nu = load_nu(dir, n_files)?;
    let phi = load_phi(dir, n_files)?;
    let z = load_z(dir, n_files)?;
    let chi = load_chi(dir, n_files)?;
    let sigma = load_sigma(dir, n_files)?;
    let adjusted = chunk_path(dir, "eta", 0).exists();
    let (eta, xi) = if adjusted {
        (Some(load_eta(dir, n_files)?), Some(load_xi(dir, n_files)?))
    } else {
        (None, None)
    };
    log::info!(
        "Loaded {} posterior draws from {} chunk files per parameter{}",
        nu.shape()[0],
        n_files,
        if adjusted { " (covariate-adjusted)" } else { "" }
    );
    Ok(PosteriorSampleSet::new(nu, phi, z, chi, sigma, eta, xi)?)
}
