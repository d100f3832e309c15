use faer::{linalg::matmul::matmul, Accum, MatMut, MatRef, Par};
use numpy::{PyArray1, PyArray2, PyArrayMethods, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::common::random_factors;
use crate::gradient::{dense_matmul, fill_residual, squared_error_gradient};
use crate::matrix::{self, RatingMatrix};

/// How per-cell confidence weights are assigned when `bias_weights` is set.
/// The mask is taken from the matrix as supplied, before any bias fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfidenceMode {
    /// Weight 1 on observed cells, `bias_weights` on missing cells.
    FilledOnly,
    /// `bias_weights` on every cell, observed or not.
    AllCells,
}

pub(crate) fn parse_confidence(name: &str) -> PyResult<ConfidenceMode> {
    match name {
        "filled" => Ok(ConfidenceMode::FilledOnly),
        "all" => Ok(ConfidenceMode::AllCells),
        _ => Err(PyValueError::new_err(format!(
            "Unknown confidence mode: {}. Must be one of: filled, all.",
            name
        ))),
    }
}

/// Output of one training run.
pub struct Factorization {
    /// Dense n_rows×n_cols reconstruction U·V, row-major.
    pub reconstruction: Vec<f32>,
    /// n_rows×k, row-major.
    pub user_factors: Vec<f32>,
    /// k×n_cols, row-major.
    pub item_factors: Vec<f32>,
    pub iterations: usize,
    /// False when the run stopped at the iteration cap instead of the
    /// convergence test.
    pub converged: bool,
}

/// lr·E·Vᵀ accumulated into a fresh rows×k buffer.
fn user_update(e: &[f32], v: &[f32], rows: usize, k: usize, cols: usize, lr: f32) -> Vec<f32> {
    let mut du = vec![0.0f32; rows * k];
    matmul(
        MatMut::from_row_major_slice_mut(&mut du, rows, k).as_mut(),
        Accum::Replace,
        MatRef::from_row_major_slice(e, rows, cols),
        MatRef::from_row_major_slice(v, k, cols).transpose(),
        lr,
        Par::rayon(0),
    );
    du
}

/// lr·Uᵀ·E accumulated into a fresh k×cols buffer.
fn item_update(e: &[f32], u: &[f32], rows: usize, k: usize, cols: usize, lr: f32) -> Vec<f32> {
    let mut dv = vec![0.0f32; k * cols];
    matmul(
        MatMut::from_row_major_slice_mut(&mut dv, k, cols).as_mut(),
        Accum::Replace,
        MatRef::from_row_major_slice(u, rows, k).transpose(),
        MatRef::from_row_major_slice(e, rows, cols),
        lr,
        Par::rayon(0),
    );
    dv
}

/// Unregularized gradient-descent factorization of a NaN-masked matrix.
///
/// Stops once the loss ratio J/J_prev rises above 0.9999 (relative
/// improvement below 0.01%), or at `max_iterations` with `converged = false`.
pub(crate) fn factorize_train(
    m: &RatingMatrix,
    latent_factors: usize,
    learning_rate: f32,
    max_iterations: usize,
    seed: u64,
    verbose: bool,
) -> Factorization {
    let (rows, cols) = (m.n_rows(), m.n_cols());
    let k = latent_factors;
    let mut u = random_factors(rows, k, seed);
    let mut v = random_factors(k, cols, seed.wrapping_add(1));

    if verbose {
        println!("  Latent factor GD  k={}  lr={}", k, learning_rate);
        println!("  ITER |         LOSS");
        println!("  ---------------------");
    }

    let mut prev_loss = 1e6f32;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..max_iterations {
        let (residual, loss) = squared_error_gradient(m, &u, &v, k, None);
        let e = fill_residual(&residual);

        let du = user_update(&e, &v, rows, k, cols, learning_rate);
        let dv = item_update(&e, &u, rows, k, cols, learning_rate);
        for (uf, d) in u.iter_mut().zip(du.iter()) {
            *uf += d;
        }
        for (vf, d) in v.iter_mut().zip(dv.iter()) {
            *vf += d;
        }

        iterations = iter + 1;
        if verbose {
            println!("  {:>4} | {:>12.6}", iterations, loss);
        }

        if loss / prev_loss > 0.9999 {
            converged = true;
            break;
        }
        prev_loss = loss;
    }

    if verbose && !converged {
        println!("  did not converge within {} iterations", max_iterations);
    }

    Factorization {
        reconstruction: dense_matmul(&u, &v, rows, k, cols),
        user_factors: u,
        item_factors: v,
        iterations,
        converged,
    }
}

/// Regularized variant with optional missing-cell fill and confidence weights.
///
/// Stops once |J − J_prev| falls below `convergence_rate`, or at
/// `max_iterations` with `converged = false`. The caller's matrix is never
/// modified; the bias fill happens on an owned copy.
#[allow(clippy::too_many_arguments)]
pub(crate) fn factorize_biased_train(
    m: &RatingMatrix,
    latent_factors: usize,
    bias: Option<f32>,
    bias_weights: Option<f32>,
    confidence: ConfidenceMode,
    regularization: f32,
    learning_rate: f32,
    convergence_rate: f32,
    max_iterations: usize,
    seed: u64,
    verbose: bool,
) -> Factorization {
    let (rows, cols) = (m.n_rows(), m.n_cols());
    let k = latent_factors;

    // Confidence weights come from the original mask, before any fill.
    let weights: Option<Vec<f32>> = bias_weights.map(|bw| {
        m.values()
            .iter()
            .map(|&cell| match confidence {
                ConfidenceMode::AllCells => bw,
                ConfidenceMode::FilledOnly => {
                    if cell.is_nan() {
                        bw
                    } else {
                        1.0
                    }
                }
            })
            .collect()
    });

    let work = match bias {
        Some(fill) => m.fill_missing(fill),
        None => m.clone(),
    };

    let mut u = random_factors(rows, k, seed);
    let mut v = random_factors(k, cols, seed.wrapping_add(1));

    if verbose {
        println!(
            "  Latent factor GD  k={}  lr={}  reg={}",
            k, learning_rate, regularization
        );
        println!("  ITER |         LOSS");
        println!("  ---------------------");
    }

    let decay = 1.0 - learning_rate * regularization;
    let mut prev_loss = 1e9f32;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..max_iterations {
        let (residual, loss) = squared_error_gradient(&work, &u, &v, k, weights.as_deref());
        let e = fill_residual(&residual);

        let du = user_update(&e, &v, rows, k, cols, learning_rate);
        let dv = item_update(&e, &u, rows, k, cols, learning_rate);
        for (uf, d) in u.iter_mut().zip(du.iter()) {
            *uf = *uf * decay + d;
        }
        for (vf, d) in v.iter_mut().zip(dv.iter()) {
            *vf = *vf * decay + d;
        }

        iterations = iter + 1;
        if verbose {
            println!("  {:>4} | {:>12.6}", iterations, loss);
        }

        if (loss - prev_loss).abs() < convergence_rate {
            converged = true;
            break;
        }
        prev_loss = loss;
    }

    if verbose && !converged {
        println!("  did not converge within {} iterations", max_iterations);
    }

    Factorization {
        reconstruction: dense_matmul(&u, &v, rows, k, cols),
        user_factors: u,
        item_factors: v,
        iterations,
        converged,
    }
}

// ── Model contract ─────────────────────────────────────────────────

/// A rating model the cross-validation harness can construct per rank,
/// fit on a masked matrix and query cell by cell.
pub trait Model {
    fn fit(&mut self, data: &RatingMatrix);
    fn predict(&self, row: usize, col: usize) -> f32;
}

/// Biased latent factor model over `factorize_biased_train`.
pub struct LatentFactorModel {
    pub latent_factors: usize,
    pub bias: Option<f32>,
    pub bias_weights: Option<f32>,
    pub confidence: ConfidenceMode,
    pub regularization: f32,
    pub learning_rate: f32,
    pub convergence_rate: f32,
    pub max_iterations: usize,
    pub seed: u64,
    predictions: Option<RatingMatrix>,
}

impl LatentFactorModel {
    pub fn new(latent_factors: usize) -> Self {
        Self {
            latent_factors,
            bias: None,
            bias_weights: None,
            confidence: ConfidenceMode::FilledOnly,
            regularization: 0.0,
            learning_rate: 1e-4,
            convergence_rate: 0.1,
            max_iterations: 10_000,
            seed: 0,
            predictions: None,
        }
    }
}

impl Model for LatentFactorModel {
    fn fit(&mut self, data: &RatingMatrix) {
        let fit = factorize_biased_train(
            data,
            self.latent_factors,
            self.bias,
            self.bias_weights,
            self.confidence,
            self.regularization,
            self.learning_rate,
            self.convergence_rate,
            self.max_iterations,
            self.seed,
            false,
        );
        self.predictions = Some(RatingMatrix::new(
            fit.reconstruction,
            data.n_rows(),
            data.n_cols(),
        ));
    }

    fn predict(&self, row: usize, col: usize) -> f32 {
        match &self.predictions {
            Some(p) => p.get(row, col),
            None => panic!("predict called before fit"),
        }
    }
}

// ── PyO3 wrappers ──────────────────────────────────────────────────

#[pyfunction]
#[pyo3(signature = (ratings, latent_factors=10, learning_rate=1e-6, max_iterations=10_000, seed=0, verbose=true))]
pub fn factorize_fit<'py>(
    py: Python<'py>,
    ratings: PyReadonlyArray2<'py, f32>,
    latent_factors: usize,
    learning_rate: f32,
    max_iterations: usize,
    seed: u64,
    verbose: bool,
) -> PyResult<(Py<PyArray2<f32>>, Py<PyArray2<f32>>, Py<PyArray2<f32>>, bool)> {
    let m = matrix::from_numpy(&ratings)?;
    let (rows, cols) = (m.n_rows(), m.n_cols());
    let k = latent_factors;

    let fit = py.allow_threads(|| factorize_train(&m, k, learning_rate, max_iterations, seed, verbose));

    let r = PyArray1::from_vec(py, fit.reconstruction);
    let ua = PyArray1::from_vec(py, fit.user_factors);
    let va = PyArray1::from_vec(py, fit.item_factors);
    Ok((
        r.reshape([rows, cols])?.into(),
        ua.reshape([rows, k])?.into(),
        va.reshape([k, cols])?.into(),
        fit.converged,
    ))
}

#[pyfunction]
#[pyo3(signature = (ratings, latent_factors=10, bias=None, bias_weights=None, confidence="filled", regularization=0.0, learning_rate=1e-4, convergence_rate=0.1, max_iterations=10_000, seed=0, verbose=false))]
#[allow(clippy::too_many_arguments)]
pub fn factorize_biased_fit<'py>(
    py: Python<'py>,
    ratings: PyReadonlyArray2<'py, f32>,
    latent_factors: usize,
    bias: Option<f32>,
    bias_weights: Option<f32>,
    confidence: &str,
    regularization: f32,
    learning_rate: f32,
    convergence_rate: f32,
    max_iterations: usize,
    seed: u64,
    verbose: bool,
) -> PyResult<(Py<PyArray2<f32>>, Py<PyArray2<f32>>, Py<PyArray2<f32>>, bool)> {
    let confidence = parse_confidence(confidence)?;
    let m = matrix::from_numpy(&ratings)?;
    let (rows, cols) = (m.n_rows(), m.n_cols());
    let k = latent_factors;

    let fit = py.allow_threads(|| {
        factorize_biased_train(
            &m,
            k,
            bias,
            bias_weights,
            confidence,
            regularization,
            learning_rate,
            convergence_rate,
            max_iterations,
            seed,
            verbose,
        )
    });

    let r = PyArray1::from_vec(py, fit.reconstruction);
    let ua = PyArray1::from_vec(py, fit.user_factors);
    let va = PyArray1::from_vec(py, fit.item_factors);
    Ok((
        r.reshape([rows, cols])?.into(),
        ua.reshape([rows, k])?.into(),
        va.reshape([k, cols])?.into(),
        fit.converged,
    ))
}
