use numpy::PyReadonlyArray2;
use pyo3::prelude::*;

use crate::matrix::{self, RatingMatrix};

/// Scalar loss over aligned (predictions, actuals) slices.
pub type LossFn = fn(&[f32], &[f32]) -> f32;

// ── Pure-Rust loss functions (no PyO3, take slices) ────────────────

pub(crate) fn mean_squared_error_raw(predictions: &[f32], actuals: &[f32]) -> f32 {
    if predictions.len() != actuals.len() {
        panic!(
            "got {} predictions for {} actuals",
            predictions.len(),
            actuals.len()
        );
    }
    if predictions.is_empty() {
        return 0.0;
    }
    let sum: f64 = predictions
        .iter()
        .zip(actuals.iter())
        .map(|(&p, &a)| {
            let d = (p - a) as f64;
            d * d
        })
        .sum();
    (sum / predictions.len() as f64) as f32
}

pub(crate) fn absolute_mean_error_raw(predictions: &[f32], actuals: &[f32]) -> f32 {
    if predictions.len() != actuals.len() {
        panic!(
            "got {} predictions for {} actuals",
            predictions.len(),
            actuals.len()
        );
    }
    if predictions.is_empty() {
        return 0.0;
    }
    let sum: f64 = predictions
        .iter()
        .zip(actuals.iter())
        .map(|(&p, &a)| ((p - a) as f64).abs())
        .sum();
    (sum / predictions.len() as f64) as f32
}

/// Share of observed ground-truth cells whose binarized prediction
/// (strictly above 0.5 becomes 1, else 0) disagrees with the truth.
/// An error rate: 0 means every binarized prediction matches. The
/// binarization happens on an internal copy, never on the caller's matrix.
pub(crate) fn binary_disagreement_raw(m: &RatingMatrix, r_hat: &RatingMatrix) -> f32 {
    if m.n_rows() != r_hat.n_rows() || m.n_cols() != r_hat.n_cols() {
        panic!(
            "prediction matrix is {}x{}, ground truth is {}x{}",
            r_hat.n_rows(),
            r_hat.n_cols(),
            m.n_rows(),
            m.n_cols()
        );
    }
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for (&target, &pred) in m.values().iter().zip(r_hat.values().iter()) {
        if target.is_nan() {
            continue;
        }
        let binarized = if pred > 0.5 { 1.0f32 } else { 0.0f32 };
        sum += (target - binarized).abs() as f64;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

// ── PyO3 wrappers ──────────────────────────────────────────────────

#[pyfunction]
pub fn mean_squared_error(predictions: Vec<f32>, actuals: Vec<f32>) -> f32 {
    mean_squared_error_raw(&predictions, &actuals)
}

#[pyfunction]
pub fn absolute_mean_error(predictions: Vec<f32>, actuals: Vec<f32>) -> f32 {
    absolute_mean_error_raw(&predictions, &actuals)
}

#[pyfunction]
pub fn binary_disagreement(
    ratings: PyReadonlyArray2<'_, f32>,
    predictions: PyReadonlyArray2<'_, f32>,
) -> PyResult<f32> {
    let m = matrix::from_numpy(&ratings)?;
    let r_hat = matrix::from_numpy(&predictions)?;
    Ok(binary_disagreement_raw(&m, &r_hat))
}
