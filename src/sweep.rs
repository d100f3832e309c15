use numpy::PyReadonlyArray2;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use rayon::prelude::*;

use crate::factorize::{factorize_biased_train, parse_confidence, ConfidenceMode};
use crate::loss::{absolute_mean_error_raw, mean_squared_error_raw};
use crate::matrix::{self, RatingMatrix};
use crate::tester::{HoldoutTester, ModelTester};

/// The single hyper-parameter a sweep varies. Every other value stays fixed,
/// so a sweep over zero or several parameters cannot be expressed.
pub enum SweepParam {
    LatentFactors(Vec<usize>),
    Regularization(Vec<f32>),
    Bias(Vec<f32>),
    BiasWeights(Vec<f32>),
}

/// Fixed values for the three hyper-parameters not being swept.
#[derive(Clone, Copy)]
pub struct SweepBase {
    pub latent_factors: usize,
    pub regularization: f32,
    pub bias: f32,
    pub bias_weights: f32,
    pub confidence: ConfidenceMode,
    pub learning_rate: f32,
    pub convergence_rate: f32,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for SweepBase {
    fn default() -> Self {
        Self {
            latent_factors: 5,
            regularization: 1.0,
            bias: 0.5,
            bias_weights: 0.2,
            confidence: ConfidenceMode::FilledOnly,
            learning_rate: 1e-4,
            convergence_rate: 0.1,
            max_iterations: 10_000,
            seed: 0,
        }
    }
}

/// Train one model per candidate value and score each prediction matrix on
/// the tester's validation set. Candidates are independent and run in
/// parallel. Returns (mean-squared errors, absolute-mean errors), both
/// index-aligned with the candidate list.
pub fn sweep_candidates<T>(
    data: &RatingMatrix,
    tester: &T,
    sweep: &SweepParam,
    base: &SweepBase,
    verbose: bool,
) -> (Vec<f32>, Vec<f32>)
where
    T: ModelTester + Sync,
{
    let configs: Vec<SweepBase> = match sweep {
        SweepParam::LatentFactors(vals) => vals
            .iter()
            .map(|&k| SweepBase {
                latent_factors: k,
                ..*base
            })
            .collect(),
        SweepParam::Regularization(vals) => vals
            .iter()
            .map(|&r| SweepBase {
                regularization: r,
                ..*base
            })
            .collect(),
        SweepParam::Bias(vals) => vals
            .iter()
            .map(|&b| SweepBase { bias: b, ..*base })
            .collect(),
        SweepParam::BiasWeights(vals) => vals
            .iter()
            .map(|&bw| SweepBase {
                bias_weights: bw,
                ..*base
            })
            .collect(),
    };

    let scores: Vec<(f32, f32)> = configs
        .par_iter()
        .enumerate()
        .map(|(i, cfg)| {
            let fit = factorize_biased_train(
                data,
                cfg.latent_factors,
                Some(cfg.bias),
                Some(cfg.bias_weights),
                cfg.confidence,
                cfg.regularization,
                cfg.learning_rate,
                cfg.convergence_rate,
                cfg.max_iterations,
                cfg.seed.wrapping_add(i as u64),
                false,
            );
            // Predictions carry the input's row/column layout.
            let predictions =
                RatingMatrix::new(fit.reconstruction, data.n_rows(), data.n_cols());
            let mse = tester.evaluate_valid(&predictions, mean_squared_error_raw, verbose);
            let ame = tester.evaluate_valid(&predictions, absolute_mean_error_raw, verbose);
            (mse, ame)
        })
        .collect();

    (
        scores.iter().map(|s| s.0).collect(),
        scores.iter().map(|s| s.1).collect(),
    )
}

// ── PyO3 wrapper ───────────────────────────────────────────────────

#[pyfunction]
#[pyo3(signature = (ratings, param, candidates, latent_factors=5, regularization=1.0, bias=0.5, bias_weights=0.2, confidence="filled", learning_rate=1e-4, convergence_rate=0.1, max_iterations=10_000, test_ratio=0.2, valid_ratio=0.2, seed=None, verbose=false))]
#[allow(clippy::too_many_arguments)]
pub fn hyper_parameter_sweep(
    py: Python<'_>,
    ratings: PyReadonlyArray2<'_, f32>,
    param: &str,
    candidates: Vec<f64>,
    latent_factors: usize,
    regularization: f32,
    bias: f32,
    bias_weights: f32,
    confidence: &str,
    learning_rate: f32,
    convergence_rate: f32,
    max_iterations: usize,
    test_ratio: f32,
    valid_ratio: f32,
    seed: Option<u64>,
    verbose: bool,
) -> PyResult<(Vec<f32>, Vec<f32>)> {
    let sweep = match param {
        "latent_factors" => {
            SweepParam::LatentFactors(candidates.iter().map(|&v| v as usize).collect())
        }
        "regularization" => {
            SweepParam::Regularization(candidates.iter().map(|&v| v as f32).collect())
        }
        "bias" => SweepParam::Bias(candidates.iter().map(|&v| v as f32).collect()),
        "bias_weights" => {
            SweepParam::BiasWeights(candidates.iter().map(|&v| v as f32).collect())
        }
        _ => {
            return Err(PyValueError::new_err(format!(
                "Unknown sweep parameter: {}. Must be one of: latent_factors, regularization, bias, bias_weights.",
                param
            )))
        }
    };
    let confidence = parse_confidence(confidence)?;
    let m = matrix::from_numpy(&ratings)?;
    let seed = seed.unwrap_or_else(rand::random);

    let base = SweepBase {
        latent_factors,
        regularization,
        bias,
        bias_weights,
        confidence,
        learning_rate,
        convergence_rate,
        max_iterations,
        seed,
    };

    Ok(py.allow_threads(|| {
        let mut tester = HoldoutTester::new(test_ratio, valid_ratio, seed);
        tester.fit_transform(&m);
        let train_data = tester.representation().clone();
        sweep_candidates(&train_data, &tester, &sweep, &base, verbose)
    }))
}
