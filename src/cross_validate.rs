use ahash::AHashMap;
use numpy::PyReadonlyArray2;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::collections::HashMap;

use crate::factorize::{parse_confidence, LatentFactorModel, Model};
use crate::loss::{absolute_mean_error_raw, mean_squared_error_raw, LossFn};
use crate::matrix::{self, RatingMatrix};
use crate::tester::{HoldoutTester, ModelTester};

/// Rank-selection harness.
///
/// For every candidate rank: refit the tester's partition, construct and fit
/// a fresh model on the masked representation, score the FIXED test set once,
/// then score the CURRENT train set `cv_times` times with a reshuffle of the
/// train/validation split after each fold. Returns the rank-keyed test and
/// train loss sequences, which grow by append only.
pub fn cross_validate<M, F, T>(
    k_vals: &[usize],
    make_model: F,
    tester: &mut T,
    loss: LossFn,
    data: &RatingMatrix,
    cv_times: usize,
    verbose: bool,
) -> (AHashMap<usize, Vec<f32>>, AHashMap<usize, Vec<f32>>)
where
    M: Model,
    F: Fn(usize) -> M,
    T: ModelTester,
{
    let mut d_test: AHashMap<usize, Vec<f32>> = AHashMap::new();
    let mut d_train: AHashMap<usize, Vec<f32>> = AHashMap::new();

    for &k in k_vals {
        // Each rank starts from a pristine copy of the data, so nothing a
        // model or tester did to its working state leaks into the next fit.
        let working = data.clone();
        tester.fit_transform(&working);
        let mut model_k = make_model(k);
        model_k.fit(tester.representation());
        if verbose {
            println!("----------- k = {} -----------", k);
        }

        let pred_test: AHashMap<(usize, usize), f32> = tester
            .test_set()
            .iter()
            .map(|&(row, col)| ((row, col), model_k.predict(row, col)))
            .collect();
        if verbose {
            println!("Test set");
        }
        let val_test = tester.evaluate_test(&pred_test, loss, verbose);
        d_test.entry(k).or_default().push(val_test);

        for fold in 0..cv_times {
            if verbose {
                println!(">>> Fold {}:", fold);
            }
            let pred_train: AHashMap<(usize, usize), f32> = tester
                .train_set()
                .iter()
                .map(|&(row, col)| ((row, col), model_k.predict(row, col)))
                .collect();
            if verbose {
                println!("Train set");
            }
            let val_train = tester.evaluate_train(&pred_train, loss, verbose);
            d_train.entry(k).or_default().push(val_train);

            tester.shuffle_cv();
        }
    }

    (d_test, d_train)
}

/// Mean and sample standard deviation per key, sorted by key.
/// A singleton sequence yields a NaN deviation.
pub fn summarize(results: &AHashMap<usize, Vec<f32>>) -> Vec<(usize, f32, f32)> {
    let mut keys: Vec<usize> = results.keys().copied().collect();
    keys.sort_unstable();
    keys.into_iter()
        .map(|k| {
            let vals = &results[&k];
            let n = vals.len() as f64;
            let mean = vals.iter().map(|&v| v as f64).sum::<f64>() / n;
            let std = if vals.len() < 2 {
                f64::NAN
            } else {
                let ss: f64 = vals
                    .iter()
                    .map(|&v| {
                        let d = v as f64 - mean;
                        d * d
                    })
                    .sum();
                (ss / (n - 1.0)).sqrt()
            };
            (k, mean as f32, std as f32)
        })
        .collect()
}

// ── PyO3 wrappers ──────────────────────────────────────────────────

#[pyfunction]
#[pyo3(signature = (ratings, k_vals, cv_times=3, loss="mse", bias=None, bias_weights=None, confidence="filled", regularization=0.0, learning_rate=1e-4, convergence_rate=0.1, max_iterations=10_000, test_ratio=0.2, valid_ratio=0.2, seed=None, verbose=true))]
#[allow(clippy::too_many_arguments)]
pub fn cross_validate_rank(
    py: Python<'_>,
    ratings: PyReadonlyArray2<'_, f32>,
    k_vals: Vec<usize>,
    cv_times: usize,
    loss: &str,
    bias: Option<f32>,
    bias_weights: Option<f32>,
    confidence: &str,
    regularization: f32,
    learning_rate: f32,
    convergence_rate: f32,
    max_iterations: usize,
    test_ratio: f32,
    valid_ratio: f32,
    seed: Option<u64>,
    verbose: bool,
) -> PyResult<(HashMap<usize, Vec<f32>>, HashMap<usize, Vec<f32>>)> {
    let loss_fn: LossFn = match loss {
        "mse" => mean_squared_error_raw,
        "ame" => absolute_mean_error_raw,
        _ => {
            return Err(PyValueError::new_err(format!(
                "Unknown loss: {}. Must be one of: mse, ame.",
                loss
            )))
        }
    };
    let confidence = parse_confidence(confidence)?;
    let m = matrix::from_numpy(&ratings)?;
    let seed = seed.unwrap_or_else(rand::random);

    let (d_test, d_train) = py.allow_threads(|| {
        let mut tester = HoldoutTester::new(test_ratio, valid_ratio, seed);
        let make_model = |k: usize| {
            let mut model = LatentFactorModel::new(k);
            model.bias = bias;
            model.bias_weights = bias_weights;
            model.confidence = confidence;
            model.regularization = regularization;
            model.learning_rate = learning_rate;
            model.convergence_rate = convergence_rate;
            model.max_iterations = max_iterations;
            model.seed = seed;
            model
        };
        cross_validate(
            &k_vals, make_model, &mut tester, loss_fn, &m, cv_times, verbose,
        )
    });

    Ok((
        d_test.into_iter().collect(),
        d_train.into_iter().collect(),
    ))
}

#[pyfunction]
pub fn summarize_results(results: HashMap<usize, Vec<f32>>) -> Vec<(usize, f32, f32)> {
    let map: AHashMap<usize, Vec<f32>> = results.into_iter().collect();
    summarize(&map)
}
