use ahash::AHashMap;

use crate::common::{shuffle, XorShift64};
use crate::loss::LossFn;
use crate::matrix::RatingMatrix;

/// Evaluation collaborator owning the train/validation/test partition of the
/// observed cells. Mutated in place by the cross-validation harness; one
/// instance must not be shared by concurrent runs.
pub trait ModelTester {
    /// Rebuild the partition and the training representation from `data`.
    fn fit_transform(&mut self, data: &RatingMatrix);
    /// The masked matrix produced by the last `fit_transform`.
    fn representation(&self) -> &RatingMatrix;
    /// Re-deal the non-test cells between train and validation.
    fn shuffle_cv(&mut self);
    fn test_set(&self) -> &[(usize, usize)];
    fn train_set(&self) -> &[(usize, usize)];
    fn evaluate_test(
        &self,
        predictions: &AHashMap<(usize, usize), f32>,
        loss: LossFn,
        verbose: bool,
    ) -> f32;
    fn evaluate_train(
        &self,
        predictions: &AHashMap<(usize, usize), f32>,
        loss: LossFn,
        verbose: bool,
    ) -> f32;
    fn evaluate_valid(&self, predictions: &RatingMatrix, loss: LossFn, verbose: bool) -> f32;
}

/// Random holdout over the observed cells: a test slice that stays fixed for
/// the tester's lifetime plus a train/validation split that `shuffle_cv`
/// re-deals. Held-out cells are masked (NaN) in the representation.
pub struct HoldoutTester {
    test_ratio: f32,
    valid_ratio: f32,
    rng: XorShift64,
    truth: Option<RatingMatrix>,
    representation: Option<RatingMatrix>,
    test_cells: Vec<(usize, usize)>,
    train_cells: Vec<(usize, usize)>,
    valid_cells: Vec<(usize, usize)>,
}

impl HoldoutTester {
    pub fn new(test_ratio: f32, valid_ratio: f32, seed: u64) -> Self {
        if !(0.0..1.0).contains(&test_ratio) || !(0.0..1.0).contains(&valid_ratio) {
            panic!("holdout ratios must lie in [0, 1)");
        }
        if test_ratio + valid_ratio >= 1.0 {
            panic!("test and validation ratios leave no training cells");
        }
        Self {
            test_ratio,
            valid_ratio,
            rng: XorShift64::new(seed),
            truth: None,
            representation: None,
            test_cells: Vec::new(),
            train_cells: Vec::new(),
            valid_cells: Vec::new(),
        }
    }

    pub fn valid_set(&self) -> &[(usize, usize)] {
        &self.valid_cells
    }

    fn truth_ref(&self) -> &RatingMatrix {
        match &self.truth {
            Some(t) => t,
            None => panic!("fit_transform must run before evaluation"),
        }
    }

    fn evaluate_cells(
        &self,
        cells: &[(usize, usize)],
        predictions: &AHashMap<(usize, usize), f32>,
        loss: LossFn,
        verbose: bool,
        label: &str,
    ) -> f32 {
        let truth = self.truth_ref();
        let mut preds = Vec::with_capacity(cells.len());
        let mut actuals = Vec::with_capacity(cells.len());
        for &(row, col) in cells {
            let p = match predictions.get(&(row, col)) {
                Some(p) => *p,
                None => panic!("no prediction supplied for cell ({}, {})", row, col),
            };
            preds.push(p);
            actuals.push(truth.get(row, col));
        }
        let value = loss(&preds, &actuals);
        if verbose {
            println!("  {} loss over {} cells: {:.6}", label, cells.len(), value);
        }
        value
    }
}

impl ModelTester for HoldoutTester {
    fn fit_transform(&mut self, data: &RatingMatrix) {
        let mut cells = data.observed_cells();
        if cells.is_empty() {
            panic!("rating matrix has no observed cells");
        }
        shuffle(&mut cells, &mut self.rng);

        let n = cells.len();
        let n_test = (n as f32 * self.test_ratio).round() as usize;
        let n_valid = (n as f32 * self.valid_ratio).round() as usize;
        self.test_cells = cells[..n_test].to_vec();
        self.valid_cells = cells[n_test..n_test + n_valid].to_vec();
        self.train_cells = cells[n_test + n_valid..].to_vec();

        let mut rep = data.clone();
        for &(row, col) in self.test_cells.iter().chain(self.valid_cells.iter()) {
            rep.set(row, col, f32::NAN);
        }
        self.truth = Some(data.clone());
        self.representation = Some(rep);
    }

    fn representation(&self) -> &RatingMatrix {
        match &self.representation {
            Some(r) => r,
            None => panic!("fit_transform must run before representation"),
        }
    }

    fn shuffle_cv(&mut self) {
        let mut pool: Vec<(usize, usize)> = self
            .train_cells
            .drain(..)
            .chain(self.valid_cells.drain(..))
            .collect();
        shuffle(&mut pool, &mut self.rng);
        let total = pool.len() + self.test_cells.len();
        let n_valid = (total as f32 * self.valid_ratio).round() as usize;
        self.valid_cells = pool[..n_valid].to_vec();
        self.train_cells = pool[n_valid..].to_vec();
    }

    fn test_set(&self) -> &[(usize, usize)] {
        &self.test_cells
    }

    fn train_set(&self) -> &[(usize, usize)] {
        &self.train_cells
    }

    fn evaluate_test(
        &self,
        predictions: &AHashMap<(usize, usize), f32>,
        loss: LossFn,
        verbose: bool,
    ) -> f32 {
        self.evaluate_cells(&self.test_cells, predictions, loss, verbose, "test")
    }

    fn evaluate_train(
        &self,
        predictions: &AHashMap<(usize, usize), f32>,
        loss: LossFn,
        verbose: bool,
    ) -> f32 {
        self.evaluate_cells(&self.train_cells, predictions, loss, verbose, "train")
    }

    fn evaluate_valid(&self, predictions: &RatingMatrix, loss: LossFn, verbose: bool) -> f32 {
        let truth = self.truth_ref();
        if predictions.n_rows() != truth.n_rows() || predictions.n_cols() != truth.n_cols() {
            panic!(
                "prediction matrix is {}x{}, data is {}x{}",
                predictions.n_rows(),
                predictions.n_cols(),
                truth.n_rows(),
                truth.n_cols()
            );
        }
        let mut preds = Vec::with_capacity(self.valid_cells.len());
        let mut actuals = Vec::with_capacity(self.valid_cells.len());
        for &(row, col) in &self.valid_cells {
            preds.push(predictions.get(row, col));
            actuals.push(truth.get(row, col));
        }
        let value = loss(&preds, &actuals);
        if verbose {
            println!(
                "  validation loss over {} cells: {:.6}",
                self.valid_cells.len(),
                value
            );
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::{absolute_mean_error_raw, mean_squared_error_raw};
    use std::collections::HashSet;

    fn ratings_10x10() -> RatingMatrix {
        let mut values = Vec::with_capacity(100);
        for i in 0..100 {
            // Roughly a fifth of the cells unobserved.
            if i % 5 == 3 {
                values.push(f32::NAN);
            } else {
                values.push((i % 3) as f32);
            }
        }
        RatingMatrix::new(values, 10, 10)
    }

    fn cell_set(cells: &[(usize, usize)]) -> HashSet<(usize, usize)> {
        cells.iter().copied().collect()
    }

    #[test]
    fn partition_is_disjoint_and_complete() {
        let data = ratings_10x10();
        let mut tester = HoldoutTester::new(0.2, 0.2, 7);
        tester.fit_transform(&data);

        let test = cell_set(tester.test_set());
        let train = cell_set(tester.train_set());
        let valid = cell_set(tester.valid_set());
        assert!(test.is_disjoint(&train));
        assert!(test.is_disjoint(&valid));
        assert!(train.is_disjoint(&valid));
        assert_eq!(
            test.len() + train.len() + valid.len(),
            data.n_observed()
        );
    }

    #[test]
    fn shuffle_cv_keeps_the_test_slice_fixed() {
        let data = ratings_10x10();
        let mut tester = HoldoutTester::new(0.2, 0.2, 7);
        tester.fit_transform(&data);

        let test_before = tester.test_set().to_vec();
        let pool_before: HashSet<_> = cell_set(tester.train_set())
            .union(&cell_set(tester.valid_set()))
            .copied()
            .collect();
        let train_before = tester.train_set().to_vec();

        tester.shuffle_cv();

        assert_eq!(tester.test_set(), test_before.as_slice());
        let pool_after: HashSet<_> = cell_set(tester.train_set())
            .union(&cell_set(tester.valid_set()))
            .copied()
            .collect();
        assert_eq!(pool_before, pool_after);
        assert_ne!(tester.train_set(), train_before.as_slice());
    }

    #[test]
    fn representation_masks_held_out_cells() {
        let data = ratings_10x10();
        let mut tester = HoldoutTester::new(0.2, 0.2, 7);
        tester.fit_transform(&data);

        let rep = tester.representation();
        for &(row, col) in tester.test_set().iter().chain(tester.valid_set()) {
            assert!(!rep.is_observed(row, col));
        }
        for &(row, col) in tester.train_set() {
            assert_eq!(rep.get(row, col), data.get(row, col));
        }
    }

    #[test]
    fn exact_predictions_score_zero() {
        let data = ratings_10x10();
        let mut tester = HoldoutTester::new(0.2, 0.2, 7);
        tester.fit_transform(&data);

        let predictions: AHashMap<(usize, usize), f32> = tester
            .train_set()
            .iter()
            .map(|&(r, c)| ((r, c), data.get(r, c)))
            .collect();
        assert_eq!(
            tester.evaluate_train(&predictions, mean_squared_error_raw, false),
            0.0
        );

        let val = tester.evaluate_valid(&data, absolute_mean_error_raw, false);
        assert_eq!(val, 0.0);
    }

    #[test]
    #[should_panic(expected = "no prediction supplied")]
    fn missing_prediction_panics() {
        let data = ratings_10x10();
        let mut tester = HoldoutTester::new(0.2, 0.2, 7);
        tester.fit_transform(&data);
        let empty = AHashMap::new();
        tester.evaluate_train(&empty, mean_squared_error_raw, false);
    }

    #[test]
    #[should_panic(expected = "leave no training cells")]
    fn degenerate_ratios_panic() {
        HoldoutTester::new(0.6, 0.4, 1);
    }
}
