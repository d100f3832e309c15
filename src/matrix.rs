use numpy::{PyReadonlyArray2, PyUntypedArrayMethods};
use pyo3::prelude::*;

/// Dense rating matrix, row-major. Unobserved cells hold NaN, never zero.
#[derive(Clone, Debug)]
pub struct RatingMatrix {
    values: Vec<f32>,
    n_rows: usize,
    n_cols: usize,
}

impl RatingMatrix {
    pub fn new(values: Vec<f32>, n_rows: usize, n_cols: usize) -> Self {
        if values.len() != n_rows * n_cols {
            panic!(
                "matrix buffer has {} entries, expected {}x{}",
                values.len(),
                n_rows,
                n_cols
            );
        }
        Self {
            values,
            n_rows,
            n_cols,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.n_cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.values[row * self.n_cols + col] = value;
    }

    #[inline]
    pub fn is_observed(&self, row: usize, col: usize) -> bool {
        !self.get(row, col).is_nan()
    }

    /// (row, col) of every observed cell, row-major order.
    pub fn observed_cells(&self) -> Vec<(usize, usize)> {
        let mut cells = Vec::new();
        for row in 0..self.n_rows {
            for col in 0..self.n_cols {
                if self.is_observed(row, col) {
                    cells.push((row, col));
                }
            }
        }
        cells
    }

    pub fn n_observed(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }

    /// Owned copy with every unobserved cell replaced by `fill`.
    pub fn fill_missing(&self, fill: f32) -> RatingMatrix {
        let values = self
            .values
            .iter()
            .map(|&v| if v.is_nan() { fill } else { v })
            .collect();
        RatingMatrix {
            values,
            n_rows: self.n_rows,
            n_cols: self.n_cols,
        }
    }
}

/// Copy a C-contiguous float32 NumPy matrix (NaN = missing) into a RatingMatrix.
pub(crate) fn from_numpy(ratings: &PyReadonlyArray2<'_, f32>) -> PyResult<RatingMatrix> {
    let shape = ratings.shape();
    Ok(RatingMatrix::new(
        ratings.as_slice()?.to_vec(),
        shape[0],
        shape[1],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observed_cells_skip_missing() {
        let m = RatingMatrix::new(vec![1.0, f32::NAN, 0.0, 2.0], 2, 2);
        assert_eq!(m.observed_cells(), vec![(0, 0), (1, 0), (1, 1)]);
        assert_eq!(m.n_observed(), 3);
        assert!(m.is_observed(1, 0));
        assert!(!m.is_observed(0, 1));
    }

    #[test]
    fn fill_missing_returns_a_copy() {
        let m = RatingMatrix::new(vec![1.0, f32::NAN], 1, 2);
        let filled = m.fill_missing(0.5);
        assert_eq!(filled.values(), &[1.0, 0.5]);
        assert!(m.get(0, 1).is_nan());
    }

    #[test]
    #[should_panic(expected = "matrix buffer")]
    fn shape_mismatch_panics() {
        RatingMatrix::new(vec![1.0, 2.0, 3.0], 2, 2);
    }
}
