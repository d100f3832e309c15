use faer::{linalg::matmul::matmul, Accum, MatMut, MatRef, Par};

use crate::matrix::RatingMatrix;

/// C = A·B for row-major slices, A is m×k, B is k×n.
pub(crate) fn dense_matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; m * n];
    matmul(
        MatMut::from_row_major_slice_mut(&mut out, m, n).as_mut(),
        Accum::Replace,
        MatRef::from_row_major_slice(a, m, k),
        MatRef::from_row_major_slice(b, k, n),
        1.0f32,
        Par::rayon(0),
    );
    out
}

/// Masked residual E = M − U·V and loss J = 0.5·ΣE² over observed cells.
///
/// Unobserved cells of `m` stay NaN in E and contribute nothing to J. When
/// `weights` is given it must hold one entry per cell of `m`; the residual is
/// scaled element-wise before the loss is accumulated.
pub(crate) fn squared_error_gradient(
    m: &RatingMatrix,
    u: &[f32],
    v: &[f32],
    k: usize,
    weights: Option<&[f32]>,
) -> (Vec<f32>, f32) {
    let (rows, cols) = (m.n_rows(), m.n_cols());
    if u.len() != rows * k {
        panic!("user factors have {} entries, expected {}x{}", u.len(), rows, k);
    }
    if v.len() != k * cols {
        panic!("item factors have {} entries, expected {}x{}", v.len(), k, cols);
    }
    if let Some(w) = weights {
        if w.len() != rows * cols {
            panic!(
                "weight matrix has {} entries, expected {}x{}",
                w.len(),
                rows,
                cols
            );
        }
    }

    let uv = dense_matmul(u, v, rows, k, cols);
    let mut residual = vec![f32::NAN; rows * cols];
    let mut loss = 0.0f64;
    for (idx, (&target, &pred)) in m.values().iter().zip(uv.iter()).enumerate() {
        if target.is_nan() {
            continue;
        }
        let mut e = target - pred;
        if let Some(w) = weights {
            e *= w[idx];
        }
        residual[idx] = e;
        loss += e as f64 * e as f64;
    }
    (residual, (0.5 * loss) as f32)
}

/// Residual with unobserved cells zeroed, for the factor update step only.
pub(crate) fn fill_residual(residual: &[f32]) -> Vec<f32> {
    residual
        .iter()
        .map(|&e| if e.is_nan() { 0.0 } else { e })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_2x2() -> RatingMatrix {
        RatingMatrix::new(vec![1.0, 2.0, 3.0, 4.0], 2, 2)
    }

    #[test]
    fn loss_matches_direct_sum_when_dense() {
        let m = dense_2x2();
        let u = vec![0.5, 1.0]; // 2x1
        let v = vec![1.0, 2.0]; // 1x2
        let (residual, loss) = squared_error_gradient(&m, &u, &v, 1, None);

        let mut expected = 0.0f32;
        for row in 0..2 {
            for col in 0..2 {
                let e = m.get(row, col) - u[row] * v[col];
                assert!((residual[row * 2 + col] - e).abs() < 1e-6);
                expected += e * e;
            }
        }
        assert!((loss - 0.5 * expected).abs() < 1e-6);
    }

    #[test]
    fn missing_cells_are_masked_out() {
        let m = RatingMatrix::new(vec![1.0, f32::NAN, 3.0, 4.0], 2, 2);
        let u = vec![0.0, 0.0];
        let v = vec![0.0, 0.0];
        let (residual, loss) = squared_error_gradient(&m, &u, &v, 1, None);

        assert!(residual[1].is_nan());
        // 0.5 * (1 + 9 + 16), nothing from the missing cell
        assert!((loss - 13.0).abs() < 1e-6);

        let filled = fill_residual(&residual);
        assert_eq!(filled[1], 0.0);
        assert_eq!(filled[0], 1.0);
    }

    #[test]
    fn weights_scale_the_residual() {
        let m = dense_2x2();
        let u = vec![0.0, 0.0];
        let v = vec![0.0, 0.0];
        let (_, unweighted) = squared_error_gradient(&m, &u, &v, 1, None);
        let w = vec![2.0; 4];
        let (residual, weighted) = squared_error_gradient(&m, &u, &v, 1, Some(&w));
        assert!((residual[0] - 2.0).abs() < 1e-6);
        assert!((weighted - 4.0 * unweighted).abs() < 1e-4);
    }

    #[test]
    #[should_panic(expected = "item factors")]
    fn incompatible_factor_shapes_panic() {
        let m = dense_2x2();
        squared_error_gradient(&m, &[0.0, 0.0], &[0.0, 0.0, 0.0], 1, None);
    }

    #[test]
    #[should_panic(expected = "weight matrix")]
    fn misaligned_weights_panic() {
        let m = dense_2x2();
        squared_error_gradient(&m, &[0.0, 0.0], &[0.0, 0.0], 1, Some(&[1.0, 1.0]));
    }
}
