//! Small dense linear algebra on `ndarray` matrices.
//!
//! Design matrices here have a handful of columns, so plain Cholesky and
//! Gauss-Jordan elimination are sufficient.

use ndarray::{Array1, Array2, ArrayView2};

/// Pivot magnitude below which a matrix is treated as singular
const SINGULAR_EPS: f64 = 1e-14;

/// X' W X for a diagonal weight vector
pub fn weighted_crossprod(x: ArrayView2<f64>, weights: &[f64]) -> Array2<f64> {
    let (n, p) = x.dim();
    let mut out = Array2::<f64>::zeros((p, p));
    for i in 0..n {
        let w = weights[i];
        if w == 0.0 {
            continue;
        }
        for j in 0..p {
            let xij = w * x[[i, j]];
            if xij == 0.0 {
                continue;
            }
            for k in j..p {
                out[[j, k]] += xij * x[[i, k]];
            }
        }
    }
    for j in 0..p {
        for k in 0..j {
            out[[j, k]] = out[[k, j]];
        }
    }
    out
}

/// X' W z
pub fn weighted_crossprod_vec(x: ArrayView2<f64>, weights: &[f64], z: &[f64]) -> Array1<f64> {
    let (n, p) = x.dim();
    let mut out = Array1::<f64>::zeros(p);
    for i in 0..n {
        let wz = weights[i] * z[i];
        for j in 0..p {
            out[j] += x[[i, j]] * wz;
        }
    }
    out
}

/// Lower Cholesky factor of a symmetric positive definite matrix.
/// Returns `None` when a pivot is not positive.
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= SINGULAR_EPS || !sum.is_finite() {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solve `A x = b` for symmetric positive definite `A`
pub fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let l = cholesky(a)?;
    let n = l.nrows();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    Some(x)
}

/// Log determinant of a symmetric positive definite matrix
pub fn log_det_spd(a: &Array2<f64>) -> Option<f64> {
    let l = cholesky(a)?;
    Some((0..l.nrows()).map(|i| 2.0 * l[[i, i]].ln()).sum())
}

/// Solve a general square system with partial pivoting
pub fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n == 0 || a.ncols() != n || b.len() != n {
        return None;
    }
    let mut m = a.clone();
    let mut rhs = b.clone();

    for col in 0..n {
        let pivot = (col..n).max_by(|&r1, &r2| m[[r1, col]].abs().total_cmp(&m[[r2, col]].abs()))?;
        if m[[pivot, col]].abs() < SINGULAR_EPS {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                m.swap([col, k], [pivot, k]);
            }
            rhs.swap(col, pivot);
        }
        for row in (col + 1)..n {
            let factor = m[[row, col]] / m[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                m[[row, k]] -= factor * m[[col, k]];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = rhs[i];
        for k in (i + 1)..n {
            sum -= m[[i, k]] * x[k];
        }
        x[i] = sum / m[[i, i]];
    }
    Some(x)
}

/// Inverse of a general square matrix (Gauss-Jordan with partial pivoting)
pub fn invert(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return None;
    }
    let mut m = a.clone();
    let mut inv = Array2::<f64>::eye(n);

    for col in 0..n {
        let pivot = (col..n).max_by(|&r1, &r2| m[[r1, col]].abs().total_cmp(&m[[r2, col]].abs()))?;
        if m[[pivot, col]].abs() < SINGULAR_EPS {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                m.swap([col, k], [pivot, k]);
                inv.swap([col, k], [pivot, k]);
            }
        }
        let d = m[[col, col]];
        for k in 0..n {
            m[[col, k]] /= d;
            inv[[col, k]] /= d;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = m[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                m[[row, k]] -= factor * m[[col, k]];
                inv[[row, k]] -= factor * inv[[col, k]];
            }
        }
    }
    Some(inv)
}

/// Least squares fit of `y` on the columns of `x` via the normal equations
pub fn least_squares(x: ArrayView2<f64>, y: &[f64]) -> Option<Array1<f64>> {
    let ones = vec![1.0; x.nrows()];
    let xtx = weighted_crossprod(x, &ones);
    let xty = weighted_crossprod_vec(x, &ones, y);
    solve(&xtx, &xty)
}
