use ndarray::{Array2, s};
use thiserror::Error;

/// Pivot magnitudes below this value are treated as numerical zero during inversion.
pub const SINGULAR_PIVOT_TOLERANCE: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatrixError {
    #[error(
        "Matrix is numerically singular: pivot magnitude {pivot:e} in column {column} is below {tolerance:e}."
    )]
    Singular {
        column: usize,
        pivot: f64,
        tolerance: f64,
    },
}

/// Returns the `n x n` identity matrix.
pub fn identity(n: usize) -> Array2<f64> {
    Array2::eye(n)
}

pub fn transpose(a: &Array2<f64>) -> Array2<f64> {
    a.t().to_owned()
}

/// Element-wise sum. Both operands must share a shape.
pub fn add(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    assert_eq!(
        a.dim(),
        b.dim(),
        "matrix addition requires identical shapes"
    );
    a + b
}

pub fn scalar_multiply(a: &Array2<f64>, scalar: f64) -> Array2<f64> {
    a * scalar
}

/// Matrix product `a * b`. The inner dimensions must agree.
pub fn multiply(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    assert_eq!(
        a.ncols(),
        b.nrows(),
        "matrix product requires a.ncols() == b.nrows() (got {:?} x {:?})",
        a.dim(),
        b.dim()
    );
    a.dot(b)
}

/// Inverts a square matrix by Gauss-Jordan elimination with partial pivoting.
///
/// The elimination runs on the augmented block `[A | I]`. At every column the row
/// with the largest remaining magnitude is swapped into the pivot position; if that
/// magnitude is below [`SINGULAR_PIVOT_TOLERANCE`] the matrix is reported as singular
/// rather than producing an inverse dominated by rounding noise.
pub fn inverse(a: &Array2<f64>) -> Result<Array2<f64>, MatrixError> {
    let n = a.nrows();
    assert_eq!(n, a.ncols(), "only square matrices can be inverted");

    let mut augmented = Array2::<f64>::zeros((n, 2 * n));
    augmented.slice_mut(s![.., ..n]).assign(a);
    augmented.slice_mut(s![.., n..]).assign(&identity(n));

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_magnitude = augmented[[col, col]].abs();
        for row in (col + 1)..n {
            let magnitude = augmented[[row, col]].abs();
            if magnitude > pivot_magnitude {
                pivot_magnitude = magnitude;
                pivot_row = row;
            }
        }

        if pivot_magnitude.is_nan() || pivot_magnitude < SINGULAR_PIVOT_TOLERANCE {
            return Err(MatrixError::Singular {
                column: col,
                pivot: pivot_magnitude,
                tolerance: SINGULAR_PIVOT_TOLERANCE,
            });
        }

        if pivot_row != col {
            for j in 0..2 * n {
                augmented.swap([col, j], [pivot_row, j]);
            }
        }

        let pivot = augmented[[col, col]];
        augmented.row_mut(col).mapv_inplace(|v| v / pivot);

        let pivot_values = augmented.row(col).to_owned();
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = augmented[[row, col]];
            if factor != 0.0 {
                augmented
                    .row_mut(row)
                    .scaled_add(-factor, &pivot_values);
            }
        }
    }

    Ok(augmented.slice(s![.., n..]).to_owned())
}
