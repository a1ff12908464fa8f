use std::ops::{Index, IndexMut};

use crate::error::TransformError;

/// Dense matrix over `f64`, used for the augmented form of linear transforms.
///
/// A transform between S source and T target dimensions is stored as a
/// `(T + 1) x (S + 1)` matrix acting on homogeneous coordinates. The matrix
/// is affine when its last row is `[0, .., 0, 1]` and projective otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    /// Row-major / C-ordered matrix data.
    data: Vec<f64>,
    nrows: usize,
    ncols: usize,
}

impl AsRef<Matrix> for Matrix {
    fn as_ref(&self) -> &Matrix {
        self
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, index: (usize, usize)) -> &Self::Output {
        self.get(index.0, index.1)
            .expect("index should be in bounds")
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut Self::Output {
        let ncols = self.ncols;
        self.data
            .get_mut(index.0 * ncols + index.1)
            .expect("index should be in bounds")
    }
}

impl Matrix {
    /// Row-major / C order data.
    pub fn try_new(data: Vec<f64>, ncols: usize) -> Result<Self, TransformError> {
        if ncols == 0 || data.is_empty() {
            return Err(TransformError::MalformedMatrix(
                "matrix must have at least one row and one column".to_string(),
            ));
        }
        if data.len() % ncols != 0 {
            return Err(TransformError::MalformedMatrix(format!(
                "data length {} is not divisible by ncols {}",
                data.len(),
                ncols
            )));
        }
        if data.iter().any(|d| !d.is_finite()) {
            return Err(TransformError::NonFinite("matrix entries"));
        }
        let nrows = data.len() / ncols;
        Ok(Self { data, nrows, ncols })
    }

    pub fn identity(n: usize) -> Self {
        let mut out = Self::zeros(n, n);
        for i in 0..n {
            out[(i, i)] = 1.0;
        }
        out
    }

    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            data: vec![0.0; nrows * ncols],
            nrows,
            ncols,
        }
    }

    /// Augmented affine matrix with the given diagonal scales and translation.
    ///
    /// Panics if the two slices differ in length.
    pub fn affine_diagonal(scales: &[f64], offsets: &[f64]) -> Self {
        assert_eq!(
            scales.len(),
            offsets.len(),
            "scales and offsets must have the same length"
        );
        let n = scales.len();
        let mut out = Self::zeros(n + 1, n + 1);
        for i in 0..n {
            out[(i, i)] = scales[i];
            out[(i, n)] = offsets[i];
        }
        out[(n, n)] = 1.0;
        out
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&f64> {
        if col >= self.ncols {
            return None;
        }
        self.data.get(row * self.ncols + col)
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let start = row * self.ncols;
        &self.data[start..start + self.ncols]
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn is_square(&self) -> bool {
        self.nrows == self.ncols
    }

    /// Whether the last row is `[0, .., 0, 1]`.
    pub fn is_affine(&self) -> bool {
        let last = self.row(self.nrows - 1);
        let (w, rest) = last.split_last().expect("matrix rows are non-empty");
        *w == 1.0 && rest.iter().all(|v| *v == 0.0)
    }

    pub fn is_identity(&self) -> bool {
        if !self.is_square() {
            return false;
        }
        self.data.iter().enumerate().all(|(idx, v)| {
            let expected = if idx / self.ncols == idx % self.ncols {
                1.0
            } else {
                0.0
            };
            *v == expected
        })
    }

    /// Matrix product `self * rhs`.
    pub fn multiply(&self, rhs: &Matrix) -> Result<Matrix, TransformError> {
        if self.ncols != rhs.nrows {
            return Err(TransformError::DimensionMismatch {
                context: "matrix product",
                expected: self.ncols,
                actual: rhs.nrows,
            });
        }
        let mut out = Matrix::zeros(self.nrows, rhs.ncols);
        for r in 0..self.nrows {
            let row = self.row(r);
            for c in 0..rhs.ncols {
                let mut acc = 0.0;
                for (k, v) in row.iter().enumerate() {
                    acc += v * rhs[(k, c)];
                }
                out[(r, c)] = acc;
            }
        }
        Ok(out)
    }

    /// Inverse by Gauss-Jordan elimination with partial pivoting.
    ///
    /// Square matrices only; a singular matrix is [`TransformError::NotInvertible`].
    pub fn inverse(&self) -> Result<Matrix, TransformError> {
        if !self.is_square() {
            return Err(TransformError::NotInvertible);
        }
        let n = self.nrows;
        let tol = self.pivot_tolerance();
        let mut work = self.data.clone();
        let mut out = Matrix::identity(n);
        for col in 0..n {
            let pivot_row = (col..n)
                .max_by(|a, b| {
                    work[a * n + col]
                        .abs()
                        .total_cmp(&work[b * n + col].abs())
                })
                .expect("column range is non-empty");
            let pivot = work[pivot_row * n + col];
            if pivot.abs() <= tol {
                return Err(TransformError::NotInvertible);
            }
            if pivot_row != col {
                for c in 0..n {
                    work.swap(pivot_row * n + c, col * n + c);
                    out.data.swap(pivot_row * n + c, col * n + c);
                }
            }
            let inv_pivot = 1.0 / work[col * n + col];
            for c in 0..n {
                work[col * n + c] *= inv_pivot;
                out.data[col * n + c] *= inv_pivot;
            }
            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = work[r * n + col];
                if factor == 0.0 {
                    continue;
                }
                for c in 0..n {
                    work[r * n + c] -= factor * work[col * n + c];
                    out.data[r * n + c] -= factor * out.data[col * n + c];
                }
            }
        }
        Ok(out)
    }

    /// Determinant by LU decomposition with partial pivoting.
    pub fn determinant(&self) -> Result<f64, TransformError> {
        if !self.is_square() {
            return Err(TransformError::DimensionMismatch {
                context: "determinant",
                expected: self.nrows,
                actual: self.ncols,
            });
        }
        let n = self.nrows;
        let mut work = self.data.clone();
        let mut det = 1.0;
        for col in 0..n {
            let pivot_row = (col..n)
                .max_by(|a, b| {
                    work[a * n + col]
                        .abs()
                        .total_cmp(&work[b * n + col].abs())
                })
                .expect("column range is non-empty");
            let pivot = work[pivot_row * n + col];
            if pivot == 0.0 {
                return Ok(0.0);
            }
            if pivot_row != col {
                for c in 0..n {
                    work.swap(pivot_row * n + c, col * n + c);
                }
                det = -det;
            }
            det *= pivot;
            for r in (col + 1)..n {
                let factor = work[r * n + col] / pivot;
                if factor == 0.0 {
                    continue;
                }
                for c in col..n {
                    work[r * n + c] -= factor * work[col * n + c];
                }
            }
        }
        Ok(det)
    }

    fn pivot_tolerance(&self) -> f64 {
        let scale = self
            .data
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        scale * f64::EPSILON * self.nrows as f64
    }
}
