mod concat;
mod passthrough;
mod separate;
mod specialized;

pub use concat::ConcatenatedTransform;
pub use passthrough::PassThroughTransform;
pub use specialized::SpecializedTransform;

use std::slice;
use std::sync::Arc;

use smallvec::smallvec;

use crate::ShortVec;
use crate::error::TransformError;
use crate::matrix::Matrix;

/// Extension seam for transforms that have no matrix form, e.g. map
/// projections. Implementations supply the forward evaluation and the
/// Jacobian; an inverse is optional.
pub trait NonLinearTransform: std::fmt::Debug + Send + Sync {
    fn source_dim(&self) -> usize;

    fn target_dim(&self) -> usize;

    /// Write the image of `pt` into `buf`, whose length is `target_dim()`.
    fn apply_into(&self, pt: &[f64], buf: &mut [f64]) -> Result<(), TransformError>;

    /// Jacobian at `pt`, a `target_dim() x source_dim()` matrix.
    fn derivative(&self, pt: &[f64]) -> Result<Matrix, TransformError>;

    fn inverse(&self) -> Option<Arc<dyn NonLinearTransform>> {
        None
    }
}

/// A coordinate transform between spaces of fixed dimension.
///
/// Values are built through the associated functions (`identity`,
/// `translation`, `scale`, `linear`, `concatenate`, ...), which validate
/// their inputs and normalize to the cheapest representation: a translation
/// of all zeros becomes [`Transform::Identity`], a matrix that only scales
/// becomes [`Transform::Scale`], and so on. Equality is by the mapping, not
/// the representation.
#[derive(Debug, Clone)]
pub enum Transform {
    /// Maps every point to itself.
    #[non_exhaustive]
    Identity { dimension: usize },
    /// Adds a fixed offset per axis.
    #[non_exhaustive]
    Translation { offsets: ShortVec<f64> },
    /// Multiplies each axis by a fixed factor.
    #[non_exhaustive]
    Scale { factors: ShortVec<f64> },
    /// One-dimensional `x * scale + offset`.
    #[non_exhaustive]
    Affine1D { scale: f64, offset: f64 },
    /// Two-dimensional affine, coefficients row-major
    /// `[m00, m01, t0, m10, m11, t1]`.
    #[non_exhaustive]
    Affine2D { coeffs: [f64; 6] },
    /// General transform given by an augmented matrix: `(target + 1)` rows by
    /// `(source + 1)` columns. Affine when the last row is `[0, ..., 0, 1]`,
    /// projective otherwise.
    #[non_exhaustive]
    Linear { matrix: Matrix },
    /// Two or more steps applied in order.
    Concatenated(ConcatenatedTransform),
    /// An inner transform on a contiguous band of axes; the rest pass
    /// through untouched.
    PassThrough(PassThroughTransform),
    /// A global transform overridden by more accurate ones inside given
    /// regions of the source space.
    Specialized(SpecializedTransform),
    /// User-supplied non-linear transform.
    NonLinear(Arc<dyn NonLinearTransform>),
}

impl Transform {
    pub fn identity(dimension: usize) -> Result<Self, TransformError> {
        if dimension == 0 {
            return Err(TransformError::ZeroDimension);
        }
        Ok(Self::Identity { dimension })
    }

    pub fn translation(offsets: &[f64]) -> Result<Self, TransformError> {
        if offsets.is_empty() {
            return Err(TransformError::ZeroDimension);
        }
        if offsets.iter().any(|o| !o.is_finite()) {
            return Err(TransformError::NonFinite("translation offset"));
        }
        if offsets.iter().all(|&o| o == 0.0) {
            return Self::identity(offsets.len());
        }
        Ok(Self::Translation {
            offsets: ShortVec::from_slice(offsets),
        })
    }

    /// Per-axis scaling. Zero factors are accepted; they only fail at
    /// inversion.
    pub fn scale(factors: &[f64]) -> Result<Self, TransformError> {
        if factors.is_empty() {
            return Err(TransformError::ZeroDimension);
        }
        if factors.iter().any(|f| !f.is_finite()) {
            return Err(TransformError::NonFinite("scale factor"));
        }
        if factors.iter().all(|&f| f == 1.0) {
            return Self::identity(factors.len());
        }
        Ok(Self::Scale {
            factors: ShortVec::from_slice(factors),
        })
    }

    pub fn affine_1d(scale: f64, offset: f64) -> Result<Self, TransformError> {
        if !scale.is_finite() || !offset.is_finite() {
            return Err(TransformError::NonFinite("affine coefficient"));
        }
        if scale == 1.0 {
            return Self::translation(&[offset]);
        }
        if offset == 0.0 {
            return Self::scale(&[scale]);
        }
        Ok(Self::Affine1D { scale, offset })
    }

    /// Two-dimensional affine from row-major `[m00, m01, t0, m10, m11, t1]`.
    pub fn affine_2d(coeffs: [f64; 6]) -> Result<Self, TransformError> {
        let [m00, m01, t0, m10, m11, t1] = coeffs;
        let matrix = Matrix::try_new(vec![m00, m01, t0, m10, m11, t1, 0.0, 0.0, 1.0], 3)?;
        Self::linear(matrix)
    }

    /// General transform from an augmented matrix, normalized to the
    /// cheapest equivalent representation. Rectangular and projective
    /// matrices are accepted as-is.
    pub fn linear(matrix: Matrix) -> Result<Self, TransformError> {
        if matrix.nrows() < 2 || matrix.ncols() < 2 {
            return Err(TransformError::MalformedMatrix(
                "augmented matrix needs at least 2 rows and 2 columns".into(),
            ));
        }
        if matrix.is_square() && matrix.is_affine() {
            if matrix.is_identity() {
                return Self::identity(matrix.ncols() - 1);
            }
            let n = matrix.ncols() - 1;
            let diagonal = (0..n)
                .all(|r| (0..n).all(|c| r == c || matrix[(r, c)] == 0.0));
            if diagonal {
                let offsets: ShortVec<f64> = (0..n).map(|r| matrix[(r, n)]).collect();
                let factors: ShortVec<f64> = (0..n).map(|d| matrix[(d, d)]).collect();
                if factors.iter().all(|&f| f == 1.0) {
                    return Self::translation(&offsets);
                }
                if offsets.iter().all(|&o| o == 0.0) {
                    return Self::scale(&factors);
                }
            }
            if n == 1 {
                return Ok(Self::Affine1D {
                    scale: matrix[(0, 0)],
                    offset: matrix[(0, 1)],
                });
            }
            if n == 2 {
                return Ok(Self::Affine2D {
                    coeffs: [
                        matrix[(0, 0)],
                        matrix[(0, 1)],
                        matrix[(0, 2)],
                        matrix[(1, 0)],
                        matrix[(1, 1)],
                        matrix[(1, 2)],
                    ],
                });
            }
        }
        Ok(Self::Linear { matrix })
    }

    pub fn non_linear(inner: Arc<dyn NonLinearTransform>) -> Result<Self, TransformError> {
        if inner.source_dim() == 0 || inner.target_dim() == 0 {
            return Err(TransformError::ZeroDimension);
        }
        Ok(Self::NonLinear(inner))
    }

    /// Apply `inner` to a contiguous band of axes, passing `leading` axes
    /// before and `trailing` axes after it through unchanged.
    pub fn pass_through(
        leading: usize,
        inner: Transform,
        trailing: usize,
    ) -> Result<Self, TransformError> {
        passthrough::pass_through(leading, inner, trailing)
    }

    /// A global transform overridden inside given source-space regions.
    /// Regions must be pairwise nested or disjoint; the most specific
    /// (smallest) containing region wins.
    pub fn specialized(
        global: Transform,
        overrides: Vec<(crate::envelope::Envelope, Transform)>,
    ) -> Result<Self, TransformError> {
        specialized::specialized(global, overrides)
    }

    pub fn source_dim(&self) -> usize {
        match self {
            Self::Identity { dimension } => *dimension,
            Self::Translation { offsets } => offsets.len(),
            Self::Scale { factors } => factors.len(),
            Self::Affine1D { .. } => 1,
            Self::Affine2D { .. } => 2,
            Self::Linear { matrix } => matrix.ncols() - 1,
            Self::Concatenated(c) => c.source_dim(),
            Self::PassThrough(p) => p.source_dim(),
            Self::Specialized(s) => s.source_dim(),
            Self::NonLinear(t) => t.source_dim(),
        }
    }

    pub fn target_dim(&self) -> usize {
        match self {
            Self::Identity { dimension } => *dimension,
            Self::Translation { offsets } => offsets.len(),
            Self::Scale { factors } => factors.len(),
            Self::Affine1D { .. } => 1,
            Self::Affine2D { .. } => 2,
            Self::Linear { matrix } => matrix.nrows() - 1,
            Self::Concatenated(c) => c.target_dim(),
            Self::PassThrough(p) => p.target_dim(),
            Self::Specialized(s) => s.target_dim(),
            Self::NonLinear(t) => t.target_dim(),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity { .. })
    }

    /// Whether this transform has an augmented-matrix form.
    pub fn is_linear(&self) -> bool {
        matches!(
            self,
            Self::Identity { .. }
                | Self::Translation { .. }
                | Self::Scale { .. }
                | Self::Affine1D { .. }
                | Self::Affine2D { .. }
                | Self::Linear { .. }
        )
    }

    /// Augmented matrix of this transform, if it has one.
    pub fn matrix(&self) -> Option<Matrix> {
        match self {
            Self::Identity { dimension } => Some(Matrix::identity(dimension + 1)),
            Self::Translation { offsets } => {
                let ones: ShortVec<f64> = ShortVec::from_elem(1.0, offsets.len());
                Some(Matrix::affine_diagonal(&ones, offsets))
            }
            Self::Scale { factors } => {
                let zeros: ShortVec<f64> = ShortVec::from_elem(0.0, factors.len());
                Some(Matrix::affine_diagonal(factors, &zeros))
            }
            Self::Affine1D { scale, offset } => {
                Matrix::try_new(vec![*scale, *offset, 0.0, 1.0], 2).ok()
            }
            Self::Affine2D { coeffs } => {
                let [m00, m01, t0, m10, m11, t1] = *coeffs;
                Matrix::try_new(vec![m00, m01, t0, m10, m11, t1, 0.0, 0.0, 1.0], 3).ok()
            }
            Self::Linear { matrix } => Some(matrix.clone()),
            _ => None,
        }
    }

    /// The steps of a concatenation, or this transform alone.
    pub fn steps(&self) -> &[Transform] {
        match self {
            Self::Concatenated(c) => c.steps(),
            _ => slice::from_ref(self),
        }
    }

    pub fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> Result<(), TransformError> {
        if pt.len() != self.source_dim() {
            return Err(TransformError::DimensionMismatch {
                context: "transform input",
                expected: self.source_dim(),
                actual: pt.len(),
            });
        }
        if buf.len() != self.target_dim() {
            return Err(TransformError::DimensionMismatch {
                context: "transform output",
                expected: self.target_dim(),
                actual: buf.len(),
            });
        }
        match self {
            Self::Identity { .. } => buf.copy_from_slice(pt),
            Self::Translation { offsets } => {
                for ((out, x), off) in buf.iter_mut().zip(pt).zip(offsets) {
                    *out = x + off;
                }
            }
            Self::Scale { factors } => {
                for ((out, x), f) in buf.iter_mut().zip(pt).zip(factors) {
                    *out = x * f;
                }
            }
            Self::Affine1D { scale, offset } => buf[0] = scale * pt[0] + offset,
            Self::Affine2D { coeffs } => {
                let [m00, m01, t0, m10, m11, t1] = *coeffs;
                buf[0] = m00 * pt[0] + m01 * pt[1] + t0;
                buf[1] = m10 * pt[0] + m11 * pt[1] + t1;
            }
            Self::Linear { matrix } => apply_linear(matrix, pt, buf)?,
            Self::Concatenated(c) => c.apply_into(pt, buf)?,
            Self::PassThrough(p) => p.apply_into(pt, buf)?,
            Self::Specialized(s) => s.select(pt).transform_into(pt, buf)?,
            Self::NonLinear(t) => t.apply_into(pt, buf)?,
        }
        Ok(())
    }

    pub fn transform(&self, pt: &[f64]) -> Result<ShortVec<f64>, TransformError> {
        let mut buf: ShortVec<f64> = smallvec![f64::NAN; self.target_dim()];
        self.transform_into(pt, &mut buf)?;
        Ok(buf)
    }

    /// Jacobian at `pt`, a `target_dim() x source_dim()` matrix. Constant for
    /// the linear representations, position-dependent otherwise.
    pub fn derivative(&self, pt: &[f64]) -> Result<Matrix, TransformError> {
        if pt.len() != self.source_dim() {
            return Err(TransformError::DimensionMismatch {
                context: "derivative input",
                expected: self.source_dim(),
                actual: pt.len(),
            });
        }
        match self {
            Self::Identity { dimension } => Ok(Matrix::identity(*dimension)),
            Self::Translation { offsets } => Ok(Matrix::identity(offsets.len())),
            Self::Scale { factors } => {
                let n = factors.len();
                let mut jac = Matrix::zeros(n, n);
                for (d, f) in factors.iter().enumerate() {
                    jac[(d, d)] = *f;
                }
                Ok(jac)
            }
            Self::Affine1D { scale, .. } => Matrix::try_new(vec![*scale], 1),
            Self::Affine2D { coeffs } => {
                let [m00, m01, _, m10, m11, _] = *coeffs;
                Matrix::try_new(vec![m00, m01, m10, m11], 2)
            }
            Self::Linear { matrix } => linear_derivative(matrix, pt),
            Self::Concatenated(c) => c.apply_with_derivative(pt).map(|(_, jac)| jac),
            Self::PassThrough(p) => p.derivative(pt),
            Self::Specialized(s) => s.select(pt).derivative(pt),
            Self::NonLinear(t) => t.derivative(pt),
        }
    }

    /// Image and Jacobian in one pass. For concatenations this shares the
    /// forward walk the chain rule needs anyway.
    pub fn transform_with_derivative(
        &self,
        pt: &[f64],
    ) -> Result<(ShortVec<f64>, Matrix), TransformError> {
        match self {
            Self::Concatenated(c) => {
                if pt.len() != self.source_dim() {
                    return Err(TransformError::DimensionMismatch {
                        context: "transform input",
                        expected: self.source_dim(),
                        actual: pt.len(),
                    });
                }
                c.apply_with_derivative(pt)
            }
            _ => Ok((self.transform(pt)?, self.derivative(pt)?)),
        }
    }

    pub fn inverse(&self) -> Result<Transform, TransformError> {
        match self {
            Self::Identity { .. } => Ok(self.clone()),
            Self::Translation { offsets } => {
                let negated: ShortVec<f64> = offsets.iter().map(|o| -o).collect();
                Self::translation(&negated)
            }
            Self::Scale { factors } => {
                if factors.iter().any(|&f| f == 0.0) {
                    return Err(TransformError::NotInvertible);
                }
                let inverted: ShortVec<f64> = factors.iter().map(|f| 1.0 / f).collect();
                Self::scale(&inverted)
            }
            Self::Affine1D { scale, offset } => {
                if *scale == 0.0 {
                    return Err(TransformError::NotInvertible);
                }
                Self::affine_1d(1.0 / scale, -offset / scale)
            }
            Self::Affine2D { .. } | Self::Linear { .. } => {
                let matrix = self.matrix().expect("linear transforms have a matrix");
                Self::linear(matrix.inverse()?)
            }
            Self::Concatenated(c) => c.inverse(),
            Self::PassThrough(p) => p.inverse(),
            Self::Specialized(_) => Err(TransformError::NotInvertible),
            Self::NonLinear(t) => t
                .inverse()
                .map(Self::NonLinear)
                .ok_or(TransformError::NotInvertible),
        }
    }

    /// `self` followed by `other`. Nested concatenations are flattened,
    /// identities dropped, and adjacent matrix steps merged into one.
    pub fn concatenate(&self, other: &Transform) -> Result<Transform, TransformError> {
        concat::concatenate(self, other)
    }
}

impl PartialEq for Transform {
    /// Equality of the mapping. Any two matrix-backed transforms compare by
    /// their augmented matrices, so `scale([2])` equals the equivalent
    /// `linear(..)` regardless of representation. Non-linear transforms
    /// compare by pointer.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (a, b) if a.is_linear() && b.is_linear() => a.matrix() == b.matrix(),
            (Self::Concatenated(a), Self::Concatenated(b)) => a == b,
            (Self::PassThrough(a), Self::PassThrough(b)) => a == b,
            (Self::Specialized(a), Self::Specialized(b)) => a == b,
            (Self::NonLinear(a), Self::NonLinear(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

fn apply_linear(matrix: &Matrix, pt: &[f64], buf: &mut [f64]) -> Result<(), TransformError> {
    let n = matrix.ncols() - 1;
    let m = matrix.nrows() - 1;
    if matrix.is_affine() {
        for (r, out) in buf.iter_mut().enumerate() {
            let row = matrix.row(r);
            *out = row[..n].iter().zip(pt).map(|(c, x)| c * x).sum::<f64>() + row[n];
        }
        return Ok(());
    }
    let weight_row = matrix.row(m);
    let w = weight_row[..n]
        .iter()
        .zip(pt)
        .map(|(c, x)| c * x)
        .sum::<f64>()
        + weight_row[n];
    if w == 0.0 || !w.is_finite() {
        return Err(TransformError::OutsideDomain(format!(
            "projective weight vanishes at {pt:?}"
        )));
    }
    for (r, out) in buf.iter_mut().enumerate() {
        let row = matrix.row(r);
        *out = (row[..n].iter().zip(pt).map(|(c, x)| c * x).sum::<f64>() + row[n]) / w;
    }
    Ok(())
}

/// Jacobian of an augmented matrix: the linear block for affine matrices,
/// the quotient rule for projective ones.
fn linear_derivative(matrix: &Matrix, pt: &[f64]) -> Result<Matrix, TransformError> {
    let n = matrix.ncols() - 1;
    let m = matrix.nrows() - 1;
    if matrix.is_affine() {
        let mut data = Vec::with_capacity(m * n);
        for r in 0..m {
            data.extend_from_slice(&matrix.row(r)[..n]);
        }
        return Matrix::try_new(data, n);
    }
    let weight_row = matrix.row(m);
    let w = weight_row[..n]
        .iter()
        .zip(pt)
        .map(|(c, x)| c * x)
        .sum::<f64>()
        + weight_row[n];
    if w == 0.0 || !w.is_finite() {
        return Err(TransformError::SingularDerivative);
    }
    let mut data = Vec::with_capacity(m * n);
    for r in 0..m {
        let row = matrix.row(r);
        let numerator = row[..n].iter().zip(pt).map(|(c, x)| c * x).sum::<f64>() + row[n];
        for j in 0..n {
            data.push((row[j] * w - numerator * weight_row[j]) / (w * w));
        }
    }
    Matrix::try_new(data, n)
}
