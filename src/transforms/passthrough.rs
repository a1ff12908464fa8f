use crate::error::TransformError;
use crate::matrix::Matrix;
use crate::transforms::Transform;

/// An inner transform applied to a contiguous band of axes, with `leading`
/// axes before and `trailing` axes after it copied through unchanged.
///
/// Built through [`Transform::pass_through`], which unwraps trivial cases:
/// no padding yields the inner transform itself, an identity inner yields an
/// identity, and an affine inner is expanded into one big matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct PassThroughTransform {
    leading: usize,
    trailing: usize,
    inner: Box<Transform>,
}

pub(super) fn pass_through(
    leading: usize,
    inner: Transform,
    trailing: usize,
) -> Result<Transform, TransformError> {
    if leading == 0 && trailing == 0 {
        return Ok(inner);
    }
    if inner.is_identity() {
        return Transform::identity(leading + inner.source_dim() + trailing);
    }
    if let Some(matrix) = inner.matrix() {
        if matrix.is_affine() {
            return Transform::linear(expand_affine(leading, &matrix, trailing));
        }
    }
    Ok(Transform::PassThrough(PassThroughTransform {
        leading,
        trailing,
        inner: Box::new(inner),
    }))
}

/// Embed an affine inner matrix into the identity of the padded space.
/// Projective inner matrices cannot be embedded this way, since their
/// weight row would divide the pass-through axes too.
fn expand_affine(leading: usize, inner: &Matrix, trailing: usize) -> Matrix {
    let inner_src = inner.ncols() - 1;
    let inner_tgt = inner.nrows() - 1;
    let total_src = leading + inner_src + trailing;
    let total_tgt = leading + inner_tgt + trailing;
    let mut out = Matrix::zeros(total_tgt + 1, total_src + 1);
    for d in 0..leading {
        out[(d, d)] = 1.0;
    }
    for r in 0..inner_tgt {
        for c in 0..inner_src {
            out[(leading + r, leading + c)] = inner[(r, c)];
        }
        out[(leading + r, total_src)] = inner[(r, inner_src)];
    }
    for d in 0..trailing {
        out[(leading + inner_tgt + d, leading + inner_src + d)] = 1.0;
    }
    out[(total_tgt, total_src)] = 1.0;
    out
}

impl PassThroughTransform {
    pub fn leading(&self) -> usize {
        self.leading
    }

    pub fn trailing(&self) -> usize {
        self.trailing
    }

    pub fn inner(&self) -> &Transform {
        &self.inner
    }

    pub fn source_dim(&self) -> usize {
        self.leading + self.inner.source_dim() + self.trailing
    }

    pub fn target_dim(&self) -> usize {
        self.leading + self.inner.target_dim() + self.trailing
    }

    pub(super) fn apply_into(&self, pt: &[f64], out: &mut [f64]) -> Result<(), TransformError> {
        let inner_src = self.inner.source_dim();
        let inner_tgt = self.inner.target_dim();
        out[..self.leading].copy_from_slice(&pt[..self.leading]);
        self.inner.transform_into(
            &pt[self.leading..self.leading + inner_src],
            &mut out[self.leading..self.leading + inner_tgt],
        )?;
        out[self.leading + inner_tgt..].copy_from_slice(&pt[self.leading + inner_src..]);
        Ok(())
    }

    /// Block-diagonal Jacobian: identities on the pass-through axes, the
    /// inner Jacobian on its band.
    pub(super) fn derivative(&self, pt: &[f64]) -> Result<Matrix, TransformError> {
        let inner_src = self.inner.source_dim();
        let inner_jac = self
            .inner
            .derivative(&pt[self.leading..self.leading + inner_src])?;
        let inner_tgt = inner_jac.nrows();
        let mut jac = Matrix::zeros(self.target_dim(), self.source_dim());
        for d in 0..self.leading {
            jac[(d, d)] = 1.0;
        }
        for r in 0..inner_tgt {
            for c in 0..inner_src {
                jac[(self.leading + r, self.leading + c)] = inner_jac[(r, c)];
            }
        }
        for d in 0..self.trailing {
            jac[(self.leading + inner_tgt + d, self.leading + inner_src + d)] = 1.0;
        }
        Ok(jac)
    }

    pub(super) fn inverse(&self) -> Result<Transform, TransformError> {
        pass_through(self.leading, self.inner.inverse()?, self.trailing)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_ulps_eq;

    use crate::tests::{CubeMap, check_derivative, check_roundtrip};
    use crate::transforms::Transform;

    #[test]
    fn test_no_padding_is_inner() {
        let inner = Transform::scale(&[2.0]).unwrap();
        let t = Transform::pass_through(0, inner.clone(), 0).unwrap();
        assert_eq!(t, inner);
    }

    #[test]
    fn test_identity_inner_collapses() {
        let t = Transform::pass_through(1, Transform::identity(2).unwrap(), 3).unwrap();
        assert!(t.is_identity());
        assert_eq!(t.source_dim(), 6);
    }

    #[test]
    fn test_affine_inner_expands_to_matrix() {
        let t = Transform::pass_through(1, Transform::scale(&[2.0]).unwrap(), 1).unwrap();
        assert_eq!(t, Transform::scale(&[1.0, 2.0, 1.0]).unwrap());
        assert_ulps_eq!(
            t.transform(&[3.0, 4.0, 5.0]).unwrap().as_slice(),
            [3.0, 8.0, 5.0].as_slice()
        );
    }

    #[test]
    fn test_nonlinear_inner_wrapped() {
        let t = Transform::pass_through(1, Transform::non_linear(Arc::new(CubeMap)).unwrap(), 1)
            .unwrap();
        assert!(matches!(t, Transform::PassThrough(_)));
        assert_eq!(t.source_dim(), 4);
        assert_ulps_eq!(
            t.transform(&[7.0, 2.0, 3.0, 9.0]).unwrap().as_slice(),
            [7.0, 8.0, 3.0, 9.0].as_slice()
        );
    }

    #[test]
    fn test_block_diagonal_derivative() {
        let t = Transform::pass_through(1, Transform::non_linear(Arc::new(CubeMap)).unwrap(), 1)
            .unwrap();
        let jac = t.derivative(&[7.0, 2.0, 3.0, 9.0]).unwrap();
        assert_ulps_eq!(jac[(0, 0)], 1.0);
        // d(x^3)/dx at 2.
        assert_ulps_eq!(jac[(1, 1)], 12.0);
        assert_ulps_eq!(jac[(2, 2)], 1.0);
        assert_ulps_eq!(jac[(3, 3)], 1.0);
        assert_ulps_eq!(jac[(1, 0)], 0.0);
        check_derivative(&t, &[7.0, 2.0, 3.0, 9.0]);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = Transform::pass_through(2, Transform::non_linear(Arc::new(CubeMap)).unwrap(), 0)
            .unwrap();
        check_roundtrip(&t);
    }

    #[test]
    fn test_dimension_changing_inner() {
        // Inner drops one axis: 2 -> 1.
        #[rustfmt::skip]
        let matrix = crate::matrix::Matrix::try_new(vec![
            1.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
        ], 3).unwrap();
        let inner = Transform::linear(matrix).unwrap();
        let t = Transform::pass_through(1, inner, 1).unwrap();
        assert_eq!(t.source_dim(), 4);
        assert_eq!(t.target_dim(), 3);
        assert_ulps_eq!(
            t.transform(&[5.0, 1.0, 2.0, 6.0]).unwrap().as_slice(),
            [5.0, 3.0, 6.0].as_slice()
        );
    }
}
