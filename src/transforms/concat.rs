use smallvec::smallvec;

use crate::ShortVec;
use crate::error::TransformError;
use crate::matrix::Matrix;
use crate::transforms::Transform;

/// Two or more transform steps applied in order.
///
/// Built through [`Transform::concatenate`], which guarantees the step list
/// is flat, free of identities, and never has two adjacent matrix-backed
/// steps (those are merged into one at construction).
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatenatedTransform {
    steps: Vec<Transform>,
    max_inner_dim: usize,
}

/// `first` followed by `second`, with nested concatenations flattened,
/// identities dropped, and adjacent matrix steps merged.
pub(super) fn concatenate(
    first: &Transform,
    second: &Transform,
) -> Result<Transform, TransformError> {
    if first.target_dim() != second.source_dim() {
        return Err(TransformError::DimensionMismatch {
            context: "concatenation",
            expected: first.target_dim(),
            actual: second.source_dim(),
        });
    }
    let source_dim = first.source_dim();

    let mut merged: Vec<Transform> = Vec::with_capacity(first.steps().len() + second.steps().len());
    for step in first.steps().iter().chain(second.steps()) {
        if step.is_identity() {
            continue;
        }
        let mut current = step.clone();
        while let Some(previous) = merged.last() {
            if !(previous.is_linear() && current.is_linear()) {
                break;
            }
            let previous_matrix = previous.matrix().expect("linear steps have a matrix");
            let current_matrix = current.matrix().expect("linear steps have a matrix");
            // `previous` runs first, so its matrix is applied from the right.
            current = Transform::linear(current_matrix.multiply(&previous_matrix)?)?;
            merged.pop();
            if current.is_identity() {
                break;
            }
        }
        if !current.is_identity() {
            merged.push(current);
        }
    }

    match merged.len() {
        0 => Transform::identity(source_dim),
        1 => Ok(merged.into_iter().next().expect("length checked")),
        _ => Ok(Transform::Concatenated(ConcatenatedTransform::from_steps(
            merged,
        ))),
    }
}

impl ConcatenatedTransform {
    fn from_steps(steps: Vec<Transform>) -> Self {
        debug_assert!(steps.len() >= 2);
        let max_inner_dim = steps
            .iter()
            .map(|s| s.source_dim().max(s.target_dim()))
            .max()
            .unwrap_or(0);
        Self {
            steps,
            max_inner_dim,
        }
    }

    pub fn steps(&self) -> &[Transform] {
        &self.steps
    }

    pub fn source_dim(&self) -> usize {
        self.steps
            .first()
            .map(|s| s.source_dim())
            .unwrap_or(0)
    }

    pub fn target_dim(&self) -> usize {
        self.steps
            .last()
            .map(|s| s.target_dim())
            .unwrap_or(0)
    }

    pub(super) fn apply_into(&self, pt: &[f64], out: &mut [f64]) -> Result<(), TransformError> {
        let mut buf0: ShortVec<f64> = smallvec![f64::NAN; self.max_inner_dim];
        let mut buf1: ShortVec<f64> = smallvec![f64::NAN; self.max_inner_dim];
        let last = self.steps.len() - 1;
        for (idx, step) in self.steps.iter().enumerate() {
            let in_dim = step.source_dim();
            let out_dim = step.target_dim();
            if idx == 0 {
                step.transform_into(pt, &mut buf1[..out_dim])?;
            } else if idx == last {
                step.transform_into(&buf0[..in_dim], out)?;
            } else {
                step.transform_into(&buf0[..in_dim], &mut buf1[..out_dim])?;
            }
            std::mem::swap(&mut buf0, &mut buf1);
        }
        Ok(())
    }

    /// Forward evaluation and chain-rule Jacobian in a single walk over the
    /// steps, reusing the intermediate points both need.
    pub(super) fn apply_with_derivative(
        &self,
        pt: &[f64],
    ) -> Result<(ShortVec<f64>, Matrix), TransformError> {
        let mut current: ShortVec<f64> = ShortVec::from_slice(pt);
        let mut jacobian: Option<Matrix> = None;
        for step in &self.steps {
            let step_jacobian = step.derivative(&current)?;
            jacobian = Some(match jacobian {
                None => step_jacobian,
                Some(accumulated) => step_jacobian.multiply(&accumulated)?,
            });
            let mut next: ShortVec<f64> = smallvec![f64::NAN; step.target_dim()];
            step.transform_into(&current, &mut next)?;
            current = next;
        }
        let jacobian = jacobian.expect("concatenation has at least two steps");
        Ok((current, jacobian))
    }

    pub(super) fn inverse(&self) -> Result<Transform, TransformError> {
        let mut result = Transform::identity(self.target_dim())?;
        for step in self.steps.iter().rev() {
            result = result.concatenate(&step.inverse()?)?;
        }
        Ok(result)
    }
}
