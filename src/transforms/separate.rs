use crate::ShortVec;
use crate::error::TransformError;
use crate::matrix::Matrix;
use crate::transforms::{PassThroughTransform, Transform};

impl Transform {
    /// Extract the sub-transform producing the given target dimensions,
    /// together with the source dimensions it reads (ascending).
    ///
    /// Duplicate and unsorted indices are tolerated. Matrix-backed
    /// transforms always separate; pass-throughs and concatenations
    /// separate when their pieces do. Anything else only separates when
    /// every target dimension is requested, in which case the transform is
    /// returned whole.
    pub fn separate(
        &self,
        target_dims: &[usize],
    ) -> Result<(Transform, ShortVec<usize>), TransformError> {
        if target_dims.is_empty() {
            return Err(TransformError::ZeroDimension);
        }
        let mut selection: ShortVec<usize> = ShortVec::from_slice(target_dims);
        selection.sort_unstable();
        selection.dedup();
        if let Some(&max) = selection.last() {
            if max >= self.target_dim() {
                return Err(TransformError::DimensionMismatch {
                    context: "separation target dimension",
                    expected: self.target_dim(),
                    actual: max,
                });
            }
        }
        if selection.len() == self.target_dim() {
            return Ok((self.clone(), (0..self.source_dim()).collect()));
        }
        match self {
            t if t.is_linear() => {
                let matrix = t.matrix().expect("linear transforms have a matrix");
                separate_linear(&matrix, &selection)
            }
            Self::PassThrough(p) => separate_pass_through(p, &selection),
            Self::Concatenated(c) => {
                let mut dims = selection;
                let mut parts: Vec<Transform> = Vec::with_capacity(c.steps().len());
                for step in c.steps().iter().rev() {
                    let (sub, sources) = step.separate(&dims)?;
                    parts.push(sub);
                    dims = sources;
                }
                let mut result = parts.pop().expect("concatenation has at least two steps");
                for part in parts.into_iter().rev() {
                    result = result.concatenate(&part)?;
                }
                Ok((result, dims))
            }
            _ => Err(TransformError::NotSeparable),
        }
    }
}

/// Keep the selected rows of the augmented matrix and the columns any of
/// them (or the weight row, if projective) reads.
fn separate_linear(
    matrix: &Matrix,
    rows: &[usize],
) -> Result<(Transform, ShortVec<usize>), TransformError> {
    let n = matrix.ncols() - 1;
    let m = matrix.nrows() - 1;
    let mut used = vec![false; n];
    for &r in rows {
        for (c, flag) in used.iter_mut().enumerate() {
            if matrix[(r, c)] != 0.0 {
                *flag = true;
            }
        }
    }
    if !matrix.is_affine() {
        for (c, flag) in used.iter_mut().enumerate() {
            if matrix[(m, c)] != 0.0 {
                *flag = true;
            }
        }
    }
    let sources: ShortVec<usize> = used
        .iter()
        .enumerate()
        .filter_map(|(c, &u)| u.then_some(c))
        .collect();
    if sources.is_empty() {
        // The selected rows are constants; there is no source space left.
        return Err(TransformError::NotSeparable);
    }
    let mut data = Vec::with_capacity((rows.len() + 1) * (sources.len() + 1));
    for &r in rows {
        for &c in &sources {
            data.push(matrix[(r, c)]);
        }
        data.push(matrix[(r, n)]);
    }
    for &c in &sources {
        data.push(matrix[(m, c)]);
    }
    data.push(matrix[(m, n)]);
    let sub = Transform::linear(Matrix::try_new(data, sources.len() + 1)?)?;
    Ok((sub, sources))
}

fn separate_pass_through(
    p: &PassThroughTransform,
    selection: &[usize],
) -> Result<(Transform, ShortVec<usize>), TransformError> {
    let leading = p.leading();
    let inner_src = p.inner().source_dim();
    let inner_tgt = p.inner().target_dim();

    let mut lead_sources: ShortVec<usize> = ShortVec::new();
    let mut inner_selection: ShortVec<usize> = ShortVec::new();
    let mut trail_sources: ShortVec<usize> = ShortVec::new();
    for &d in selection {
        if d < leading {
            lead_sources.push(d);
        } else if d < leading + inner_tgt {
            inner_selection.push(d - leading);
        } else {
            trail_sources.push(d - inner_tgt + inner_src);
        }
    }

    if inner_selection.is_empty() {
        // Only pass-through axes selected.
        let mut sources = lead_sources;
        sources.extend_from_slice(&trail_sources);
        return Ok((Transform::identity(sources.len())?, sources));
    }

    let (inner_sub, inner_sources) = p.inner().separate(&inner_selection)?;
    let sub = Transform::pass_through(lead_sources.len(), inner_sub, trail_sources.len())?;
    let mut sources = lead_sources;
    sources.extend(inner_sources.iter().map(|s| s + leading));
    sources.extend_from_slice(&trail_sources);
    Ok((sub, sources))
}
