use crate::envelope::Envelope;
use crate::error::TransformError;
use crate::transforms::Transform;

/// A global transform overridden by more accurate ones inside given regions
/// of the source space.
///
/// Regions must be pairwise nested or disjoint (borders may touch), and are
/// kept sorted by ascending volume, so the first region containing a point
/// is the most specific one.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecializedTransform {
    global: Box<Transform>,
    regions: Vec<(Envelope, Transform)>,
}

pub(super) fn specialized(
    global: Transform,
    overrides: Vec<(Envelope, Transform)>,
) -> Result<Transform, TransformError> {
    if overrides.is_empty() {
        return Ok(global);
    }
    for (region, sub) in &overrides {
        if region.dimension() != global.source_dim() {
            return Err(TransformError::DimensionMismatch {
                context: "specialization region",
                expected: global.source_dim(),
                actual: region.dimension(),
            });
        }
        if sub.source_dim() != global.source_dim() || sub.target_dim() != global.target_dim() {
            return Err(TransformError::DimensionMismatch {
                context: "specialization sub-transform",
                expected: global.source_dim(),
                actual: sub.source_dim(),
            });
        }
    }
    for (i, (a, _)) in overrides.iter().enumerate() {
        for (b, _) in &overrides[i + 1..] {
            if !nested_or_disjoint(a, b) {
                return Err(TransformError::OverlappingRegions);
            }
        }
    }
    let mut regions = overrides;
    regions.sort_by(|(a, _), (b, _)| a.volume().total_cmp(&b.volume()));
    Ok(Transform::Specialized(SpecializedTransform {
        global: Box::new(global),
        regions,
    }))
}

fn contains_box(outer: &Envelope, inner: &Envelope) -> bool {
    (0..outer.dimension())
        .all(|d| outer.lower(d) <= inner.lower(d) && inner.upper(d) <= outer.upper(d))
}

fn interiors_disjoint(a: &Envelope, b: &Envelope) -> bool {
    (0..a.dimension()).any(|d| a.upper(d) <= b.lower(d) || b.upper(d) <= a.lower(d))
}

/// Valid region pairs either nest strictly or have disjoint interiors.
/// Partial overlaps and duplicates would make the lookup ambiguous.
fn nested_or_disjoint(a: &Envelope, b: &Envelope) -> bool {
    let a_in_b = contains_box(b, a);
    let b_in_a = contains_box(a, b);
    (a_in_b != b_in_a) || (!a_in_b && interiors_disjoint(a, b))
}

impl SpecializedTransform {
    pub fn global(&self) -> &Transform {
        &self.global
    }

    /// Override regions, most specific first.
    pub fn regions(&self) -> &[(Envelope, Transform)] {
        &self.regions
    }

    pub fn source_dim(&self) -> usize {
        self.global.source_dim()
    }

    pub fn target_dim(&self) -> usize {
        self.global.target_dim()
    }

    /// The transform governing `pt`: the smallest region containing it, or
    /// the global transform when none does.
    pub(super) fn select(&self, pt: &[f64]) -> &Transform {
        self.regions
            .iter()
            .find(|(region, _)| region.contains(pt))
            .map(|(_, sub)| sub)
            .unwrap_or(&self.global)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_ulps_eq;

    use super::*;

    fn region(lower: &[f64], upper: &[f64]) -> Envelope {
        Envelope::new(lower, upper).unwrap()
    }

    fn make_transform() -> Transform {
        let global = Transform::scale(&[2.0, 2.0]).unwrap();
        let coarse = Transform::scale(&[3.0, 3.0]).unwrap();
        let fine = Transform::scale(&[5.0, 5.0]).unwrap();
        Transform::specialized(
            global,
            vec![
                (region(&[0.0, 0.0], &[10.0, 10.0]), coarse),
                (region(&[2.0, 2.0], &[4.0, 4.0]), fine),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_empty_overrides_is_global() {
        let global = Transform::scale(&[2.0, 2.0]).unwrap();
        let t = Transform::specialized(global.clone(), vec![]).unwrap();
        assert_eq!(t, global);
    }

    #[test]
    fn test_most_specific_region_wins() {
        let t = make_transform();
        // Inside the nested fine region.
        assert_ulps_eq!(
            t.transform(&[3.0, 3.0]).unwrap().as_slice(),
            [15.0, 15.0].as_slice()
        );
        // Inside the coarse region only.
        assert_ulps_eq!(
            t.transform(&[8.0, 8.0]).unwrap().as_slice(),
            [24.0, 24.0].as_slice()
        );
        // Outside every region.
        assert_ulps_eq!(
            t.transform(&[20.0, 20.0]).unwrap().as_slice(),
            [40.0, 40.0].as_slice()
        );
    }

    #[test]
    fn test_region_borders_included() {
        let t = make_transform();
        assert_ulps_eq!(
            t.transform(&[4.0, 4.0]).unwrap().as_slice(),
            [20.0, 20.0].as_slice()
        );
    }

    #[test]
    fn test_derivative_follows_selection() {
        let t = make_transform();
        assert_ulps_eq!(t.derivative(&[3.0, 3.0]).unwrap()[(0, 0)], 5.0);
        assert_ulps_eq!(t.derivative(&[20.0, 20.0]).unwrap()[(0, 0)], 2.0);
    }

    #[test]
    fn test_partial_overlap_rejected() {
        let global = Transform::scale(&[2.0, 2.0]).unwrap();
        let sub = Transform::scale(&[3.0, 3.0]).unwrap();
        let result = Transform::specialized(
            global,
            vec![
                (region(&[0.0, 0.0], &[5.0, 5.0]), sub.clone()),
                (region(&[3.0, 3.0], &[8.0, 8.0]), sub),
            ],
        );
        assert_eq!(result, Err(TransformError::OverlappingRegions));
    }

    #[test]
    fn test_duplicate_regions_rejected() {
        let global = Transform::scale(&[2.0, 2.0]).unwrap();
        let sub = Transform::scale(&[3.0, 3.0]).unwrap();
        let result = Transform::specialized(
            global,
            vec![
                (region(&[0.0, 0.0], &[5.0, 5.0]), sub.clone()),
                (region(&[0.0, 0.0], &[5.0, 5.0]), sub),
            ],
        );
        assert_eq!(result, Err(TransformError::OverlappingRegions));
    }

    #[test]
    fn test_touching_regions_allowed() {
        let global = Transform::scale(&[2.0, 2.0]).unwrap();
        let sub = Transform::scale(&[3.0, 3.0]).unwrap();
        let result = Transform::specialized(
            global,
            vec![
                (region(&[0.0, 0.0], &[5.0, 5.0]), sub.clone()),
                (region(&[5.0, 0.0], &[10.0, 5.0]), sub),
            ],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_region_dimension_mismatch() {
        let global = Transform::scale(&[2.0, 2.0]).unwrap();
        let sub = Transform::scale(&[3.0, 3.0]).unwrap();
        let result = Transform::specialized(
            global,
            vec![(Envelope::new(&[0.0], &[5.0]).unwrap(), sub)],
        );
        assert!(matches!(
            result,
            Err(TransformError::DimensionMismatch {
                context: "specialization region",
                ..
            })
        ));
    }

    #[test]
    fn test_not_invertible() {
        assert_eq!(
            make_transform().inverse(),
            Err(TransformError::NotInvertible)
        );
    }
}
