use crate::ShortVec;
use crate::crs::CoordinateReference;
use crate::error::{GridError, TransformError};
use crate::transforms::Transform;

/// Corner enumeration is exponential in the dimension; cap it well above any
/// practical grid.
const MAX_CORNER_DIMS: usize = 16;

/// Axis-aligned box in world coordinates, optionally tagged with the
/// coordinate reference its ordinates are expressed in.
///
/// On a periodic axis (longitude), `lower > upper` denotes a range that
/// wraps across the axis seam: `[140, -179]` covers 140..180 plus -180..-179.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    lower: ShortVec<f64>,
    upper: ShortVec<f64>,
    crs: Option<CoordinateReference>,
}

impl Envelope {
    /// Envelope without a coordinate reference. Bounds must be finite and
    /// `lower <= upper` on every axis.
    pub fn new(lower: &[f64], upper: &[f64]) -> Result<Self, GridError> {
        Self::build(lower, upper, None)
    }

    /// Envelope tagged with a coordinate reference. `lower > upper` is
    /// accepted only on periodic axes, where it denotes a wrapped range.
    pub fn with_crs(
        lower: &[f64],
        upper: &[f64],
        crs: CoordinateReference,
    ) -> Result<Self, GridError> {
        if crs.dimension() != lower.len() {
            return Err(GridError::DimensionMismatch {
                context: "envelope reference",
                expected: lower.len(),
                actual: crs.dimension(),
            });
        }
        Self::build(lower, upper, Some(crs))
    }

    fn build(
        lower: &[f64],
        upper: &[f64],
        crs: Option<CoordinateReference>,
    ) -> Result<Self, GridError> {
        if lower.len() != upper.len() {
            return Err(GridError::DimensionMismatch {
                context: "envelope bounds",
                expected: lower.len(),
                actual: upper.len(),
            });
        }
        if lower.is_empty() {
            return Err(GridError::MalformedEnvelope { dimension: 0 });
        }
        for (dim, (lo, hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(GridError::MalformedEnvelope { dimension: dim });
            }
            if lo > hi {
                let periodic = crs
                    .as_ref()
                    .and_then(|c| c.axis(dim))
                    .is_some_and(|a| a.is_periodic());
                if !periodic {
                    return Err(GridError::MalformedEnvelope { dimension: dim });
                }
            }
        }
        Ok(Self {
            lower: ShortVec::from_slice(lower),
            upper: ShortVec::from_slice(upper),
            crs,
        })
    }

    pub fn dimension(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self, dim: usize) -> f64 {
        self.lower[dim]
    }

    pub fn upper(&self, dim: usize) -> f64 {
        self.upper[dim]
    }

    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper
    }

    pub fn crs(&self) -> Option<&CoordinateReference> {
        self.crs.as_ref()
    }

    pub(crate) fn replace_crs(mut self, crs: Option<CoordinateReference>) -> Self {
        self.crs = crs;
        self
    }

    /// Whether the range on `dim` wraps across a periodic axis seam.
    pub fn wraps(&self, dim: usize) -> bool {
        self.lower[dim] > self.upper[dim]
    }

    fn period(&self, dim: usize) -> Option<f64> {
        self.crs.as_ref()?.axis(dim)?.period()
    }

    /// Extent of the range on `dim`, adding the axis period when wrapped.
    pub fn span(&self, dim: usize) -> f64 {
        let raw = self.upper[dim] - self.lower[dim];
        if self.wraps(dim) {
            // Construction guarantees a period exists on wrapped axes.
            raw + self.period(dim).unwrap_or(0.0)
        } else {
            raw
        }
    }

    /// Midpoint of the range on `dim`, re-normalized into the axis range
    /// when the envelope wraps.
    pub fn median(&self, dim: usize) -> f64 {
        let mid = self.lower[dim] + self.span(dim) / 2.0;
        if self.wraps(dim) {
            if let Some(period) = self.period(dim) {
                let (_, max) = self
                    .crs
                    .as_ref()
                    .and_then(|c| c.axis(dim))
                    .and_then(|a| a.range())
                    .expect("wrapped axes have a range");
                if mid > max {
                    return mid - period;
                }
            }
        }
        mid
    }

    /// Component-wise intersection, bounds taken as-is. Wrapped envelopes
    /// should be unwrapped to a continuous range first.
    pub fn intersect(&self, other: &Envelope) -> Result<Envelope, GridError> {
        if self.dimension() != other.dimension() {
            return Err(GridError::DimensionMismatch {
                context: "envelope intersection",
                expected: self.dimension(),
                actual: other.dimension(),
            });
        }
        let mut lower = ShortVec::with_capacity(self.dimension());
        let mut upper = ShortVec::with_capacity(self.dimension());
        for dim in 0..self.dimension() {
            let lo = self.lower[dim].max(other.lower[dim]);
            let hi = self.upper[dim].min(other.upper[dim]);
            if lo > hi {
                return Err(GridError::DisjointRegion { dimension: dim });
            }
            lower.push(lo);
            upper.push(hi);
        }
        Ok(Envelope {
            lower,
            upper,
            crs: self.crs.clone(),
        })
    }

    /// Border-inclusive containment. On wrapped axes the point may fall in
    /// either arm of the range.
    pub fn contains(&self, point: &[f64]) -> bool {
        if point.len() != self.dimension() {
            return false;
        }
        point.iter().enumerate().all(|(dim, &p)| {
            if self.wraps(dim) {
                p >= self.lower[dim] || p <= self.upper[dim]
            } else {
                p >= self.lower[dim] && p <= self.upper[dim]
            }
        })
    }

    /// Product of spans.
    pub fn volume(&self) -> f64 {
        (0..self.dimension()).map(|d| self.span(d)).product()
    }

    /// All `2^n` corner points.
    ///
    /// Bounds are taken as-is; unwrap wrapped envelopes first when the corner
    /// coordinates must be continuous.
    ///
    /// # Panics
    /// Panics when the envelope has 64 or more dimensions, where the corner
    /// count overflows the enumeration mask. [`Envelope::transformed`] rejects
    /// such envelopes with an error instead.
    pub fn corners(&self) -> impl Iterator<Item = ShortVec<f64>> + '_ {
        let n = self.dimension();
        assert!(n < 64, "corner enumeration needs dimension < 64");
        (0..(1_u64 << n)).map(move |mask| {
            (0..n)
                .map(|d| {
                    if mask & (1 << d) != 0 {
                        self.upper[d]
                    } else {
                        self.lower[d]
                    }
                })
                .collect()
        })
    }

    /// Image of this envelope under `transform`: every corner is transformed
    /// and the results reduced to per-axis bounds. The coordinate reference
    /// is dropped; the caller knows the target reference.
    pub fn transformed(&self, transform: &Transform) -> Result<Envelope, TransformError> {
        let n = self.dimension();
        if transform.source_dim() != n {
            return Err(TransformError::DimensionMismatch {
                context: "envelope transformation",
                expected: transform.source_dim(),
                actual: n,
            });
        }
        if n > MAX_CORNER_DIMS {
            return Err(TransformError::DimensionMismatch {
                context: "envelope corner enumeration",
                expected: MAX_CORNER_DIMS,
                actual: n,
            });
        }
        let out_dim = transform.target_dim();
        let mut lower: ShortVec<f64> = ShortVec::from_elem(f64::INFINITY, out_dim);
        let mut upper: ShortVec<f64> = ShortVec::from_elem(f64::NEG_INFINITY, out_dim);
        let mut buf: ShortVec<f64> = ShortVec::from_elem(f64::NAN, out_dim);
        for corner in self.corners() {
            transform.transform_into(&corner, &mut buf)?;
            for (dim, &v) in buf.iter().enumerate() {
                lower[dim] = lower[dim].min(v);
                upper[dim] = upper[dim].max(v);
            }
        }
        Ok(Envelope {
            lower,
            upper,
            crs: None,
        })
    }

    /// Continuous presentation of a possibly wrapped envelope: on each
    /// wrapped axis the upper bound is lifted by one period, so
    /// `lower <= upper` holds everywhere (at the cost of leaving the axis
    /// valid range).
    pub(crate) fn to_continuous(&self) -> Envelope {
        let mut out = self.clone();
        for dim in 0..out.dimension() {
            if out.wraps(dim) {
                if let Some(period) = out.period(dim) {
                    out.upper[dim] += period;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_ulps_eq;

    fn wgs84() -> CoordinateReference {
        CoordinateReference::geographic("WGS84")
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            Envelope::new(&[0.0, 0.0], &[1.0]),
            Err(GridError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            Envelope::new(&[2.0], &[1.0]),
            Err(GridError::MalformedEnvelope { dimension: 0 })
        ));
        assert!(matches!(
            Envelope::new(&[f64::NAN], &[1.0]),
            Err(GridError::MalformedEnvelope { .. })
        ));
    }

    #[test]
    fn test_wrap_requires_periodic_axis() {
        // Longitude may wrap, latitude may not.
        let ok = Envelope::with_crs(&[140.0, -90.0], &[-179.0, 90.0], wgs84());
        assert!(ok.is_ok());
        assert!(ok.unwrap().wraps(0));
        assert!(matches!(
            Envelope::with_crs(&[0.0, 50.0], &[10.0, -50.0], wgs84()),
            Err(GridError::MalformedEnvelope { dimension: 1 })
        ));
    }

    #[test]
    fn test_wraparound_span_and_median() {
        let env = Envelope::with_crs(&[140.0, -90.0], &[-179.0, 90.0], wgs84()).unwrap();
        assert_ulps_eq!(env.span(0), 41.0);
        assert_ulps_eq!(env.median(0), 160.5);
        assert_ulps_eq!(env.span(1), 180.0);

        // Median past the seam comes back into range.
        let env = Envelope::with_crs(&[170.0, -90.0], &[-150.0, 90.0], wgs84()).unwrap();
        assert_ulps_eq!(env.span(0), 40.0);
        assert_ulps_eq!(env.median(0), -170.0);
    }

    #[test]
    fn test_contains_wrapped() {
        let env = Envelope::with_crs(&[170.0, -90.0], &[-150.0, 90.0], wgs84()).unwrap();
        assert!(env.contains(&[175.0, 0.0]));
        assert!(env.contains(&[-160.0, 0.0]));
        assert!(!env.contains(&[0.0, 0.0]));
    }

    #[test]
    fn test_intersect() {
        let a = Envelope::new(&[0.0, 0.0], &[10.0, 10.0]).unwrap();
        let b = Envelope::new(&[5.0, -5.0], &[15.0, 5.0]).unwrap();
        let both = a.intersect(&b).unwrap();
        assert_eq!(both.lower_bounds(), &[5.0, 0.0]);
        assert_eq!(both.upper_bounds(), &[10.0, 5.0]);

        let c = Envelope::new(&[20.0, 0.0], &[30.0, 10.0]).unwrap();
        assert_eq!(
            a.intersect(&c),
            Err(GridError::DisjointRegion { dimension: 0 })
        );
    }

    #[test]
    fn test_corners() {
        let env = Envelope::new(&[0.0, 10.0], &[1.0, 20.0]).unwrap();
        let corners: Vec<_> = env.corners().collect();
        assert_eq!(corners.len(), 4);
        assert!(corners.iter().any(|c| c.as_slice() == [0.0, 10.0]));
        assert!(corners.iter().any(|c| c.as_slice() == [1.0, 20.0]));
    }

    #[test]
    #[should_panic(expected = "corner enumeration needs dimension < 64")]
    fn test_corners_refuses_huge_dimension() {
        let env = Envelope::new(&[0.0; 64], &[1.0; 64]).unwrap();
        let _ = env.corners();
    }

    #[test]
    fn test_to_continuous() {
        let env = Envelope::with_crs(&[140.0, -90.0], &[-179.0, 90.0], wgs84()).unwrap();
        let cont = env.to_continuous();
        assert_ulps_eq!(cont.upper(0), 181.0);
        assert_ulps_eq!(cont.lower(0), 140.0);
        assert_ulps_eq!(cont.upper(1), 90.0);
    }
}
