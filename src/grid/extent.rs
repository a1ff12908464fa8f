use crate::ShortVec;
use crate::error::GridError;

/// Role a grid dimension plays, carried as an optional label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Column,
    Row,
    Vertical,
    Time,
}

/// Inclusive integer index bounds of a raster: cells `low[d] ..= high[d]`
/// exist in dimension `d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridExtent {
    low: ShortVec<i64>,
    high: ShortVec<i64>,
    axes: Option<ShortVec<AxisKind>>,
}

impl GridExtent {
    pub fn new(low: &[i64], high: &[i64]) -> Result<Self, GridError> {
        if low.len() != high.len() || low.is_empty() {
            return Err(GridError::DimensionMismatch {
                context: "extent bounds",
                expected: low.len().max(1),
                actual: high.len(),
            });
        }
        for (dim, (&lo, &hi)) in low.iter().zip(high.iter()).enumerate() {
            if lo > hi {
                return Err(GridError::InvalidBounds {
                    dimension: dim,
                    low: lo,
                    high: hi,
                });
            }
        }
        Ok(Self {
            low: ShortVec::from_slice(low),
            high: ShortVec::from_slice(high),
            axes: None,
        })
    }

    /// Extent starting at index 0 with the given cell counts.
    pub fn of_size(size: &[u64]) -> Result<Self, GridError> {
        let mut high: ShortVec<i64> = ShortVec::with_capacity(size.len());
        for (dim, &n) in size.iter().enumerate() {
            if n == 0 {
                return Err(GridError::InvalidBounds {
                    dimension: dim,
                    low: 0,
                    high: -1,
                });
            }
            let hi = i64::try_from(n - 1).map_err(|_| GridError::Overflow)?;
            high.push(hi);
        }
        let low: ShortVec<i64> = ShortVec::from_elem(0, size.len());
        Self::new(&low, &high)
    }

    pub fn with_axes(mut self, axes: &[AxisKind]) -> Result<Self, GridError> {
        if axes.len() != self.dimension() {
            return Err(GridError::DimensionMismatch {
                context: "extent axis labels",
                expected: self.dimension(),
                actual: axes.len(),
            });
        }
        self.axes = Some(ShortVec::from_slice(axes));
        Ok(self)
    }

    pub fn dimension(&self) -> usize {
        self.low.len()
    }

    pub fn low(&self, dim: usize) -> i64 {
        self.low[dim]
    }

    pub fn high(&self, dim: usize) -> i64 {
        self.high[dim]
    }

    pub fn low_bounds(&self) -> &[i64] {
        &self.low
    }

    pub fn high_bounds(&self) -> &[i64] {
        &self.high
    }

    pub fn axis_kind(&self, dim: usize) -> Option<AxisKind> {
        self.axes.as_ref().map(|a| a[dim])
    }

    /// Number of cells along `dim`, saturating at `u64::MAX` for the
    /// full `i64` index range.
    pub fn size(&self, dim: usize) -> u64 {
        let count = self.high[dim] as i128 - self.low[dim] as i128 + 1;
        u64::try_from(count).unwrap_or(u64::MAX)
    }

    pub fn contains(&self, index: &[i64]) -> bool {
        index.len() == self.dimension()
            && index
                .iter()
                .enumerate()
                .all(|(d, &i)| self.low[d] <= i && i <= self.high[d])
    }

    /// Component-wise intersection, keeping this extent's axis labels.
    pub fn intersect(&self, other: &GridExtent) -> Result<GridExtent, GridError> {
        if self.dimension() != other.dimension() {
            return Err(GridError::DimensionMismatch {
                context: "extent intersection",
                expected: self.dimension(),
                actual: other.dimension(),
            });
        }
        let mut low = ShortVec::with_capacity(self.dimension());
        let mut high = ShortVec::with_capacity(self.dimension());
        for dim in 0..self.dimension() {
            let lo = self.low[dim].max(other.low[dim]);
            let hi = self.high[dim].min(other.high[dim]);
            if lo > hi {
                return Err(GridError::DisjointRegion { dimension: dim });
            }
            low.push(lo);
            high.push(hi);
        }
        Ok(GridExtent {
            low,
            high,
            axes: self.axes.clone(),
        })
    }

    /// Grow by `margins[d]` cells on both sides of each dimension, without
    /// clipping to any other bounds. Negative margins shrink.
    pub fn expanded(&self, margins: &[i64]) -> Result<GridExtent, GridError> {
        self.expanded_by(margins, margins)
    }

    /// Grow by `below[d]` cells under the low bound and `above[d]` cells
    /// over the high bound of each dimension, without clipping to any other
    /// bounds. Negative values shrink.
    pub fn expanded_by(&self, below: &[i64], above: &[i64]) -> Result<GridExtent, GridError> {
        for margins in [below, above] {
            if margins.len() != self.dimension() {
                return Err(GridError::DimensionMismatch {
                    context: "extent margins",
                    expected: self.dimension(),
                    actual: margins.len(),
                });
            }
        }
        let mut low = ShortVec::with_capacity(self.dimension());
        let mut high = ShortVec::with_capacity(self.dimension());
        for dim in 0..self.dimension() {
            low.push(
                self.low[dim]
                    .checked_sub(below[dim])
                    .ok_or(GridError::Overflow)?,
            );
            high.push(
                self.high[dim]
                    .checked_add(above[dim])
                    .ok_or(GridError::Overflow)?,
            );
        }
        let expanded = GridExtent::new(&low, &high)?;
        Ok(GridExtent {
            axes: self.axes.clone(),
            ..expanded
        })
    }

    /// Bounds comparison that ignores axis labels.
    pub fn bounds_equal(&self, other: &GridExtent) -> bool {
        self.low == other.low && self.high == other.high
    }

    /// Carry over another extent's axis labels, for extents rebuilt from
    /// raw bounds.
    pub(crate) fn with_axes_of(mut self, other: &GridExtent) -> Self {
        debug_assert_eq!(self.dimension(), other.dimension());
        self.axes = other.axes.clone();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(matches!(
            GridExtent::new(&[0, 0], &[5]),
            Err(GridError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            GridExtent::new(&[0, 4], &[5, 3]),
            Err(GridError::InvalidBounds {
                dimension: 1,
                low: 4,
                high: 3,
            })
        ));
        // A single cell is fine.
        assert!(GridExtent::new(&[7], &[7]).is_ok());
    }

    #[test]
    fn test_of_size() {
        let e = GridExtent::of_size(&[200, 180]).unwrap();
        assert_eq!(e.low_bounds(), &[0, 0]);
        assert_eq!(e.high_bounds(), &[199, 179]);
        assert_eq!(e.size(0), 200);
        assert!(matches!(
            GridExtent::of_size(&[10, 0]),
            Err(GridError::InvalidBounds { dimension: 1, .. })
        ));
    }

    #[test]
    fn test_size_and_contains() {
        let e = GridExtent::new(&[-5, 10], &[4, 10]).unwrap();
        assert_eq!(e.size(0), 10);
        assert_eq!(e.size(1), 1);
        assert!(e.contains(&[-5, 10]));
        assert!(e.contains(&[4, 10]));
        assert!(!e.contains(&[5, 10]));
        assert!(!e.contains(&[0]));

        // The full index range holds 2^64 cells, one more than u64 can count.
        let full = GridExtent::new(&[i64::MIN], &[i64::MAX]).unwrap();
        assert_eq!(full.size(0), u64::MAX);
    }

    #[test]
    fn test_intersect() {
        let a = GridExtent::new(&[0, 0], &[9, 19]).unwrap();
        let b = GridExtent::new(&[5, -3], &[15, 4]).unwrap();
        let both = a.intersect(&b).unwrap();
        assert_eq!(both.low_bounds(), &[5, 0]);
        assert_eq!(both.high_bounds(), &[9, 4]);

        let far = GridExtent::new(&[100, 0], &[120, 19]).unwrap();
        assert_eq!(
            a.intersect(&far),
            Err(GridError::DisjointRegion { dimension: 0 })
        );
    }

    #[test]
    fn test_expanded() {
        let e = GridExtent::new(&[0, 0], &[9, 19]).unwrap();
        let grown = e.expanded(&[2, 3]).unwrap();
        assert_eq!(grown.low_bounds(), &[-2, -3]);
        assert_eq!(grown.high_bounds(), &[11, 22]);

        let uneven = e.expanded_by(&[1, 0], &[0, 4]).unwrap();
        assert_eq!(uneven.low_bounds(), &[-1, 0]);
        assert_eq!(uneven.high_bounds(), &[9, 23]);

        // Shrinking below a single cell is invalid.
        assert!(matches!(
            e.expanded(&[-7, 0]),
            Err(GridError::InvalidBounds { .. })
        ));
        let max = GridExtent::new(&[0], &[i64::MAX]).unwrap();
        assert_eq!(max.expanded(&[1]), Err(GridError::Overflow));
    }

    #[test]
    fn test_axis_labels() {
        let e = GridExtent::new(&[0, 0], &[9, 19])
            .unwrap()
            .with_axes(&[AxisKind::Column, AxisKind::Row])
            .unwrap();
        assert_eq!(e.axis_kind(0), Some(AxisKind::Column));
        assert_eq!(e.axis_kind(1), Some(AxisKind::Row));

        let unlabelled = GridExtent::new(&[0, 0], &[9, 19]).unwrap();
        assert_eq!(unlabelled.axis_kind(0), None);
        assert!(e.bounds_equal(&unlabelled));
        assert_ne!(e, unlabelled);

        assert!(matches!(
            GridExtent::new(&[0, 0], &[9, 19])
                .unwrap()
                .with_axes(&[AxisKind::Column]),
            Err(GridError::DimensionMismatch { .. })
        ));
    }
}
