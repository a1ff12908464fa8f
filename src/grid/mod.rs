//! Raster grid geometry: integer extents, anchored grid-to-world
//! transforms, and derivation of reduced or resampled grids.

mod derivation;
mod extent;
mod geometry;
mod wraparound;

pub use derivation::GridDerivation;
pub use extent::{AxisKind, GridExtent};
pub use geometry::{Anchor, GridGeometry, RoundingMode};

/// Relative tolerance for treating a fractional index as exact.
pub(crate) const INDEX_TOLERANCE: f64 = 1e-9;

/// Snap to the nearest integer when within tolerance, keeping index
/// arithmetic immune to accumulated floating-point noise.
pub(crate) fn snap(value: f64) -> f64 {
    let nearest = value.round();
    if (value - nearest).abs() <= INDEX_TOLERANCE * value.abs().max(1.0) {
        nearest
    } else {
        value
    }
}

/// Round a fractional index interval `[lo, hi)` to inclusive cell bounds.
/// A degenerate interval is clamped to a single cell, never inverted.
pub(crate) fn round_interval(lo: f64, hi: f64, mode: RoundingMode) -> (i64, i64) {
    let lo = snap(lo);
    let hi = snap(hi);
    let (low, high) = match mode {
        RoundingMode::Nearest => (lo.round(), hi.round() - 1.0),
        RoundingMode::Enclosing => (lo.floor(), hi.ceil() - 1.0),
        RoundingMode::Contained => (lo.ceil(), hi.floor() - 1.0),
    };
    let high = high.max(low);
    (low as i64, high as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap() {
        assert_eq!(snap(5.0 + 1e-12), 5.0);
        assert_eq!(snap(5.0 - 1e-12), 5.0);
        assert_eq!(snap(5.4), 5.4);
        // Tolerance is relative for large magnitudes.
        assert_eq!(snap(1e12 + 0.1), 1e12);
    }

    #[test]
    fn test_round_interval() {
        assert_eq!(round_interval(60.0, 101.0, RoundingMode::Nearest), (60, 100));
        assert_eq!(round_interval(0.3, 9.8, RoundingMode::Nearest), (0, 9));
        assert_eq!(round_interval(0.3, 9.8, RoundingMode::Enclosing), (0, 9));
        assert_eq!(round_interval(0.3, 9.8, RoundingMode::Contained), (1, 8));
        // A sub-cell interval keeps one cell.
        assert_eq!(round_interval(2.3, 2.6, RoundingMode::Nearest), (2, 2));
    }
}
