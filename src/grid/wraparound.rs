//! Periodic-axis reconciliation between a requested area and a base grid.
//!
//! A request expressed near the seam of a periodic axis (longitude wrapping
//! at the anti-meridian, typically) may sit a whole period away from the
//! interval the base grid covers in its continuous presentation. Before any
//! index arithmetic the request is shifted by a whole number of periods so
//! that it overlaps the base interval as much as possible.

/// Shift `[area_lo, area_hi]` by -period, 0 or +period and pick the shift
/// with the largest contiguous overlap against `[base_lo, base_hi]`.
///
/// Ties prefer the unshifted candidate, then the smaller shift magnitude.
/// Returns the shifted interval together with the whole-period multiple
/// that was applied.
pub(crate) fn reconcile_interval(
    base_lo: f64,
    base_hi: f64,
    area_lo: f64,
    area_hi: f64,
    period: f64,
) -> (f64, f64, i32) {
    debug_assert!(period > 0.0);
    let mut candidates: [(f64, i32); 3] = [(0.0, 0), (0.0, 0), (0.0, 0)];
    for (slot, k) in [0i32, -1, 1].into_iter().enumerate() {
        let lo = area_lo + f64::from(k) * period;
        let hi = area_hi + f64::from(k) * period;
        let overlap = (base_hi.min(hi) - base_lo.max(lo)).max(0.0);
        candidates[slot] = (overlap, k);
    }
    // Stable max: the candidate order already encodes the tie preference
    // (no shift first, then -1 before +1 by magnitude rule with equal
    // magnitudes resolved towards the smaller shift).
    let mut best = candidates[0];
    for cand in &candidates[1..] {
        let better = cand.0 > best.0
            || (cand.0 == best.0 && cand.1.abs() < best.1.abs())
            || (cand.0 == best.0 && cand.1.abs() == best.1.abs() && cand.1 < best.1);
        if better {
            best = *cand;
        }
    }
    let k = best.1;
    if k != 0 {
        log::debug!(
            "wraparound: shifting request [{area_lo}, {area_hi}] by {k} period(s) of {period} \
             to overlap base [{base_lo}, {base_hi}]"
        );
    }
    let shift = f64::from(k) * period;
    (area_lo + shift, area_hi + shift, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::init_logger;
    use approx::assert_relative_eq;

    #[test]
    fn test_no_shift_needed() {
        init_logger();
        // Continuous presentation of a wrapped [140, -179] longitude request
        // against a base covering [80, 280]: already overlapping.
        let (lo, hi, k) = reconcile_interval(80.0, 280.0, 140.0, 181.0, 360.0);
        assert_eq!(k, 0);
        assert_relative_eq!(lo, 140.0);
        assert_relative_eq!(hi, 181.0);
    }

    #[test]
    fn test_shift_up_one_period() {
        init_logger();
        // Request around -170 against a base presented as [80, 280]:
        // one period up lands it at [185, 195], inside the base.
        let (lo, hi, k) = reconcile_interval(80.0, 280.0, -175.0, -165.0, 360.0);
        assert_eq!(k, 1);
        assert_relative_eq!(lo, 185.0);
        assert_relative_eq!(hi, 195.0);
    }

    #[test]
    fn test_shift_down_one_period() {
        init_logger();
        let (lo, hi, k) = reconcile_interval(-180.0, -100.0, 200.0, 230.0, 360.0);
        assert_eq!(k, -1);
        assert_relative_eq!(lo, -160.0);
        assert_relative_eq!(hi, -130.0);
    }

    #[test]
    fn test_tie_prefers_unshifted() {
        init_logger();
        // The base spans two periods, so the request fits both unshifted
        // and one period up.
        let (lo, hi, k) = reconcile_interval(0.0, 720.0, 10.0, 20.0, 360.0);
        assert_eq!(k, 0);
        assert_relative_eq!(lo, 10.0);
        assert_relative_eq!(hi, 20.0);
    }

    #[test]
    fn test_no_overlap_anywhere_keeps_request() {
        init_logger();
        // Disjoint under every shift: the caller reports the disjoint
        // region, reconciliation just leaves the request alone.
        let (lo, hi, k) = reconcile_interval(0.0, 10.0, 50.0, 60.0, 360.0);
        assert_eq!(k, 0);
        assert_relative_eq!(lo, 50.0);
        assert_relative_eq!(hi, 60.0);
    }
}
