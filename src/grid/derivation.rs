use crate::ShortVec;
use crate::crs::{CoordinateReference, TransformResolver};
use crate::envelope::Envelope;
use crate::error::{GridError, TransformError};
use crate::matrix::Matrix;
use crate::transforms::Transform;

use super::extent::GridExtent;
use super::geometry::{Anchor, GridGeometry, RoundingMode};
use super::wraparound::reconcile_interval;
use super::{INDEX_TOLERANCE, round_interval, snap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Config,
    Subgridded,
    Sliced,
}

/// Single-use accumulator deriving a reduced or resampled geometry from a
/// base [`GridGeometry`].
///
/// Configuration calls ([`rounding`](Self::rounding),
/// [`margin`](Self::margin), [`resolver`](Self::resolver)) come first, then
/// at most one [`subgrid`](Self::subgrid) or
/// [`subgrid_from`](Self::subgrid_from) followed by at most one
/// [`slice`](Self::slice). The terminal [`build`](Self::build) or
/// [`intersection`](Self::intersection) consumes the derivation, so it
/// cannot be reused. Out-of-order calls are programming errors and panic.
pub struct GridDerivation<'a> {
    base: &'a GridGeometry,
    stage: Stage,
    rounding: RoundingMode,
    margins: Option<ShortVec<i64>>,
    margin_applied: bool,
    resolver: Option<&'a dyn TransformResolver>,
    extent: Option<GridExtent>,
    intersected: Option<GridExtent>,
    subsampling: ShortVec<u64>,
    offsets: ShortVec<i64>,
    pending_envelope: Option<Envelope>,
}

impl std::fmt::Debug for GridDerivation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridDerivation")
            .field("stage", &self.stage)
            .field("rounding", &self.rounding)
            .field("margins", &self.margins)
            .field("extent", &self.extent)
            .field("intersected", &self.intersected)
            .field("subsampling", &self.subsampling)
            .field("offsets", &self.offsets)
            .finish_non_exhaustive()
    }
}

impl<'a> GridDerivation<'a> {
    pub(crate) fn new(base: &'a GridGeometry) -> Self {
        let dim = base.dimension();
        Self {
            base,
            stage: Stage::Config,
            rounding: RoundingMode::default(),
            margins: None,
            margin_applied: false,
            resolver: None,
            extent: None,
            intersected: None,
            subsampling: ShortVec::from_elem(1, dim),
            offsets: ShortVec::from_elem(0, dim),
            pending_envelope: None,
        }
    }

    /// Rounding policy for fractional index bounds, [`RoundingMode::Nearest`]
    /// by default.
    ///
    /// # Panics
    /// Panics if called after `subgrid` or `slice`.
    pub fn rounding(mut self, mode: RoundingMode) -> Self {
        self.expect_config("rounding");
        self.rounding = mode;
        self
    }

    /// Grow the result extent by `extra[d]` cells on both sides of each
    /// dimension, without clipping to the base extent. With a subgrid
    /// request the margin applies after intersection and subsampling, in
    /// result-grid cells.
    ///
    /// # Panics
    /// Panics if called after `subgrid` or `slice`, or if `extra` does not
    /// match the grid dimension.
    pub fn margin(mut self, extra: &[i64]) -> Self {
        self.expect_config("margin");
        assert_eq!(
            extra.len(),
            self.base.dimension(),
            "margin length must match the grid dimension"
        );
        self.margins = Some(ShortVec::from_slice(extra));
        self
    }

    /// Coordinate-operation resolver consulted when a request is expressed
    /// in a reference different from the base grid's.
    ///
    /// # Panics
    /// Panics if called after `subgrid` or `slice`.
    pub fn resolver(mut self, resolver: &'a dyn TransformResolver) -> Self {
        self.expect_config("resolver");
        self.resolver = Some(resolver);
        self
    }

    fn expect_config(&self, what: &str) {
        assert!(
            self.stage == Stage::Config,
            "{what} must be configured before subgrid and slice"
        );
    }

    /// Integer stride per dimension applied by a resolution request, all
    /// ones when no subsampling took place.
    pub fn subsampling(&self) -> &[u64] {
        &self.subsampling
    }

    /// Base-grid cell offset of each derived cell origin under subsampling.
    pub fn subsampling_offsets(&self) -> &[i64] {
        &self.offsets
    }

    /// Constrain the derivation to a world-space area of interest,
    /// optionally requesting coarser resolutions (world units per cell, one
    /// entry per world axis of the area's reference).
    ///
    /// The area may be expressed in another reference (converted through
    /// the configured resolver), may wrap around periodic axes, and may
    /// have fewer dimensions than the grid, in which case it constrains the
    /// leading world axes and the remaining dimensions keep their full
    /// range.
    ///
    /// Fails with [`GridError::DisjointRegion`] when the area does not
    /// intersect the base domain.
    ///
    /// # Panics
    /// Panics if a subgrid or slice request was already made.
    pub fn subgrid(
        self,
        area_of_interest: &Envelope,
        resolutions: Option<&[f64]>,
    ) -> Result<Self, GridError> {
        assert!(
            self.stage == Stage::Config,
            "only one subgrid request per derivation, before any slice"
        );
        let base = self.base;
        let (area, request) = self.convert_area(area_of_interest, resolutions)?;
        let area = self.reconcile(&area)?;

        if base.extent().is_none() || base.grid_to_crs(Anchor::CellCorner).is_none() {
            return self.subgrid_envelope_only(area);
        }

        let base_extent = base.require_extent()?;
        let corner = base.require_corner_to_crs()?;
        let world_dim = corner.target_dim();
        let grid_dim = base_extent.dimension();

        let mut flo: ShortVec<f64> = base_extent.low_bounds().iter().map(|&v| v as f64).collect();
        let mut fhi: ShortVec<f64> = base_extent
            .high_bounds()
            .iter()
            .map(|&v| v as f64 + 1.0)
            .collect();

        let (sub, sources): (Transform, ShortVec<usize>) = if area.dimension() == world_dim {
            (corner.clone(), (0..grid_dim).collect())
        } else if area.dimension() < world_dim {
            let targets: ShortVec<usize> = (0..area.dimension()).collect();
            let (sub, sources) = corner.separate(&targets)?;
            (sub, sources)
        } else {
            return Err(GridError::DimensionMismatch {
                context: "area of interest",
                expected: world_dim,
                actual: area.dimension(),
            });
        };
        let center: ShortVec<f64> = sources
            .iter()
            .map(|&d| (base_extent.low(d) as f64 + base_extent.high(d) as f64 + 1.0) / 2.0)
            .collect();
        let map = InverseMap::of(&sub, &center)?;
        let (lo, hi) = fractional_bounds(&area, &map)?;
        for (i, &d) in sources.iter().enumerate() {
            flo[d] = lo[i];
            fhi[d] = hi[i];
        }

        // A lower-dimensional request exempts the unconstrained axes from
        // subsampling.
        let request = request.map(|mut r| {
            if r.len() == area.dimension() && r.len() < world_dim {
                r.resize(world_dim, 0.0);
            }
            r
        });
        self.finish_subgrid(&flo, &fhi, request.as_deref())
    }

    /// Constrain the derivation by another grid geometry, taking its
    /// envelope, extent and resolution as the request.
    ///
    /// When both geometries carry an extent and transform in the same
    /// reference, the request extent is mapped directly between the two
    /// index spaces; otherwise this behaves like
    /// [`subgrid`](Self::subgrid) on the other geometry's envelope. Either
    /// way periodic axes are reconciled first.
    ///
    /// # Panics
    /// Panics if a subgrid or slice request was already made.
    pub fn subgrid_from(self, other: &GridGeometry) -> Result<Self, GridError> {
        assert!(
            self.stage == Stage::Config,
            "only one subgrid request per derivation, before any slice"
        );
        let base = self.base;
        let same_crs = match (base.crs(), other.crs()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        // The index fast path needs complete grids meeting in one world
        // space; a lower-dimensional request goes through its envelope.
        let full_grids = match (
            base.grid_to_crs(Anchor::CellCorner),
            other.grid_to_crs(Anchor::CellCorner),
        ) {
            (Some(a), Some(b)) => {
                a.target_dim() == b.target_dim()
                    && base.extent().is_some()
                    && other.extent().is_some()
            }
            _ => false,
        };
        if same_crs && full_grids {
            return self.subgrid_indices(other);
        }
        let area = other.require_envelope()?.clone();
        self.subgrid(&area, other.resolution())
    }

    /// Collapse the axes specified in `position` to the single cell
    /// containing that coordinate; NaN entries keep their axes intact. A
    /// coordinate on a cell boundary resolves to the cell whose inclusive
    /// lower edge it is, except at the exclusive top edge of the grid,
    /// which resolves to the last cell.
    ///
    /// # Panics
    /// Panics if a slice request was already made.
    pub fn slice(
        mut self,
        position: &[f64],
        crs: Option<&CoordinateReference>,
    ) -> Result<Self, GridError> {
        assert!(
            self.stage != Stage::Sliced,
            "only one slice request per derivation"
        );
        let base = self.base;
        let base_extent = base.require_extent()?;
        let corner = base.require_corner_to_crs()?;
        if corner.source_dim() != corner.target_dim() {
            return Err(GridError::DimensionMismatch {
                context: "slice position",
                expected: corner.source_dim(),
                actual: corner.target_dim(),
            });
        }
        let world_dim = corner.target_dim();

        let kept: ShortVec<bool> = position.iter().map(|v| v.is_nan()).collect();
        let mut world: ShortVec<f64> = ShortVec::from_slice(position);

        if let (Some(from), Some(to)) = (crs, base.crs()) {
            if from != to {
                let resolver = self
                    .resolver
                    .ok_or(GridError::Undefined("coordinate operation resolver"))?;
                let ops = resolver.resolve(from, to, base.envelope())?;
                if ops.source_dim() != ops.target_dim() {
                    return Err(GridError::DimensionMismatch {
                        context: "slice conversion",
                        expected: ops.source_dim(),
                        actual: ops.target_dim(),
                    });
                }
                if world.len() != ops.source_dim() {
                    return Err(GridError::DimensionMismatch {
                        context: "slice position",
                        expected: ops.source_dim(),
                        actual: world.len(),
                    });
                }
                // Unspecified axes are seeded from the base envelope pulled
                // back into the position's reference, so the operation can
                // evaluate; they stay unspecified afterwards.
                if kept.iter().any(|&k| k) {
                    let seed = ops
                        .inverse()?
                        .transform(&envelope_median(base.require_envelope()?))?;
                    for (v, s) in world.iter_mut().zip(seed.iter()) {
                        if v.is_nan() {
                            *v = *s;
                        }
                    }
                }
                world = ops.transform(&world)?;
            }
        }
        if world.len() != world_dim {
            return Err(GridError::DimensionMismatch {
                context: "slice position",
                expected: world_dim,
                actual: world.len(),
            });
        }

        let env_cont = base.envelope().map(|e| e.to_continuous());
        for d in 0..world_dim {
            if world[d].is_nan() {
                let env = env_cont.as_ref().ok_or(GridError::Undefined("envelope"))?;
                world[d] = env.median(d);
            }
        }

        // A coordinate outside the base interval on a periodic axis is
        // pulled in by a whole period when that lands it inside.
        if let (Some(crs), Some(env)) = (base.crs(), env_cont.as_ref()) {
            for d in 0..world_dim.min(env.dimension()) {
                let Some(period) = crs.axis(d).and_then(|a| a.period()) else {
                    continue;
                };
                let tol = period * INDEX_TOLERANCE;
                if world[d] >= env.lower(d) - tol && world[d] <= env.upper(d) + tol {
                    continue;
                }
                for k in [-1.0, 1.0] {
                    let shifted = world[d] + k * period;
                    if shifted >= env.lower(d) - tol && shifted <= env.upper(d) + tol {
                        log::debug!(
                            "wraparound: slicing at {shifted} instead of {} on axis {d}",
                            world[d]
                        );
                        world[d] = shifted;
                        break;
                    }
                }
            }
        }

        let map = InverseMap::of(corner, &extent_center(base_extent))?;
        let indices = map.apply(&world)?;

        let current = match self.extent.take() {
            Some(extent) => extent,
            None => base_extent.clone(),
        };
        let current = self.apply_margin(current)?;
        let mut low: ShortVec<i64> = ShortVec::from_slice(current.low_bounds());
        let mut high: ShortVec<i64> = ShortVec::from_slice(current.high_bounds());
        for d in 0..current.dimension() {
            if kept[d] {
                continue;
            }
            let s = self.subsampling[d] as f64;
            let r = self.offsets[d] as f64;
            let fraction = snap((indices[d] - r) / s);
            let mut cell = fraction.floor() as i64;
            // The exclusive upper edge belongs to the last cell.
            if cell == high[d] + 1 && fraction == cell as f64 {
                cell = high[d];
            }
            if cell < low[d] || cell > high[d] {
                return Err(GridError::DisjointRegion { dimension: d });
            }
            low[d] = cell;
            high[d] = cell;
        }
        // Mirror the collapse on the base-cell view.
        if let Some(snapshot) = self.intersected.take() {
            let mut lo: ShortVec<i64> = ShortVec::from_slice(snapshot.low_bounds());
            let mut hi: ShortVec<i64> = ShortVec::from_slice(snapshot.high_bounds());
            for d in 0..snapshot.dimension() {
                if kept[d] {
                    continue;
                }
                let cell = (snap(indices[d]).floor() as i64).clamp(lo[d], hi[d]);
                lo[d] = cell;
                hi[d] = cell;
            }
            self.intersected = Some(GridExtent::new(&lo, &hi)?.with_axes_of(&snapshot));
        }
        let sliced = GridExtent::new(&low, &high)?.with_axes_of(&current);
        self.extent = Some(sliced);
        self.stage = Stage::Sliced;
        Ok(self)
    }

    /// Finalize all pending operations and return the derived geometry.
    pub fn build(mut self) -> Result<GridGeometry, GridError> {
        if let Some(envelope) = self.pending_envelope.take() {
            return Ok(GridGeometry::envelope_only(envelope));
        }
        let base = self.base;
        if base.extent().is_none() && self.extent.is_none() {
            return Ok(base.clone());
        }
        let extent = match self.extent.take() {
            Some(extent) => extent,
            None => base.require_extent()?.clone(),
        };
        let extent = self.apply_margin(extent)?;
        let corner = match base.grid_to_crs(Anchor::CellCorner) {
            Some(corner) => Some(self.derived_corner(corner)?),
            None => None,
        };
        Ok(GridGeometry::assemble(
            Some(extent),
            corner,
            base.crs().cloned(),
        ))
    }

    /// Finalize returning only the intersected extent, in base-grid cells:
    /// margins are included but subsampling is not applied.
    pub fn intersection(mut self) -> Result<GridExtent, GridError> {
        if let Some(extent) = self.intersected.take() {
            return Ok(extent);
        }
        let extent = match self.extent.take() {
            Some(extent) => extent,
            None => self.base.require_extent()?.clone(),
        };
        self.apply_margin(extent)
    }

    fn subgrid_envelope_only(mut self, area: Envelope) -> Result<Self, GridError> {
        let base_env = self.base.require_envelope()?.to_continuous();
        if area.dimension() != base_env.dimension() {
            return Err(GridError::DimensionMismatch {
                context: "area of interest",
                expected: base_env.dimension(),
                actual: area.dimension(),
            });
        }
        self.pending_envelope = Some(base_env.intersect(&area)?);
        self.stage = Stage::Subgridded;
        Ok(self)
    }

    fn subgrid_indices(self, other: &GridGeometry) -> Result<Self, GridError> {
        let base = self.base;
        let base_extent = base.require_extent()?;
        let corner = base.require_corner_to_crs()?;
        let other_extent = other.require_extent()?;
        let other_corner = other.require_corner_to_crs()?;
        if other_corner.target_dim() != corner.target_dim() {
            return Err(GridError::DimensionMismatch {
                context: "grid request",
                expected: corner.target_dim(),
                actual: other_corner.target_dim(),
            });
        }

        // Bring the request onto the base world presentation when a
        // periodic axis puts the two a whole period apart.
        let mut bridge = other_corner.clone();
        if let (Some(crs), Some(base_env), Some(other_env)) =
            (base.crs(), base.envelope(), other.envelope())
        {
            let base_cont = base_env.to_continuous();
            let other_cont = other_env.to_continuous();
            let world_dim = corner.target_dim();
            let mut shift: ShortVec<f64> = ShortVec::from_elem(0.0, world_dim);
            let mut shifted = false;
            let dims = world_dim
                .min(base_cont.dimension())
                .min(other_cont.dimension());
            for dim in 0..dims {
                let Some(period) = crs.axis(dim).and_then(|a| a.period()) else {
                    continue;
                };
                let (_, _, k) = reconcile_interval(
                    base_cont.lower(dim),
                    base_cont.upper(dim),
                    other_cont.lower(dim),
                    other_cont.upper(dim),
                    period,
                );
                if k != 0 {
                    shift[dim] = f64::from(k) * period;
                    shifted = true;
                }
            }
            if shifted {
                bridge = bridge.concatenate(&Transform::translation(&shift)?)?;
            }
        }

        let lower: ShortVec<f64> = other_extent.low_bounds().iter().map(|&v| v as f64).collect();
        let upper: ShortVec<f64> = other_extent
            .high_bounds()
            .iter()
            .map(|&v| v as f64 + 1.0)
            .collect();
        let index_box = Envelope::new(&lower, &upper)?;

        let map = InverseMap::of(corner, &extent_center(base_extent))?;
        let (flo, fhi) = match &map {
            InverseMap::Exact(inverse) => {
                let through = bridge.concatenate(inverse)?;
                let frac = index_box.transformed(&through)?;
                (
                    ShortVec::from_slice(frac.lower_bounds()),
                    ShortVec::from_slice(frac.upper_bounds()),
                )
            }
            InverseMap::Linearized { .. } => {
                let world_box = index_box.transformed(&bridge)?;
                fractional_bounds(&world_box, &map)?
            }
        };
        self.finish_subgrid(&flo, &fhi, other.resolution())
    }

    fn finish_subgrid(
        mut self,
        flo: &[f64],
        fhi: &[f64],
        resolutions: Option<&[f64]>,
    ) -> Result<Self, GridError> {
        let base_extent = self.base.require_extent()?;
        let grid_dim = base_extent.dimension();
        let mut low: ShortVec<i64> = ShortVec::with_capacity(grid_dim);
        let mut high: ShortVec<i64> = ShortVec::with_capacity(grid_dim);
        for d in 0..grid_dim {
            let (lo, hi) = round_interval(flo[d], fhi[d], self.rounding);
            low.push(lo);
            high.push(hi);
        }
        let requested = GridExtent::new(&low, &high)?;
        let mut result = base_extent.intersect(&requested)?;
        log::debug!(
            "subgrid: intersected to {:?}..={:?}",
            result.low_bounds(),
            result.high_bounds()
        );
        // Kept in base-grid cells for `intersection`, margins included but
        // subsampling not applied.
        self.intersected = Some(self.margined(result.clone())?);
        if let Some(request) = resolutions {
            let factors = self.subsampling_factors(request)?;
            if factors.iter().any(|&s| s > 1) {
                log::debug!("subgrid: subsampling by {factors:?}");
                result = self.rebase(result, &factors)?;
            }
        }
        let result = self.apply_margin(result)?;
        self.extent = Some(result);
        self.stage = Stage::Subgridded;
        Ok(self)
    }

    /// Convert a foreign-reference area and resolution request into the
    /// base reference.
    fn convert_area(
        &self,
        area: &Envelope,
        resolutions: Option<&[f64]>,
    ) -> Result<(Envelope, Option<ShortVec<f64>>), GridError> {
        let base = self.base;
        let mut request: Option<ShortVec<f64>> = resolutions.map(ShortVec::from_slice);
        let (Some(from), Some(to)) = (area.crs(), base.crs()) else {
            return Ok((area.clone(), request));
        };
        if from == to {
            return Ok((area.clone(), request));
        }
        let resolver = self
            .resolver
            .ok_or(GridError::Undefined("coordinate operation resolver"))?;
        let ops = resolver.resolve(from, to, Some(area))?;
        if let Some(request) = &mut request {
            if request.len() != ops.source_dim() {
                return Err(GridError::DimensionMismatch {
                    context: "requested resolution",
                    expected: ops.source_dim(),
                    actual: request.len(),
                });
            }
            // Resolution lengths convert through the operation's local
            // linearization at the area middle.
            let jacobian = ops.derivative(&envelope_median(area))?;
            let mut converted: ShortVec<f64> = ShortVec::with_capacity(jacobian.nrows());
            for r in 0..jacobian.nrows() {
                let length = jacobian
                    .row(r)
                    .iter()
                    .zip(request.iter())
                    .map(|(j, step)| (j * step).powi(2))
                    .sum::<f64>()
                    .sqrt();
                converted.push(length);
            }
            *request = converted;
        }
        let converted = area
            .to_continuous()
            .transformed(&ops)?
            .replace_crs(Some(to.clone()));
        Ok((converted, request))
    }

    /// Unwrap the area to a continuous range and shift it by whole periods
    /// onto the base envelope where periodic axes allow.
    fn reconcile(&self, area: &Envelope) -> Result<Envelope, GridError> {
        let base = self.base;
        let area_cont = area.to_continuous();
        let (Some(crs), Some(base_env)) = (base.crs(), base.envelope()) else {
            return Ok(area_cont);
        };
        let base_cont = base_env.to_continuous();
        let mut lower: ShortVec<f64> = ShortVec::from_slice(area_cont.lower_bounds());
        let mut upper: ShortVec<f64> = ShortVec::from_slice(area_cont.upper_bounds());
        let dims = area_cont.dimension().min(base_cont.dimension());
        let mut changed = false;
        for dim in 0..dims {
            let Some(period) = crs.axis(dim).and_then(|a| a.period()) else {
                continue;
            };
            let (lo, hi, k) = reconcile_interval(
                base_cont.lower(dim),
                base_cont.upper(dim),
                lower[dim],
                upper[dim],
                period,
            );
            if k != 0 {
                lower[dim] = lo;
                upper[dim] = hi;
                changed = true;
            }
        }
        if !changed {
            return Ok(area_cont);
        }
        Ok(Envelope::new(&lower, &upper)?.replace_crs(area_cont.crs().cloned()))
    }

    /// Integer stride per grid dimension satisfying a per-world-axis
    /// resolution request: `floor(requested / base)`, minimum 1, attributed
    /// to the grid dimension driving each world axis the strongest.
    fn subsampling_factors(&self, request: &[f64]) -> Result<ShortVec<u64>, GridError> {
        let base = self.base;
        let corner = base.require_corner_to_crs()?;
        let extent = base.require_extent()?;
        let world_dim = corner.target_dim();
        if request.len() != world_dim {
            return Err(GridError::DimensionMismatch {
                context: "requested resolution",
                expected: world_dim,
                actual: request.len(),
            });
        }
        let resolution = base.resolution().ok_or(GridError::Undefined("resolution"))?;
        let grid_dim = extent.dimension();
        let jacobian = corner.derivative(&extent_center(extent))?;
        let mut chosen: ShortVec<Option<u64>> = ShortVec::from_elem(None, grid_dim);
        for axis in 0..world_dim {
            if !(resolution[axis] > 0.0) {
                continue;
            }
            let ratio = request[axis] / resolution[axis];
            if !ratio.is_finite() || ratio < 1.0 {
                continue;
            }
            let factor = (snap(ratio).floor() as u64).min(i64::MAX as u64);
            if factor <= 1 {
                continue;
            }
            let row = jacobian.row(axis);
            let mut dominant = 0;
            for d in 1..row.len() {
                if row[d].abs() > row[dominant].abs() {
                    dominant = d;
                }
            }
            chosen[dominant] = Some(match chosen[dominant] {
                Some(previous) => previous.min(factor),
                None => factor,
            });
        }
        Ok(chosen.into_iter().map(|factor| factor.unwrap_or(1)).collect())
    }

    /// Divide the extent by the subsampling factors. Cell boundaries stay
    /// aligned with whole multiples of the stride in base-grid indices; the
    /// remainder moves into the transform's translation via
    /// [`Self::derived_corner`].
    fn rebase(&mut self, extent: GridExtent, factors: &[u64]) -> Result<GridExtent, GridError> {
        let grid_dim = extent.dimension();
        let mut low: ShortVec<i64> = ShortVec::with_capacity(grid_dim);
        let mut high: ShortVec<i64> = ShortVec::with_capacity(grid_dim);
        for d in 0..grid_dim {
            let s = factors[d].min(i64::MAX as u64) as i64;
            let div = extent.low(d).div_euclid(s);
            let rem = extent.low(d) - s * div;
            self.subsampling[d] = s as u64;
            self.offsets[d] = rem;
            low.push(div);
            high.push((extent.high(d) - rem).div_euclid(s));
        }
        Ok(GridExtent::new(&low, &high)?.with_axes_of(&extent))
    }

    fn apply_margin(&mut self, extent: GridExtent) -> Result<GridExtent, GridError> {
        if self.margin_applied {
            return Ok(extent);
        }
        let Some(margins) = &self.margins else {
            return Ok(extent);
        };
        self.margin_applied = true;
        extent.expanded(margins)
    }

    /// Margin growth without touching the once-only bookkeeping, for the
    /// base-cell view kept alongside the derived extent.
    fn margined(&self, extent: GridExtent) -> Result<GridExtent, GridError> {
        match &self.margins {
            Some(margins) => extent.expanded(margins),
            None => Ok(extent),
        }
    }

    fn derived_corner(&self, corner: &Transform) -> Result<Transform, GridError> {
        if self.subsampling.iter().all(|&s| s == 1) && self.offsets.iter().all(|&r| r == 0) {
            return Ok(corner.clone());
        }
        let scales: ShortVec<f64> = self.subsampling.iter().map(|&s| s as f64).collect();
        let offsets: ShortVec<f64> = self.offsets.iter().map(|&r| r as f64).collect();
        let pre = Transform::linear(Matrix::affine_diagonal(&scales, &offsets))?;
        Ok(pre.concatenate(corner)?)
    }
}

/// World-to-index mapping: the exact inverse transform when available,
/// otherwise a local linearization around the base extent's center.
enum InverseMap {
    Exact(Transform),
    Linearized {
        center_index: ShortVec<f64>,
        center_world: ShortVec<f64>,
        jacobian_inverse: Matrix,
    },
}

impl InverseMap {
    fn of(forward: &Transform, center_index: &[f64]) -> Result<Self, GridError> {
        match forward.inverse() {
            Ok(inverse) => Ok(Self::Exact(inverse)),
            Err(TransformError::NotInvertible) => {
                let (center_world, jacobian) = forward.transform_with_derivative(center_index)?;
                let jacobian_inverse = jacobian.inverse()?;
                Ok(Self::Linearized {
                    center_index: ShortVec::from_slice(center_index),
                    center_world,
                    jacobian_inverse,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn apply(&self, world: &[f64]) -> Result<ShortVec<f64>, GridError> {
        match self {
            Self::Exact(inverse) => Ok(inverse.transform(world)?),
            Self::Linearized {
                center_index,
                center_world,
                jacobian_inverse,
            } => {
                let delta: ShortVec<f64> = world
                    .iter()
                    .zip(center_world.iter())
                    .map(|(w, c)| w - c)
                    .collect();
                let mut out = ShortVec::from_slice(center_index);
                for (r, value) in out.iter_mut().enumerate() {
                    let step: f64 = jacobian_inverse
                        .row(r)
                        .iter()
                        .zip(delta.iter())
                        .map(|(j, d)| j * d)
                        .sum();
                    *value += step;
                }
                Ok(out)
            }
        }
    }
}

/// Per-axis fractional index bounds of `area` under the inverse mapping,
/// reduced over the area's corners.
fn fractional_bounds(
    area: &Envelope,
    map: &InverseMap,
) -> Result<(ShortVec<f64>, ShortVec<f64>), GridError> {
    match map {
        InverseMap::Exact(inverse) => {
            let frac = area.transformed(inverse)?;
            Ok((
                ShortVec::from_slice(frac.lower_bounds()),
                ShortVec::from_slice(frac.upper_bounds()),
            ))
        }
        InverseMap::Linearized {
            jacobian_inverse, ..
        } => {
            let out_dim = jacobian_inverse.nrows();
            let mut lower: ShortVec<f64> = ShortVec::from_elem(f64::INFINITY, out_dim);
            let mut upper: ShortVec<f64> = ShortVec::from_elem(f64::NEG_INFINITY, out_dim);
            for corner in area.corners() {
                let indices = map.apply(&corner)?;
                for d in 0..out_dim {
                    lower[d] = lower[d].min(indices[d]);
                    upper[d] = upper[d].max(indices[d]);
                }
            }
            Ok((lower, upper))
        }
    }
}

fn extent_center(extent: &GridExtent) -> ShortVec<f64> {
    (0..extent.dimension())
        .map(|d| (extent.low(d) as f64 + extent.high(d) as f64 + 1.0) / 2.0)
        .collect()
}

fn envelope_median(envelope: &Envelope) -> ShortVec<f64> {
    (0..envelope.dimension())
        .map(|d| envelope.median(d))
        .collect()
}
