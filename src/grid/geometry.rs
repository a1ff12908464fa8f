use crate::ShortVec;
use crate::crs::CoordinateReference;
use crate::envelope::Envelope;
use crate::error::GridError;
use crate::matrix::Matrix;
use crate::transforms::Transform;

use super::derivation::GridDerivation;
use super::extent::GridExtent;
use super::{INDEX_TOLERANCE, round_interval};

/// Whether a grid index addresses the corner or the center of its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    CellCenter,
    CellCorner,
}

/// Policy for converting fractional index bounds to an integer extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundingMode {
    /// Round each bound to the nearest integer.
    #[default]
    Nearest,
    /// Smallest integer range covering the fractional range.
    Enclosing,
    /// Largest integer range covered by the fractional range.
    Contained,
}

/// An immutable raster geometry: index extent, grid-to-world transform and
/// coordinate reference, with envelope and resolution derived on
/// construction.
///
/// Every part is optional individually but constructors guarantee that at
/// least the extent, the transform or the envelope is present.
#[derive(Debug, Clone)]
pub struct GridGeometry {
    extent: Option<GridExtent>,
    corner_to_crs: Option<Transform>,
    center_to_crs: Option<Transform>,
    crs: Option<CoordinateReference>,
    envelope: Option<Envelope>,
    resolution: Option<ShortVec<f64>>,
}

impl GridGeometry {
    /// Grid geometry from an extent and an anchored grid-to-world transform.
    ///
    /// The envelope is derived by mapping the extent's corner box through
    /// the transform.
    pub fn new(
        extent: GridExtent,
        anchor: Anchor,
        grid_to_crs: Transform,
        crs: Option<CoordinateReference>,
    ) -> Result<Self, GridError> {
        check_dimensions(&extent, &grid_to_crs, crs.as_ref())?;
        let (corner, center) = anchored_pair(anchor, grid_to_crs)?;
        let envelope = derive_envelope(&extent, &corner, crs.as_ref())?;
        let resolution = resolution_of(&extent, &corner).ok();
        Ok(Self {
            extent: Some(extent),
            corner_to_crs: Some(corner),
            center_to_crs: Some(center),
            crs,
            envelope: Some(envelope),
            resolution,
        })
    }

    /// Like [`GridGeometry::new`] but taking the envelope as given instead
    /// of deriving it. Consistency between the envelope and the extent is
    /// asserted, not contract-checked.
    pub fn with_envelope(
        extent: GridExtent,
        anchor: Anchor,
        grid_to_crs: Transform,
        envelope: Envelope,
    ) -> Result<Self, GridError> {
        let crs = envelope.crs().cloned();
        check_dimensions(&extent, &grid_to_crs, crs.as_ref())?;
        if envelope.dimension() != grid_to_crs.target_dim() {
            return Err(GridError::DimensionMismatch {
                context: "grid geometry envelope",
                expected: grid_to_crs.target_dim(),
                actual: envelope.dimension(),
            });
        }
        let (corner, center) = anchored_pair(anchor, grid_to_crs)?;
        #[cfg(debug_assertions)]
        if let Ok(derived) = derive_envelope(&extent, &corner, crs.as_ref()) {
            let given = envelope.to_continuous();
            for dim in 0..given.dimension() {
                let scale = derived.span(dim).abs().max(1.0);
                debug_assert!(
                    (derived.lower(dim) - given.lower(dim)).abs() <= 1e-6 * scale
                        && (derived.upper(dim) - given.upper(dim)).abs() <= 1e-6 * scale,
                    "given envelope disagrees with extent and transform in dimension {dim}"
                );
            }
        }
        let resolution = resolution_of(&extent, &corner).ok();
        Ok(Self {
            extent: Some(extent),
            corner_to_crs: Some(corner),
            center_to_crs: Some(center),
            crs,
            envelope: Some(envelope),
            resolution,
        })
    }

    /// Grid geometry from an envelope and an anchored grid-to-world
    /// transform, inferring the extent.
    ///
    /// Envelope bounds are converted to fractional index bounds through the
    /// inverse transform and rounded per `rounding`. The transform's
    /// translation is then compensated so the rounded extent's low corner
    /// maps back exactly onto the envelope's lower corner.
    pub fn from_envelope(
        envelope: &Envelope,
        anchor: Anchor,
        grid_to_crs: Transform,
        rounding: RoundingMode,
    ) -> Result<Self, GridError> {
        if envelope.dimension() != grid_to_crs.target_dim() {
            return Err(GridError::DimensionMismatch {
                context: "grid geometry envelope",
                expected: grid_to_crs.target_dim(),
                actual: envelope.dimension(),
            });
        }
        let crs = envelope.crs().cloned();
        let (corner, _) = anchored_pair(anchor, grid_to_crs)?;
        let inverse = corner.inverse()?;
        let fractional = envelope.to_continuous().transformed(&inverse)?;

        let dim = fractional.dimension();
        let mut low: ShortVec<i64> = ShortVec::with_capacity(dim);
        let mut high: ShortVec<i64> = ShortVec::with_capacity(dim);
        let mut shift: ShortVec<f64> = ShortVec::with_capacity(dim);
        for d in 0..dim {
            let (lo, hi) = round_interval(fractional.lower(d), fractional.upper(d), rounding);
            let delta = fractional.lower(d) - lo as f64;
            shift.push(if delta.abs() <= INDEX_TOLERANCE { 0.0 } else { delta });
            low.push(lo);
            high.push(hi);
        }
        let extent = GridExtent::new(&low, &high)?;
        let corner = Transform::translation(&shift)?.concatenate(&corner)?;
        let center = center_of_corner(&corner)?;
        let derived = derive_envelope(&extent, &corner, crs.as_ref())?;
        let resolution = resolution_of(&extent, &corner).ok();
        Ok(Self {
            extent: Some(extent),
            corner_to_crs: Some(corner),
            center_to_crs: Some(center),
            crs,
            envelope: Some(derived),
            resolution,
        })
    }

    /// Geometry carrying only a world-space envelope, with no grid extent
    /// and no transform.
    pub fn envelope_only(envelope: Envelope) -> Self {
        let crs = envelope.crs().cloned();
        Self {
            extent: None,
            corner_to_crs: None,
            center_to_crs: None,
            crs,
            envelope: Some(envelope),
            resolution: None,
        }
    }

    /// Lenient assembly for internally derived geometries: envelope and
    /// resolution are cached when they can be computed, omitted otherwise.
    pub(crate) fn assemble(
        extent: Option<GridExtent>,
        corner_to_crs: Option<Transform>,
        crs: Option<CoordinateReference>,
    ) -> Self {
        let center_to_crs = corner_to_crs.as_ref().and_then(|c| center_of_corner(c).ok());
        let envelope = match (&extent, &corner_to_crs) {
            (Some(extent), Some(corner)) => derive_envelope(extent, corner, crs.as_ref()).ok(),
            _ => None,
        };
        let resolution = match (&extent, &corner_to_crs) {
            (Some(extent), Some(corner)) => resolution_of(extent, corner).ok(),
            _ => None,
        };
        Self {
            extent,
            corner_to_crs,
            center_to_crs,
            crs,
            envelope,
            resolution,
        }
    }

    pub fn dimension(&self) -> usize {
        if let Some(extent) = &self.extent {
            extent.dimension()
        } else if let Some(corner) = &self.corner_to_crs {
            corner.source_dim()
        } else if let Some(envelope) = &self.envelope {
            envelope.dimension()
        } else {
            // Constructors guarantee at least one of the three.
            0
        }
    }

    pub fn extent(&self) -> Option<&GridExtent> {
        self.extent.as_ref()
    }

    pub fn grid_to_crs(&self, anchor: Anchor) -> Option<&Transform> {
        match anchor {
            Anchor::CellCorner => self.corner_to_crs.as_ref(),
            Anchor::CellCenter => self.center_to_crs.as_ref(),
        }
    }

    pub fn crs(&self) -> Option<&CoordinateReference> {
        self.crs.as_ref()
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    /// World units covered by one cell along each world axis, estimated at
    /// the extent's center.
    pub fn resolution(&self) -> Option<&[f64]> {
        self.resolution.as_deref()
    }

    /// Start deriving a reduced or resampled geometry from this one.
    pub fn derive(&self) -> GridDerivation<'_> {
        GridDerivation::new(self)
    }

    pub(crate) fn require_extent(&self) -> Result<&GridExtent, GridError> {
        self.extent.as_ref().ok_or(GridError::Undefined("extent"))
    }

    pub(crate) fn require_corner_to_crs(&self) -> Result<&Transform, GridError> {
        self.corner_to_crs
            .as_ref()
            .ok_or(GridError::Undefined("grid to CRS transform"))
    }

    pub(crate) fn require_envelope(&self) -> Result<&Envelope, GridError> {
        self.envelope
            .as_ref()
            .ok_or(GridError::Undefined("envelope"))
    }
}

fn check_dimensions(
    extent: &GridExtent,
    grid_to_crs: &Transform,
    crs: Option<&CoordinateReference>,
) -> Result<(), GridError> {
    if grid_to_crs.source_dim() != extent.dimension() {
        return Err(GridError::DimensionMismatch {
            context: "grid to CRS transform",
            expected: extent.dimension(),
            actual: grid_to_crs.source_dim(),
        });
    }
    if let Some(crs) = crs {
        if crs.dimension() != grid_to_crs.target_dim() {
            return Err(GridError::DimensionMismatch {
                context: "coordinate reference axes",
                expected: grid_to_crs.target_dim(),
                actual: crs.dimension(),
            });
        }
    }
    Ok(())
}

/// Corner- and center-anchored variants of one grid-to-world transform.
/// The two differ by a half-cell translation on the index side.
fn anchored_pair(
    anchor: Anchor,
    grid_to_crs: Transform,
) -> Result<(Transform, Transform), GridError> {
    match anchor {
        Anchor::CellCorner => {
            let center = center_of_corner(&grid_to_crs)?;
            Ok((grid_to_crs, center))
        }
        Anchor::CellCenter => {
            let half = ShortVec::from_elem(-0.5, grid_to_crs.source_dim());
            let corner = Transform::translation(&half)?.concatenate(&grid_to_crs)?;
            Ok((corner, grid_to_crs))
        }
    }
}

fn center_of_corner(corner: &Transform) -> Result<Transform, GridError> {
    let half = ShortVec::from_elem(0.5, corner.source_dim());
    Ok(Transform::translation(&half)?.concatenate(corner)?)
}

/// Envelope of the extent's corner box `[low, high+1]` mapped through the
/// corner-anchored transform.
fn derive_envelope(
    extent: &GridExtent,
    corner_to_crs: &Transform,
    crs: Option<&CoordinateReference>,
) -> Result<Envelope, GridError> {
    let lower: ShortVec<f64> = extent.low_bounds().iter().map(|&v| v as f64).collect();
    let upper: ShortVec<f64> = extent.high_bounds().iter().map(|&v| v as f64 + 1.0).collect();
    let indices = Envelope::new(&lower, &upper)?;
    let world = indices.transformed(corner_to_crs)?;
    Ok(world.replace_crs(crs.cloned()))
}

pub(crate) fn resolution_of(
    extent: &GridExtent,
    corner_to_crs: &Transform,
) -> Result<ShortVec<f64>, GridError> {
    let center: ShortVec<f64> = (0..extent.dimension())
        .map(|d| (extent.low(d) as f64 + extent.high(d) as f64 + 1.0) / 2.0)
        .collect();
    let jacobian = corner_to_crs.derivative(&center)?;
    Ok(row_norms(&jacobian))
}

/// Euclidean norm of each Jacobian row: world units per index step, per
/// world axis.
pub(crate) fn row_norms(jacobian: &Matrix) -> ShortVec<f64> {
    (0..jacobian.nrows())
        .map(|r| jacobian.row(r).iter().map(|v| v * v).sum::<f64>().sqrt())
        .collect()
}
