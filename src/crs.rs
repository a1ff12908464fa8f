use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::envelope::Envelope;
use crate::error::GridError;
use crate::transforms::Transform;

/// One axis of a coordinate reference.
///
/// The grid layer only needs two facts about an axis: its valid coordinate
/// range, and whether coordinates wrap across that range (longitude). Any
/// further geodetic meaning stays with the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CrsAxis {
    name: String,
    range: Option<(f64, f64)>,
    periodic: bool,
}

impl CrsAxis {
    /// Unbounded linear axis.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            range: None,
            periodic: false,
        }
    }

    /// Linear axis with a valid range, e.g. latitude in `[-90, 90]`.
    pub fn bounded(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            range: Some((min, max)),
            periodic: false,
        }
    }

    /// Axis whose coordinates wrap across the range, e.g. longitude in
    /// `[-180, 180]` with period 360.
    pub fn periodic(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            range: Some((min, max)),
            periodic: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }

    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    /// Width of the valid range for periodic axes, `None` otherwise.
    pub fn period(&self) -> Option<f64> {
        if !self.periodic {
            return None;
        }
        self.range.map(|(min, max)| max - min)
    }
}

/// Identifier plus axis metadata for a coordinate reference system.
///
/// Cheap to clone and share. Two references denote the same system exactly
/// when their names are equal; equality, hashing and resolver lookups all go
/// through the name. Axis metadata rides along for wraparound handling.
#[derive(Debug, Clone)]
pub struct CoordinateReference {
    name: Arc<str>,
    axes: Arc<[CrsAxis]>,
}

impl CoordinateReference {
    pub fn new(name: impl AsRef<str>, axes: Vec<CrsAxis>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            axes: axes.into(),
        }
    }

    /// Two-axis geographic reference: periodic longitude in `[-180, 180]`,
    /// bounded latitude in `[-90, 90]`.
    pub fn geographic(name: impl AsRef<str>) -> Self {
        Self::new(
            name,
            vec![
                CrsAxis::periodic("longitude", -180.0, 180.0),
                CrsAxis::bounded("latitude", -90.0, 90.0),
            ],
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.axes.len()
    }

    pub fn axis(&self, dim: usize) -> Option<&CrsAxis> {
        self.axes.get(dim)
    }

    pub fn axes(&self) -> &[CrsAxis] {
        &self.axes
    }
}

impl AsRef<CoordinateReference> for CoordinateReference {
    fn as_ref(&self) -> &Self {
        self
    }
}

impl PartialEq for CoordinateReference {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for CoordinateReference {}

impl Hash for CoordinateReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for CoordinateReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Finds a coordinate operation mapping source coordinates to target
/// coordinates.
///
/// The grid layer calls this when a requested area or position is expressed
/// in a different reference than the grid. The `area_of_interest` hint lets
/// implementations pick an operation tuned for a region; the bundled
/// [`TransformGraph`](crate::TransformGraph) ignores it.
pub trait TransformResolver {
    fn resolve(
        &self,
        source: &CoordinateReference,
        target: &CoordinateReference,
        area_of_interest: Option<&Envelope>,
    ) -> Result<Transform, GridError>;
}
