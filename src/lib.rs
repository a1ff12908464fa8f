use smallvec::SmallVec;


mod transforms;
pub use transforms::{
    ConcatenatedTransform, NonLinearTransform, PassThroughTransform, SpecializedTransform,
    Transform,
};

mod matrix;
pub use matrix::Matrix;

mod error;
pub use error::{GridError, TransformError};

mod crs;
pub use crs::{CoordinateReference, CrsAxis, TransformResolver};

mod envelope;
pub use envelope::Envelope;

mod graph;
pub use graph::{Edge, TransformGraph};

mod grid;
pub use grid::{Anchor, AxisKind, GridDerivation, GridExtent, GridGeometry, RoundingMode};

pub const COORD_SIZE: usize = 4;

/// A short vector type alias for coordinate tuples,
/// inline up to [`COORD_SIZE`] dimensions.
pub type ShortVec<T> = SmallVec<[T; COORD_SIZE]>;
