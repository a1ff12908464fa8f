//! Error types for the transform algebra and the grid layer.

/// Errors raised while constructing or evaluating transforms.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    /// Two parts of a composition or an evaluation disagree on dimensionality.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Transforms over zero dimensions are rejected at construction.
    #[error("transform dimension must be at least 1")]
    ZeroDimension,

    /// A matrix cannot describe a transform (too small, bad shape).
    #[error("malformed matrix: {0}")]
    MalformedMatrix(String),

    /// NaN or infinite coefficients are rejected at construction.
    #[error("non-finite coefficient in {0}")]
    NonFinite(&'static str),

    /// No inverse exists: singular matrix, zero scale factor, rectangular
    /// matrix, or an opaque transform without a registered inverse.
    #[error("transform is not invertible")]
    NotInvertible,

    /// Specialization regions must nest or be disjoint, and must be unique.
    #[error("specialization regions must nest or be disjoint")]
    OverlappingRegions,

    /// A point fell outside the domain the transform is defined on.
    #[error("point outside transform domain: {0}")]
    OutsideDomain(String),

    /// The Jacobian is singular or undefined at the requested point.
    #[error("derivative is singular or undefined")]
    SingularDerivative,

    /// The transform does not decompose on the requested dimensions.
    #[error("transform cannot be separated on the requested dimensions")]
    NotSeparable,
}

/// Errors raised by grid geometry construction and derivation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    /// The requested region and the grid do not intersect. This is the
    /// recoverable "no data here" outcome; callers are expected to match on
    /// it rather than treat it as a defect.
    #[error("requested region does not intersect the grid in dimension {dimension}")]
    DisjointRegion { dimension: usize },

    /// Extents, envelopes, transforms or references disagree on dimensionality.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Extent bounds with `low > high` are rejected at construction.
    #[error("invalid extent bounds in dimension {dimension}: low {low} > high {high}")]
    InvalidBounds { dimension: usize, low: i64, high: i64 },

    /// Envelope bounds are non-finite, or inverted on a non-periodic axis.
    #[error("invalid envelope bounds in dimension {dimension}")]
    MalformedEnvelope { dimension: usize },

    /// The geometry does not carry the component needed by the operation.
    #[error("grid geometry does not define {0}")]
    Undefined(&'static str),

    /// The resolver knows no coordinate operation between the two references.
    #[error("no coordinate operation from {from} to {to}")]
    NoOperationPath { from: String, to: String },

    /// Extent arithmetic left the `i64` range.
    #[error("arithmetic overflow while computing a grid extent")]
    Overflow,

    #[error(transparent)]
    Transform(#[from] TransformError),
}
