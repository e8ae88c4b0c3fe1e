//! Error types for msicore.

use thiserror::Error;

/// Result type alias for msicore operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by fitting, ordering, pairing, chunking and aggregation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Fewer points than an affine fit or an ordering needs.
    #[error("at least {required} points are required, got {found}")]
    InsufficientPoints { required: usize, found: usize },

    /// Source and target point sets differ in length.
    #[error("point sets differ in length: {sources} source vs {targets} target points")]
    MismatchedLengths { sources: usize, targets: usize },

    /// The source points are collinear (or coincide), the fit matrix is singular.
    #[error("points are collinear, the affine fit is underdetermined")]
    DegenerateGeometry,

    /// `transform` was called on a solver that was never fitted.
    #[error("solver has not been fitted")]
    NotFitted,

    /// A depth array handed to the chunker is not ascending.
    #[error("depth array is not sorted ascending at index {index}")]
    UnsortedInput { index: usize },

    /// No reference group lies within the depth tolerance of an MSI image.
    #[error("no reference group within {tolerance} of image {image} (closest gap {gap})")]
    NoMatchingGroup { image: String, gap: f64, tolerance: f64 },

    /// Reference teaching points do not split into whole groups of three.
    #[error("{count} reference teaching points cannot be cut into groups of 3")]
    PartialGroup { count: usize },

    /// A teaching point that must carry a depth does not.
    #[error("teaching point {point} on image {image} has no depth")]
    MissingDepth { image: String, point: u64 },

    /// No reference image is available for pairing.
    #[error("no reference image with teaching points")]
    NoReferenceImage,

    /// A line of the label pairing text is not two integers.
    #[error("malformed pairing line {line}: {content:?}")]
    MalformedPairing { line: usize, content: String },

    /// A teaching point id is unknown.
    #[error("unknown teaching point {0}")]
    UnknownPoint(u64),

    /// An image name is unknown.
    #[error("unknown image {0}")]
    UnknownImage(String),

    /// A frame column is missing.
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// Column lengths disagree with the frame length.
    #[error("column {name} has {found} rows, frame has {expected}")]
    ColumnLength { name: String, expected: usize, found: usize },

    /// A rectangle string could not be parsed or is empty along an axis.
    #[error("invalid rectangle: {0}")]
    InvalidRect(String),

    /// The cm-per-pixel scale cannot be derived from the given scale lines.
    #[error("invalid depth scale: {0}")]
    InvalidScale(String),

    /// Parse or evaluation failure of a custom aggregation expression.
    #[error("expression error: {0}")]
    Expression(String),
}
