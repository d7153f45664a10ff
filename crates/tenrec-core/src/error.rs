use crate::shape::Dims;

/// All errors that can occur within the matrix core.
///
/// Every failure mode is synchronous and surfaced immediately: geometry
/// mismatches, storage-variant mismatches, recorder conflicts, invalid
/// mask/slice state, and invalid configuration values. A failed operation
/// leaves its operands untouched; validation always precedes writes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operand geometries are incompatible (e.g. adding 2x3x1 to 4x5x1).
    #[error("incompatible matrix sizes: {lhs} by {rhs}")]
    DimensionMismatch { lhs: Dims, rhs: Dims },

    /// Result matrix geometry does not match what the operation produces.
    #[error("incompatible result matrix size: expected {expected}, got {got}")]
    ResultDimensionMismatch { expected: Dims, got: Dims },

    /// Dot product inner dimensions do not agree.
    #[error("dot product inner dimension mismatch: {lhs_columns} columns by {rhs_rows} rows")]
    InnerDimensionMismatch { lhs_columns: usize, rhs_rows: usize },

    /// Requested slice window exceeds the matrix's pure dimensions.
    #[error("slice window at ({start_row}, {start_column}, {start_depth}) of size {window} exceeds matrix size {dims}")]
    SliceOutOfBounds {
        start_row: usize,
        start_column: usize,
        start_depth: usize,
        window: Dims,
        dims: Dims,
    },

    /// Mask geometry does not match the owning matrix's effective geometry.
    #[error("mask size {mask} does not match matrix size {matrix}")]
    MaskDimensionMismatch { mask: Dims, matrix: Dims },

    /// Structural cut position (join/split/unjoin) is out of range.
    #[error("cut position {position} is outside 1..{limit}")]
    CutOutOfBounds { position: usize, limit: usize },

    /// Mask storage variant does not match the matrix storage variant.
    #[error("{mask} mask cannot be attached to {matrix} matrix")]
    StorageVariantMismatch {
        mask: &'static str,
        matrix: &'static str,
    },

    /// Two operands carry distinct non-null recorders.
    #[error("operands belong to conflicting recording graphs")]
    GraphConflict,

    /// A mask stack was popped while empty.
    #[error("{layer} mask stack is empty")]
    EmptyMaskStack { layer: &'static str },

    /// Slicing was requested on a matrix that does not support it.
    #[error("matrix does not support slicing")]
    NotSliceable,

    /// Invalid configuration value (probability, trial count, norm order...).
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

/// Coarse error taxonomy for call sites that branch on the failure kind
/// rather than the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Dimension,
    TypeMismatch,
    GraphConflict,
    State,
    Parameter,
    Other,
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DimensionMismatch { .. }
            | Error::ResultDimensionMismatch { .. }
            | Error::InnerDimensionMismatch { .. }
            | Error::SliceOutOfBounds { .. }
            | Error::MaskDimensionMismatch { .. }
            | Error::CutOutOfBounds { .. } => ErrorKind::Dimension,
            Error::StorageVariantMismatch { .. } => ErrorKind::TypeMismatch,
            Error::GraphConflict => ErrorKind::GraphConflict,
            Error::EmptyMaskStack { .. } | Error::NotSliceable => ErrorKind::State,
            Error::Parameter(_) => ErrorKind::Parameter,
            Error::Msg(_) => ErrorKind::Other,
        }
    }
}

/// Convenience Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
