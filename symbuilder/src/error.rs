//! The error taxonomy for symbol store operations.

use thiserror::Error;

/// Errors surfaced by the public symbol store APIs.
#[derive(Debug, Error)]
pub enum Error {
    /// A supplied id does not exist, a name is already taken where uniqueness
    /// is required, a wire string fails to parse, or a live range overlaps
    /// another.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is valid in general but not in the symbol's current
    /// state (e.g. reading a layout-derived offset before layout has run, or
    /// setting an offset on an auto-increment enumerant).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A by-id, by-name, or by-offset lookup found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// An allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// The requested property does not apply to the symbol's kind.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The importer could not materialize a requested symbol. The store is
    /// left consistent; symbols imported before the failure remain.
    #[error("import failure: {0}")]
    ImportFailure(String),
}

/// The result type used throughout the symbol builder.
pub type Result<T> = std::result::Result<T, Error>;
