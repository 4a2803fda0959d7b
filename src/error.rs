//! Standardized error types for the memory engine.
//!
//! Every fallible public operation returns [`MeshError`]. Embedding failures
//! are the one exception to surfacing: providers degrade to keyword mode
//! internally and never reach callers as errors.

use thiserror::Error;

/// Main error type for the memorymesh library.
#[derive(Error, Debug)]
pub enum MeshError {
    /// Malformed caller input: empty text, oversized text or metadata,
    /// an invalid metadata-filter key, or a bad time range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation required project scope but no project store is configured.
    #[error(
        "no project store configured. Pass a project path when constructing \
         MemoryMesh, set MEMORYMESH_PROJECT_ROOT, or launch from inside a \
         project directory. Fallback: use scope=global for non-project memories."
    )]
    NoProjectStore,

    /// The requested memory id does not exist.
    #[error("memory not found: {0}")]
    NotFound(String),

    /// The store's row cap was reached.
    #[error("store capacity exceeded ({0} rows). Run compact() or forget old memories first.")]
    CapacityExceeded(usize),

    /// The database is stamped at a schema version newer than this build knows.
    #[error("database schema version {found} is newer than the supported version {supported}; upgrade memorymesh")]
    SchemaMismatch { found: u32, supported: u32 },

    /// Wrong passphrase, corrupted ciphertext, or missing salt record.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Operation aborted via close() or an explicit cancellation flag.
    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for Result using MeshError.
pub type Result<T> = std::result::Result<T, MeshError>;

impl MeshError {
    /// Shorthand for building an [`MeshError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        MeshError::InvalidArgument(msg.into())
    }
}
