//! Engine Error Types
//!
//! One error taxonomy for the whole crate. The important split is between
//! `InvalidInput` (the caller's request is malformed and no index was touched)
//! and `IndexUnavailable` (the schema or a search index is missing). Both are
//! distinct from an empty result set, which is always `Ok`.

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Request rejected before any index access
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// A required index structure is missing (unmigrated schema, dropped FTS table)
    #[error("Search index unavailable: {0}")]
    IndexUnavailable(String),
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Vector index error
    #[error("Vector index error: {0}")]
    Vector(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;
