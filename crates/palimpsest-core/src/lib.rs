//! # Palimpsest Core
//!
//! Hybrid search and fusion engine over OCR provenance corpora: extracted
//! text chunks and VLM image descriptions, retrieved lexically (BM25 via
//! SQLite FTS5) and semantically (HNSW vector search via USearch), merged
//! with reciprocal rank fusion.
//!
//! - **Lexical search**: porter-stemmed FTS5 over chunks and VLM
//!   descriptions, trigger-synced with the base tables
//! - **Vector search**: cosine similarity over 768-dim embeddings
//!   (nomic-embed-text-v1.5), rebuilt from SQLite at startup
//! - **Fusion**: RRF with K = 60, keyed strictly by embedding id
//! - **Query expansion**: FTS5 sanitization plus legal/medical synonyms
//! - **Quality**: (0, 5] threshold filtering and clamped score boosting
//!
//! The engine never generates embeddings; query vectors are supplied by the
//! caller, and stored vectors arrive through the collaborating ingestion
//! pipeline.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use palimpsest_core::{SearchEngine, SearchRequest, Storage};
//! use std::sync::Arc;
//!
//! let storage = Arc::new(Storage::new(None)?);
//! let engine = SearchEngine::new(storage)?;
//!
//! let response = engine.search(&SearchRequest {
//!     query: "spinal injury settlement".to_string(),
//!     ..Default::default()
//! })?;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod document;
pub mod error;
pub mod search;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Errors
pub use error::{EngineError, Result};

// Data model
pub use document::{
    ChunkRecord, DocumentRecord, EmbeddingRecord, ImageRecord, ProvenanceRecord, RankedResult,
    ResultType, SearchFilters, SourceKind, EMBEDDING_MODEL,
};

// Storage layer
pub use storage::{IndexCounts, IndexStatus, RebuildReport, Storage, FTS_TOKENIZER};

// Search pipeline
pub use search::{
    classify_query, expand_query, expanded_terms, fuse, normalize_scores, sanitize_query,
    sanitize_term, CompactRow, FullRow, FusedResult, LexicalIndex, QueryClassification,
    QueryExpansion, QueryRoute, ResultRow, SearchEngine, SearchEngineConfig, SearchMode,
    SearchRequest, SearchResponse, SourceCounts, VectorStore, EMBEDDING_DIMENSIONS, MAX_OR_TERMS,
    RRF_K,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenience prelude for downstream services
pub mod prelude {
    pub use crate::document::{
        ChunkRecord, DocumentRecord, EmbeddingRecord, ImageRecord, ProvenanceRecord, RankedResult,
        ResultType, SearchFilters, SourceKind,
    };
    pub use crate::error::{EngineError, Result};
    pub use crate::search::{
        SearchEngine, SearchEngineConfig, SearchMode, SearchRequest, SearchResponse,
    };
    pub use crate::storage::Storage;
}
