//! Search Module
//!
//! The retrieval pipeline: query sanitization and synonym expansion, BM25
//! lexical search, HNSW vector search, reciprocal rank fusion, quality
//! filtering and boosting, and the hybrid orchestrator that ties them
//! together.

pub mod expand;
pub mod fusion;
pub mod hybrid;
pub mod lexical;
pub mod quality;
pub mod vector;

pub use expand::{
    expand_query, expanded_terms, sanitize_query, sanitize_term, QueryExpansion, MAX_OR_TERMS,
};
pub use fusion::{fuse, normalize_scores, FusedResult, RRF_K};
pub use hybrid::{
    classify_query, CompactRow, FullRow, QueryClassification, QueryRoute, ResultRow,
    SearchEngine, SearchEngineConfig, SearchMode, SearchRequest, SearchResponse, SourceCounts,
};
pub use lexical::LexicalIndex;
pub use quality::{apply_boost, boost_factor, passes, validate_min_quality, MAX_QUALITY};
pub use vector::{VectorStore, EMBEDDING_DIMENSIONS};
