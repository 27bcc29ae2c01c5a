//! Hybrid Search Orchestrator
//!
//! Dispatches a search request to the lexical index, the vector store, or
//! both, fuses the hybrid case with RRF, applies quality boosting, and shapes
//! the response. The two sub-queries of a hybrid search are independent
//! read-only operations, so they run on scoped threads and fusion waits for
//! both.
//!
//! The engine never generates embeddings. Semantic and hybrid requests carry
//! a caller-supplied query vector; a hybrid request without one degrades to
//! the lexical list alone.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use crate::document::{RankedResult, ResultType, SearchFilters};
use crate::error::{EngineError, Result};
use crate::search::fusion::{fuse, normalize_scores};
use crate::search::lexical::LexicalIndex;
use crate::search::quality;
use crate::search::vector::VectorStore;
use crate::storage::{IndexStatus, RebuildReport, Storage};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Search mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// BM25 over chunks and VLM descriptions
    Keyword,
    /// Vector similarity only (requires a query vector)
    Semantic,
    /// Both sources fused with RRF
    #[default]
    Hybrid,
}

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct SearchEngineConfig {
    /// Each source fetches (offset + limit) * multiplier candidates so that
    /// fusion and filtering have enough overlap to work with
    pub source_limit_multiplier: usize,
    /// Limit applied when the request does not set one
    pub default_limit: usize,
    /// Hard cap on the page size
    pub max_limit: usize,
    /// Minimum cosine similarity for semantic hits, unless the request
    /// overrides it
    pub similarity_threshold: f32,
    /// Attach a query classification to hybrid responses
    pub auto_route: bool,
    /// Multiply scores by the quality boost factor before ranking
    pub quality_boost: bool,
}

impl Default for SearchEngineConfig {
    fn default() -> Self {
        Self {
            source_limit_multiplier: 2,
            default_limit: 10,
            max_limit: 100,
            similarity_threshold: 0.3,
            auto_route: true,
            quality_boost: false,
        }
    }
}

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// A search request. Unknown fields are rejected so collaborator typos
/// surface as errors instead of silently ignored options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchRequest {
    /// Query text. Required for keyword and hybrid modes.
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub mode: SearchMode,
    /// Caller-supplied query embedding. Required for semantic mode.
    #[serde(default)]
    pub query_vector: Option<Vec<f32>>,
    #[serde(default)]
    pub filters: SearchFilters,
    /// Page size; engine default when absent
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    /// Compact rows (agent-facing) when true, full rows when false
    #[serde(default = "default_compact")]
    pub compact: bool,
    /// Attach provenance chains to full rows
    #[serde(default)]
    pub include_provenance: bool,
    /// Per-request override of the semantic similarity floor
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
}

fn default_compact() -> bool {
    true
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            mode: SearchMode::default(),
            query_vector: None,
            filters: SearchFilters::default(),
            limit: None,
            offset: 0,
            compact: true,
            include_provenance: false,
            similarity_threshold: None,
        }
    }
}

/// Per-source hit counts for a hybrid response
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SourceCounts {
    pub bm25: usize,
    pub semantic: usize,
}

/// Which source a query's shape favors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryRoute {
    Keyword,
    Semantic,
    Balanced,
}

/// Lightweight heuristic classification of a query, attached to hybrid
/// responses when auto-routing is enabled
#[derive(Debug, Clone, Serialize)]
pub struct QueryClassification {
    pub favors: QueryRoute,
    pub is_question: bool,
    pub term_count: usize,
    pub reason: String,
}

/// Compact row: exactly the seven fields an agent needs to cite a result.
/// Nullable fields serialize as null, never disappear.
#[derive(Debug, Clone, Serialize)]
pub struct CompactRow {
    pub document_id: String,
    pub chunk_id: Option<String>,
    pub original_text: String,
    pub source_file_name: Option<String>,
    pub page_number: Option<i64>,
    pub score: f64,
    pub result_type: ResultType,
}

/// Full row: all hydrated metadata plus exactly one mode-specific raw score
#[derive(Debug, Clone, Serialize)]
pub struct FullRow {
    pub embedding_id: String,
    pub document_id: String,
    pub chunk_id: Option<String>,
    pub image_id: Option<String>,
    pub original_text: String,
    pub source_file_path: Option<String>,
    pub source_file_name: Option<String>,
    pub page_number: Option<i64>,
    pub char_start: Option<i64>,
    pub char_end: Option<i64>,
    pub quality_score: Option<f64>,
    pub heading: Option<String>,
    pub section_path: Option<String>,
    pub content_type: Option<String>,
    pub provenance_id: Option<String>,
    pub content_hash: Option<String>,
    pub result_type: ResultType,
    /// Normalized display score, comparable across modes
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrf_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<serde_json::Value>,
}

/// One response row in either shape
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResultRow {
    Compact(CompactRow),
    Full(Box<FullRow>),
}

/// Search response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<ResultRow>,
    /// Qualifying results before pagination. Exact for keyword mode; for
    /// semantic and hybrid modes it counts candidates within the retrieval
    /// window, since the vector index has no notion of an unbounded match.
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<SourceCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_classification: Option<QueryClassification>,
}

/// The raw relevance value behind a candidate, tagged by mode
#[derive(Debug, Clone, Copy)]
enum RawScore {
    Bm25(f64),
    Similarity(f64),
    Rrf(f64),
}

/// One result between retrieval and shaping. `working` starts as the raw
/// value and absorbs the quality boost; `raw` stays untouched for the full
/// row's mode-specific field.
struct Candidate {
    result: RankedResult,
    raw: RawScore,
    working: f64,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Hybrid search engine over one storage instance
pub struct SearchEngine {
    storage: Arc<Storage>,
    lexical: LexicalIndex,
    vector: Mutex<VectorStore>,
    config: SearchEngineConfig,
}

impl SearchEngine {
    /// Build an engine with default configuration, loading the vector index
    /// from storage
    pub fn new(storage: Arc<Storage>) -> Result<Self> {
        Self::with_config(storage, SearchEngineConfig::default())
    }

    /// Build an engine with custom configuration
    pub fn with_config(storage: Arc<Storage>, config: SearchEngineConfig) -> Result<Self> {
        let vector = VectorStore::load_from(&storage)?;
        let lexical = LexicalIndex::new(storage.clone());
        Ok(Self {
            storage,
            lexical,
            vector: Mutex::new(vector),
            config,
        })
    }

    fn vector_store(&self) -> Result<std::sync::MutexGuard<'_, VectorStore>> {
        self.vector
            .lock()
            .map_err(|_| EngineError::Init("Vector store lock poisoned".to_string()))
    }

    /// Store an embedding and index its vector in one step
    pub fn index_embedding(
        &self,
        rec: &crate::document::EmbeddingRecord,
        vector: &[f32],
    ) -> Result<()> {
        self.storage.insert_embedding(rec, vector)?;
        self.vector_store()?.add(&rec.id, vector)
    }

    /// Full index resync: reload the vector index from storage and rebuild
    /// both FTS indexes from their base tables
    pub fn rebuild_index(&self) -> Result<RebuildReport> {
        let started = std::time::Instant::now();

        let reloaded = VectorStore::load_from(&self.storage)?;
        *self.vector_store()? = reloaded;

        let mut report = self.storage.rebuild_fts()?;
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Index configuration and freshness
    pub fn status(&self) -> Result<IndexStatus> {
        self.storage.index_status()
    }

    /// Run a search request
    pub fn search(&self, req: &SearchRequest) -> Result<SearchResponse> {
        self.validate(req)?;

        let limit = req.limit.unwrap_or(self.config.default_limit);
        let limit = limit.min(self.config.max_limit);
        let fetch = (req.offset + limit).max(1) * self.config.source_limit_multiplier.max(1);

        match req.mode {
            SearchMode::Keyword => self.search_keyword(req, limit, fetch),
            SearchMode::Semantic => self.search_semantic(req, limit, fetch),
            SearchMode::Hybrid => self.search_hybrid(req, limit, fetch),
        }
    }

    fn validate(&self, req: &SearchRequest) -> Result<()> {
        if let Some(limit) = req.limit {
            if limit == 0 {
                return Err(EngineError::InvalidInput("limit must be positive".to_string()));
            }
        }
        if let Some(min_quality) = req.filters.min_quality {
            quality::validate_min_quality(min_quality)?;
        }
        if let Some(threshold) = req.similarity_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(EngineError::InvalidInput(format!(
                    "similarity_threshold must be in [0, 1], got {}",
                    threshold
                )));
            }
        }
        match req.mode {
            SearchMode::Semantic => {
                if req.query_vector.is_none() {
                    return Err(EngineError::InvalidInput(
                        "semantic mode requires a query_vector".to_string(),
                    ));
                }
            }
            SearchMode::Keyword | SearchMode::Hybrid => {
                if req.query.trim().is_empty() {
                    return Err(EngineError::InvalidInput(
                        "query must not be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn search_keyword(
        &self,
        req: &SearchRequest,
        limit: usize,
        fetch: usize,
    ) -> Result<SearchResponse> {
        let total = self.lexical.count_all(&req.query, &req.filters)?;
        let hits = self.lexical.search_all(&req.query, &req.filters, fetch)?;
        let candidates = hits
            .into_iter()
            .map(|result| {
                let raw = result.score;
                Candidate {
                    result,
                    raw: RawScore::Bm25(raw),
                    working: raw,
                }
            })
            .collect();

        self.shape(req, candidates, limit, Some(total), None, None)
    }

    fn search_semantic(
        &self,
        req: &SearchRequest,
        limit: usize,
        fetch: usize,
    ) -> Result<SearchResponse> {
        // validate() guarantees the vector is present
        let vector = req
            .query_vector
            .as_deref()
            .ok_or_else(|| EngineError::InvalidInput("semantic mode requires a query_vector".to_string()))?;

        let hits = self.semantic_hits(vector, req, fetch)?;
        let candidates = hits
            .into_iter()
            .map(|result| {
                let raw = result.score;
                Candidate {
                    result,
                    raw: RawScore::Similarity(raw),
                    working: raw,
                }
            })
            .collect();

        self.shape(req, candidates, limit, None, None, None)
    }

    fn search_hybrid(
        &self,
        req: &SearchRequest,
        limit: usize,
        fetch: usize,
    ) -> Result<SearchResponse> {
        let (lexical_out, semantic_out) = std::thread::scope(|s| {
            let lexical = s.spawn(|| self.lexical.search_all(&req.query, &req.filters, fetch));
            let semantic = s.spawn(|| match req.query_vector.as_deref() {
                Some(vector) => self.semantic_hits(vector, req, fetch),
                None => Ok(Vec::new()),
            });
            (lexical.join(), semantic.join())
        });

        let bm25 = lexical_out
            .map_err(|_| EngineError::Init("lexical search thread panicked".to_string()))??;
        let semantic = semantic_out
            .map_err(|_| EngineError::Init("semantic search thread panicked".to_string()))??;

        let sources = SourceCounts {
            bm25: bm25.len(),
            semantic: semantic.len(),
        };

        let candidates = fuse(&bm25, &semantic, fetch)
            .into_iter()
            .map(|fused| Candidate {
                result: fused.payload,
                raw: RawScore::Rrf(fused.rrf_score),
                working: fused.rrf_score,
            })
            .collect();

        let classification = if self.config.auto_route {
            Some(classify_query(&req.query))
        } else {
            None
        };

        self.shape(req, candidates, limit, None, Some(sources), classification)
    }

    /// Vector search plus hydration and in-memory filtering. Filters apply
    /// before ranks are assigned, mirroring the SQL side where the WHERE
    /// clause runs before LIMIT.
    fn semantic_hits(
        &self,
        vector: &[f32],
        req: &SearchRequest,
        fetch: usize,
    ) -> Result<Vec<RankedResult>> {
        let threshold = req
            .similarity_threshold
            .unwrap_or(self.config.similarity_threshold);

        let matches = self
            .vector_store()?
            .search_with_threshold(vector, fetch, threshold)?;

        let mut hits = Vec::with_capacity(matches.len());
        for (embedding_id, similarity) in matches {
            let Some(mut hit) = self.storage.hydrate_embedding(&embedding_id)? else {
                tracing::warn!(embedding_id = %embedding_id, "Indexed vector has no embedding row");
                continue;
            };
            if let Some(document_id) = &req.filters.document_id {
                if &hit.document_id != document_id {
                    continue;
                }
            }
            if let Some(min_quality) = req.filters.min_quality {
                if !quality::passes(hit.quality_score, min_quality) {
                    continue;
                }
            }
            hit.score = f64::from(similarity);
            hits.push(hit);
        }

        for (i, hit) in hits.iter_mut().enumerate() {
            hit.rank = i + 1;
        }

        Ok(hits)
    }

    /// Boost, normalize, paginate, and serialize candidates into a response.
    /// `qualifying` overrides the reported total when the caller has an exact
    /// match count that exceeds the fetched candidate window.
    fn shape(
        &self,
        req: &SearchRequest,
        mut candidates: Vec<Candidate>,
        limit: usize,
        qualifying: Option<usize>,
        sources: Option<SourceCounts>,
        query_classification: Option<QueryClassification>,
    ) -> Result<SearchResponse> {
        if self.config.quality_boost {
            for candidate in &mut candidates {
                candidate.working =
                    quality::apply_boost(candidate.working, candidate.result.quality_score);
            }
            candidates.sort_by(|a, b| {
                b.working.partial_cmp(&a.working).unwrap_or(Ordering::Equal)
            });
        }

        let total = qualifying.unwrap_or(candidates.len());
        let working: Vec<f64> = candidates.iter().map(|c| c.working).collect();
        let normalized = normalize_scores(&working);

        let start = req.offset.min(candidates.len());
        let end = (req.offset + limit).min(candidates.len());

        let mut results = Vec::with_capacity(end - start);
        for (candidate, score) in candidates[start..end]
            .iter()
            .zip(normalized[start..end].iter())
        {
            let row = if req.compact {
                ResultRow::Compact(compact_row(&candidate.result, *score))
            } else {
                let provenance = if req.include_provenance {
                    match &candidate.result.provenance_id {
                        Some(id) => self.storage.get_provenance(id)?,
                        None => None,
                    }
                } else {
                    None
                };
                ResultRow::Full(Box::new(full_row(
                    &candidate.result,
                    *score,
                    candidate.raw,
                    provenance,
                )))
            };
            results.push(row);
        }

        Ok(SearchResponse {
            results,
            total,
            sources,
            query_classification,
        })
    }
}

// ============================================================================
// RESPONSE SHAPING
// ============================================================================

fn compact_row(result: &RankedResult, score: f64) -> CompactRow {
    CompactRow {
        document_id: result.document_id.clone(),
        chunk_id: result.chunk_id.clone(),
        original_text: result.text.clone(),
        source_file_name: result.source_file_name.clone(),
        page_number: result.page_number,
        score,
        result_type: result.result_type,
    }
}

fn full_row(
    result: &RankedResult,
    score: f64,
    raw: RawScore,
    provenance: Option<serde_json::Value>,
) -> FullRow {
    let (bm25_score, similarity_score, rrf_score) = match raw {
        RawScore::Bm25(v) => (Some(v), None, None),
        RawScore::Similarity(v) => (None, Some(v), None),
        RawScore::Rrf(v) => (None, None, Some(v)),
    };

    FullRow {
        embedding_id: result.embedding_id.clone(),
        document_id: result.document_id.clone(),
        chunk_id: result.chunk_id.clone(),
        image_id: result.image_id.clone(),
        original_text: result.text.clone(),
        source_file_path: result.source_file_path.clone(),
        source_file_name: result.source_file_name.clone(),
        page_number: result.page_number,
        char_start: result.char_start,
        char_end: result.char_end,
        quality_score: result.quality_score,
        heading: result.heading.clone(),
        section_path: result.section_path.clone(),
        content_type: result.content_type.clone(),
        provenance_id: result.provenance_id.clone(),
        content_hash: result.content_hash.clone(),
        result_type: result.result_type,
        score,
        bm25_score,
        similarity_score,
        rrf_score,
        provenance,
    }
}

// ============================================================================
// QUERY CLASSIFICATION
// ============================================================================

const QUESTION_WORDS: &[&str] = &[
    "what", "how", "why", "when", "where", "who", "which", "does", "is", "are", "can",
];

/// Classify a query's shape for routing hints. Short keyword-like queries
/// and identifier-like tokens favor BM25; natural-language questions favor
/// the semantic side.
pub fn classify_query(query: &str) -> QueryClassification {
    let trimmed = query.trim();
    let lower = trimmed.to_lowercase();
    let term_count = trimmed.split_whitespace().count();

    let first_word = lower.split_whitespace().next().unwrap_or("");
    let is_question = trimmed.ends_with('?') || QUESTION_WORDS.contains(&first_word);

    let has_identifier = trimmed.split_whitespace().any(|t| {
        t.contains('_') || t.contains("::") || t.chars().any(|c| c.is_ascii_digit())
    });

    let (favors, reason) = if is_question {
        (
            QueryRoute::Semantic,
            "natural-language question".to_string(),
        )
    } else if has_identifier {
        (
            QueryRoute::Keyword,
            "contains identifier-like tokens".to_string(),
        )
    } else if term_count <= 2 {
        (QueryRoute::Keyword, "short keyword query".to_string())
    } else if term_count >= 5 {
        (QueryRoute::Semantic, "long descriptive query".to_string())
    } else {
        (QueryRoute::Balanced, "mixed-signal query".to_string())
    };

    QueryClassification {
        favors,
        is_question,
        term_count,
        reason,
    }
}

// ============================================================================
// TESTS
// ============================================================================
