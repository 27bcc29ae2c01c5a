//! Document Data Model
//!
//! Typed records for the corpus the engine searches over: source documents,
//! extracted text chunks, page images with VLM descriptions, embeddings, and
//! provenance chains. Field names here are the wire contract for collaborating
//! services, so everything serializes as plain snake_case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Embedding model identity. Vectors in the store and caller-supplied query
/// vectors must come from the same model family.
pub const EMBEDDING_MODEL: &str = "nomic-embed-text-v1.5";

// ============================================================================
// ENUMS
// ============================================================================

/// What an embedding row was computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// An extracted text chunk
    Chunk,
    /// A page image's VLM description
    Image,
    /// Whole-document extraction text (no chunk granularity)
    Extraction,
}

impl SourceKind {
    /// String form stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Chunk => "chunk",
            SourceKind::Image => "image",
            SourceKind::Extraction => "extraction",
        }
    }

    /// Parse from the stored string form
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "chunk" => Some(SourceKind::Chunk),
            "image" => Some(SourceKind::Image),
            "extraction" => Some(SourceKind::Extraction),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which index a search hit came out of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    /// Lexical or semantic hit on an extracted text chunk
    Chunk,
    /// Hit on a page image's VLM description
    Vlm,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Chunk => "chunk",
            ResultType::Vlm => "vlm",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "chunk" => Some(ResultType::Chunk),
            "vlm" => Some(ResultType::Vlm),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CORPUS RECORDS
// ============================================================================

/// A source document (PDF, scan, etc.) the extraction pipeline processed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub file_path: String,
    pub file_name: String,
    /// MIME type of the source file, when known
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(file_path: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_path: file_path.into(),
            file_name: file_name.into(),
            content_type: None,
            created_at: Utc::now(),
        }
    }
}

/// An extracted text chunk with its character span and layout metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub char_start: i64,
    pub char_end: i64,
    pub page_number: Option<i64>,
    /// Extraction quality on a 0-5 scale; NULL when unassessed
    pub quality_score: Option<f64>,
    pub heading: Option<String>,
    pub section_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    pub fn new(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let char_end = text.chars().count() as i64;
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            text,
            char_start: 0,
            char_end,
            page_number: None,
            quality_score: None,
            heading: None,
            section_path: None,
            created_at: Utc::now(),
        }
    }
}

/// A page image with its VLM-generated description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub document_id: String,
    pub page_number: Option<i64>,
    /// NULL until the VLM pass has described the image
    pub vlm_description: Option<String>,
    pub quality_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn new(document_id: impl Into<String>, vlm_description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            page_number: None,
            vlm_description: Some(vlm_description.into()),
            quality_score: None,
            created_at: Utc::now(),
        }
    }
}

/// Metadata for one stored embedding vector.
///
/// Exactly one of `chunk_id`/`image_id` is set for chunk and image sources;
/// extraction-level embeddings set neither. `id` is the primary retrieval
/// key everywhere downstream because VLM hits share a NULL `chunk_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub source: SourceKind,
    pub chunk_id: Option<String>,
    pub image_id: Option<String>,
    pub document_id: String,
    /// The exact text the vector was computed from
    pub original_text: String,
    /// `sha256:`-prefixed hash of `original_text`, when computed
    pub content_hash: Option<String>,
    pub dimensions: i64,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    fn base(document_id: String, original_text: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: SourceKind::Extraction,
            chunk_id: None,
            image_id: None,
            document_id,
            original_text,
            content_hash: None,
            dimensions: 768,
            model: EMBEDDING_MODEL.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Embedding of an extracted text chunk
    pub fn for_chunk(chunk: &ChunkRecord) -> Self {
        let mut rec = Self::base(chunk.document_id.clone(), chunk.text.clone());
        rec.source = SourceKind::Chunk;
        rec.chunk_id = Some(chunk.id.clone());
        rec
    }

    /// Embedding of an image's VLM description
    pub fn for_image(image: &ImageRecord) -> Self {
        let text = image.vlm_description.clone().unwrap_or_default();
        let mut rec = Self::base(image.document_id.clone(), text);
        rec.source = SourceKind::Image;
        rec.image_id = Some(image.id.clone());
        rec
    }

    /// Embedding of whole-document extraction text
    pub fn for_extraction(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::base(document_id.into(), text.into())
    }

    /// Check the source/foreign-key exclusivity invariant
    pub fn validate(&self) -> Result<()> {
        let ok = match self.source {
            SourceKind::Chunk => self.chunk_id.is_some() && self.image_id.is_none(),
            SourceKind::Image => self.image_id.is_some() && self.chunk_id.is_none(),
            SourceKind::Extraction => self.chunk_id.is_none() && self.image_id.is_none(),
        };
        if !ok {
            return Err(EngineError::InvalidInput(format!(
                "embedding {} has source '{}' but inconsistent chunk_id/image_id",
                self.id, self.source
            )));
        }
        if self.dimensions <= 0 {
            return Err(EngineError::InvalidInput(format!(
                "embedding {} has non-positive dimensions {}",
                self.id, self.dimensions
            )));
        }
        Ok(())
    }
}

/// A provenance chain for a processed document: the ordered record of
/// extraction, chunking, VLM, and embedding steps, stored as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: String,
    pub document_id: String,
    pub chain: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ProvenanceRecord {
    pub fn new(document_id: impl Into<String>, chain: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            chain,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// SEARCH TYPES
// ============================================================================

/// One hit from a single retrieval source, fully hydrated with the metadata
/// the response shaper needs. `embedding_id` is the identity key; fusion and
/// deduplication never key on `chunk_id`.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub embedding_id: String,
    pub document_id: String,
    pub chunk_id: Option<String>,
    pub image_id: Option<String>,
    pub text: String,
    /// Source-native score: BM25 relevance or cosine similarity
    pub score: f64,
    /// 1-based position within this source's list
    pub rank: usize,
    pub result_type: ResultType,
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
}

/// Metadata filters applied inside each retrieval source, before ranking
/// and pagination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchFilters {
    /// Restrict hits to a single document
    #[serde(default)]
    pub document_id: Option<String>,
    /// Drop hits whose quality score is NULL or below this threshold.
    /// Must be in (0, 5].
    #[serde(default)]
    pub min_quality: Option<f64>,
}
