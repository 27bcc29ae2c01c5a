//! SQLite Storage Implementation
//!
//! Core storage layer: corpus tables, trigger-synced FTS5 indexes, embedding
//! blobs, and provenance chains. The engine treats this as the single source
//! of truth; the in-memory vector index is rebuilt from it at startup and on
//! explicit rebuild.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use crate::document::{
    ChunkRecord, DocumentRecord, EmbeddingRecord, ImageRecord, ProvenanceRecord, RankedResult,
    ResultType, SearchFilters, SourceKind,
};
use crate::error::{EngineError, Result};

const META_LAST_REBUILD: &str = "last_rebuild_at";

// ============================================================================
// REPORT TYPES
// ============================================================================

/// Per-index row counts reported by rebuild and status
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IndexCounts {
    pub chunks: i64,
    pub images: i64,
    pub vectors: i64,
}

/// Result of an explicit index rebuild
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub counts_by_index: IndexCounts,
    pub duration_ms: u64,
    /// `sha256:`-prefixed digest over the indexed corpus, for drift checks
    /// between collaborating services
    pub content_hash: String,
}

/// Current index configuration and freshness
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub tokenizer: String,
    pub counts_by_index: IndexCounts,
    pub last_rebuild_at: Option<DateTime<Utc>>,
}

// ============================================================================
// STORAGE
// ============================================================================

/// Main storage struct.
///
/// Uses separate reader/writer connections for interior mutability.
/// All methods take `&self` (not `&mut self`), making Storage `Send + Sync`
/// so the engine can share it as `Arc<Storage>` across scoped threads.
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Storage {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA mmap_size = 268435456;
             PRAGMA journal_size_limit = 67108864;",
        )?;

        Ok(())
    }

    /// Create new storage instance. With no path, uses the platform data
    /// directory.
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("dev", "palimpsest", "palimpsest")
                    .ok_or_else(|| {
                        EngineError::Init("Could not determine project directories".to_string())
                    })?;

                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("palimpsest.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;

        // Apply migrations on writer only
        super::migrations::apply_migrations(&writer_conn)?;

        // Open reader connection to same path
        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| EngineError::Init("Writer lock poisoned".to_string()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| EngineError::Init("Reader lock poisoned".to_string()))
    }

    // ========================================================================
    // INGESTION (collaborator-facing writes)
    // ========================================================================

    /// Insert a source document
    pub fn insert_document(&self, doc: &DocumentRecord) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO documents (id, file_path, file_name, content_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![doc.id, doc.file_path, doc.file_name, doc.content_type, doc.created_at],
        )?;
        Ok(())
    }

    /// Insert an extracted text chunk. The FTS index is synced by trigger.
    pub fn insert_chunk(&self, chunk: &ChunkRecord) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO chunks (id, document_id, text, char_start, char_end, page_number,
                                 quality_score, heading, section_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                chunk.id,
                chunk.document_id,
                chunk.text,
                chunk.char_start,
                chunk.char_end,
                chunk.page_number,
                chunk.quality_score,
                chunk.heading,
                chunk.section_path,
                chunk.created_at,
            ],
        )?;
        Ok(())
    }

    /// Insert a page image. The FTS index over VLM descriptions is synced by
    /// trigger.
    pub fn insert_image(&self, image: &ImageRecord) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO images (id, document_id, page_number, vlm_description,
                                 quality_score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                image.id,
                image.document_id,
                image.page_number,
                image.vlm_description,
                image.quality_score,
                image.created_at,
            ],
        )?;
        Ok(())
    }

    /// Insert an embedding with its raw vector. Validates the source
    /// exclusivity invariant and the declared dimensions before writing.
    pub fn insert_embedding(&self, rec: &EmbeddingRecord, vector: &[f32]) -> Result<()> {
        rec.validate()?;
        if vector.len() != rec.dimensions as usize {
            return Err(EngineError::InvalidInput(format!(
                "embedding {} declares {} dimensions but vector has {}",
                rec.id,
                rec.dimensions,
                vector.len()
            )));
        }

        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO embeddings (id, source, chunk_id, image_id, document_id,
                                     original_text, content_hash, vector, dimensions,
                                     model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                rec.id,
                rec.source.as_str(),
                rec.chunk_id,
                rec.image_id,
                rec.document_id,
                rec.original_text,
                rec.content_hash,
                vector_to_blob(vector),
                rec.dimensions,
                rec.model,
                rec.created_at,
            ],
        )?;
        Ok(())
    }

    /// Insert a provenance chain
    pub fn insert_provenance(&self, rec: &ProvenanceRecord) -> Result<()> {
        let chain = serde_json::to_string(&rec.chain)
            .map_err(|e| EngineError::InvalidInput(format!("unserializable chain: {}", e)))?;
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO provenance_chains (id, document_id, chain, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![rec.id, rec.document_id, chain, rec.created_at],
        )?;
        Ok(())
    }

    /// Fetch a provenance chain by id
    pub fn get_provenance(&self, provenance_id: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.reader()?;
        let chain: Option<String> = conn
            .query_row(
                "SELECT chain FROM provenance_chains WHERE id = ?1",
                params![provenance_id],
                |row| row.get(0),
            )
            .optional()?;

        match chain {
            Some(raw) => {
                let value = serde_json::from_str(&raw).map_err(|e| {
                    EngineError::Init(format!("corrupt provenance chain {}: {}", provenance_id, e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // VECTOR BLOBS
    // ========================================================================

    /// Load all stored vectors as (embedding_id, vector) pairs. Rows whose
    /// blob length disagrees with the declared dimensions are skipped with a
    /// warning rather than failing the whole load.
    pub fn load_vectors(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT id, vector, dimensions FROM embeddings")?;

        let rows: Vec<(String, Vec<u8>, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let mut vectors = Vec::with_capacity(rows.len());
        for (id, blob, dimensions) in rows {
            match blob_to_vector(&blob) {
                Some(v) if v.len() == dimensions as usize => vectors.push((id, v)),
                _ => {
                    tracing::warn!("Skipping embedding {} with malformed vector blob", id);
                }
            }
        }

        Ok(vectors)
    }

    // ========================================================================
    // FULL-TEXT SEARCH
    // ========================================================================

    /// FTS5 reports MATCH expression problems as statement-step errors, after
    /// the query has already started producing rows. Surface those as invalid
    /// input so "cannot search" is never mistaken for "no results".
    fn map_fts_error(err: rusqlite::Error) -> EngineError {
        if let rusqlite::Error::SqliteFailure(_, Some(message)) = &err {
            if message.contains("fts5") || message.contains("unterminated string") {
                return EngineError::InvalidInput(format!(
                    "malformed match expression: {}",
                    message
                ));
            }
        }
        EngineError::Database(err)
    }

    /// Probe for a required index table, mapping absence to a schema error
    /// instead of an opaque SQL failure.
    fn ensure_index(conn: &Connection, table: &str) -> Result<()> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(EngineError::IndexUnavailable(format!(
                "FTS index '{}' is missing; apply migrations or rebuild the index",
                table
            )));
        }
        Ok(())
    }

    /// BM25 search over chunk text. `match_expr` must already be sanitized.
    /// Ranks are 1-based in returned order; scores are negated FTS5 rank so
    /// higher is better.
    pub fn search_chunk_fts(
        &self,
        match_expr: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<RankedResult>> {
        let conn = self.reader()?;
        Self::ensure_index(&conn, "chunk_fts")?;

        let mut stmt = conn.prepare(
            "SELECT e.id, c.document_id, c.id, c.text, -chunk_fts.rank,
                    c.page_number, c.char_start, c.char_end, c.quality_score,
                    c.heading, c.section_path,
                    d.file_path, d.file_name, d.content_type,
                    p.id, e.content_hash
             FROM chunk_fts
             JOIN chunks c ON c.id = chunk_fts.id
             JOIN documents d ON d.id = c.document_id
             JOIN embeddings e ON e.chunk_id = c.id
             LEFT JOIN provenance_chains p ON p.document_id = c.document_id
             WHERE chunk_fts MATCH ?1
               AND (?2 IS NULL OR c.document_id = ?2)
               AND (?3 IS NULL OR (c.quality_score IS NOT NULL AND c.quality_score >= ?3))
             ORDER BY chunk_fts.rank
             LIMIT ?4",
        )?;

        let mut results: Vec<RankedResult> = stmt
            .query_map(
                params![match_expr, filters.document_id, filters.min_quality, limit as i64],
                |row| {
                    Ok(RankedResult {
                        embedding_id: row.get(0)?,
                        document_id: row.get(1)?,
                        chunk_id: Some(row.get(2)?),
                        image_id: None,
                        text: row.get(3)?,
                        score: row.get(4)?,
                        rank: 0,
                        result_type: ResultType::Chunk,
                        page_number: row.get(5)?,
                        char_start: row.get(6)?,
                        char_end: row.get(7)?,
                        quality_score: row.get(8)?,
                        heading: row.get(9)?,
                        section_path: row.get(10)?,
                        source_file_path: row.get(11)?,
                        source_file_name: row.get(12)?,
                        content_type: row.get(13)?,
                        provenance_id: row.get(14)?,
                        content_hash: row.get(15)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Self::map_fts_error)?;

        for (i, result) in results.iter_mut().enumerate() {
            result.rank = i + 1;
        }

        Ok(results)
    }

    /// BM25 search over VLM image descriptions
    pub fn search_image_fts(
        &self,
        match_expr: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<RankedResult>> {
        let conn = self.reader()?;
        Self::ensure_index(&conn, "image_fts")?;

        let mut stmt = conn.prepare(
            "SELECT e.id, i.document_id, i.id, i.vlm_description, -image_fts.rank,
                    i.page_number, i.quality_score,
                    d.file_path, d.file_name, d.content_type,
                    p.id, e.content_hash
             FROM image_fts
             JOIN images i ON i.id = image_fts.id
             JOIN documents d ON d.id = i.document_id
             JOIN embeddings e ON e.image_id = i.id
             LEFT JOIN provenance_chains p ON p.document_id = i.document_id
             WHERE image_fts MATCH ?1
               AND (?2 IS NULL OR i.document_id = ?2)
               AND (?3 IS NULL OR (i.quality_score IS NOT NULL AND i.quality_score >= ?3))
             ORDER BY image_fts.rank
             LIMIT ?4",
        )?;

        let mut results: Vec<RankedResult> = stmt
            .query_map(
                params![match_expr, filters.document_id, filters.min_quality, limit as i64],
                |row| {
                    let description: Option<String> = row.get(3)?;
                    Ok(RankedResult {
                        embedding_id: row.get(0)?,
                        document_id: row.get(1)?,
                        chunk_id: None,
                        image_id: Some(row.get(2)?),
                        text: description.unwrap_or_default(),
                        score: row.get(4)?,
                        rank: 0,
                        result_type: ResultType::Vlm,
                        page_number: row.get(5)?,
                        char_start: None,
                        char_end: None,
                        quality_score: row.get(6)?,
                        heading: None,
                        section_path: None,
                        source_file_path: row.get(7)?,
                        source_file_name: row.get(8)?,
                        content_type: row.get(9)?,
                        provenance_id: row.get(10)?,
                        content_hash: row.get(11)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Self::map_fts_error)?;

        for (i, result) in results.iter_mut().enumerate() {
            result.rank = i + 1;
        }

        Ok(results)
    }

    /// Number of chunk rows matching an expression and filters, independent
    /// of any fetch limit. Pairs with [`Self::search_chunk_fts`] so paginated
    /// responses can report the real qualifying-row count.
    pub fn count_chunk_fts(&self, match_expr: &str, filters: &SearchFilters) -> Result<usize> {
        let conn = self.reader()?;
        Self::ensure_index(&conn, "chunk_fts")?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*)
                 FROM chunk_fts
                 JOIN chunks c ON c.id = chunk_fts.id
                 JOIN embeddings e ON e.chunk_id = c.id
                 WHERE chunk_fts MATCH ?1
                   AND (?2 IS NULL OR c.document_id = ?2)
                   AND (?3 IS NULL OR (c.quality_score IS NOT NULL AND c.quality_score >= ?3))",
                params![match_expr, filters.document_id, filters.min_quality],
                |row| row.get(0),
            )
            .map_err(Self::map_fts_error)?;

        Ok(count as usize)
    }

    /// Number of image rows matching an expression and filters, independent
    /// of any fetch limit
    pub fn count_image_fts(&self, match_expr: &str, filters: &SearchFilters) -> Result<usize> {
        let conn = self.reader()?;
        Self::ensure_index(&conn, "image_fts")?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*)
                 FROM image_fts
                 JOIN images i ON i.id = image_fts.id
                 JOIN embeddings e ON e.image_id = i.id
                 WHERE image_fts MATCH ?1
                   AND (?2 IS NULL OR i.document_id = ?2)
                   AND (?3 IS NULL OR (i.quality_score IS NOT NULL AND i.quality_score >= ?3))",
                params![match_expr, filters.document_id, filters.min_quality],
                |row| row.get(0),
            )
            .map_err(Self::map_fts_error)?;

        Ok(count as usize)
    }

    // ========================================================================
    // SEMANTIC HIT HYDRATION
    // ========================================================================

    /// Hydrate a vector-index hit into a full result. Rank and score are
    /// filled in by the caller; `None` means the embedding row vanished
    /// between index load and lookup.
    pub fn hydrate_embedding(&self, embedding_id: &str) -> Result<Option<RankedResult>> {
        let conn = self.reader()?;

        let row = conn
            .query_row(
                "SELECT e.source, e.chunk_id, e.image_id, e.document_id, e.original_text,
                        e.content_hash,
                        d.file_path, d.file_name, d.content_type,
                        c.text, c.page_number, c.char_start, c.char_end, c.quality_score,
                        c.heading, c.section_path,
                        i.vlm_description, i.page_number, i.quality_score,
                        p.id
                 FROM embeddings e
                 JOIN documents d ON d.id = e.document_id
                 LEFT JOIN chunks c ON c.id = e.chunk_id
                 LEFT JOIN images i ON i.id = e.image_id
                 LEFT JOIN provenance_chains p ON p.document_id = e.document_id
                 WHERE e.id = ?1",
                params![embedding_id],
                |row| {
                    let source: String = row.get(0)?;
                    let chunk_id: Option<String> = row.get(1)?;
                    let image_id: Option<String> = row.get(2)?;
                    let original_text: String = row.get(4)?;
                    let chunk_text: Option<String> = row.get(9)?;
                    let vlm_description: Option<String> = row.get(16)?;

                    let kind = SourceKind::parse_name(&source);
                    let (text, result_type, page, quality) = match kind {
                        Some(SourceKind::Image) => (
                            vlm_description.unwrap_or(original_text),
                            ResultType::Vlm,
                            row.get::<_, Option<i64>>(17)?,
                            row.get::<_, Option<f64>>(18)?,
                        ),
                        _ => (
                            chunk_text.unwrap_or(original_text),
                            ResultType::Chunk,
                            row.get::<_, Option<i64>>(10)?,
                            row.get::<_, Option<f64>>(13)?,
                        ),
                    };

                    Ok(RankedResult {
                        embedding_id: embedding_id.to_string(),
                        document_id: row.get(3)?,
                        chunk_id,
                        image_id,
                        text,
                        score: 0.0,
                        rank: 0,
                        result_type,
                        page_number: page,
                        char_start: row.get(11)?,
                        char_end: row.get(12)?,
                        quality_score: quality,
                        heading: row.get(14)?,
                        section_path: row.get(15)?,
                        source_file_path: row.get(6)?,
                        source_file_name: row.get(7)?,
                        content_type: row.get(8)?,
                        provenance_id: row.get(19)?,
                        content_hash: row.get(5)?,
                    })
                },
            )
            .optional()?;

        Ok(row)
    }

    // ========================================================================
    // REBUILD AND STATUS
    // ========================================================================

    fn count(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
        // Table names come from const strings, never caller input
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
    }

    /// Current per-index row counts
    pub fn index_counts(&self) -> Result<IndexCounts> {
        let conn = self.reader()?;
        Ok(IndexCounts {
            chunks: Self::count(&conn, "chunks")?,
            images: Self::count(&conn, "images")?,
            vectors: Self::count(&conn, "embeddings")?,
        })
    }

    /// Force a full resync of both FTS indexes from their base tables and
    /// return counts plus a corpus content hash.
    pub fn rebuild_fts(&self) -> Result<RebuildReport> {
        let started = Instant::now();
        let now = Utc::now();

        {
            let conn = self.writer()?;
            Self::ensure_index(&conn, "chunk_fts")?;
            Self::ensure_index(&conn, "image_fts")?;
            conn.execute_batch(
                "INSERT INTO chunk_fts(chunk_fts) VALUES('rebuild');
                 INSERT INTO image_fts(image_fts) VALUES('rebuild');",
            )?;
            conn.execute(
                "INSERT INTO engine_meta (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
                params![META_LAST_REBUILD, now.to_rfc3339(), now],
            )?;
        }

        let counts = self.index_counts()?;
        let content_hash = self.corpus_hash()?;
        let duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            chunks = counts.chunks,
            images = counts.images,
            vectors = counts.vectors,
            duration_ms,
            "Rebuilt search indexes"
        );

        Ok(RebuildReport {
            counts_by_index: counts,
            duration_ms,
            content_hash,
        })
    }

    /// Digest over the indexed corpus, ordered by id so the hash is stable
    /// across rebuilds of identical content.
    fn corpus_hash(&self) -> Result<String> {
        let conn = self.reader()?;
        let mut hasher = Sha256::new();

        let mut stmt = conn.prepare("SELECT id, text FROM chunks ORDER BY id")?;
        let chunk_rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in chunk_rows {
            let (id, text) = row?;
            hasher.update(id.as_bytes());
            hasher.update([0x1f]);
            hasher.update(text.as_bytes());
            hasher.update([0x1e]);
        }

        let mut stmt = conn.prepare(
            "SELECT id, COALESCE(vlm_description, '') FROM images ORDER BY id",
        )?;
        let image_rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in image_rows {
            let (id, description) = row?;
            hasher.update(id.as_bytes());
            hasher.update([0x1f]);
            hasher.update(description.as_bytes());
            hasher.update([0x1e]);
        }

        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    /// Index configuration and freshness for the status endpoint
    pub fn index_status(&self) -> Result<IndexStatus> {
        let counts = self.index_counts()?;

        let conn = self.reader()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM engine_meta WHERE key = ?1",
                params![META_LAST_REBUILD],
                |row| row.get(0),
            )
            .optional()?;

        let last_rebuild_at = raw
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(IndexStatus {
            tokenizer: super::migrations::FTS_TOKENIZER.to_string(),
            counts_by_index: counts,
            last_rebuild_at,
        })
    }
}

// ============================================================================
// BLOB HELPERS
// ============================================================================

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    let mut vector = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        vector.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Some(vector)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(Some(dir.path().join("test.db"))).unwrap();
        (storage, dir)
    }

    fn seed_chunk(storage: &Storage, text: &str, quality: Option<f64>) -> (String, String) {
        let doc = DocumentRecord::new("/tmp/case.pdf", "case.pdf");
        storage.insert_document(&doc).unwrap();

        let mut chunk = ChunkRecord::new(&doc.id, text);
        chunk.quality_score = quality;
        storage.insert_chunk(&chunk).unwrap();

        let emb = EmbeddingRecord::for_chunk(&chunk);
        storage.insert_embedding(&emb, &vec![0.1; 768]).unwrap();

        (doc.id, emb.id)
    }

    #[test]
    fn test_fts_search_finds_inserted_chunk() {
        let (storage, _dir) = test_storage();
        seed_chunk(&storage, "the plaintiff suffered a spinal injury", None);

        let results = storage
            .search_chunk_fts("injury", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[0].result_type, ResultType::Chunk);
        assert!(results[0].chunk_id.is_some());
        assert!(results[0].score.is_finite());
    }

    #[test]
    fn test_porter_stemming_matches_inflected_form() {
        let (storage, _dir) = test_storage();
        seed_chunk(&storage, "the contracts were signed in March", None);

        let results = storage
            .search_chunk_fts("contract", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_quality_filter_excludes_null_and_low() {
        let (storage, _dir) = test_storage();
        seed_chunk(&storage, "contract dispute alpha", Some(4.5));
        seed_chunk(&storage, "contract dispute beta", Some(1.0));
        seed_chunk(&storage, "contract dispute gamma", None);

        let filters = SearchFilters {
            min_quality: Some(3.0),
            ..Default::default()
        };
        let results = storage.search_chunk_fts("contract", &filters, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].quality_score, Some(4.5));
    }

    #[test]
    fn test_boundary_quality_passes() {
        let (storage, _dir) = test_storage();
        seed_chunk(&storage, "boundary contract", Some(3.0));

        let filters = SearchFilters {
            min_quality: Some(3.0),
            ..Default::default()
        };
        let results = storage.search_chunk_fts("contract", &filters, 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_document_filter() {
        let (storage, _dir) = test_storage();
        let (doc_a, _) = seed_chunk(&storage, "contract in document a", None);
        seed_chunk(&storage, "contract in document b", None);

        let filters = SearchFilters {
            document_id: Some(doc_a.clone()),
            ..Default::default()
        };
        let results = storage.search_chunk_fts("contract", &filters, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, doc_a);
    }

    #[test]
    fn test_image_fts_returns_vlm_results() {
        let (storage, _dir) = test_storage();
        let doc = DocumentRecord::new("/tmp/scan.pdf", "scan.pdf");
        storage.insert_document(&doc).unwrap();

        let image = ImageRecord::new(&doc.id, "an x-ray showing a fractured femur");
        storage.insert_image(&image).unwrap();
        let emb = EmbeddingRecord::for_image(&image);
        storage.insert_embedding(&emb, &vec![0.2; 768]).unwrap();

        let results = storage
            .search_image_fts("fractured", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result_type, ResultType::Vlm);
        assert!(results[0].chunk_id.is_none());
        assert!(results[0].image_id.is_some());
    }

    #[test]
    fn test_fts_stays_in_sync_after_update() {
        let (storage, _dir) = test_storage();
        let doc = DocumentRecord::new("/tmp/a.pdf", "a.pdf");
        storage.insert_document(&doc).unwrap();
        let chunk = ChunkRecord::new(&doc.id, "original wording");
        storage.insert_chunk(&chunk).unwrap();
        let emb = EmbeddingRecord::for_chunk(&chunk);
        storage.insert_embedding(&emb, &vec![0.3; 768]).unwrap();

        {
            let conn = storage.writer().unwrap();
            conn.execute(
                "UPDATE chunks SET text = 'revised settlement language' WHERE id = ?1",
                params![chunk.id],
            )
            .unwrap();
        }

        let stale = storage
            .search_chunk_fts("wording", &SearchFilters::default(), 10)
            .unwrap();
        assert!(stale.is_empty());

        let fresh = storage
            .search_chunk_fts("settlement", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_missing_fts_table_is_index_unavailable() {
        let (storage, _dir) = test_storage();
        seed_chunk(&storage, "some indexed text", None);

        {
            let conn = storage.writer().unwrap();
            conn.execute_batch(
                "DROP TRIGGER chunks_ai;
                 DROP TRIGGER chunks_ad;
                 DROP TRIGGER chunks_au;
                 DROP TABLE chunk_fts;",
            )
            .unwrap();
        }

        let err = storage
            .search_chunk_fts("text", &SearchFilters::default(), 10)
            .unwrap_err();
        assert!(matches!(err, EngineError::IndexUnavailable(_)));
    }

    #[test]
    fn test_malformed_match_expression_is_invalid_input() {
        let (storage, _dir) = test_storage();
        seed_chunk(&storage, "the contract was signed", None);

        for expr in ["AND contract", "contract AND AND signed", "\"unbalanced"] {
            let err = storage
                .search_chunk_fts(expr, &SearchFilters::default(), 10)
                .unwrap_err();
            assert!(matches!(err, EngineError::InvalidInput(_)), "{}", expr);
        }

        let err = storage
            .search_image_fts("AND scan", &SearchFilters::default(), 10)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        let err = storage
            .count_chunk_fts("AND contract", &SearchFilters::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        // The same corpus is still searchable with a well-formed expression
        let results = storage
            .search_chunk_fts("contract", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_count_matches_search_predicates() {
        let (storage, _dir) = test_storage();
        seed_chunk(&storage, "contract dispute alpha", Some(4.5));
        seed_chunk(&storage, "contract dispute beta", Some(1.0));
        seed_chunk(&storage, "contract dispute gamma", None);

        let all = storage
            .count_chunk_fts("contract", &SearchFilters::default())
            .unwrap();
        assert_eq!(all, 3);

        let filters = SearchFilters {
            min_quality: Some(3.0),
            ..Default::default()
        };
        assert_eq!(storage.count_chunk_fts("contract", &filters).unwrap(), 1);

        // Unaffected by the search fetch limit
        let fetched = storage
            .search_chunk_fts("contract", &SearchFilters::default(), 2)
            .unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(all, 3);
    }

    #[test]
    fn test_digit_query_does_not_match_row_ids() {
        let (storage, _dir) = test_storage();
        let doc = DocumentRecord::new("/tmp/a.pdf", "a.pdf");
        storage.insert_document(&doc).unwrap();

        let mut chunk = ChunkRecord::new(&doc.id, "contract text without numbers");
        chunk.id = "123456789".to_string();
        storage.insert_chunk(&chunk).unwrap();
        storage
            .insert_embedding(&EmbeddingRecord::for_chunk(&chunk), &vec![0.1; 768])
            .unwrap();

        let results = storage
            .search_chunk_fts("123456789", &SearchFilters::default(), 10)
            .unwrap();
        assert!(results.is_empty());

        // The id column still joins back to the base table
        let results = storage
            .search_chunk_fts("contract", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id.as_deref(), Some("123456789"));
    }

    #[test]
    fn test_zero_matches_is_ok_not_error() {
        let (storage, _dir) = test_storage();
        seed_chunk(&storage, "completely unrelated content", None);

        let results = storage
            .search_chunk_fts("zeppelin", &SearchFilters::default(), 10)
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_embedding_dimension_mismatch_rejected() {
        let (storage, _dir) = test_storage();
        let doc = DocumentRecord::new("/tmp/a.pdf", "a.pdf");
        storage.insert_document(&doc).unwrap();
        let chunk = ChunkRecord::new(&doc.id, "text");
        storage.insert_chunk(&chunk).unwrap();

        let emb = EmbeddingRecord::for_chunk(&chunk);
        let err = storage.insert_embedding(&emb, &vec![0.1; 3]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_load_vectors_round_trips() {
        let (storage, _dir) = test_storage();
        let (_, embedding_id) = seed_chunk(&storage, "vector round trip", None);

        let vectors = storage.load_vectors().unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].0, embedding_id);
        assert_eq!(vectors[0].1.len(), 768);
        assert!((vectors[0].1[0] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_hydrate_embedding() {
        let (storage, _dir) = test_storage();
        let (doc_id, embedding_id) = seed_chunk(&storage, "hydration target", None);

        let result = storage.hydrate_embedding(&embedding_id).unwrap().unwrap();
        assert_eq!(result.embedding_id, embedding_id);
        assert_eq!(result.document_id, doc_id);
        assert_eq!(result.text, "hydration target");
        assert_eq!(result.result_type, ResultType::Chunk);

        assert!(storage.hydrate_embedding("no-such-id").unwrap().is_none());
    }

    #[test]
    fn test_rebuild_and_status() {
        let (storage, _dir) = test_storage();
        seed_chunk(&storage, "rebuild me", None);

        let report = storage.rebuild_fts().unwrap();
        assert_eq!(report.counts_by_index.chunks, 1);
        assert_eq!(report.counts_by_index.images, 0);
        assert_eq!(report.counts_by_index.vectors, 1);
        assert!(report.content_hash.starts_with("sha256:"));

        let status = storage.index_status().unwrap();
        assert_eq!(status.tokenizer, "porter ascii");
        assert_eq!(status.counts_by_index.chunks, 1);
        assert!(status.last_rebuild_at.is_some());

        // Identical corpus hashes identically
        let report2 = storage.rebuild_fts().unwrap();
        assert_eq!(report.content_hash, report2.content_hash);
    }

    #[test]
    fn test_provenance_round_trip() {
        let (storage, _dir) = test_storage();
        let doc = DocumentRecord::new("/tmp/a.pdf", "a.pdf");
        storage.insert_document(&doc).unwrap();

        let chain = serde_json::json!([
            {"step": "extract", "tool": "ocr", "at": "2026-01-10T00:00:00Z"},
            {"step": "chunk", "at": "2026-01-10T00:00:05Z"},
        ]);
        let rec = ProvenanceRecord::new(&doc.id, chain.clone());
        storage.insert_provenance(&rec).unwrap();

        let loaded = storage.get_provenance(&rec.id).unwrap().unwrap();
        assert_eq!(loaded, chain);
        assert!(storage.get_provenance("missing").unwrap().is_none());
    }
}
