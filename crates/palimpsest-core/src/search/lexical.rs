//! Lexical (BM25) Search
//!
//! Thin service over the FTS5 indexes in storage. Queries with explicit
//! boolean structure are sanitized and passed through as written; plain
//! queries get synonym expansion for recall. Either way nothing user-typed
//! reaches a MATCH expression unsanitized.

use std::sync::Arc;

use crate::document::{RankedResult, SearchFilters};
use crate::error::{EngineError, Result};
use crate::search::expand::{expand_query, sanitize_query};
use crate::storage::Storage;

/// BM25 search over chunk text and VLM image descriptions
pub struct LexicalIndex {
    storage: Arc<Storage>,
}

impl LexicalIndex {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Turn a raw user query into a safe MATCH expression. Queries that use
    /// boolean operators keep their structure; everything else is expanded
    /// with domain synonyms.
    fn build_match_expr(query: &str) -> Result<String> {
        let has_operators = query.split_whitespace().any(|t| {
            t.eq_ignore_ascii_case("AND")
                || t.eq_ignore_ascii_case("OR")
                || t.eq_ignore_ascii_case("NOT")
        });

        let expr = if has_operators {
            sanitize_query(query)
        } else {
            expand_query(query)
        };

        if expr.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "query contains no searchable terms".to_string(),
            ));
        }
        Ok(expr)
    }

    /// Search extracted text chunks. Results are best-first with 1-based
    /// ranks.
    pub fn search_chunks(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<RankedResult>> {
        let expr = Self::build_match_expr(query)?;
        tracing::debug!(query, expr = %expr, "Lexical chunk search");
        self.storage.search_chunk_fts(&expr, filters, limit)
    }

    /// Search VLM image descriptions only
    pub fn search_vlm(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<RankedResult>> {
        let expr = Self::build_match_expr(query)?;
        tracing::debug!(query, expr = %expr, "Lexical VLM search");
        self.storage.search_image_fts(&expr, filters, limit)
    }

    /// Number of qualifying rows across both indexes, ignoring any fetch
    /// limit. Lets paginated responses report the real match count.
    pub fn count_all(&self, query: &str, filters: &SearchFilters) -> Result<usize> {
        let expr = Self::build_match_expr(query)?;
        Ok(self.storage.count_chunk_fts(&expr, filters)?
            + self.storage.count_image_fts(&expr, filters)?)
    }

    /// Search both indexes and merge into one best-first list. BM25 scores
    /// from the two indexes share a scale (same tokenizer, same ranking
    /// function), so a straight merge by score is sound here in a way it
    /// is not across lexical and semantic sources.
    pub fn search_all(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<RankedResult>> {
        let expr = Self::build_match_expr(query)?;
        tracing::debug!(query, expr = %expr, "Lexical combined search");

        let mut merged = self.storage.search_chunk_fts(&expr, filters, limit)?;
        merged.extend(self.storage.search_image_fts(&expr, filters, limit)?);

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(limit);

        for (i, result) in merged.iter_mut().enumerate() {
            result.rank = i + 1;
        }

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{
        ChunkRecord, DocumentRecord, EmbeddingRecord, ImageRecord, ResultType,
    };
    use tempfile::TempDir;

    fn test_index() -> (LexicalIndex, Arc<Storage>, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(Some(dir.path().join("test.db"))).unwrap());
        (LexicalIndex::new(storage.clone()), storage, dir)
    }

    fn seed(storage: &Storage, chunk_text: &str, vlm_text: &str) {
        let doc = DocumentRecord::new("/tmp/case.pdf", "case.pdf");
        storage.insert_document(&doc).unwrap();

        let chunk = ChunkRecord::new(&doc.id, chunk_text);
        storage.insert_chunk(&chunk).unwrap();
        storage
            .insert_embedding(&EmbeddingRecord::for_chunk(&chunk), &vec![0.1; 768])
            .unwrap();

        let image = ImageRecord::new(&doc.id, vlm_text);
        storage.insert_image(&image).unwrap();
        storage
            .insert_embedding(&EmbeddingRecord::for_image(&image), &vec![0.2; 768])
            .unwrap();
    }

    #[test]
    fn test_synonym_expansion_widens_recall() {
        let (index, storage, _dir) = test_index();
        // Chunk says "wound", query says "injury"; the synonym table bridges
        seed(&storage, "a deep wound on the left arm", "unrelated diagram");

        let results = index
            .search_chunks("injury", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_boolean_query_passes_through() {
        let (index, storage, _dir) = test_index();
        seed(&storage, "injury claim", "irrelevant");
        seed(&storage, "injury with fraud allegations", "irrelevant");

        let results = index
            .search_chunks("injury NOT fraud", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].text.contains("claim"));
    }

    #[test]
    fn test_leading_not_is_stripped() {
        let (index, storage, _dir) = test_index();
        seed(&storage, "injury claim", "irrelevant");

        let results = index
            .search_chunks("NOT injury", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_stray_operators_are_repaired_not_silenced() {
        let (index, storage, _dir) = test_index();
        seed(&storage, "the contract was signed in triplicate", "irrelevant");

        let results = index
            .search_chunks("AND contract", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 1);

        let results = index
            .search_chunks("contract AND AND signed", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_count_all_ignores_fetch_limit() {
        let (index, storage, _dir) = test_index();
        seed(&storage, "first contract", "contract scan page one");
        seed(&storage, "second contract", "unrelated diagram");

        let hits = index
            .search_all("contract", &SearchFilters::default(), 1)
            .unwrap();
        assert_eq!(hits.len(), 1);

        let total = index.count_all("contract", &SearchFilters::default()).unwrap();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_unsearchable_query_is_invalid_input() {
        let (index, _storage, _dir) = test_index();
        let err = index
            .search_chunks("!!! ???", &SearchFilters::default(), 10)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        let err = index
            .search_chunks("", &SearchFilters::default(), 10)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_search_all_merges_and_reranks() {
        let (index, storage, _dir) = test_index();
        seed(
            &storage,
            "settlement agreement for the injured worker",
            "photo of the settlement paperwork",
        );

        let results = index
            .search_all("settlement", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 2);
        assert!(results[0].score >= results[1].score);
        assert!(results.iter().any(|r| r.result_type == ResultType::Chunk));
        assert!(results.iter().any(|r| r.result_type == ResultType::Vlm));
    }

    #[test]
    fn test_search_vlm_only_touches_images() {
        let (index, storage, _dir) = test_index();
        seed(&storage, "x-ray report text", "an x-ray of the spine");

        let results = index
            .search_vlm("spine", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|r| r.result_type == ResultType::Vlm));
    }
}
