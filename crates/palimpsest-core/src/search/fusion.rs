//! Reciprocal Rank Fusion
//!
//! Merges the BM25 and semantic result lists by rank position rather than by
//! score, which sidesteps the incomparable-score-scale problem entirely. Each
//! appearance of an embedding at 1-based rank r contributes 1/(K + r); items
//! found by both sources accumulate both contributions and rise.
//!
//! Identity is strictly the embedding id. VLM hits all share a NULL chunk id,
//! so keying on anything chunk-shaped would silently collapse distinct image
//! results into one.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::document::RankedResult;

/// RRF smoothing constant. 60 is the value from the original RRF paper
/// (Cormack et al. 2009) and works well without tuning.
pub const RRF_K: f64 = 60.0;

/// One fused result with its per-source bookkeeping
#[derive(Debug, Clone, Serialize)]
pub struct FusedResult {
    pub embedding_id: String,
    pub found_in_bm25: bool,
    pub found_in_semantic: bool,
    pub bm25_rank: Option<usize>,
    pub bm25_score: Option<f64>,
    pub semantic_rank: Option<usize>,
    pub semantic_score: Option<f64>,
    /// Sum of 1/(K + rank) over the sources that returned this embedding
    pub rrf_score: f64,
    /// Hydrated metadata carried through from whichever source saw it first
    pub payload: RankedResult,
}

impl FusedResult {
    fn seed(hit: &RankedResult) -> Self {
        Self {
            embedding_id: hit.embedding_id.clone(),
            found_in_bm25: false,
            found_in_semantic: false,
            bm25_rank: None,
            bm25_score: None,
            semantic_rank: None,
            semantic_score: None,
            rrf_score: 0.0,
            payload: hit.clone(),
        }
    }
}

/// Fuse a BM25 list and a semantic list into one ranking.
///
/// Input lists are assumed ordered best-first; ranks are their 1-based
/// positions. Ties in fused score break deterministically: first list, then
/// rank within it (stable sort over insertion order). At most `limit`
/// results are returned.
pub fn fuse(bm25: &[RankedResult], semantic: &[RankedResult], limit: usize) -> Vec<FusedResult> {
    let mut order: Vec<String> = Vec::with_capacity(bm25.len() + semantic.len());
    let mut map: HashMap<String, FusedResult> = HashMap::with_capacity(bm25.len() + semantic.len());

    for (i, hit) in bm25.iter().enumerate() {
        let rank = i + 1;
        let entry = map.entry(hit.embedding_id.clone()).or_insert_with(|| {
            order.push(hit.embedding_id.clone());
            FusedResult::seed(hit)
        });
        entry.found_in_bm25 = true;
        entry.bm25_rank = Some(rank);
        entry.bm25_score = Some(hit.score);
        entry.rrf_score += 1.0 / (RRF_K + rank as f64);
    }

    for (i, hit) in semantic.iter().enumerate() {
        let rank = i + 1;
        let entry = map.entry(hit.embedding_id.clone()).or_insert_with(|| {
            order.push(hit.embedding_id.clone());
            FusedResult::seed(hit)
        });
        entry.found_in_semantic = true;
        entry.semantic_rank = Some(rank);
        entry.semantic_score = Some(hit.score);
        entry.rrf_score += 1.0 / (RRF_K + rank as f64);
    }

    let mut fused: Vec<FusedResult> = order.into_iter().filter_map(|id| map.remove(&id)).collect();

    // Stable sort keeps first-list-then-rank insertion order for exact ties
    fused.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(Ordering::Equal)
    });
    fused.truncate(limit);

    tracing::debug!(fused = fused.len(), "Fused result lists");
    fused
}

/// Max-normalize a score list into (0, 1]. The best score maps to 1.0, so a
/// single-element list normalizes to exactly 1.0. Non-positive maxima leave
/// every score at 1.0 rather than dividing by zero.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max <= 0.0 || !max.is_finite() {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| s / max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ResultType;

    fn hit(embedding_id: &str, chunk_id: Option<&str>, score: f64, rank: usize) -> RankedResult {
        RankedResult {
            embedding_id: embedding_id.to_string(),
            document_id: "doc-1".to_string(),
            chunk_id: chunk_id.map(|s| s.to_string()),
            image_id: None,
            text: format!("text for {}", embedding_id),
            score,
            rank,
            result_type: ResultType::Chunk,
            source_file_path: None,
            source_file_name: None,
            page_number: None,
            char_start: None,
            char_end: None,
            quality_score: None,
            heading: None,
            section_path: None,
            content_type: None,
            provenance_id: None,
            content_hash: None,
        }
    }

    #[test]
    fn test_fuse_empty_lists() {
        let fused = fuse(&[], &[], 10);
        assert!(fused.is_empty());
    }

    #[test]
    fn test_overlap_accumulates_both_contributions() {
        // emb-a at rank 1 in BM25 and rank 2 in semantic
        let bm25 = vec![hit("emb-a", Some("c1"), 5.0, 1)];
        let semantic = vec![hit("emb-b", Some("c2"), 0.9, 1), hit("emb-a", Some("c1"), 0.8, 2)];

        let fused = fuse(&bm25, &semantic, 10);
        let a = fused.iter().find(|f| f.embedding_id == "emb-a").unwrap();

        let expected = 1.0 / 61.0 + 1.0 / 62.0;
        assert!((a.rrf_score - expected).abs() < 1e-12);
        assert!(a.found_in_bm25);
        assert!(a.found_in_semantic);
        assert_eq!(a.bm25_rank, Some(1));
        assert_eq!(a.semantic_rank, Some(2));
        assert_eq!(a.bm25_score, Some(5.0));
        assert_eq!(a.semantic_score, Some(0.8));

        // The overlap outranks the single-source hit
        assert_eq!(fused[0].embedding_id, "emb-a");
    }

    #[test]
    fn test_vlm_hits_with_null_chunk_id_stay_distinct() {
        // Three image hits, all chunk_id = NULL, distinct embedding ids
        let bm25 = vec![
            hit("emb-img-1", None, 3.0, 1),
            hit("emb-img-2", None, 2.0, 2),
            hit("emb-img-3", None, 1.0, 3),
        ];
        let fused = fuse(&bm25, &[], 10);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_disjoint_lists_preserve_all() {
        let bm25 = vec![hit("emb-a", Some("c1"), 2.0, 1)];
        let semantic = vec![hit("emb-b", Some("c2"), 0.9, 1)];

        let fused = fuse(&bm25, &semantic, 10);
        assert_eq!(fused.len(), 2);
        // Equal contributions (both rank 1): tie breaks to the first list
        assert_eq!(fused[0].embedding_id, "emb-a");
        assert_eq!(fused[1].embedding_id, "emb-b");
    }

    #[test]
    fn test_single_source_flags() {
        let semantic = vec![hit("emb-a", Some("c1"), 0.9, 1)];
        let fused = fuse(&[], &semantic, 10);
        assert_eq!(fused.len(), 1);
        assert!(!fused[0].found_in_bm25);
        assert!(fused[0].found_in_semantic);
        assert!(fused[0].bm25_rank.is_none());
        assert!((fused[0].rrf_score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_limit_truncates() {
        let bm25: Vec<RankedResult> = (0..10)
            .map(|i| hit(&format!("emb-{}", i), Some("c"), 10.0 - i as f64, i + 1))
            .collect();
        let fused = fuse(&bm25, &[], 3);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].embedding_id, "emb-0");

        assert!(fuse(&bm25, &[], 0).is_empty());
    }

    #[test]
    fn test_fused_order_is_by_rrf_score_desc() {
        let bm25 = vec![
            hit("emb-a", Some("c1"), 3.0, 1),
            hit("emb-b", Some("c2"), 2.0, 2),
        ];
        let semantic = vec![
            hit("emb-b", Some("c2"), 0.9, 1),
            hit("emb-c", Some("c3"), 0.8, 2),
        ];

        let fused = fuse(&bm25, &semantic, 10);
        assert_eq!(fused[0].embedding_id, "emb-b");
        for pair in fused.windows(2) {
            assert!(pair[0].rrf_score >= pair[1].rrf_score);
        }
    }

    #[test]
    fn test_normalize_singleton_is_one() {
        assert_eq!(normalize_scores(&[0.37]), vec![1.0]);
        assert_eq!(normalize_scores(&[42.0]), vec![1.0]);
    }

    #[test]
    fn test_normalize_preserves_order_and_tops_at_one() {
        let normalized = normalize_scores(&[8.0, 4.0, 2.0]);
        assert_eq!(normalized, vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }
}
