//! Vector Similarity Search
//!
//! USearch HNSW index over the stored embedding vectors, keyed by
//! embedding id. SQLite is the source of truth; this index is rebuilt from
//! it at startup and on explicit rebuild, so it never persists itself.

use std::collections::HashMap;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::error::{EngineError, Result};
use crate::storage::Storage;

/// Embedding dimensions for nomic-embed-text-v1.5
pub const EMBEDDING_DIMENSIONS: usize = 768;

/// HNSW connectivity parameter (higher = better recall, more memory)
const CONNECTIVITY: usize = 16;

/// HNSW expansion factor for index building
const EXPANSION_ADD: usize = 128;

/// HNSW expansion factor for search (higher = better recall, slower)
const EXPANSION_SEARCH: usize = 64;

/// HNSW vector index keyed by embedding id
pub struct VectorStore {
    index: Index,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

impl VectorStore {
    /// Create an empty index
    pub fn new() -> Result<Self> {
        let options = IndexOptions {
            dimensions: EMBEDDING_DIMENSIONS,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: CONNECTIVITY,
            expansion_add: EXPANSION_ADD,
            expansion_search: EXPANSION_SEARCH,
            multi: false,
        };

        let index = Index::new(&options)
            .map_err(|e| EngineError::Vector(format!("Index creation failed: {}", e)))?;

        Ok(Self {
            index,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    /// Build an index from every vector in storage
    pub fn load_from(storage: &Storage) -> Result<Self> {
        let mut store = Self::new()?;
        let vectors = storage.load_vectors()?;
        store.reserve(vectors.len().max(16))?;

        for (embedding_id, vector) in vectors {
            if let Err(e) = store.add(&embedding_id, &vector) {
                tracing::warn!("Failed to index embedding {}: {}", embedding_id, e);
            }
        }

        tracing::debug!(vectors = store.len(), "Loaded vector index from storage");
        Ok(store)
    }

    /// Get the number of vectors in the index
    pub fn len(&self) -> usize {
        self.index.size()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserve capacity. Must be called before adding vectors; usearch
    /// requires capacity ahead of add().
    pub fn reserve(&self, capacity: usize) -> Result<()> {
        self.index
            .reserve(capacity)
            .map_err(|e| EngineError::Vector(format!("Failed to reserve capacity: {}", e)))
    }

    fn check_dimensions(vector: &[f32]) -> Result<()> {
        if vector.len() != EMBEDDING_DIMENSIONS {
            return Err(EngineError::InvalidInput(format!(
                "expected {} dimensions, got {}",
                EMBEDDING_DIMENSIONS,
                vector.len()
            )));
        }
        Ok(())
    }

    /// Add a vector keyed by embedding id. Re-adding a key replaces its
    /// vector.
    pub fn add(&mut self, embedding_id: &str, vector: &[f32]) -> Result<()> {
        Self::check_dimensions(vector)?;

        if let Some(&existing_id) = self.key_to_id.get(embedding_id) {
            self.index
                .remove(existing_id)
                .map_err(|e| EngineError::Vector(format!("Failed to replace vector: {}", e)))?;
            self.reserve(self.index.size() + 1)?;
            self.index
                .add(existing_id, vector)
                .map_err(|e| EngineError::Vector(format!("Failed to add vector: {}", e)))?;
            return Ok(());
        }

        let current_capacity = self.index.capacity();
        let current_size = self.index.size();
        if current_size >= current_capacity {
            let new_capacity = std::cmp::max(current_capacity * 2, 16);
            self.reserve(new_capacity)?;
        }

        let id = self.next_id;
        self.next_id += 1;

        self.index
            .add(id, vector)
            .map_err(|e| EngineError::Vector(format!("Failed to add vector: {}", e)))?;

        self.key_to_id.insert(embedding_id.to_string(), id);
        self.id_to_key.insert(id, embedding_id.to_string());

        Ok(())
    }

    /// Remove a vector by embedding id
    pub fn remove(&mut self, embedding_id: &str) -> Result<bool> {
        if let Some(id) = self.key_to_id.remove(embedding_id) {
            self.id_to_key.remove(&id);
            self.index
                .remove(id)
                .map_err(|e| EngineError::Vector(format!("Failed to remove vector: {}", e)))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Check if an embedding id is indexed
    pub fn contains(&self, embedding_id: &str) -> bool {
        self.key_to_id.contains_key(embedding_id)
    }

    /// Nearest neighbors as (embedding_id, cosine similarity) pairs, most
    /// similar first. Similarity is 1 - cosine distance.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        Self::check_dimensions(query)?;

        if self.is_empty() {
            return Ok(vec![]);
        }

        let matches = self
            .index
            .search(query, limit)
            .map_err(|e| EngineError::Vector(format!("Search failed: {}", e)))?;

        let mut results = Vec::with_capacity(matches.keys.len());
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            if let Some(embedding_id) = self.id_to_key.get(key) {
                results.push((embedding_id.clone(), 1.0 - distance));
            }
        }

        Ok(results)
    }

    /// Search with a minimum similarity threshold
    pub fn search_with_threshold(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(String, f32)>> {
        let results = self.search(query, limit)?;
        Ok(results
            .into_iter()
            .filter(|(_, score)| *score >= min_similarity)
            .collect())
    }
}
