//! Storage Module
//!
//! SQLite-based storage layer with:
//! - FTS5 full-text search over chunks and VLM descriptions
//! - Embedded vector storage (metadata + raw f32 blobs)
//! - Provenance chain persistence
//! - Trigger-synced search indexes with explicit rebuild support

mod migrations;
mod sqlite;

pub use migrations::{FTS_TOKENIZER, MIGRATIONS};
pub use sqlite::{IndexCounts, IndexStatus, RebuildReport, Storage};
