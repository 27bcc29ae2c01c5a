//! Database Migrations
//!
//! Schema migration definitions for the storage layer. The FTS5 tables are
//! external-content tables kept in sync by triggers, so collaborating writers
//! only ever touch the base tables.

/// Tokenizer used by both FTS5 indexes. Reported by the status endpoint so
/// collaborators can tell whether stemming is active.
pub const FTS_TOKENIZER: &str = "porter ascii";

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: documents, chunks, images, embeddings, provenance, FTS5",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "FTS5 porter tokenizer upgrade for stemmed keyword recall",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Exclude row ids from FTS indexing so digit queries cannot match UUID fragments",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    file_name TEXT NOT NULL,
    content_type TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_file_name ON documents(file_name);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    text TEXT NOT NULL,
    char_start INTEGER NOT NULL,
    char_end INTEGER NOT NULL,
    page_number INTEGER,
    quality_score REAL,
    heading TEXT,
    section_path TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_chunks_quality ON chunks(quality_score);

CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    page_number INTEGER,
    vlm_description TEXT,
    quality_score REAL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_images_document ON images(document_id);
CREATE INDEX IF NOT EXISTS idx_images_quality ON images(quality_score);

-- Embedding metadata plus the raw vector (little-endian f32 blob).
-- Exactly one of chunk_id/image_id is set for chunk/image sources;
-- extraction-level embeddings set neither.
CREATE TABLE IF NOT EXISTS embeddings (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    chunk_id TEXT REFERENCES chunks(id) ON DELETE CASCADE,
    image_id TEXT REFERENCES images(id) ON DELETE CASCADE,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    original_text TEXT NOT NULL,
    content_hash TEXT,
    vector BLOB NOT NULL,
    dimensions INTEGER NOT NULL DEFAULT 768,
    model TEXT NOT NULL DEFAULT 'nomic-embed-text-v1.5',
    created_at TEXT NOT NULL,
    CHECK (
        (source = 'chunk' AND chunk_id IS NOT NULL AND image_id IS NULL) OR
        (source = 'image' AND image_id IS NOT NULL AND chunk_id IS NULL) OR
        (source = 'extraction' AND chunk_id IS NULL AND image_id IS NULL)
    )
);

CREATE INDEX IF NOT EXISTS idx_embeddings_chunk ON embeddings(chunk_id);
CREATE INDEX IF NOT EXISTS idx_embeddings_image ON embeddings(image_id);
CREATE INDEX IF NOT EXISTS idx_embeddings_document ON embeddings(document_id);

-- Provenance chains: ordered pipeline step records, stored as JSON
CREATE TABLE IF NOT EXISTS provenance_chains (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    chain TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_provenance_document ON provenance_chains(document_id);

-- FTS5 virtual tables for full-text search
CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts USING fts5(
    id,
    text,
    content='chunks',
    content_rowid='rowid'
);

CREATE VIRTUAL TABLE IF NOT EXISTS image_fts USING fts5(
    id,
    vlm_description,
    content='images',
    content_rowid='rowid'
);

-- Triggers to keep FTS in sync
CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunk_fts(rowid, id, text)
    VALUES (NEW.rowid, NEW.id, NEW.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunk_fts(chunk_fts, rowid, id, text)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunk_fts(chunk_fts, rowid, id, text)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.text);
    INSERT INTO chunk_fts(rowid, id, text)
    VALUES (NEW.rowid, NEW.id, NEW.text);
END;

CREATE TRIGGER IF NOT EXISTS images_ai AFTER INSERT ON images BEGIN
    INSERT INTO image_fts(rowid, id, vlm_description)
    VALUES (NEW.rowid, NEW.id, NEW.vlm_description);
END;

CREATE TRIGGER IF NOT EXISTS images_ad AFTER DELETE ON images BEGIN
    INSERT INTO image_fts(image_fts, rowid, id, vlm_description)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.vlm_description);
END;

CREATE TRIGGER IF NOT EXISTS images_au AFTER UPDATE ON images BEGIN
    INSERT INTO image_fts(image_fts, rowid, id, vlm_description)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.vlm_description);
    INSERT INTO image_fts(rowid, id, vlm_description)
    VALUES (NEW.rowid, NEW.id, NEW.vlm_description);
END;

-- Engine metadata (last rebuild timestamp, etc.)
CREATE TABLE IF NOT EXISTS engine_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: FTS5 porter tokenizer upgrade (stemming improves keyword recall
/// noticeably on legal/medical corpora)
const MIGRATION_V2_UP: &str = r#"
DROP TRIGGER IF EXISTS chunks_ai;
DROP TRIGGER IF EXISTS chunks_ad;
DROP TRIGGER IF EXISTS chunks_au;
DROP TABLE IF EXISTS chunk_fts;

DROP TRIGGER IF EXISTS images_ai;
DROP TRIGGER IF EXISTS images_ad;
DROP TRIGGER IF EXISTS images_au;
DROP TABLE IF EXISTS image_fts;

CREATE VIRTUAL TABLE chunk_fts USING fts5(
    id, text,
    content='chunks',
    content_rowid='rowid',
    tokenize='porter ascii'
);

CREATE VIRTUAL TABLE image_fts USING fts5(
    id, vlm_description,
    content='images',
    content_rowid='rowid',
    tokenize='porter ascii'
);

-- Rebuild both indexes from existing data with the new tokenizer
INSERT INTO chunk_fts(chunk_fts) VALUES('rebuild');
INSERT INTO image_fts(image_fts) VALUES('rebuild');

-- Re-create sync triggers
CREATE TRIGGER chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunk_fts(rowid, id, text)
    VALUES (NEW.rowid, NEW.id, NEW.text);
END;

CREATE TRIGGER chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunk_fts(chunk_fts, rowid, id, text)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.text);
END;

CREATE TRIGGER chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunk_fts(chunk_fts, rowid, id, text)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.text);
    INSERT INTO chunk_fts(rowid, id, text)
    VALUES (NEW.rowid, NEW.id, NEW.text);
END;

CREATE TRIGGER images_ai AFTER INSERT ON images BEGIN
    INSERT INTO image_fts(rowid, id, vlm_description)
    VALUES (NEW.rowid, NEW.id, NEW.vlm_description);
END;

CREATE TRIGGER images_ad AFTER DELETE ON images BEGIN
    INSERT INTO image_fts(image_fts, rowid, id, vlm_description)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.vlm_description);
END;

CREATE TRIGGER images_au AFTER UPDATE ON images BEGIN
    INSERT INTO image_fts(image_fts, rowid, id, vlm_description)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.vlm_description);
    INSERT INTO image_fts(rowid, id, vlm_description)
    VALUES (NEW.rowid, NEW.id, NEW.vlm_description);
END;

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: the id column exists only to join back to the base tables; indexing
/// it let an all-digit query token match UUID hex fragments
const MIGRATION_V3_UP: &str = r#"
DROP TRIGGER IF EXISTS chunks_ai;
DROP TRIGGER IF EXISTS chunks_ad;
DROP TRIGGER IF EXISTS chunks_au;
DROP TABLE IF EXISTS chunk_fts;

DROP TRIGGER IF EXISTS images_ai;
DROP TRIGGER IF EXISTS images_ad;
DROP TRIGGER IF EXISTS images_au;
DROP TABLE IF EXISTS image_fts;

CREATE VIRTUAL TABLE chunk_fts USING fts5(
    id UNINDEXED, text,
    content='chunks',
    content_rowid='rowid',
    tokenize='porter ascii'
);

CREATE VIRTUAL TABLE image_fts USING fts5(
    id UNINDEXED, vlm_description,
    content='images',
    content_rowid='rowid',
    tokenize='porter ascii'
);

INSERT INTO chunk_fts(chunk_fts) VALUES('rebuild');
INSERT INTO image_fts(image_fts) VALUES('rebuild');

CREATE TRIGGER chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunk_fts(rowid, id, text)
    VALUES (NEW.rowid, NEW.id, NEW.text);
END;

CREATE TRIGGER chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunk_fts(chunk_fts, rowid, id, text)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.text);
END;

CREATE TRIGGER chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunk_fts(chunk_fts, rowid, id, text)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.text);
    INSERT INTO chunk_fts(rowid, id, text)
    VALUES (NEW.rowid, NEW.id, NEW.text);
END;

CREATE TRIGGER images_ai AFTER INSERT ON images BEGIN
    INSERT INTO image_fts(rowid, id, vlm_description)
    VALUES (NEW.rowid, NEW.id, NEW.vlm_description);
END;

CREATE TRIGGER images_ad AFTER DELETE ON images BEGIN
    INSERT INTO image_fts(image_fts, rowid, id, vlm_description)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.vlm_description);
END;

CREATE TRIGGER images_au AFTER UPDATE ON images BEGIN
    INSERT INTO image_fts(image_fts, rowid, id, vlm_description)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.vlm_description);
    INSERT INTO image_fts(rowid, id, vlm_description)
    VALUES (NEW.rowid, NEW.id, NEW.vlm_description);
END;

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // Use execute_batch to handle multi-statement SQL including triggers
            conn.execute_batch(migration.up)?;

            applied += 1;
        }
    }

    Ok(applied)
}
