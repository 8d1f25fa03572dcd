//! SQLite metadata store: files, chunks, the embedding cache, and the LLM
//! summary cache (§4.5). Pooled connections, WAL mode, via `rusqlite` +
//! `r2d2`. The teacher stores its own index through `sqlx` (async,
//! dispatched onto a `tokio::Runtime` for sync callers); this crate's
//! pipeline is synchronous end to end (the HTTP surface is the only async
//! boundary, and it dispatches into the sync pipeline via
//! `spawn_blocking`), so a plain pooled-sync-connection store fits better
//! here than carrying an async driver just to immediately block on it.

use std::path::Path;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::error::StoreError;
use crate::models::{CodeChunk, StatusStats};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    repo_path TEXT NOT NULL,
    file_path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    last_indexed_at TEXT NOT NULL,
    PRIMARY KEY (repo_path, file_path)
);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id TEXT PRIMARY KEY,
    repo_path TEXT NOT NULL,
    file_path TEXT NOT NULL,
    language TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    symbol TEXT,
    symbol_kind TEXT,
    description TEXT NOT NULL,
    text TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    tokens INTEGER NOT NULL,
    keywords TEXT NOT NULL,
    symbol_terms TEXT NOT NULL,
    route_method TEXT,
    route_path TEXT,
    route_intent TEXT,
    route_resource TEXT,
    intent_tags TEXT NOT NULL DEFAULT '[]',
    structural_terms TEXT NOT NULL DEFAULT '[]',
    llm_summary TEXT
);

CREATE INDEX IF NOT EXISTS idx_chunks_repo_file ON chunks (repo_path, file_path);
CREATE INDEX IF NOT EXISTS idx_chunks_repo ON chunks (repo_path);

CREATE TABLE IF NOT EXISTS embeddings (
    content_hash TEXT PRIMARY KEY,
    dimension INTEGER NOT NULL,
    vector BLOB NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS repo_meta (
    repo_path TEXT PRIMARY KEY,
    last_indexed_at TEXT
);

CREATE TABLE IF NOT EXISTS llm_summaries (
    summary_key TEXT PRIMARY KEY,
    model TEXT NOT NULL,
    summary TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Thread-safe metadata store. Uses r2d2 pooling so the daemon can serve
/// concurrent queries while an index run holds a writer connection.
pub struct MetadataStore {
    pool: Pool<SqliteConnectionManager>,
}

/// Adds any of the documented `chunks` columns absent from an
/// already-existing database (spec §6): `CREATE TABLE IF NOT EXISTS`
/// only applies the full column list to a table it creates itself, so a
/// database carried over from an older schema version needs these added
/// explicitly before `row_to_chunk`'s unconditional `row.get(...)` calls
/// run against it.
fn migrate_chunks_columns(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(chunks)")?;
    let existing: std::collections::HashSet<String> =
        stmt.query_map([], |row| row.get::<_, String>(1))?.collect::<rusqlite::Result<_>>()?;

    const MISSING_COLUMN_DEFAULTS: &[(&str, &str)] = &[
        ("route_method", "TEXT"),
        ("route_path", "TEXT"),
        ("route_intent", "TEXT"),
        ("route_resource", "TEXT"),
        ("intent_tags", "TEXT NOT NULL DEFAULT '[]'"),
        ("structural_terms", "TEXT NOT NULL DEFAULT '[]'"),
        ("llm_summary", "TEXT"),
    ];

    for (column, definition) in MISSING_COLUMN_DEFAULTS {
        if !existing.contains(*column) {
            conn.execute(&format!("ALTER TABLE chunks ADD COLUMN {column} {definition}"), [])?;
        }
    }
    Ok(())
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<CodeChunk> {
    let keywords: String = row.get("keywords")?;
    let symbol_terms: String = row.get("symbol_terms")?;
    let intent_tags: String = row.get("intent_tags")?;
    let structural_terms: String = row.get("structural_terms")?;
    Ok(CodeChunk {
        chunk_id: row.get("chunk_id")?,
        repo_path: row.get("repo_path")?,
        file_path: row.get("file_path")?,
        language: row.get("language")?,
        start_line: row.get("start_line")?,
        end_line: row.get("end_line")?,
        symbol: row.get("symbol")?,
        symbol_kind: row.get("symbol_kind")?,
        description: row.get("description")?,
        text: row.get("text")?,
        content_hash: row.get("content_hash")?,
        tokens: row.get("tokens")?,
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        symbol_terms: serde_json::from_str(&symbol_terms).unwrap_or_default(),
        route_method: row.get("route_method")?,
        route_path: row.get("route_path")?,
        route_intent: row.get("route_intent")?,
        route_resource: row.get("route_resource")?,
        intent_tags: serde_json::from_str(&intent_tags).unwrap_or_default(),
        structural_terms: serde_json::from_str(&structural_terms).unwrap_or_default(),
        llm_summary: row.get("llm_summary")?,
    })
}

impl MetadataStore {
    /// Open (creating if absent) the metadata database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        });

        let pool = Pool::builder().max_size(4).build(manager)?;
        let store = Self { pool };
        let conn = store.pool.get()?;
        conn.execute_batch(SCHEMA)?;
        migrate_chunks_columns(&conn)?;
        Ok(store)
    }

    pub fn clear_repo(&self, repo_path: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM files WHERE repo_path = ?1", params![repo_path])?;
        conn.execute("DELETE FROM chunks WHERE repo_path = ?1", params![repo_path])?;
        conn.execute("DELETE FROM repo_meta WHERE repo_path = ?1", params![repo_path])?;
        Ok(())
    }

    pub fn get_file_hashes(&self, repo_path: &str) -> Result<std::collections::HashMap<String, String>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT file_path, content_hash FROM files WHERE repo_path = ?1")?;
        let rows = stmt.query_map(params![repo_path], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = std::collections::HashMap::new();
        for row in rows {
            let (file_path, hash) = row?;
            out.insert(file_path, hash);
        }
        Ok(out)
    }

    pub fn upsert_file_hash(&self, repo_path: &str, file_path: &str, content_hash: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO files (repo_path, file_path, content_hash, last_indexed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(repo_path, file_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                last_indexed_at = excluded.last_indexed_at",
            params![repo_path, file_path, content_hash, now],
        )?;
        Ok(())
    }

    pub fn delete_files(&self, repo_path: &str, file_paths: &[String]) -> Result<(), StoreError> {
        if file_paths.is_empty() {
            return Ok(());
        }
        let conn = self.pool.get()?;
        for file_path in file_paths {
            conn.execute(
                "DELETE FROM files WHERE repo_path = ?1 AND file_path = ?2",
                params![repo_path, file_path],
            )?;
        }
        Ok(())
    }

    pub fn get_chunk_ids_for_file(&self, repo_path: &str, file_path: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT chunk_id FROM chunks WHERE repo_path = ?1 AND file_path = ?2")?;
        let rows = stmt.query_map(params![repo_path, file_path], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_chunks_by_file(&self, repo_path: &str, file_path: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM chunks WHERE repo_path = ?1 AND file_path = ?2",
            params![repo_path, file_path],
        )?;
        Ok(())
    }

    pub fn upsert_chunks(&self, chunks: &[CodeChunk]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks (
                    chunk_id, repo_path, file_path, language, start_line, end_line,
                    symbol, symbol_kind, description, text, content_hash, tokens,
                    keywords, symbol_terms, route_method, route_path, route_intent,
                    route_resource, intent_tags, structural_terms, llm_summary
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                           ?15, ?16, ?17, ?18, ?19, ?20, ?21)
                 ON CONFLICT(chunk_id) DO UPDATE SET
                    repo_path = excluded.repo_path,
                    file_path = excluded.file_path,
                    language = excluded.language,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    symbol = excluded.symbol,
                    symbol_kind = excluded.symbol_kind,
                    description = excluded.description,
                    text = excluded.text,
                    content_hash = excluded.content_hash,
                    tokens = excluded.tokens,
                    keywords = excluded.keywords,
                    symbol_terms = excluded.symbol_terms,
                    route_method = excluded.route_method,
                    route_path = excluded.route_path,
                    route_intent = excluded.route_intent,
                    route_resource = excluded.route_resource,
                    intent_tags = excluded.intent_tags,
                    structural_terms = excluded.structural_terms,
                    llm_summary = excluded.llm_summary",
                params![
                    chunk.chunk_id,
                    chunk.repo_path,
                    chunk.file_path,
                    chunk.language,
                    chunk.start_line,
                    chunk.end_line,
                    chunk.symbol,
                    chunk.symbol_kind,
                    chunk.description,
                    chunk.text,
                    chunk.content_hash,
                    chunk.tokens,
                    serde_json::to_string(&chunk.keywords).unwrap_or_default(),
                    serde_json::to_string(&chunk.symbol_terms).unwrap_or_default(),
                    chunk.route_method,
                    chunk.route_path,
                    chunk.route_intent,
                    chunk.route_resource,
                    serde_json::to_string(&chunk.intent_tags).unwrap_or_default(),
                    serde_json::to_string(&chunk.structural_terms).unwrap_or_default(),
                    chunk.llm_summary,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_chunks_by_ids(&self, chunk_ids: &[String]) -> Result<std::collections::HashMap<String, CodeChunk>, StoreError> {
        if chunk_ids.is_empty() {
            return Ok(std::collections::HashMap::new());
        }
        let conn = self.pool.get()?;
        let placeholders = chunk_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!("SELECT * FROM chunks WHERE chunk_id IN ({placeholders})");
        let mut stmt = conn.prepare(&query)?;
        let params = rusqlite::params_from_iter(chunk_ids.iter());
        let rows = stmt.query_map(params, row_to_chunk)?;

        let mut out = std::collections::HashMap::new();
        for row in rows {
            let chunk = row?;
            out.insert(chunk.chunk_id.clone(), chunk);
        }
        Ok(out)
    }

    /// All chunks currently stored for `repo_path`, used to (re)build the
    /// vector index after a dimension mismatch forces a rebuild.
    pub fn get_all_chunks(&self, repo_path: &str) -> Result<Vec<CodeChunk>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT * FROM chunks WHERE repo_path = ?1")?;
        let rows = stmt.query_map(params![repo_path], row_to_chunk)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn set_repo_last_indexed(&self, repo_path: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO repo_meta (repo_path, last_indexed_at) VALUES (?1, ?2)
             ON CONFLICT(repo_path) DO UPDATE SET last_indexed_at = excluded.last_indexed_at",
            params![repo_path, now],
        )?;
        Ok(())
    }

    pub fn get_status(&self, repo_path: &str) -> Result<StatusStats, StoreError> {
        let conn = self.pool.get()?;
        let indexed_files: usize = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE repo_path = ?1",
            params![repo_path],
            |row| row.get(0),
        )?;
        let indexed_chunks: usize = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE repo_path = ?1",
            params![repo_path],
            |row| row.get(0),
        )?;
        let last_indexed_raw: Option<String> = conn
            .query_row(
                "SELECT last_indexed_at FROM repo_meta WHERE repo_path = ?1",
                params![repo_path],
                |row| row.get(0),
            )
            .ok()
            .flatten();
        let last_indexed_at = last_indexed_raw
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(StatusStats {
            repo_path: repo_path.to_string(),
            indexed_files,
            indexed_chunks,
            last_indexed_at,
        })
    }

    pub fn get_cached_embeddings(&self, content_hashes: &[String]) -> Result<std::collections::HashMap<String, Vec<f32>>, StoreError> {
        if content_hashes.is_empty() {
            return Ok(std::collections::HashMap::new());
        }
        let conn = self.pool.get()?;
        let placeholders = content_hashes.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!("SELECT content_hash, dimension, vector FROM embeddings WHERE content_hash IN ({placeholders})");
        let mut stmt = conn.prepare(&query)?;
        let params = rusqlite::params_from_iter(content_hashes.iter());
        let rows = stmt.query_map(params, |row| {
            let hash: String = row.get(0)?;
            let dim: usize = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            let vector = bytes_to_f32(&blob, dim);
            Ok((hash, vector))
        })?;

        let mut out = std::collections::HashMap::new();
        for row in rows {
            let (hash, vector) = row?;
            out.insert(hash, vector);
        }
        Ok(out)
    }

    pub fn upsert_cached_embeddings(&self, vectors: &std::collections::HashMap<String, Vec<f32>>) -> Result<(), StoreError> {
        if vectors.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for (key, vector) in vectors {
            tx.execute(
                "INSERT INTO embeddings (content_hash, dimension, vector, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(content_hash) DO UPDATE SET
                    dimension = excluded.dimension,
                    vector = excluded.vector,
                    updated_at = excluded.updated_at",
                params![key, vector.len(), f32_to_bytes(vector), now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_cached_chunk_summaries(&self, keys: &[String]) -> Result<std::collections::HashMap<String, String>, StoreError> {
        if keys.is_empty() {
            return Ok(std::collections::HashMap::new());
        }
        let conn = self.pool.get()?;
        let placeholders = keys.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!("SELECT summary_key, summary FROM llm_summaries WHERE summary_key IN ({placeholders})");
        let mut stmt = conn.prepare(&query)?;
        let params = rusqlite::params_from_iter(keys.iter());
        let rows = stmt.query_map(params, |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut out = std::collections::HashMap::new();
        for row in rows {
            let (key, summary) = row?;
            out.insert(key, summary);
        }
        Ok(out)
    }

    pub fn upsert_cached_chunk_summaries(&self, model: &str, summaries: &std::collections::HashMap<String, String>) -> Result<(), StoreError> {
        if summaries.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for (key, summary) in summaries {
            tx.execute(
                "INSERT INTO llm_summaries (summary_key, model, summary, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(summary_key) DO UPDATE SET
                    model = excluded.model,
                    summary = excluded.summary,
                    updated_at = excluded.updated_at",
                params![key, model, summary, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn f32_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_f32(bytes: &[u8], dim: usize) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .take(dim)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CodeChunk;

    fn sample_chunk(id: &str) -> CodeChunk {
        CodeChunk {
            chunk_id: id.to_string(),
            repo_path: "/repo".to_string(),
            file_path: "src/a.py".to_string(),
            language: "python".to_string(),
            start_line: 1,
            end_line: 2,
            symbol: Some("foo".to_string()),
            symbol_kind: Some("function".to_string()),
            description: "Function foo".to_string(),
            text: "def foo(): pass".to_string(),
            content_hash: "hash1".to_string(),
            tokens: 5,
            keywords: vec!["foo".to_string()],
            symbol_terms: vec!["foo".to_string()],
            structural_terms: vec![],
            intent_tags: vec![],
            route_method: None,
            route_path: None,
            route_intent: None,
            route_resource: None,
            llm_summary: None,
        }
    }

    #[test]
    fn upsert_and_fetch_chunk_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.db")).unwrap();
        let chunk = sample_chunk("c1");
        store.upsert_chunks(&[chunk.clone()]).unwrap();
        let fetched = store.get_chunks_by_ids(&["c1".to_string()]).unwrap();
        assert_eq!(fetched.get("c1").unwrap().symbol.as_deref(), Some("foo"));
    }

    #[test]
    fn file_hash_upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.db")).unwrap();
        store.upsert_file_hash("/repo", "src/a.py", "h1").unwrap();
        store.upsert_file_hash("/repo", "src/a.py", "h2").unwrap();
        let hashes = store.get_file_hashes("/repo").unwrap();
        assert_eq!(hashes.get("src/a.py"), Some(&"h2".to_string()));
    }

    #[test]
    fn clear_repo_removes_files_and_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.db")).unwrap();
        store.upsert_file_hash("/repo", "src/a.py", "h1").unwrap();
        store.upsert_chunks(&[sample_chunk("c1")]).unwrap();
        store.clear_repo("/repo").unwrap();
        assert!(store.get_file_hashes("/repo").unwrap().is_empty());
        assert!(store.get_chunks_by_ids(&["c1".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn embedding_cache_roundtrips_f32_vector() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.db")).unwrap();
        let mut vectors = std::collections::HashMap::new();
        vectors.insert("h1".to_string(), vec![1.0f32, 2.0, 3.0]);
        store.upsert_cached_embeddings(&vectors).unwrap();
        let cached = store.get_cached_embeddings(&["h1".to_string()]).unwrap();
        assert_eq!(cached.get("h1"), Some(&vec![1.0f32, 2.0, 3.0]));
    }

    #[test]
    fn open_adds_missing_columns_to_a_pre_existing_chunks_table() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("meta.db");

        {
            let conn = rusqlite::Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE chunks (
                    chunk_id TEXT PRIMARY KEY,
                    repo_path TEXT NOT NULL,
                    file_path TEXT NOT NULL,
                    language TEXT NOT NULL,
                    start_line INTEGER NOT NULL,
                    end_line INTEGER NOT NULL,
                    symbol TEXT,
                    symbol_kind TEXT,
                    description TEXT NOT NULL,
                    text TEXT NOT NULL,
                    content_hash TEXT NOT NULL,
                    tokens INTEGER NOT NULL,
                    keywords TEXT NOT NULL,
                    symbol_terms TEXT NOT NULL
                );
                INSERT INTO chunks (chunk_id, repo_path, file_path, language, start_line, end_line,
                    symbol, symbol_kind, description, text, content_hash, tokens, keywords, symbol_terms)
                VALUES ('c1', '/repo', 'src/a.py', 'python', 1, 2, 'foo', 'function', 'Function foo',
                    'def foo(): pass', 'hash1', 5, '[\"foo\"]', '[\"foo\"]');",
            )
            .unwrap();
        }

        let store = MetadataStore::open(&db_path).unwrap();
        let fetched = store.get_chunks_by_ids(&["c1".to_string()]).unwrap();
        let chunk = fetched.get("c1").unwrap();
        assert_eq!(chunk.route_method, None);
        assert!(chunk.intent_tags.is_empty());
        assert!(chunk.structural_terms.is_empty());
        assert_eq!(chunk.llm_summary, None);
    }

    #[test]
    fn status_reports_counts_and_last_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.db")).unwrap();
        store.upsert_file_hash("/repo", "src/a.py", "h1").unwrap();
        store.upsert_chunks(&[sample_chunk("c1")]).unwrap();
        store.set_repo_last_indexed("/repo").unwrap();
        let status = store.get_status("/repo").unwrap();
        assert_eq!(status.indexed_files, 1);
        assert_eq!(status.indexed_chunks, 1);
        assert!(status.last_indexed_at.is_some());
    }
}
