use crate::error::{Error, Result};
use crate::types::{
    format_timestamp, now_timestamp, parse_timestamp, CleanupFilter, MatchLogEntry,
    MemoryRecord, MemoryUpdate, NewMemory, StoredVector, DEFAULT_CATEGORY, DEFAULT_INTENT,
};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    prompt TEXT NOT NULL,
    response TEXT NOT NULL,
    embedding BLOB,
    embedding_stale INTEGER NOT NULL DEFAULT 0,
    intent TEXT NOT NULL DEFAULT 'general',
    tags TEXT NOT NULL DEFAULT '[]',
    priority INTEGER NOT NULL DEFAULT 1 CHECK (priority >= 1),
    category TEXT NOT NULL DEFAULT 'general',
    created_at TEXT NOT NULL,
    usage_count INTEGER NOT NULL DEFAULT 0,
    last_used TEXT,
    avg_match_score REAL NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_memories_intent ON memories(intent);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);

CREATE TABLE IF NOT EXISTS match_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id INTEGER NOT NULL,
    query TEXT NOT NULL,
    score REAL NOT NULL,
    accepted INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_match_log_memory ON match_log(memory_id);

CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Match history goes with the memory
CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    DELETE FROM match_log WHERE memory_id = old.id;
END;
"#;

const COLUMNS: &str = "id, prompt, response, embedding, embedding_stale, intent, tags, priority, \
     category, created_at, usage_count, last_used, avg_match_score";

const DIM_KEY: &str = "embedding_dim";

/// Memory store backed by SQLite
pub struct MemoryStore {
    conn: Connection,
}

impl MemoryStore {
    /// Open or create the memory database
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %db_path.display(), "opened memory store");
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // -------------------------------------------------------------------------
    // Embedding serialization
    // -------------------------------------------------------------------------

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// `None` for blobs that are empty or not a whole number of f32s
    fn deserialize_embedding(data: &[u8]) -> Option<Vec<f32>> {
        if data.is_empty() || data.len() % 4 != 0 {
            return None;
        }
        Some(
            data.chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
        )
    }

    fn read_embedding(id: i64, blob: Option<Vec<u8>>) -> Option<Vec<f32>> {
        let bytes = blob?;
        let embedding = Self::deserialize_embedding(&bytes);
        if embedding.is_none() {
            warn!(id, bytes = bytes.len(), "ignoring corrupt embedding blob");
        }
        embedding
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    fn required_text(field: &str, value: &str) -> Result<String> {
        if value.trim().is_empty() {
            return Err(Error::validation(format!("{} must not be empty", field)));
        }
        Ok(value.to_string())
    }

    fn check_priority(priority: u32) -> Result<u32> {
        if priority == 0 {
            return Err(Error::validation("priority must be at least 1"));
        }
        Ok(priority)
    }

    fn label(value: Option<&str>, default: &str) -> String {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
            .to_string()
    }

    /// Check shape and pin the store dimension on first use
    fn check_embedding(tx: &Transaction<'_>, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            return Err(Error::validation("embedding must not be empty"));
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(Error::validation("embedding has non-finite values"));
        }
        if embedding.iter().all(|&x| x == 0.0) {
            return Err(Error::validation("embedding has zero norm"));
        }

        match Self::read_dimension(tx)? {
            Some(dim) if dim != embedding.len() => Err(Error::validation(format!(
                "embedding has {} dimensions, store uses {}",
                embedding.len(),
                dim
            ))),
            Some(_) => Ok(()),
            None => {
                tx.execute(
                    "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
                    params![DIM_KEY, embedding.len().to_string()],
                )?;
                Ok(())
            }
        }
    }

    fn read_dimension(conn: &Connection) -> Result<Option<usize>> {
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = ?1",
                params![DIM_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    // -------------------------------------------------------------------------
    // Memory operations
    // -------------------------------------------------------------------------

    /// Add a new memory, returns the ID
    pub fn create(&self, memory: NewMemory) -> Result<i64> {
        let prompt = Self::required_text("prompt", &memory.prompt)?;
        let response = Self::required_text("response", &memory.response)?;
        let priority = Self::check_priority(memory.priority.unwrap_or(1))?;
        let intent = Self::label(memory.intent.as_deref(), DEFAULT_INTENT);
        let category = Self::label(memory.category.as_deref(), DEFAULT_CATEGORY);
        let tags = serde_json::to_string(&clean_tags(memory.tags))?;

        let tx = self.conn.unchecked_transaction()?;
        let blob = match &memory.embedding {
            Some(embedding) => {
                Self::check_embedding(&tx, embedding)?;
                Some(Self::serialize_embedding(embedding))
            }
            None => None,
        };

        tx.execute(
            "INSERT INTO memories (prompt, response, embedding, intent, tags, priority, category, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![prompt, response, blob, intent, tags, priority, category, now_timestamp()],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(id, intent = %intent, has_embedding = blob.is_some(), "created memory");
        Ok(id)
    }

    /// Get a memory by ID
    pub fn get(&self, id: i64) -> Result<Option<MemoryRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {} FROM memories WHERE id = ?1", COLUMNS),
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Update mutable fields; `false` when the memory does not exist
    pub fn update(&self, id: i64, update: MemoryUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(self.get(id)?.is_some());
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(prompt) = &update.prompt {
            sets.push("prompt = ?");
            values.push(Value::Text(Self::required_text("prompt", prompt)?));
        }
        if let Some(response) = &update.response {
            sets.push("response = ?");
            values.push(Value::Text(Self::required_text("response", response)?));
        }
        if let Some(intent) = &update.intent {
            sets.push("intent = ?");
            values.push(Value::Text(Self::label(Some(intent.as_str()), DEFAULT_INTENT)));
        }
        if let Some(tags) = update.tags {
            sets.push("tags = ?");
            values.push(Value::Text(serde_json::to_string(&clean_tags(tags))?));
        }
        if let Some(priority) = update.priority {
            sets.push("priority = ?");
            values.push(Value::Integer(i64::from(Self::check_priority(priority)?)));
        }
        if let Some(category) = &update.category {
            sets.push("category = ?");
            values.push(Value::Text(Self::label(Some(category.as_str()), DEFAULT_CATEGORY)));
        }

        let tx = self.conn.unchecked_transaction()?;
        match &update.embedding {
            Some(embedding) => {
                Self::check_embedding(&tx, embedding)?;
                sets.push("embedding = ?");
                values.push(Value::Blob(Self::serialize_embedding(embedding)));
                sets.push("embedding_stale = 0");
            }
            None if update.prompt.is_some() => {
                // Stale only when the prompt text actually changes
                sets.push("embedding_stale = CASE WHEN prompt = ? THEN embedding_stale ELSE 1 END");
                values.push(values[0].clone());
            }
            None => {}
        }

        values.push(Value::Integer(id));
        let sql = format!("UPDATE memories SET {} WHERE id = ?", sets.join(", "));
        let changed = tx.execute(&sql, params_from_iter(values))?;
        tx.commit()?;

        debug!(id, changed, "updated memory");
        Ok(changed > 0)
    }

    /// Delete a memory
    pub fn delete(&self, id: i64) -> Result<bool> {
        let count = self.conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    /// Delete every memory with this exact intent
    pub fn delete_by_intent(&self, intent: &str) -> Result<usize> {
        let count = self
            .conn
            .execute("DELETE FROM memories WHERE intent = ?1", params![intent])?;
        debug!(intent, count, "deleted memories by intent");
        Ok(count)
    }

    /// Delete memories matching every criterion in the filter
    pub fn delete_where(&self, filter: &CleanupFilter) -> Result<usize> {
        if filter.is_empty() {
            return Err(Error::validation(
                "cleanup filter needs at least one criterion",
            ));
        }

        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(cutoff) = &filter.older_than {
            clauses.push("created_at < ?");
            values.push(Value::Text(format_timestamp(cutoff)));
        }
        if let Some(max_usage) = filter.max_usage {
            clauses.push("usage_count <= ?");
            values.push(Value::Integer(i64::try_from(max_usage).unwrap_or(i64::MAX)));
        }
        if let Some(max_priority) = filter.max_priority {
            clauses.push("priority <= ?");
            values.push(Value::Integer(i64::from(max_priority)));
        }
        if let Some(intent) = &filter.intent {
            clauses.push("intent = ?");
            values.push(Value::Text(intent.clone()));
        }
        if let Some(category) = &filter.category {
            clauses.push("category = ?");
            values.push(Value::Text(category.clone()));
        }

        let sql = format!("DELETE FROM memories WHERE {}", clauses.join(" AND "));
        let count = self.conn.execute(&sql, params_from_iter(values))?;
        debug!(count, ?filter, "cleanup");
        Ok(count)
    }

    /// Delete everything, returns the number of memories removed
    pub fn clear_all(&self) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let count = tx.execute("DELETE FROM memories", [])?;
        tx.execute("DELETE FROM match_log", [])?;
        tx.execute("DELETE FROM store_meta WHERE key = ?1", params![DIM_KEY])?;
        tx.commit()?;
        Ok(count)
    }

    /// List memories, newest first
    pub fn list_all(&self, limit: Option<usize>, offset: usize) -> Result<Vec<MemoryRecord>> {
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM memories ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
            COLUMNS
        ))?;
        let records = stmt
            .query_map(params![limit, offset], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Every memory in id order
    pub fn all_by_id(&self) -> Result<Vec<MemoryRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM memories ORDER BY id ASC", COLUMNS))?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Collapse identical (prompt, response) pairs onto the lowest id
    pub fn remove_duplicates(&self) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let count = tx.execute(
            "DELETE FROM memories
             WHERE id NOT IN (
                 SELECT MIN(id) FROM memories GROUP BY prompt, response
             )",
            [],
        )?;
        tx.commit()?;
        debug!(count, "removed duplicate memories");
        Ok(count)
    }

    /// All readable embeddings in ascending id order (for vector search)
    pub fn candidates(&self) -> Result<Vec<StoredVector>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, response, embedding FROM memories
             WHERE embedding IS NOT NULL
             ORDER BY id ASC",
        )?;

        let mut results = Vec::new();
        let mut rows = stmt.query([])?;

        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            if let Some(embedding) = Self::read_embedding(id, row.get(2)?) {
                results.push(StoredVector {
                    id,
                    response: row.get(1)?,
                    embedding,
                });
            }
        }

        Ok(results)
    }

    /// Memories whose prompt changed after embedding
    pub fn stale(&self) -> Result<Vec<MemoryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM memories WHERE embedding_stale = 1 ORDER BY id ASC",
            COLUMNS
        ))?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    // -------------------------------------------------------------------------
    // Usage statistics
    // -------------------------------------------------------------------------

    /// Record that a memory was served.
    ///
    /// One UPDATE, so concurrent writers cannot lose an increment. A missing
    /// id is a no-op and returns `false`.
    pub fn record_use(&self, id: i64, score: Option<f64>) -> Result<bool> {
        let now = now_timestamp();
        let changed = match score {
            Some(score) => {
                if !score.is_finite() || !(-1.0..=1.0).contains(&score) {
                    return Err(Error::validation(format!(
                        "match score {} outside [-1, 1]",
                        score
                    )));
                }
                self.conn.execute(
                    "UPDATE memories
                     SET avg_match_score = (avg_match_score * usage_count + ?1) / (usage_count + 1),
                         usage_count = usage_count + 1,
                         last_used = ?2
                     WHERE id = ?3",
                    params![score, now, id],
                )?
            }
            None => self.conn.execute(
                "UPDATE memories SET usage_count = usage_count + 1, last_used = ?1 WHERE id = ?2",
                params![now, id],
            )?,
        };

        if changed == 0 {
            debug!(id, "memory gone before usage could be recorded");
        }
        Ok(changed > 0)
    }

    // -------------------------------------------------------------------------
    // Match log
    // -------------------------------------------------------------------------

    /// Record a retrieval attempt; `None` when the memory no longer exists
    pub fn log_match(
        &self,
        memory_id: i64,
        query: &str,
        score: f64,
        accepted: bool,
    ) -> Result<Option<i64>> {
        let inserted = self.conn.execute(
            "INSERT INTO match_log (memory_id, query, score, accepted, created_at)
             SELECT ?1, ?2, ?3, ?4, ?5
             WHERE EXISTS (SELECT 1 FROM memories WHERE id = ?1)",
            params![memory_id, query, score, accepted, now_timestamp()],
        )?;
        if inserted == 0 {
            debug!(memory_id, "not logging match for a deleted memory");
            return Ok(None);
        }
        Ok(Some(self.conn.last_insert_rowid()))
    }

    /// Retrieval attempts that picked this memory, oldest first
    pub fn match_history(&self, memory_id: i64) -> Result<Vec<MatchLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, memory_id, query, score, accepted, created_at
             FROM match_log WHERE memory_id = ?1 ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![memory_id], row_to_log_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// The whole match log, oldest first
    pub fn match_log(&self) -> Result<Vec<MatchLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, memory_id, query, score, accepted, created_at
             FROM match_log ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map([], row_to_log_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    /// Get count of memories
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Embedding dimension pinned by the first stored vector
    pub fn dimension(&self) -> Result<Option<usize>> {
        Self::read_dimension(&self.conn)
    }

    /// Distinct intents in order of first appearance
    pub fn distinct_intents(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT intent FROM memories GROUP BY intent ORDER BY MIN(id)")?;
        let intents = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(intents)
    }

    /// All tags with counts, most used first
    pub fn tags(&self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare("SELECT tags FROM memories")?;
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut rows = stmt.query([])?;

        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            for tag in parse_tags(&raw) {
                *counts.entry(tag).or_default() += 1;
            }
        }

        let mut tags: Vec<(String, usize)> = counts.into_iter().collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(tags)
    }
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !cleaned.contains(&tag) {
            cleaned.push(tag);
        }
    }
    cleaned
}

fn parse_tags(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(error = %e, "ignoring unreadable tags column");
        Vec::new()
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp {:?}", raw).into(),
        )
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let id: i64 = row.get(0)?;
    let tags: String = row.get(6)?;
    let priority: i64 = row.get(7)?;
    let usage_count: i64 = row.get(10)?;
    let last_used: Option<String> = row.get(11)?;

    Ok(MemoryRecord {
        id,
        prompt: row.get(1)?,
        response: row.get(2)?,
        embedding: MemoryStore::read_embedding(id, row.get(3)?),
        embedding_stale: row.get(4)?,
        intent: row.get(5)?,
        tags: parse_tags(&tags),
        priority: u32::try_from(priority.max(1)).unwrap_or(u32::MAX),
        category: row.get(8)?,
        created_at: timestamp_column(row, 9)?,
        usage_count: usage_count.max(0) as u64,
        last_used: last_used.as_deref().and_then(parse_timestamp),
        avg_match_score: row.get(12)?,
    })
}

fn row_to_log_entry(row: &Row<'_>) -> rusqlite::Result<MatchLogEntry> {
    Ok(MatchLogEntry {
        id: row.get(0)?,
        memory_id: row.get(1)?,
        query: row.get(2)?,
        score: row.get(3)?,
        accepted: row.get(4)?,
        created_at: timestamp_column(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::in_memory().unwrap()
    }

    fn add(store: &MemoryStore, prompt: &str, response: &str, embedding: &[f32]) -> i64 {
        store
            .create(NewMemory::new(prompt, response).with_embedding(embedding.to_vec()))
            .unwrap()
    }

    #[test]
    fn test_create_and_get() {
        let store = store();

        let id = store
            .create(
                NewMemory::new("  hello there ", "hi!")
                    .with_embedding(vec![0.25, -1.5, 3.0])
                    .with_intent("greeting")
                    .with_tags(vec!["Small-Talk".to_string(), "en".to_string()])
                    .with_priority(2),
            )
            .unwrap();

        let memory = store.get(id).unwrap().unwrap();
        assert_eq!(memory.prompt, "  hello there ");
        assert_eq!(memory.response, "hi!");
        assert_eq!(memory.embedding, Some(vec![0.25, -1.5, 3.0]));
        assert_eq!(memory.intent, "greeting");
        assert_eq!(memory.tags, vec!["small-talk", "en"]);
        assert_eq!(memory.priority, 2);
        assert_eq!(memory.category, DEFAULT_CATEGORY);
        assert_eq!(memory.usage_count, 0);
        assert_eq!(memory.last_used, None);
        assert_eq!(memory.match_score(), None);
        assert!(!memory.embedding_stale);
    }

    #[test]
    fn test_create_defaults() {
        let store = store();
        let id = store.create(NewMemory::new("q", "a")).unwrap();

        let memory = store.get(id).unwrap().unwrap();
        assert_eq!(memory.embedding, None);
        assert_eq!(memory.intent, DEFAULT_INTENT);
        assert_eq!(memory.priority, 1);
        assert!(memory.tags.is_empty());
        assert!(store.candidates().unwrap().is_empty());
    }

    #[test]
    fn test_create_validation() {
        let store = store();

        for (prompt, response) in [("", "a"), ("q", "   "), ("\n\t", "a")] {
            let err = store.create(NewMemory::new(prompt, response)).unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }

        let err = store
            .create(NewMemory::new("q", "a").with_priority(0))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = store
            .create(NewMemory::new("q", "a").with_embedding(vec![]))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = store
            .create(NewMemory::new("q", "a").with_embedding(vec![f32::INFINITY, 1.0]))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_dimension_is_pinned() {
        let store = store();
        assert_eq!(store.dimension().unwrap(), None);

        add(&store, "a", "1", &[1.0, 0.0, 0.0]);
        assert_eq!(store.dimension().unwrap(), Some(3));

        let err = store
            .create(NewMemory::new("b", "2").with_embedding(vec![1.0, 0.0]))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_get_missing() {
        assert!(store().get(42).unwrap().is_none());
    }

    #[test]
    fn test_update_fields() {
        let store = store();
        let id = add(&store, "q", "a", &[1.0, 0.0]);

        let changed = store
            .update(
                id,
                MemoryUpdate {
                    response: Some("new answer".to_string()),
                    intent: Some("thanks".to_string()),
                    tags: Some(vec!["x".to_string()]),
                    priority: Some(5),
                    category: Some("support".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(changed);

        let memory = store.get(id).unwrap().unwrap();
        assert_eq!(memory.prompt, "q");
        assert_eq!(memory.response, "new answer");
        assert_eq!(memory.intent, "thanks");
        assert_eq!(memory.tags, vec!["x"]);
        assert_eq!(memory.priority, 5);
        assert_eq!(memory.category, "support");
        assert!(!memory.embedding_stale);
    }

    #[test]
    fn test_update_prompt_marks_stale() {
        let store = store();
        let id = add(&store, "old prompt", "a", &[1.0, 0.0]);

        let prompt_only = MemoryUpdate {
            prompt: Some("new prompt".to_string()),
            ..Default::default()
        };
        assert!(store.update(id, prompt_only).unwrap());

        let memory = store.get(id).unwrap().unwrap();
        assert_eq!(memory.prompt, "new prompt");
        assert_eq!(memory.embedding, Some(vec![1.0, 0.0]));
        assert!(memory.embedding_stale);
        assert_eq!(store.stale().unwrap().len(), 1);

        let with_vector = MemoryUpdate {
            embedding: Some(vec![0.0, 1.0]),
            ..Default::default()
        };
        assert!(store.update(id, with_vector).unwrap());

        let memory = store.get(id).unwrap().unwrap();
        assert_eq!(memory.embedding, Some(vec![0.0, 1.0]));
        assert!(!memory.embedding_stale);
    }

    #[test]
    fn test_update_same_prompt_is_not_stale() {
        let store = store();
        let id = add(&store, "same", "a", &[1.0, 0.0]);

        let update = MemoryUpdate {
            prompt: Some("same".to_string()),
            ..Default::default()
        };
        store.update(id, update).unwrap();
        assert!(!store.get(id).unwrap().unwrap().embedding_stale);
    }

    #[test]
    fn test_update_missing_and_invalid() {
        let store = store();
        let update = MemoryUpdate {
            response: Some("x".to_string()),
            ..Default::default()
        };
        assert!(!store.update(99, update).unwrap());
        assert!(!store.update(99, MemoryUpdate::default()).unwrap());

        let id = add(&store, "q", "a", &[1.0, 0.0]);
        assert!(store.update(id, MemoryUpdate::default()).unwrap());

        let bad = MemoryUpdate {
            response: Some("  ".to_string()),
            priority: Some(3),
            ..Default::default()
        };
        assert!(matches!(store.update(id, bad), Err(Error::Validation(_))));

        let wrong_dim = MemoryUpdate {
            embedding: Some(vec![1.0, 0.0, 0.0]),
            ..Default::default()
        };
        assert!(matches!(
            store.update(id, wrong_dim),
            Err(Error::Validation(_))
        ));

        // nothing from the failed updates was applied
        let memory = store.get(id).unwrap().unwrap();
        assert_eq!(memory.response, "a");
        assert_eq!(memory.priority, 1);
    }

    #[test]
    fn test_delete() {
        let store = store();

        let id = add(&store, "To delete", "ok", &[1.0]);
        assert!(store.get(id).unwrap().is_some());

        assert!(store.delete(id).unwrap());
        assert!(store.get(id).unwrap().is_none());
        assert!(!store.delete(id).unwrap());
    }

    #[test]
    fn test_delete_by_intent() {
        let store = store();
        for (prompt, intent) in [("hi", "greeting"), ("hey", "greeting"), ("thx", "thanks")] {
            store
                .create(NewMemory::new(prompt, "r").with_intent(intent))
                .unwrap();
        }

        assert_eq!(store.delete_by_intent("greeting").unwrap(), 2);
        let left = store.all_by_id().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].intent, "thanks");
        assert_eq!(store.delete_by_intent("greeting").unwrap(), 0);
    }

    #[test]
    fn test_delete_where() {
        let store = store();
        let low = store
            .create(NewMemory::new("a", "1").with_intent("chat"))
            .unwrap();
        let high = store
            .create(NewMemory::new("b", "2").with_intent("chat").with_priority(4))
            .unwrap();
        let used = store
            .create(NewMemory::new("c", "3").with_intent("chat"))
            .unwrap();
        store.record_use(used, Some(0.9)).unwrap();

        let filter = CleanupFilter {
            max_usage: Some(0),
            max_priority: Some(2),
            ..Default::default()
        };
        assert_eq!(store.delete_where(&filter).unwrap(), 1);
        assert!(store.get(low).unwrap().is_none());
        assert!(store.get(high).unwrap().is_some());
        assert!(store.get(used).unwrap().is_some());

        let future = CleanupFilter {
            older_than: Some(Utc::now() + chrono::Duration::days(1)),
            intent: Some("chat".to_string()),
            ..Default::default()
        };
        assert_eq!(store.delete_where(&future).unwrap(), 2);

        let past = CleanupFilter {
            older_than: Some(Utc::now() - chrono::Duration::days(1)),
            ..Default::default()
        };
        store.create(NewMemory::new("d", "4")).unwrap();
        assert_eq!(store.delete_where(&past).unwrap(), 0);
    }

    #[test]
    fn test_delete_where_requires_criteria() {
        let store = store();
        store.create(NewMemory::new("a", "1")).unwrap();
        assert!(matches!(
            store.delete_where(&CleanupFilter::default()),
            Err(Error::Validation(_))
        ));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_list_all_pagination() {
        let store = store();
        let ids: Vec<i64> = (0..5)
            .map(|i| store.create(NewMemory::new(format!("p{}", i), "r")).unwrap())
            .collect();

        let all = store.list_all(None, 0).unwrap();
        assert_eq!(
            all.iter().map(|m| m.id).collect::<Vec<_>>(),
            ids.iter().rev().copied().collect::<Vec<_>>()
        );

        let page = store.list_all(Some(2), 1).unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![ids[3], ids[2]]);

        assert!(store.list_all(Some(10), 10).unwrap().is_empty());
    }

    #[test]
    fn test_remove_duplicates() {
        let store = store();
        let first = add(&store, "hello", "hi", &[1.0, 0.0]);
        let second = add(&store, "hello", "hi", &[1.0, 0.0]);
        let other = add(&store, "hello", "hey", &[1.0, 0.0]);

        assert_eq!(store.remove_duplicates().unwrap(), 1);
        assert!(store.get(first).unwrap().is_some());
        assert!(store.get(second).unwrap().is_none());
        assert!(store.get(other).unwrap().is_some());
        assert_eq!(store.remove_duplicates().unwrap(), 0);
    }

    #[test]
    fn test_text_is_stored_as_given() {
        let store = store();
        let padded = add(&store, "  hello there\n", " hi ", &[1.0, 0.0]);
        let plain = add(&store, "hello there", "hi", &[1.0, 0.0]);

        let memory = store.get(padded).unwrap().unwrap();
        assert_eq!(memory.prompt, "  hello there\n");
        assert_eq!(memory.response, " hi ");

        // whitespace makes a different pair
        assert_eq!(store.remove_duplicates().unwrap(), 0);
        assert!(store.get(plain).unwrap().is_some());

        let update = MemoryUpdate {
            response: Some("\tsee you\n".to_string()),
            ..Default::default()
        };
        assert!(store.update(plain, update).unwrap());
        assert_eq!(store.get(plain).unwrap().unwrap().response, "\tsee you\n");
    }

    #[test]
    fn test_corrupt_blob_is_not_an_embedding() {
        let store = store();
        let good = add(&store, "good", "g", &[1.0, 0.0]);
        let bad = add(&store, "bad", "b", &[0.0, 1.0]);

        store
            .conn
            .execute(
                "UPDATE memories SET embedding = ?1 WHERE id = ?2",
                params![vec![1u8, 2, 3], bad],
            )
            .unwrap();

        let candidates = store.candidates().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, good);

        let memory = store.get(bad).unwrap().unwrap();
        assert_eq!(memory.embedding, None);
    }

    #[test]
    fn test_record_use_running_average() {
        let store = store();
        let id = add(&store, "q", "a", &[1.0]);

        for _ in 0..4 {
            assert!(store.record_use(id, Some(0.8)).unwrap());
        }
        let memory = store.get(id).unwrap().unwrap();
        assert_eq!(memory.usage_count, 4);
        assert!((memory.avg_match_score - 0.8).abs() < 1e-9);
        assert!(memory.last_used.is_some());

        store.record_use(id, Some(0.3)).unwrap();
        let memory = store.get(id).unwrap().unwrap();
        assert!((memory.avg_match_score - 0.7).abs() < 1e-9);

        store.record_use(id, None).unwrap();
        let memory = store.get(id).unwrap().unwrap();
        assert_eq!(memory.usage_count, 6);
        assert!((memory.avg_match_score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_record_use_missing_and_invalid() {
        let store = store();
        assert!(!store.record_use(404, Some(0.5)).unwrap());

        let id = add(&store, "q", "a", &[1.0]);
        assert!(matches!(
            store.record_use(id, Some(1.5)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.record_use(id, Some(f64::NAN)),
            Err(Error::Validation(_))
        ));
        assert_eq!(store.get(id).unwrap().unwrap().usage_count, 0);
    }

    #[test]
    fn test_match_log_follows_memory() {
        let store = store();
        let id = add(&store, "q", "a", &[1.0]);
        let other = add(&store, "r", "b", &[1.0]);

        store.log_match(id, "q?", 0.9, true).unwrap();
        store.log_match(id, "qq", 0.4, false).unwrap();
        store.log_match(other, "r", 0.95, true).unwrap();

        let history = store.match_history(id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].query, "q?");
        assert!(history[0].accepted);
        assert!(!history[1].accepted);

        store.delete(id).unwrap();
        assert!(store.match_history(id).unwrap().is_empty());
        assert_eq!(store.match_log().unwrap().len(), 1);

        // a memory deleted between scan and log leaves no orphan row
        assert_eq!(store.log_match(id, "late", 0.9, true).unwrap(), None);
        assert!(store.match_history(id).unwrap().is_empty());
        assert_eq!(store.match_log().unwrap().len(), 1);
    }

    #[test]
    fn test_distinct_intents_and_tags() {
        let store = store();
        store
            .create(NewMemory::new("a", "1").with_intent("thanks").with_tags(vec!["x".into()]))
            .unwrap();
        store
            .create(NewMemory::new("b", "2").with_intent("greeting").with_tags(vec!["x".into(), "y".into()]))
            .unwrap();
        store
            .create(NewMemory::new("c", "3").with_intent("thanks"))
            .unwrap();

        assert_eq!(store.distinct_intents().unwrap(), vec!["thanks", "greeting"]);
        assert_eq!(
            store.tags().unwrap(),
            vec![("x".to_string(), 2), ("y".to_string(), 1)]
        );
    }

    #[test]
    fn test_clear_all() {
        let store = store();
        let id = add(&store, "a", "1", &[1.0, 0.0]);
        store.log_match(id, "a", 1.0, true).unwrap();

        assert_eq!(store.clear_all().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.match_log().unwrap().is_empty());
        assert_eq!(store.dimension().unwrap(), None);
    }

    #[test]
    fn test_reopen_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");

        let id = {
            let store = MemoryStore::open(&path).unwrap();
            add(&store, "persist me", "ok", &[0.5, 0.5])
        };

        let store = MemoryStore::open(&path).unwrap();
        let memory = store.get(id).unwrap().unwrap();
        assert_eq!(memory.prompt, "persist me");
        assert_eq!(memory.embedding, Some(vec![0.5, 0.5]));
        assert_eq!(store.dimension().unwrap(), Some(2));
    }
}
