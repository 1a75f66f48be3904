use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Label used when no intent is known or none passes the classifier floor
pub const DEFAULT_INTENT: &str = "general";

/// Category assigned when the caller does not give one
pub const DEFAULT_CATEGORY: &str = "general";

/// A stored prompt/response pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub prompt: String,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// The prompt was edited after the embedding was computed
    pub embedding_stale: bool,
    pub intent: String,
    pub tags: Vec<String>,
    pub priority: u32,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub usage_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub avg_match_score: f64,
}

impl MemoryRecord {
    /// Running average score, only meaningful once the record was served
    pub fn match_score(&self) -> Option<f64> {
        (self.usage_count > 0).then_some(self.avg_match_score)
    }
}

/// Fields for a new record
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub prompt: String,
    pub response: String,
    pub embedding: Option<Vec<f32>>,
    pub intent: Option<String>,
    pub tags: Vec<String>,
    pub priority: Option<u32>,
    pub category: Option<String>,
}

impl NewMemory {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
            ..Default::default()
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Partial update of the mutable fields of a record.
///
/// Setting `prompt` without `embedding` leaves the old vector in place and
/// marks the record stale.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub intent: Option<String>,
    pub tags: Option<Vec<String>>,
    pub priority: Option<u32>,
    pub category: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl MemoryUpdate {
    pub fn is_empty(&self) -> bool {
        self.prompt.is_none()
            && self.response.is_none()
            && self.intent.is_none()
            && self.tags.is_none()
            && self.priority.is_none()
            && self.category.is_none()
            && self.embedding.is_none()
    }
}

/// Bulk deletion criteria, AND-combined
#[derive(Debug, Clone, Default)]
pub struct CleanupFilter {
    /// Created strictly before this instant
    pub older_than: Option<DateTime<Utc>>,
    /// usage_count <= n
    pub max_usage: Option<u64>,
    /// priority <= n
    pub max_priority: Option<u32>,
    pub intent: Option<String>,
    pub category: Option<String>,
}

impl CleanupFilter {
    pub fn is_empty(&self) -> bool {
        self.older_than.is_none()
            && self.max_usage.is_none()
            && self.max_priority.is_none()
            && self.intent.is_none()
            && self.category.is_none()
    }
}

/// An embedding loaded for ranking
#[derive(Debug, Clone)]
pub struct StoredVector {
    pub id: i64,
    pub response: String,
    pub embedding: Vec<f32>,
}

/// Similarity of one stored record to a query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub id: i64,
    pub score: f64,
}

/// Result of a best-match lookup.
///
/// `response` is `None` when nothing passed the threshold; `score` still
/// reports the best similarity seen (0.0 when there were no candidates).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub memory_id: Option<i64>,
    pub response: Option<String>,
    pub score: f64,
}

impl Match {
    pub fn none() -> Self {
        Self {
            memory_id: None,
            response: None,
            score: 0.0,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.response.is_some()
    }
}

/// One retrieval attempt recorded by `respond`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchLogEntry {
    pub id: i64,
    pub memory_id: i64,
    pub query: String,
    pub score: f64,
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
}

/// Aggregated outcome for all records sharing an intent label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentStat {
    pub name: String,
    pub memories: usize,
    pub attempts: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub last_used: Option<DateTime<Utc>>,
}

/// Statistics about the memory store
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub total_memories: usize,
    pub with_embeddings: usize,
    pub stale: usize,
    pub total_usage: u64,
    pub avg_priority: f64,
    pub by_intent: HashMap<String, usize>,
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(&Utc::now())
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
