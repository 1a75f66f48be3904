//! Statistics derived from stored memories and the match log.
//!
//! Nothing here is persisted; every view is recomputed from the records.

use crate::types::{IntentStat, MatchLogEntry, MemoryRecord, MemoryStats};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Priority at or above which an unused memory is worth surfacing
pub const HIGH_PRIORITY: u32 = 3;

/// Store-wide counts
pub fn memory_stats(records: &[MemoryRecord]) -> MemoryStats {
    let mut stats = MemoryStats {
        total_memories: records.len(),
        ..Default::default()
    };

    for record in records {
        if record.embedding.is_some() {
            stats.with_embeddings += 1;
        }
        if record.embedding_stale {
            stats.stale += 1;
        }
        stats.total_usage += record.usage_count;
        *stats.by_intent.entry(record.intent.clone()).or_default() += 1;
    }

    if !records.is_empty() {
        stats.avg_priority =
            records.iter().map(|r| f64::from(r.priority)).sum::<f64>() / records.len() as f64;
    }

    stats
}

/// Memories ranked by `usage_count * 2 + priority`, highest first
pub fn important_learnings(records: &[MemoryRecord], top_n: usize) -> Vec<&MemoryRecord> {
    let weight = |r: &MemoryRecord| r.usage_count.saturating_mul(2) + u64::from(r.priority);

    let mut ranked: Vec<&MemoryRecord> = records.iter().collect();
    ranked.sort_by(|a, b| weight(b).cmp(&weight(a)).then(a.id.cmp(&b.id)));
    ranked.truncate(top_n);
    ranked
}

/// High-priority memories that were never served
pub fn unused_high_priority(records: &[MemoryRecord], min_priority: u32) -> Vec<&MemoryRecord> {
    records
        .iter()
        .filter(|r| r.priority >= min_priority && r.usage_count == 0)
        .collect()
}

/// Per-intent attempts and successes.
///
/// A log entry counts toward the intent its memory carries now; entries for
/// deleted memories are ignored. Intents without attempts are still listed.
pub fn intent_stats(records: &[MemoryRecord], log: &[MatchLogEntry]) -> Vec<IntentStat> {
    let intent_of: HashMap<i64, &str> = records.iter().map(|r| (r.id, r.intent.as_str())).collect();

    let mut stats: BTreeMap<&str, IntentStat> = BTreeMap::new();
    for record in records {
        let stat = stats.entry(record.intent.as_str()).or_insert_with(|| IntentStat {
            name: record.intent.clone(),
            memories: 0,
            attempts: 0,
            successes: 0,
            success_rate: 0.0,
            last_used: None,
        });
        stat.memories += 1;
        stat.last_used = stat.last_used.max(record.last_used);
    }

    for entry in log {
        let Some(stat) = intent_of
            .get(&entry.memory_id)
            .and_then(|intent| stats.get_mut(intent))
        else {
            continue;
        };
        stat.attempts += 1;
        if entry.accepted {
            stat.successes += 1;
        }
    }

    stats
        .into_values()
        .map(|mut stat| {
            if stat.attempts > 0 {
                stat.success_rate = stat.successes as f64 / stat.attempts as f64;
            }
            stat
        })
        .collect()
}

/// Counts of which intent followed which among served answers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransitionMatrix {
    transitions: BTreeMap<String, BTreeMap<String, u64>>,
}

impl TransitionMatrix {
    /// Build from accepted log entries in log order
    pub fn from_log(records: &[MemoryRecord], log: &[MatchLogEntry]) -> Self {
        let intent_of: HashMap<i64, &str> =
            records.iter().map(|r| (r.id, r.intent.as_str())).collect();

        let mut matrix = Self::default();
        let mut previous: Option<&str> = None;

        for entry in log.iter().filter(|e| e.accepted) {
            let Some(&intent) = intent_of.get(&entry.memory_id) else {
                continue;
            };
            if let Some(prev) = previous {
                matrix.observe(prev, intent);
            }
            previous = Some(intent);
        }

        matrix
    }

    pub fn observe(&mut self, from: &str, to: &str) {
        *self
            .transitions
            .entry(from.to_string())
            .or_default()
            .entry(to.to_string())
            .or_default() += 1;
    }

    pub fn count(&self, from: &str, to: &str) -> u64 {
        self.transitions
            .get(from)
            .and_then(|next| next.get(to))
            .copied()
            .unwrap_or(0)
    }

    /// Most frequent follower of `from`; ties go to the alphabetically first
    pub fn suggest_next(&self, from: &str) -> Option<&str> {
        self.transitions.get(from).and_then(|next| {
            next.iter()
                .fold(None, |best: Option<(&String, u64)>, (intent, &count)| match best {
                    Some((_, best_count)) if count <= best_count => best,
                    _ => Some((intent, count)),
                })
                .map(|(intent, _)| intent.as_str())
        })
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, u64)> {
        self.transitions.iter().flat_map(|(from, next)| {
            next.iter()
                .map(move |(to, &count)| (from.as_str(), to.as_str(), count))
        })
    }
}
