//! Cosine-similarity ranking over stored embeddings.
//!
//! Linear scan, no index. Candidates are expected in ascending id order so
//! that ties resolve to the earliest record.

use crate::error::{Error, Result};
use crate::types::{Match, Scored, StoredVector};
use tracing::{debug, warn};

/// Default minimum similarity for a match to be served
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// Decides whether a best match is usable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    pub threshold: f64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl MatchPolicy {
    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn accepts(&self, score: f64) -> bool {
        score >= self.threshold
    }
}

fn norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum()
}

/// Cosine similarity in [-1, 1].
///
/// `None` when the lengths differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (norm_a, norm_b) = (norm(a), norm(b));
    if norm_a == 0.0 || norm_b == 0.0 || !norm_a.is_finite() || !norm_b.is_finite() {
        return None;
    }
    Some((dot(a, b) / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Validate a query vector, returning its norm
pub fn check_query(query: &[f32]) -> Result<f64> {
    if query.is_empty() {
        return Err(Error::invalid_input("query vector is empty"));
    }
    if query.iter().any(|x| !x.is_finite()) {
        return Err(Error::invalid_input("query vector has non-finite values"));
    }
    let n = norm(query);
    if n == 0.0 {
        return Err(Error::invalid_input("query vector has zero norm"));
    }
    Ok(n)
}

fn score_all<'a>(
    query: &'a [f32],
    query_norm: f64,
    candidates: &'a [StoredVector],
) -> impl Iterator<Item = Scored> + 'a {
    candidates.iter().filter_map(move |candidate| {
        if candidate.embedding.len() != query.len() {
            warn!(
                id = candidate.id,
                expected = query.len(),
                actual = candidate.embedding.len(),
                "skipping memory with mismatched embedding dimension"
            );
            return None;
        }
        let candidate_norm = norm(&candidate.embedding);
        if candidate_norm == 0.0 || !candidate_norm.is_finite() {
            debug!(id = candidate.id, "skipping memory with unusable embedding");
            return None;
        }
        let score = (dot(query, &candidate.embedding) / (query_norm * candidate_norm)).clamp(-1.0, 1.0);
        Some(Scored {
            id: candidate.id,
            score,
        })
    })
}

/// Most similar candidate, or `None` when no candidate is usable.
///
/// Only a strictly higher score replaces the current best, so the first
/// candidate in iteration order wins a tie.
pub fn best_match(query: &[f32], candidates: &[StoredVector]) -> Result<Option<Scored>> {
    let query_norm = check_query(query)?;

    let best = score_all(query, query_norm, candidates).fold(None, |best: Option<Scored>, s| {
        match best {
            Some(b) if s.score <= b.score => Some(b),
            _ => Some(s),
        }
    });

    Ok(best)
}

/// Best match turned into a served/unserved answer under `policy`
pub fn find_best(
    query: &[f32],
    candidates: &[StoredVector],
    policy: MatchPolicy,
) -> Result<Match> {
    let Some(best) = best_match(query, candidates)? else {
        return Ok(Match::none());
    };

    let accepted = policy.accepts(best.score);
    debug!(
        id = best.id,
        score = best.score,
        threshold = policy.threshold,
        accepted,
        "best match"
    );

    let response = if accepted {
        candidates
            .iter()
            .find(|c| c.id == best.id)
            .map(|c| c.response.clone())
    } else {
        None
    };

    Ok(Match {
        memory_id: Some(best.id),
        response,
        score: best.score,
    })
}

/// Up to `k` candidates scoring at least `threshold`, best first, ties by id
pub fn top_matches(
    query: &[f32],
    candidates: &[StoredVector],
    k: usize,
    threshold: f64,
) -> Result<Vec<Scored>> {
    let query_norm = check_query(query)?;

    let mut results: Vec<Scored> = score_all(query, query_norm, candidates)
        .filter(|s| s.score >= threshold)
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    results.truncate(k);

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: i64, response: &str, embedding: &[f32]) -> StoredVector {
        StoredVector {
            id,
            response: response.to_string(),
            embedding: embedding.to_vec(),
        }
    }

    #[test]
    fn test_self_similarity_is_one() {
        let v = [0.3, -1.2, 4.0, 0.001];
        assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_is_zero() {
        let a = [1.0, 0.0, 0.0];
        let b = [0.0, 0.0, 2.5];
        assert!(cosine_similarity(&a, &b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_or_zero_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), None);
    }

    #[test]
    fn test_zero_query_is_rejected() {
        let candidates = vec![stored(1, "hi", &[1.0, 0.0])];
        let err = find_best(&[0.0, 0.0], &candidates, MatchPolicy::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        assert!(matches!(
            best_match(&[], &candidates),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            best_match(&[f32::NAN, 1.0], &candidates),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_no_candidates() {
        let m = find_best(&[1.0, 0.0], &[], MatchPolicy::default()).unwrap();
        assert_eq!(m, Match::none());
        assert_eq!(m.score, 0.0);
    }

    #[test]
    fn test_picks_closest() {
        let candidates = vec![stored(1, "hi", &[1.0, 0.0]), stored(2, "bye", &[0.0, 1.0])];
        let m = find_best(&[0.9, 0.1], &candidates, MatchPolicy::default()).unwrap();

        assert_eq!(m.memory_id, Some(1));
        assert_eq!(m.response.as_deref(), Some("hi"));
        assert!((m.score - 0.9939).abs() < 1e-3);
    }

    #[test]
    fn test_below_threshold_reports_score() {
        // cos = 0.4
        let candidates = vec![stored(1, "hi", &[0.4, 0.916_515_1])];
        let m = find_best(&[1.0, 0.0], &candidates, MatchPolicy::with_threshold(0.7)).unwrap();

        assert_eq!(m.response, None);
        assert_eq!(m.memory_id, Some(1));
        assert!((m.score - 0.4).abs() < 1e-6);
        assert!(!m.is_accepted());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let candidates = vec![stored(1, "hi", &[1.0, 0.0])];
        let m = find_best(&[1.0, 0.0], &candidates, MatchPolicy::with_threshold(1.0)).unwrap();
        assert!(m.is_accepted());
    }

    #[test]
    fn test_tie_goes_to_lowest_id() {
        let candidates = vec![
            stored(3, "first", &[0.0, 1.0]),
            stored(5, "second", &[0.0, 2.0]),
            stored(8, "third", &[0.0, 0.5]),
        ];
        let m = find_best(&[0.0, 1.0], &candidates, MatchPolicy::default()).unwrap();
        assert_eq!(m.memory_id, Some(3));
        assert_eq!(m.response.as_deref(), Some("first"));
    }

    #[test]
    fn test_deterministic() {
        let candidates = vec![
            stored(1, "a", &[0.2, 0.8, 0.1]),
            stored(2, "b", &[0.7, 0.1, 0.3]),
            stored(3, "c", &[0.5, 0.5, 0.5]),
        ];
        let query = [0.6, 0.3, 0.2];
        let first = find_best(&query, &candidates, MatchPolicy::default()).unwrap();
        for _ in 0..10 {
            assert_eq!(find_best(&query, &candidates, MatchPolicy::default()).unwrap(), first);
        }
    }

    #[test]
    fn test_bad_candidates_are_skipped() {
        let candidates = vec![
            stored(1, "wrong dim", &[1.0, 0.0, 0.0]),
            stored(2, "zero", &[0.0, 0.0]),
            stored(3, "ok", &[0.0, 1.0]),
        ];
        let m = find_best(&[1.0, 0.0], &candidates, MatchPolicy::with_threshold(-1.0)).unwrap();
        assert_eq!(m.memory_id, Some(3));
        assert!(m.score.abs() < 1e-6);

        let only_bad = vec![stored(1, "wrong dim", &[1.0])];
        let m = find_best(&[1.0, 0.0], &only_bad, MatchPolicy::default()).unwrap();
        assert_eq!(m, Match::none());
    }

    #[test]
    fn test_top_matches_orders_and_filters() {
        let candidates = vec![
            stored(1, "a", &[1.0, 0.0]),
            stored(2, "b", &[0.0, 1.0]),
            stored(3, "c", &[1.0, 0.1]),
            stored(4, "d", &[1.0, 0.0]),
        ];
        let results = top_matches(&[1.0, 0.0], &candidates, 2, 0.5).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 1);
        assert_eq!(results[1].id, 4);

        let all = top_matches(&[1.0, 0.0], &candidates, 10, 0.5).unwrap();
        assert_eq!(all.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 4, 3]);
    }
}
