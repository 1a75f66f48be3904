use super::{confirm, parse_tags, preview};
use chrono::{DateTime, Duration, Utc};
use recollect::config::DATA_DIR;
use recollect::types::MemoryRecord;
use recollect::{
    CleanupFilter, Error, LearnRequest, Match, MatchPolicy, MemoryEngine, MemoryUpdate, Result,
};
use std::path::Path;

/// Run the init command
pub fn run_init(path: &str) -> Result<()> {
    let path = Path::new(path);
    let data_path = path.join(DATA_DIR);

    if data_path.exists() {
        return Err(Error::Config(format!(
            "{} already exists at {}",
            DATA_DIR,
            data_path.display()
        )));
    }

    MemoryEngine::init(path)?;
    println!("Initialized {} at {}", DATA_DIR, data_path.display());

    Ok(())
}

/// Run the learn command
pub fn run_learn(
    prompt: &str,
    response: &str,
    intent: Option<String>,
    tags: &str,
    priority: Option<u32>,
    category: Option<String>,
) -> Result<()> {
    let engine = MemoryEngine::open()?;

    let id = engine.learn_with(LearnRequest {
        prompt: prompt.to_string(),
        response: response.to_string(),
        intent,
        tags: parse_tags(tags),
        priority,
        category,
    })?;

    if let Some(m) = engine.get(id)? {
        println!("Learned [{}] intent: {}", id, m.intent);
        if !m.tags.is_empty() {
            println!("  tags: {}", m.tags.join(", "));
        }
    }

    Ok(())
}

fn policy(engine: &MemoryEngine, threshold: Option<f64>) -> MatchPolicy {
    MatchPolicy::with_threshold(threshold.unwrap_or(engine.settings().confidence_threshold))
}

fn print_match(found: &Match, threshold: f64) {
    match (&found.response, found.memory_id) {
        (Some(response), Some(id)) => {
            println!("{}", response);
            println!("\n[{}] score: {:.3}", id, found.score);
        }
        (None, Some(id)) => {
            println!(
                "No confident match (best [{}] scored {:.3}, threshold {:.2})",
                id, found.score, threshold
            );
        }
        _ => println!("Nothing learned yet. Add one with: recollect learn \"...\" \"...\""),
    }
}

/// Run the ask command
pub fn run_ask(query: &str, threshold: Option<f64>) -> Result<()> {
    let engine = MemoryEngine::open()?;
    let policy = policy(&engine, threshold);

    let found = engine.respond_with(query, policy)?;
    print_match(&found, policy.threshold);

    Ok(())
}

/// Run the find command
pub fn run_find(query: &str, threshold: Option<f64>) -> Result<()> {
    let engine = MemoryEngine::open()?;
    let policy = policy(&engine, threshold);

    let found = engine.find_best_with(query, policy)?;
    print_match(&found, policy.threshold);

    Ok(())
}

/// Run the similar command
pub fn run_similar(query: &str, limit: usize) -> Result<()> {
    let engine = MemoryEngine::open()?;
    let results = engine.similar(query, limit)?;

    if results.is_empty() {
        println!("No matching memories.");
        return Ok(());
    }

    for (m, score) in results {
        print_memory_with_score(&m, score);
    }

    Ok(())
}

/// Run the show command
pub fn run_show(id: i64) -> Result<()> {
    let engine = MemoryEngine::open()?;
    let m = engine.get(id)?.ok_or(Error::NotFound(id))?;

    println!("[{}] {}", m.id, m.intent);
    println!("  prompt:    {}", m.prompt);
    println!("  response:  {}", m.response);
    println!("  category:  {}", m.category);
    println!("  priority:  {}", m.priority);
    if !m.tags.is_empty() {
        println!("  tags:      {}", m.tags.join(", "));
    }
    println!("  created:   {}", m.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  used:      {} times", m.usage_count);
    if let Some(last) = m.last_used {
        println!("  last used: {}", last.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(score) = m.match_score() {
        println!("  avg score: {:.3}", score);
    }
    match (&m.embedding, m.embedding_stale) {
        (None, _) => println!("  embedding: none"),
        (Some(_), true) => println!("  embedding: stale (run: recollect reembed)"),
        (Some(v), false) => println!("  embedding: {} dims", v.len()),
    }

    Ok(())
}

/// Run the list command
pub fn run_list(limit: usize, offset: usize) -> Result<()> {
    let engine = MemoryEngine::open()?;
    let memories = engine.list(Some(limit), offset)?;

    if memories.is_empty() {
        println!("No memories yet.");
        return Ok(());
    }

    for m in memories {
        print_memory(&m);
    }

    Ok(())
}

/// Run the update command
pub fn run_update(id: i64, update: MemoryUpdate) -> Result<()> {
    let engine = MemoryEngine::open()?;

    if update.is_empty() {
        return Err(Error::validation("nothing to update"));
    }
    let prompt_changed = update.prompt.is_some();

    if !engine.update(id, update)? {
        return Err(Error::NotFound(id));
    }

    println!("Updated [{}]", id);
    if prompt_changed && engine.get(id)?.is_some_and(|m| m.embedding_stale) {
        println!("  prompt changed; run 'recollect reembed' to refresh its embedding");
    }

    Ok(())
}

/// Run the forget command
pub fn run_forget(id: i64, force: bool) -> Result<()> {
    let engine = MemoryEngine::open()?;
    let m = engine.get(id)?.ok_or(Error::NotFound(id))?;

    if !force {
        println!("Forget [{}]:", id);
        println!("  {}", preview(&m.prompt, 100));

        if !confirm("Confirm?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    engine.delete(id)?;
    println!("Forgotten [{}]", id);

    Ok(())
}

/// Run the feedback command
pub fn run_feedback(id: i64, score: Option<f64>) -> Result<()> {
    let engine = MemoryEngine::open()?;

    if !engine.record_feedback(id, score)? {
        return Err(Error::NotFound(id));
    }
    println!("Recorded use of [{}]", id);

    Ok(())
}

/// Cutoff for `--older-than-days`
pub fn cutoff_days_ago(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    if days < 0 {
        return Err(Error::validation("--older-than-days must not be negative"));
    }
    Duration::try_days(days)
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| Error::validation("--older-than-days out of range"))
}

/// Run the cleanup command
pub fn run_cleanup(older_than_days: Option<i64>, mut filter: CleanupFilter, force: bool) -> Result<()> {
    filter.older_than = older_than_days
        .map(|days| cutoff_days_ago(Utc::now(), days))
        .transpose()?;
    if filter.is_empty() {
        return Err(Error::validation(
            "give at least one criterion, or --all to delete everything",
        ));
    }

    let engine = MemoryEngine::open()?;
    if !force && !confirm("Delete every memory matching these criteria?")? {
        println!("Cancelled.");
        return Ok(());
    }

    let count = engine.cleanup(&filter)?;
    println!("Deleted {} memories", count);

    Ok(())
}

/// Run the cleanup command with --all
pub fn run_clear(force: bool) -> Result<()> {
    let engine = MemoryEngine::open()?;
    if !force && !confirm("Delete ALL memories and match history?")? {
        println!("Cancelled.");
        return Ok(());
    }

    let count = engine.clear_all()?;
    println!("Deleted {} memories", count);

    Ok(())
}

/// Run the dedupe command
pub fn run_dedupe() -> Result<()> {
    let engine = MemoryEngine::open()?;
    let count = engine.remove_duplicates()?;
    println!("Removed {} duplicates", count);
    Ok(())
}

/// Run the reembed command
pub fn run_reembed() -> Result<()> {
    let engine = MemoryEngine::open()?;
    let count = engine.refresh_stale()?;
    println!("Re-embedded {} memories with {}", count, engine.embedder_name());
    Ok(())
}

/// Run the history command
pub fn run_history(id: i64) -> Result<()> {
    let engine = MemoryEngine::open()?;
    let history = engine.history(id)?;

    if history.is_empty() {
        println!("No match attempts recorded for [{}].", id);
        return Ok(());
    }

    for entry in history {
        println!(
            "{} {:.3} {} {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.score,
            if entry.accepted { "served " } else { "skipped" },
            preview(&entry.query, 80)
        );
    }

    Ok(())
}

/// Run the tags command
pub fn run_tags() -> Result<()> {
    let engine = MemoryEngine::open()?;
    let tags = engine.tags()?;

    if tags.is_empty() {
        println!("No tags yet.");
        return Ok(());
    }

    println!("Tags:\n");
    for (tag, count) in tags {
        println!("  {:20} ({})", tag, count);
    }

    Ok(())
}

/// Run the export command
pub fn run_export() -> Result<()> {
    let engine = MemoryEngine::open()?;
    let memories = engine.export_all()?;
    println!("{}", serde_json::to_string_pretty(&memories)?);
    Ok(())
}

pub(super) fn print_memory(m: &MemoryRecord) {
    println!(
        "[{}] {} (priority {}, used {})",
        m.id, m.intent, m.priority, m.usage_count
    );

    if !m.tags.is_empty() {
        println!("    tags: {}", m.tags.join(", "));
    }

    println!("    Q: {}", preview(&m.prompt, 200));
    println!("    A: {}\n", preview(&m.response, 200));
}

fn print_memory_with_score(m: &MemoryRecord, score: f64) {
    println!("[{}] score: {:.3}, intent: {}", m.id, score, m.intent);
    println!("    Q: {}", preview(&m.prompt, 200));
    println!("    A: {}\n", preview(&m.response, 200));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cutoff_days_ago() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        assert_eq!(
            cutoff_days_ago(now, 9).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(cutoff_days_ago(now, 0).unwrap(), now);
    }

    #[test]
    fn test_cutoff_days_ago_out_of_range() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        for days in [100_000_000, 999_999_999_999_999, i64::MAX, -1] {
            assert!(matches!(
                cutoff_days_ago(now, days),
                Err(Error::Validation(_))
            ));
        }
    }

    #[test]
    fn test_cleanup_rejects_bad_age_before_opening_store() {
        let result = run_cleanup(Some(100_000_000), CleanupFilter::default(), true);
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
