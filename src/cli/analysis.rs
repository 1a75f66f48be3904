use super::memory::print_memory;
use recollect::stats::HIGH_PRIORITY;
use recollect::{MemoryEngine, Result};

/// Run the classify command
pub fn run_classify(text: &str) -> Result<()> {
    let engine = MemoryEngine::open()?;
    let c = engine.classify(text)?;
    println!("{} ({:.3})", c.label, c.score);
    Ok(())
}

/// Run the clusters command
pub fn run_clusters(threshold: Option<f64>) -> Result<()> {
    let engine = MemoryEngine::open()?;
    let groups = engine.clusters(threshold)?;

    if groups.is_empty() {
        println!("No similar intents found.");
        return Ok(());
    }

    for (i, group) in groups.iter().enumerate() {
        println!("{:3}. {}", i + 1, group.join(", "));
    }

    Ok(())
}

/// Run the intents command
pub fn run_intents(transitions: bool) -> Result<()> {
    let engine = MemoryEngine::open()?;

    if transitions {
        let matrix = engine.transitions()?;
        if matrix.is_empty() {
            println!("No served answers recorded yet.");
            return Ok(());
        }
        let mut sources: Vec<&str> = Vec::new();
        for (from, to, count) in matrix.iter() {
            println!("  {:20} -> {:20} {}", from, to, count);
            if sources.last() != Some(&from) {
                sources.push(from);
            }
        }

        println!("\nLikely next:");
        for from in sources {
            if let Some(next) = matrix.suggest_next(from) {
                println!("  {:20} -> {}", from, next);
            }
        }
        return Ok(());
    }

    let stats = engine.intent_stats()?;
    if stats.is_empty() {
        println!("No memories yet.");
        return Ok(());
    }

    println!(
        "  {:20} {:>8} {:>8} {:>8} {:>7}",
        "Intent", "Memories", "Attempts", "Served", "Rate"
    );
    println!("{}", "-".repeat(60));
    for s in stats {
        println!(
            "  {:20} {:>8} {:>8} {:>8} {:>6.0}%",
            s.name,
            s.memories,
            s.attempts,
            s.successes,
            s.success_rate * 100.0
        );
    }

    Ok(())
}

/// Run the stats command
pub fn run_stats(top: usize) -> Result<()> {
    let engine = MemoryEngine::open()?;
    let stats = engine.stats()?;

    println!("Memory Statistics");
    println!("=================\n");

    println!("Total memories:  {}", stats.total_memories);
    println!("With embeddings: {}", stats.with_embeddings);
    if stats.stale > 0 {
        println!("Stale:           {}", stats.stale);
    }
    println!("Total uses:      {}", stats.total_usage);
    println!("Avg priority:    {:.2}", stats.avg_priority);
    if let Some(path) = engine.data_path() {
        println!("Data directory:  {}", path.display());
    }
    println!("Embedder:        {}", engine.embedder_name());
    if let Some(dim) = engine.dimension()? {
        println!("Dimensions:      {}", dim);
    }

    if !stats.by_intent.is_empty() {
        println!("\nTop intents:");
        let mut intents: Vec<_> = stats.by_intent.iter().collect();
        intents.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

        for (intent, count) in intents.iter().take(10) {
            println!("  {:20} {}", intent, count);
        }
    }

    let important = engine.important(top)?;
    if !important.is_empty() {
        println!("\nMost valuable:\n");
        for m in &important {
            print_memory(m);
        }
    }

    let unused = engine.unused(HIGH_PRIORITY)?;
    if !unused.is_empty() {
        println!("Never used (priority {}+):\n", HIGH_PRIORITY);
        for m in &unused {
            print_memory(m);
        }
    }

    Ok(())
}
