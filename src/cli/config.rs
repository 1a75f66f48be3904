use recollect::config::{find_data_path, ProjectConfig, Settings, EMBEDDING_MODELS};
use recollect::{Error, Result};

/// Run the config command
pub fn run_config(key: Option<&str>, value: Option<&str>, list_models: bool) -> Result<()> {
    if list_models {
        print_models();
        return Ok(());
    }

    let data_path = find_data_path()
        .ok_or_else(|| Error::Config("No .recollect directory found. Run 'recollect init' first.".to_string()))?;
    let mut config = ProjectConfig::new(data_path)?;

    match (key, value) {
        (None, None) => {
            println!("Current configuration:\n");
            let settings = config.settings()?;
            let yaml = serde_yaml::to_string(&settings)?;
            for line in yaml.lines() {
                println!("  {}", line);
            }

            let extra: Vec<_> = config
                .entries()
                .filter(|(k, _)| !is_setting(k))
                .collect();
            if !extra.is_empty() {
                println!("\nOther keys:");
                for (k, v) in extra {
                    println!("  {}: {}", k, serde_yaml::to_string(v)?.trim_end());
                }
            }
        }
        (Some(k), None) => match config.get(k) {
            Some(v) => println!("{}: {}", k, v),
            None if is_setting(k) => println!("{}: (default)", k),
            None => println!("{}: (not set)", k),
        },
        (Some(k), Some(v)) => {
            config.set(k, v)?;
            println!("Set {} = {}", k, v);
            if k == "embedding_model" || k == "embedding_dim" {
                println!("\nNote: stored embeddings keep their old dimension.");
                println!("Existing memories may need to be re-learned.");
            }
        }
        (None, Some(_)) => {
            return Err(Error::Config("Key required when setting a value".to_string()));
        }
    }

    Ok(())
}

fn is_setting(key: &str) -> bool {
    serde_yaml::to_value(Settings::default())
        .ok()
        .and_then(|v| v.as_mapping().map(|m| m.contains_key(key)))
        .unwrap_or(false)
}

fn print_models() {
    let current = find_data_path()
        .and_then(|p| ProjectConfig::new(p).ok())
        .and_then(|c| c.settings().ok())
        .unwrap_or_default()
        .embedding_model;

    println!("Available embedding models:\n");
    println!("{:2} {:10} {}", "", "Name", "Description");
    println!("{}", "-".repeat(60));

    for (name, description) in EMBEDDING_MODELS {
        let marker = if *name == current { " *" } else { "  " };
        println!("{} {:10} {}", marker, name, description);
    }

    println!("\n* = currently configured");
    println!("\nSet model with: recollect config embedding_model <name>");
}
