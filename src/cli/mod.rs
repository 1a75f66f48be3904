pub mod analysis;
pub mod config;
pub mod memory;

use recollect::Result;
use std::io::{self, Write};

/// Split a comma-separated tag list, dropping empty entries
pub fn parse_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Ask for a y/N answer on stdin
pub fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// First `max` characters on one line
pub fn preview(text: &str, max: usize) -> String {
    let mut preview: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        preview.push_str("...");
    }
    preview.replace('\n', " ")
}
