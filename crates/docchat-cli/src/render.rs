use std::fmt::Write as _;

use anyhow::Result;
use docchat_core::DocchatConfig;
use docchat_memory::RetrievedChunk;
use docchat_schema::Turn;

const PREVIEW_CHARS: usize = 160;

pub fn sources(hits: &[RetrievedChunk]) -> String {
    let mut out = String::new();
    if hits.is_empty() {
        out.push_str("Sources: none\n");
        return out;
    }
    out.push_str("Sources:\n");
    for (rank, hit) in hits.iter().enumerate() {
        let _ = writeln!(
            out,
            "  [{}] chunk {} @ char {} (distance {:.3}): {}",
            rank + 1,
            hit.chunk.index,
            hit.chunk.start,
            hit.distance,
            preview(&hit.chunk.text)
        );
    }
    out
}

pub fn history(turns: &[Turn]) -> String {
    if turns.is_empty() {
        return "(no history)\n".to_string();
    }
    let mut out = String::new();
    for turn in turns {
        let _ = writeln!(
            out,
            "{} {:>9}: {}",
            turn.at.format("%H:%M:%S"),
            turn.role,
            turn.text
        );
    }
    out
}

/// Effective configuration as YAML with secrets masked.
pub fn config_summary(config: &DocchatConfig) -> Result<String> {
    let mut shown = config.clone();
    shown.llm.api_key = mask(&shown.llm.api_key);
    shown.embedding.api_key = mask(&shown.embedding.api_key);
    Ok(serde_yaml::to_string(&shown)?)
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "***".to_string()
    }
}

fn preview(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}
