// src/matching/normalize.rs
use once_cell::sync::Lazy;
use regex::Regex;

// Anything that is neither a word character nor whitespace.
static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s]").expect("punctuation pattern is a valid regex"));

/// Canonical form of one text field before embedding: lowercased, punctuation
/// removed, whitespace collapsed to single spaces and trimmed.
///
/// Empty or punctuation-only input yields "", which the rest of the pipeline
/// treats as carrying no signal.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = PUNCTUATION.replace_all(&lowered, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
