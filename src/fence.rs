//! Fenced-block extraction for collaborator responses.

use std::sync::LazyLock;

use regex::Regex;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    // A fenced block, optionally language-tagged (```python, ```json, ...).
    Regex::new(r"(?s)```(?:[A-Za-z0-9_+-]*\n)?(.*?)```").expect("fence regex is valid")
});

/// Extract executable source from a collaborator response.
///
/// If the text contains a fenced block the trimmed interior of the first block
/// is returned; otherwise the whole trimmed text is taken as source.
pub fn extract_source(response: &str) -> String {
    match FENCE_RE.captures(response) {
        Some(caps) => caps[1].trim().to_string(),
        None => response.trim().to_string(),
    }
}
