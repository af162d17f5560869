//! Pre-write screen for sensitive content, plus output sanitization.
//!
//! Learnings carry raw tool output, which can include secrets the user has
//! tagged as private. A marker hit anywhere in the content or the raw
//! outcome payload skips the write entirely; nothing is embedded, nothing
//! is stored. This runs strictly before the embedding cache is consulted,
//! so private text is never vectorized either.

use regex::Regex;
use std::sync::LazyLock;

static PRIVATE_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)<private>").unwrap(),
        Regex::new(r"(?i)\[private\]").unwrap(),
        Regex::new(r"(?i)\bmnemon:\s*no-store\b").unwrap(),
    ]
});

/// True if the text carries a private-content marker anywhere.
pub fn contains_private_marker(text: &str) -> bool {
    PRIVATE_MARKERS.iter().any(|re| re.is_match(text))
}

/// Screen a learning before any embedding or persistence. Suppression is a
/// deliberate no-op, not an error; callers log a notice at most.
pub fn should_suppress(content: &str, payload: &str) -> bool {
    contains_private_marker(content) || contains_private_marker(payload)
}

/// Sanitize content for safe inclusion in LLM context. Strips special tokens
/// that could be interpreted as control sequences by various model formats.
/// The original content in the store is left untouched; this only affects
/// output.
pub fn sanitize_for_output(content: &str) -> String {
    content
        .replace("<|im_start|>", "")
        .replace("<|im_end|>", "")
        .replace("<<SYS>>", "")
        .replace("[INST]", "")
        .replace("[/INST]", "")
}

#[cfg(test)]
#[path = "privacy_tests.rs"]
mod tests;
