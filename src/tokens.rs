//! Heuristic token estimation for streamed text
//!
//! Used when the server does not report usage, and to drive live progress while a
//! stream is still running. Authoritative usage always replaces these figures.

/// Average tokens per whitespace-delimited word (sub-word tokenization overhead)
pub const TOKENS_PER_WORD: f64 = 1.3;

/// Characters per token for text without word boundaries
pub const CHARS_PER_TOKEN: usize = 3;

/// Estimate how many model tokens a chunk of text represents
pub fn estimate_tokens(chunk: &str) -> u64 {
    let trimmed = chunk.trim();
    if trimmed.is_empty() {
        return 0;
    }

    let segments: Vec<&str> = trimmed.split_whitespace().collect();
    let unspaced_run = segments.len() == 1 && is_unspaced_run(segments[0]);

    let words = segments
        .iter()
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .count();
    if words > 0 && !unspaced_run {
        let estimate = (words as f64 * TOKENS_PER_WORD).round() as u64;
        return estimate.max(1);
    }

    let chars = trimmed.chars().count();
    ((chars / CHARS_PER_TOKEN) as u64).max(1)
}

// A single segment whose letters all belong to a script written without spaces,
// e.g. a run of CJK ideographs.
fn is_unspaced_run(segment: &str) -> bool {
    let mut letters = segment.chars().filter(|c| c.is_alphanumeric()).peekable();
    letters.peek().is_some() && letters.all(is_unspaced_script)
}

fn is_unspaced_script(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x30FF     // hiragana, katakana
            | 0x3400..=0x4DBF // CJK extension A
            | 0x4E00..=0x9FFF // CJK unified ideographs
            | 0xAC00..=0xD7AF // hangul syllables
            | 0xF900..=0xFAFF // CJK compatibility ideographs
            | 0x20000..=0x2FA1F
    )
}
