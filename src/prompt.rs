//! Prompt sources for benchmark requests

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Prompt used when neither a custom prompt nor a word count is given
pub const DEFAULT_PROMPT: &str =
    "Write a long story, no less than 10,000 words, starting from a long, long time ago.";

const VOCABULARY: &[&str] = &[
    "apple", "river", "mountain", "window", "silver", "garden", "thunder", "paper",
    "engine", "forest", "candle", "bridge", "ocean", "pencil", "market", "shadow",
    "winter", "planet", "castle", "violin", "desert", "harbor", "lantern", "meadow",
    "needle", "orange", "puzzle", "quartz", "rocket", "saddle", "tunnel", "umbrella",
    "valley", "wizard", "yellow", "zebra", "anchor", "basket", "copper", "dragon",
    "feather", "glacier", "hammer", "island", "jungle", "kettle", "ladder", "mirror",
    "nectar", "oyster", "pepper", "rabbit", "signal", "timber", "velvet", "walnut",
    "cloud", "stone", "light", "music", "story", "travel", "number", "letter",
];

/// Where each request's prompt comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSource {
    /// The same literal prompt for every request
    Fixed(String),
    /// A freshly generated phrase of this many words per request
    RandomWords(usize),
}

impl PromptSource {
    /// Resolve CLI/config inputs: a custom prompt wins, then a word count, then the default
    pub fn resolve(prompt: Option<&str>, num_words: usize) -> Self {
        match prompt {
            Some(p) if !p.trim().is_empty() && p != DEFAULT_PROMPT => {
                PromptSource::Fixed(p.to_string())
            }
            _ if num_words > 0 => PromptSource::RandomWords(num_words),
            _ => PromptSource::Fixed(DEFAULT_PROMPT.to_string()),
        }
    }

    /// Produce the prompt text for one request
    pub fn render(&self) -> String {
        match self {
            PromptSource::Fixed(text) => text.clone(),
            PromptSource::RandomWords(n) => generate_random_phrase(*n, &mut rand::thread_rng()),
        }
    }
}

impl Default for PromptSource {
    fn default() -> Self {
        PromptSource::Fixed(DEFAULT_PROMPT.to_string())
    }
}

/// Build a phrase of `num_words` words drawn uniformly from the built-in vocabulary
pub fn generate_random_phrase<R: Rng + ?Sized>(num_words: usize, rng: &mut R) -> String {
    let mut words = Vec::with_capacity(num_words);
    for _ in 0..num_words {
        if let Some(word) = VOCABULARY.choose(rng) {
            words.push(*word);
        }
    }
    words.join(" ")
}
