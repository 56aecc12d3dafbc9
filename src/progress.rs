//! Live token progress feedback

use indicatif::{ProgressBar, ProgressStyle};

/// Receives incremental completion-token deltas from concurrent runners
///
/// Deltas may be negative when authoritative usage corrects an earlier estimate.
pub trait ProgressSink: Send + Sync {
    fn add_tokens(&self, delta: i64);
}

impl ProgressSink for ProgressBar {
    fn add_tokens(&self, delta: i64) {
        if delta >= 0 {
            self.inc(delta as u64);
        } else {
            self.dec(delta.unsigned_abs());
        }
    }
}

/// Progress bar for one concurrency level, sized for the worst-case token count
pub fn level_progress_bar(concurrency: usize, max_tokens: u32) -> ProgressBar {
    let expected = concurrency as u64 * max_tokens as u64;
    let bar = ProgressBar::new(expected);
    let style = ProgressStyle::default_bar()
        .template(
            "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tokens ({per_sec})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    bar.set_style(style);
    bar.set_message(format!("Concurrency {}", concurrency));
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_accepts_corrections() {
        let bar = ProgressBar::hidden();
        bar.add_tokens(10);
        bar.add_tokens(5);
        assert_eq!(bar.position(), 15);
        bar.add_tokens(-4);
        assert_eq!(bar.position(), 11);
    }

    #[test]
    fn test_concurrent_increments_and_corrections_are_not_lost() {
        let bar = ProgressBar::hidden();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..2_000 {
                        bar.add_tokens(3);
                        bar.add_tokens(-1);
                    }
                });
            }
        });
        assert_eq!(bar.position(), 8 * 2_000 * 2);
    }

    #[test]
    fn test_level_bar_length() {
        let bar = level_progress_bar(4, 512);
        assert_eq!(bar.length(), Some(2048));
        bar.finish_and_clear();
    }
}
