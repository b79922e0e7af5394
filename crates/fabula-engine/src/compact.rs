// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::OnceLock;

use fabula_config::BudgetConfig;
use regex::Regex;
use serde::Serialize;

use crate::TokenEstimator;

fn numbered_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+[.)]\s*").expect("static regex"))
}

/// Sentences containing these markers are auxiliary commentary, not content
/// worth spending summary budget on.
const EXCLUDED_MARKERS: [&str; 3] = ["note:", "warning:", "important:"];

/// Tuning knobs for [`compact`].
#[derive(Debug, Clone)]
pub struct CompactOptions {
    /// Maximum key points extracted per block.
    pub max_key_points: usize,
    /// Fraction of the ceiling the sentence-fill phase may consume.
    pub fill_ratio: f64,
    /// Sentences at or below this length are skipped by the fill phase.
    pub min_sentence_len: usize,
}

impl Default for CompactOptions {
    fn default() -> Self {
        Self {
            max_key_points: 5,
            fill_ratio: 0.8,
            min_sentence_len: 20,
        }
    }
}

impl CompactOptions {
    pub fn from_budget(cfg: &BudgetConfig) -> Self {
        Self {
            max_key_points: cfg.max_key_points,
            fill_ratio: cfg.compact_fill_ratio as f64,
            min_sentence_len: cfg.min_sentence_len,
        }
    }
}

/// Which path produced the compacted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactStrategy {
    /// Input already fit; returned unchanged.
    Unchanged,
    /// Key points plus filtered sentences.
    Extractive,
    /// Word-by-word accumulation up to the ceiling.
    WordFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactMeta {
    pub compacted: bool,
    pub original_tokens: usize,
    pub strategy: CompactStrategy,
}

/// Result of one compaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Compacted {
    pub content: String,
    pub token_count: usize,
    pub key_points: Vec<String>,
    pub meta: CompactMeta,
}

/// Reduce an oversized text block to an extractive summary within
/// `max_tokens`.
///
/// Total by construction: never panics, and empty or malformed text
/// degrades to empty output.  The returned `token_count` is at most
/// `max_tokens` with one documented exception: when even the first word of
/// the fallback accumulation exceeds the ceiling on its own, that single
/// word is returned oversized rather than producing empty content.  Tests
/// pin this boundary case.
pub fn compact(
    text: &str,
    max_tokens: usize,
    opts: &CompactOptions,
    est: &dyn TokenEstimator,
) -> Compacted {
    let original_tokens = est.estimate(text);
    if original_tokens <= max_tokens {
        return Compacted {
            content: text.to_string(),
            token_count: original_tokens,
            key_points: Vec::new(),
            meta: CompactMeta {
                compacted: false,
                original_tokens,
                strategy: CompactStrategy::Unchanged,
            },
        };
    }

    let key_points = extract_key_points(text, opts.max_key_points);
    let mut summary = key_points.join(". ");

    // Fill with substantive sentences while staying under the fill ceiling.
    let fill_ceiling = (max_tokens as f64 * opts.fill_ratio) as usize;
    for sentence in sentences(text) {
        if sentence.len() <= opts.min_sentence_len || is_excluded(&sentence) {
            continue;
        }
        if summary.contains(&sentence) {
            continue;
        }
        let candidate = if summary.is_empty() {
            sentence.clone()
        } else {
            format!("{summary}. {sentence}")
        };
        if est.estimate(&candidate) > fill_ceiling {
            break;
        }
        summary = candidate;
    }

    let summary_tokens = est.estimate(&summary);
    if !summary.is_empty() && summary_tokens <= max_tokens {
        return Compacted {
            content: summary,
            token_count: summary_tokens,
            key_points,
            meta: CompactMeta {
                compacted: true,
                original_tokens,
                strategy: CompactStrategy::Extractive,
            },
        };
    }

    // Word-by-word fallback over the densest text available.
    let source = if summary.is_empty() { text } else { &summary };
    let content = accumulate_words(source, max_tokens, est);
    let token_count = est.estimate(&content);
    Compacted {
        content,
        token_count,
        key_points,
        meta: CompactMeta {
            compacted: true,
            original_tokens,
            strategy: CompactStrategy::WordFallback,
        },
    }
}

/// Bulleted lines, else numbered lines, else the first three sentences.
fn extract_key_points(text: &str, max_points: usize) -> Vec<String> {
    let bullets: Vec<String> = text
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            ["- ", "* ", "• "]
                .iter()
                .find_map(|marker| line.strip_prefix(marker))
                .map(|rest| rest.trim().trim_end_matches('.').to_string())
        })
        .filter(|p| !p.is_empty())
        .take(max_points)
        .collect();
    if !bullets.is_empty() {
        return bullets;
    }

    let numbered: Vec<String> = text
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            numbered_line().find(line).map(|m| {
                line[m.end()..].trim().trim_end_matches('.').to_string()
            })
        })
        .filter(|p| !p.is_empty())
        .take(max_points)
        .collect();
    if !numbered.is_empty() {
        return numbered;
    }

    sentences(text).take(3).collect()
}

/// Sentence split on `.!?`, trimmed, non-empty.
fn sentences(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(['.', '!', '?'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn is_excluded(sentence: &str) -> bool {
    let lower = sentence.to_lowercase();
    EXCLUDED_MARKERS.iter().any(|m| lower.contains(m))
}

/// Accumulate whole words until the next word (plus the closing ellipsis)
/// would exceed `max_tokens`.  The first word is always taken, even when it
/// alone exceeds the ceiling.
fn accumulate_words(source: &str, max_tokens: usize, est: &dyn TokenEstimator) -> String {
    let mut out = String::new();
    for word in source.split_whitespace() {
        let candidate = if out.is_empty() {
            word.to_string()
        } else {
            format!("{out} {word}")
        };
        if !out.is_empty() && est.estimate(&with_ellipsis(&candidate)) > max_tokens {
            break;
        }
        out = candidate;
    }
    with_ellipsis(&out)
}

fn with_ellipsis(text: &str) -> String {
    if text.ends_with('.') || text.is_empty() {
        text.to_string()
    } else {
        format!("{text}...")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ByteRatio;

    fn run(text: &str, max_tokens: usize) -> Compacted {
        compact(text, max_tokens, &CompactOptions::default(), &ByteRatio)
    }

    // -- pass-through --

    #[test]
    fn text_under_ceiling_is_returned_unchanged() {
        let text = "A short scene description.";
        let result = run(text, 100);
        assert_eq!(result.content, text);
        assert!(!result.meta.compacted);
        assert_eq!(result.meta.strategy, CompactStrategy::Unchanged);
        assert!(result.key_points.is_empty());
    }

    #[test]
    fn empty_text_degrades_to_empty_output() {
        let result = run("", 10);
        assert_eq!(result.content, "");
        assert_eq!(result.token_count, 0);
    }

    // -- key point extraction --

    #[test]
    fn bulleted_lines_become_key_points() {
        let text = "Intro paragraph that goes on for a while and repeats itself endlessly.\n\
                    - The mayor is secretly a revenant\n\
                    - The well is the only way into the crypt\n\
                    * Salt wards repel the drowned\n\
                    More trailing prose that pads this block well past any small ceiling, \
                    sentence after sentence after sentence.";
        let result = run(text, 30);
        assert!(result.meta.compacted);
        assert_eq!(result.key_points[0], "The mayor is secretly a revenant");
        assert_eq!(result.key_points.len(), 3);
    }

    #[test]
    fn at_most_five_key_points_are_extracted() {
        let bullets: String = (0..8)
            .map(|i| format!("- bullet point number {i} with some padding text\n"))
            .collect();
        let result = run(&bullets, 20);
        assert!(result.key_points.len() <= 5);
    }

    #[test]
    fn numbered_lines_are_used_when_no_bullets_exist() {
        let text = "A long preamble sentence that uses up plenty of characters to force compaction.\n\
                    1. Find the sunken bell\n\
                    2) Ring it at moonrise\n\
                    Closing prose with further padding to push the estimate over the ceiling for sure.";
        let result = run(text, 25);
        assert_eq!(result.key_points[0], "Find the sunken bell");
        assert_eq!(result.key_points[1], "Ring it at moonrise");
    }

    #[test]
    fn first_three_sentences_are_the_last_resort_key_points() {
        let text = "First sentence here. Second sentence here. Third sentence here. \
                    Fourth sentence that should not be a key point. Fifth padding sentence. \
                    Sixth padding sentence to exceed the ceiling comfortably and then some.";
        let result = run(text, 20);
        assert_eq!(result.key_points.len(), 3);
        assert_eq!(result.key_points[0], "First sentence here");
    }

    // -- sentence filtering --

    #[test]
    fn auxiliary_marker_sentences_are_not_filled_in() {
        let text = "- key point\n\
                    Note: this aside must never appear in the summary output at all. \
                    The drowned kingdom stretches beneath the glass sea for a hundred miles. \
                    Its people breathe brine and speak in tides, trading pearls for memories. \
                    Every festival ends with a lantern sinking ceremony at the old pier.";
        let result = run(text, 40);
        assert!(!result.content.to_lowercase().contains("this aside"));
    }

    #[test]
    fn short_sentences_are_skipped_by_the_fill_phase() {
        let text = "- anchor point\n\
                    Tiny one. The caravan crosses the salt flats only at night to avoid the glare. \
                    The navigator charges double when the twin moons are both below the horizon. \
                    Water is traded by the cup and guarded more closely than gold or letters.";
        let result = run(text, 40);
        assert!(!result.content.contains("Tiny one"));
    }

    // -- ceiling guarantee --

    #[test]
    fn compacted_output_respects_the_ceiling() {
        let text = "The archive tower holds ten thousand sealed letters. Each letter names a debt. \
                    The archivists cannot read, by oath, and sort entirely by smell. \
                    Burning a letter forgives the debt but blinds the burner for a year. \
                    Note: the tower does not appear on any municipal map. \
                    Couriers reach the tower through the chimney of an abandoned bakery."
            .repeat(4);
        for max in [10, 25, 50, 100] {
            let result = run(&text, max);
            assert!(
                result.token_count <= max,
                "ceiling {max} violated: {}",
                result.token_count
            );
        }
    }

    #[test]
    fn word_fallback_ends_with_ellipsis() {
        // No sentence punctuation at all → key points come from the sentence
        // splitter's single run, fill fails, word fallback kicks in.
        let text = "word ".repeat(400);
        let result = run(&text, 12);
        assert_eq!(result.meta.strategy, CompactStrategy::WordFallback);
        assert!(result.content.ends_with("..."));
        assert!(result.token_count <= 12);
    }

    #[test]
    fn fallback_single_oversized_word_may_exceed_ceiling() {
        // Documented boundary condition: a single word longer than the whole
        // budget is returned as-is and the ceiling is exceeded.
        let word = "x".repeat(200);
        let result = run(&word, 5);
        assert!(result.content.starts_with(&word));
        assert!(result.token_count > 5);
    }

    // -- determinism --

    #[test]
    fn compaction_is_deterministic() {
        let text = "First fact about the ruin. Second fact about the warden. \
                    Third fact about the toll. Fourth fact about the ferry."
            .repeat(3);
        let a = run(&text, 20);
        let b = run(&text, 20);
        assert_eq!(a, b);
    }
}
